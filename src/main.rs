use std::ffi::OsString;
use std::time::Instant;

use clap::error::ErrorKind;
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use mesi_sim::mesi::{Simulation, StdoutSink, SystemSpec};
use mesi_sim::utils;

/// Simulate MESI coherence between private caches of several cores.
///
/// Core `n` reads its instructions from `input_<n>.txt`.
#[derive(Parser, Debug)]
#[command(name = "mesi-sim")]
struct Args {
    /// Number of cores to run.
    #[arg(default_value_t = 1)]
    cores: usize,

    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    extra: Vec<String>,
}

impl Default for Args {
    fn default() -> Self {
        Args { cores: 1, extra: Vec::new() }
    }
}

/// Parse the command line leniently: anything unusable runs one core and
/// extra arguments are ignored. Only help and version requests come back as
/// errors, for the caller to print.
fn parse_args<I, T>(args: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Args::try_parse_from(args) {
        Ok(args) => {
            if !args.extra.is_empty() {
                warn!("ignoring extra arguments {:?}", args.extra);
            }
            Ok(args)
        }
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => Err(e),
        Err(e) => {
            warn!("bad arguments, running one core: {:?}", e.kind());
            Ok(Args::default())
        }
    }
}

fn main() {
    // logging
    let env = Env::default()
        .filter_or("MESI_LOG_LEVEL", "info")
        .write_style_or("MESI_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return;
        }
    };

    let spec = SystemSpec { num_cores: args.cores, ..SystemSpec::from_env() };
    let sim = match Simulation::new(spec) {
        Ok(sim) => sim,
        Err(e) => {
            error!("{e}");
            return;
        }
    };
    info!(
        "{} core(s), {} bytes of memory, {} cache lines per core",
        sim.num_cores(),
        sim.spec().memory_size,
        sim.spec().cache_size
    );

    let streams = utils::load_streams(sim.spec());

    let t0 = Instant::now();
    let stats = sim.run(streams, &StdoutSink);
    let t1 = Instant::now();

    // print stats
    for (core, s) in stats.iter().enumerate() {
        println!("core {core}: {s}");
    }
    println!("{}", sim.snapshot());
    info!("execution time {:?}", t1 - t0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cores(argv: &[&str]) -> usize {
        parse_args(argv.iter().copied()).unwrap().cores
    }

    #[test]
    fn core_count_is_positional() {
        assert_eq!(cores(&["mesi-sim"]), 1);
        assert_eq!(cores(&["mesi-sim", "3"]), 3);
    }

    #[test]
    fn unparsable_count_runs_one_core() {
        assert_eq!(cores(&["mesi-sim", "abc"]), 1);
        assert_eq!(cores(&["mesi-sim", "2.5"]), 1);
    }

    #[test]
    fn extra_arguments_are_ignored() {
        assert_eq!(cores(&["mesi-sim", "2", "3"]), 2);
        assert_eq!(cores(&["mesi-sim", "4", "x", "y"]), 4);
    }

    #[test]
    fn help_is_not_swallowed() {
        let e = parse_args(["mesi-sim", "--help"]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DisplayHelp);
    }
}
