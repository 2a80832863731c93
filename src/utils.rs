use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::error::SimError;
use crate::mesi::{Instructions, Operation, SystemSpec, Value};

/// Parse one instruction line: `RD <addr>` or `WR <addr> <value>`.
pub fn parse_line(line: &str) -> Result<Operation, SimError> {
    let err = |reason: &'static str| SimError::Parse { line: line.to_string(), reason };
    let parts = line.split_whitespace().collect::<Vec<_>>();
    let addr = |s: &str| s.parse::<i64>().map_err(|_| err("address is not an integer"));
    match parts.as_slice() {
        ["RD", a] => Ok(Operation::Read { addr: addr(*a)? }),
        ["WR", a, v] => {
            let value = v
                .parse::<i64>()
                .ok()
                .and_then(|v| Value::try_from(v).ok())
                .ok_or_else(|| err("value is not a signed byte"))?;
            Ok(Operation::Write { addr: addr(*a)?, value })
        }
        ["RD", ..] | ["WR", ..] => Err(err("wrong number of operands")),
        [] => Err(err("empty line")),
        _ => Err(err("unknown instruction")),
    }
}

/// Parse a whole stream, skipping lines that do not match the grammar.
pub fn parse_instructions(text: &str) -> Instructions {
    text.lines()
        .filter_map(|line| match parse_line(line) {
            Ok(op) => Some(op),
            Err(e) => {
                debug!("{e}");
                None
            }
        })
        .collect()
}

pub fn core_input_path(spec: &SystemSpec, core: usize) -> PathBuf {
    spec.input_dir.join(format!("{}{core}.txt", spec.input_prefix))
}

pub fn read_instruction_file(spec: &SystemSpec, core: usize) -> Result<Instructions, SimError> {
    let path = core_input_path(spec, core);
    let text = fs::read_to_string(&path)
        .map_err(|source| SimError::StreamOpen { core, path, source })?;
    Ok(parse_instructions(&text))
}

/// One stream per core. A core whose file cannot be read gets an empty
/// stream and the run goes on without it.
pub fn load_streams(spec: &SystemSpec) -> Vec<Instructions> {
    (0..spec.num_cores)
        .map(|core| match read_instruction_file(spec, core) {
            Ok(insts) => {
                info!("core {core}: loaded {} instructions", insts.len());
                insts
            }
            Err(e) => {
                warn!("{e}");
                Vec::new()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_forms() {
        assert_eq!(parse_line("RD 5").unwrap(), Operation::Read { addr: 5 });
        assert_eq!(parse_line("  WR 3   -7 ").unwrap(), Operation::Write { addr: 3, value: -7 });
        // bounds are checked later, not by the parser
        assert_eq!(parse_line("RD 99").unwrap(), Operation::Read { addr: 99 });
        assert_eq!(parse_line("RD -1").unwrap(), Operation::Read { addr: -1 });
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in ["", "NOP 1", "RD", "RD x", "WR 1", "WR 1 2 3", "WR 1 128", "rd 1"] {
            assert!(matches!(parse_line(line), Err(SimError::Parse { .. })), "{line:?}");
        }
    }

    #[test]
    fn skips_bad_lines_in_stream() {
        let insts = parse_instructions("WR 5 42\ngarbage\n\nRD 5\n");
        assert_eq!(
            insts,
            vec![Operation::Write { addr: 5, value: 42 }, Operation::Read { addr: 5 }]
        );
    }

    #[test]
    fn input_file_naming() {
        let spec = SystemSpec::default();
        assert_eq!(core_input_path(&spec, 3), PathBuf::from("./input_3.txt"));
    }
}
