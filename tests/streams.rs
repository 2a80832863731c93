use std::fs;
use std::path::PathBuf;

use mesi_sim::mesi::*;
use mesi_sim::utils;
use mesi_sim::SimError;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mesi-sim-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn loads_one_file_per_core() {
    let dir = scratch_dir("load");
    fs::write(dir.join("input_0.txt"), "WR 5 7\nRD 5\n").unwrap();
    fs::write(dir.join("input_1.txt"), "RD 5\nnot an instruction\nWR 2 -1\n").unwrap();
    let spec = SystemSpec { num_cores: 2, input_dir: dir.clone(), ..Default::default() };

    let streams = utils::load_streams(&spec);
    use Operation::{Read, Write};
    assert_eq!(streams[0], vec![Write { addr: 5, value: 7 }, Read { addr: 5 }]);
    assert_eq!(streams[1], vec![Read { addr: 5 }, Write { addr: 2, value: -1 }]);

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn missing_file_is_not_fatal() {
    let dir = scratch_dir("missing");
    fs::write(dir.join("input_0.txt"), "WR 1 3\nRD 1\nRD 30\n").unwrap();
    let spec = SystemSpec { num_cores: 2, input_dir: dir.clone(), ..Default::default() };

    assert!(matches!(
        utils::read_instruction_file(&spec, 1),
        Err(SimError::StreamOpen { core: 1, .. })
    ));

    let streams = utils::load_streams(&spec);
    assert!(streams[1].is_empty());

    let sim = Simulation::new(spec).unwrap();
    let sink = CollectingSink::new();
    let stats = sim.run(streams, &sink);
    assert_eq!(sink.for_core(0).len(), 2);
    assert!(sink.for_core(1).is_empty());
    assert_eq!(stats[0].rejected, 1);
    assert_eq!(stats[1], CoreStats::default());

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn trace_line_has_everything() {
    let sim = Simulation::new(SystemSpec::default()).unwrap();
    let a = sim.spec().addr(5).unwrap();
    let line = sim.manager(0).write(a, 42).to_string();
    assert_eq!(line, "core 0: WR 5: 42 [miss I -> M]");
    let line = sim.manager(0).read(a).to_string();
    assert_eq!(line, "core 0: RD 5: 42 [hit M -> M]");
}

#[test]
fn report_lists_caches_and_memory() {
    let sim = Simulation::new(SystemSpec::default()).unwrap();
    sim.manager(0).write(sim.spec().addr(3).unwrap(), 9);
    let report = sim.snapshot().to_string();
    assert!(report.contains("core 0 cache:"));
    assert!(report.contains("slot 0: empty"));
    assert!(report.contains("slot 1: address 3, state M, value 9"));
    assert!(report.starts_with("core 0"));
    assert!(report.ends_with(']'));
}
