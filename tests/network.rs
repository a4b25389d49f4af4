use std::fs;
use std::path::PathBuf;

use radio_medium_simulator::common::noise::NoiseTrace;
use radio_medium_simulator::common::scenario::{load_scenario, parse_scenario};
use radio_medium_simulator::simulation::Network;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("radio-medium-simulator-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

#[test]
fn shared_channel_counts_deliveries_and_backoffs() {
    let scenario = parse_scenario(
        r#"{
            "duration_ms": 200,
            "clock_hz": 8000000,
            "seed": 3,
            "nodes": [
                { "name": "alpha", "send_interval_ms": 10, "payload_length": 30 },
                { "name": "beta", "send_interval_ms": 10, "payload_length": 30 },
                { "name": "sink", "send_interval_ms": 0 }
            ]
        }"#,
        true,
    )
    .expect("scenario parses");

    let report = Network::build(&scenario, None, NoiseTrace::default())
        .expect("network builds")
        .run()
        .expect("network runs");

    assert_eq!(report.nodes.len(), 3);
    let alpha = report.node("alpha").expect("alpha");
    let beta = report.node("beta").expect("beta");
    let sink = report.node("sink").expect("sink");

    assert!(alpha.frames_sent >= 10);
    assert!(beta.frames_sent >= 10);
    assert_eq!(sink.frames_sent, 0);
    assert!(sink.frames_received > 0);
    assert!(sink.frames_received <= alpha.frames_sent + beta.frames_sent);
    // The basic channel hears every transmitter at 0 dBm.
    let rssi = sink.mean_rssi_dbm.expect("sink measured rssi");
    assert!((0.0..3.1).contains(&rssi), "mean rssi {}", rssi);
    // Listening costs energy for every node.
    assert!(report.nodes.iter().all(|n| n.energy.receive_seconds() > 0.1));
}

#[test]
fn scenario_files_drive_a_lossy_run() {
    let dir = scratch_dir("lossy");
    fs::write(dir.join("room.top"), "# name x y z rho\nsender 0 0 0 0\nreceiver 1 0 0 0\n").expect("write topology");
    fs::write(dir.join("quiet.noise"), "-98\n-97\n-99\n").expect("write noise");
    fs::write(
        dir.join("run.toml"),
        r#"
        duration_ms = 150
        clock_hz = 8000000
        seed = 21
        topology = "room.top"
        noise = "quiet.noise"

        [arbitrator]
        model = "lossy"

        [[nodes]]
        name = "sender"
        send_interval_ms = 10

        [[nodes]]
        name = "receiver"
        send_interval_ms = 0
        "#,
    )
    .expect("write scenario");

    let scenario = load_scenario(&dir.join("run.toml")).expect("scenario loads");
    assert_eq!(scenario.topology.as_deref(), Some(dir.join("room.top").as_path()));
    let topology = scenario.load_topology().expect("topology loads");
    let noise = scenario.load_noise().expect("noise loads");
    assert_eq!(noise.len(), 3);

    let report = Network::build(&scenario, topology.as_ref(), noise)
        .expect("network builds")
        .run()
        .expect("network runs");

    let sender = report.node("sender").expect("sender");
    let receiver = report.node("receiver").expect("receiver");
    assert!(sender.frames_sent >= 10);
    assert!(receiver.frames_received >= 1);
    assert!(receiver.frames_received <= sender.frames_sent);
    let rssi = receiver.mean_rssi_dbm.expect("receiver measured rssi");
    assert!(rssi < 0.0);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn position_models_require_a_topology() {
    let scenario = parse_scenario(
        r#"
        duration_ms = 10
        topology = "missing.top"
        arbitrator = { model = "lossy" }
        nodes = [{ name = "solo" }]
        "#,
        false,
    )
    .expect("scenario parses");
    assert!(Network::build(&scenario, None, NoiseTrace::default()).is_err());
}
