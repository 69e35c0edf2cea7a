//! End-to-end lifecycle tests driving the runner over a real socketpair,
//! playing the host side of the protocol by hand.

#![cfg(unix)]

use monitor_runner::{
    sample, ConfigureResult, FrameReader, Message, MessageType, MessageWriter, PluginRegistry,
    Runner, TransportError,
};
use serde_json::json;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Host {
    reader: FrameReader<UnixStream>,
    writer: MessageWriter,
    child: Option<JoinHandle<Result<(), monitor_runner::RunnerError>>>,
}

/// Spawns the runner on its own thread with the sample registry, handing
/// back the host's side of the pipes.
fn launch_runner() -> Host {
    let (host_side, child_side) = UnixStream::pair().unwrap();

    let child_reader = child_side.try_clone().unwrap();
    let mut registry = PluginRegistry::new();
    sample::register_samples(&mut registry);
    let runner = Runner::new(
        FrameReader::new(child_reader),
        MessageWriter::new(child_side),
        registry,
    );
    let child = thread::spawn(move || runner.run());

    let writer = MessageWriter::new(host_side.try_clone().unwrap());
    Host {
        reader: FrameReader::new(host_side),
        writer,
        child: Some(child),
    }
}

impl Host {
    /// Reads frames, skipping the Log stream, until the next non-Log one.
    fn read_skipping_logs(&mut self) -> Message {
        loop {
            let message = self.reader.read().unwrap();
            if message.mtype != MessageType::Log {
                return message;
            }
        }
    }

    fn expect_configure_ok(&mut self) {
        let message = self.read_skipping_logs();
        assert_eq!(message.mtype, MessageType::ConfigureResult);
        let result: ConfigureResult = serde_json::from_value(message.payload).unwrap();
        assert_eq!(result.error, None);
    }

    fn drain_to_eof(&mut self) {
        loop {
            match self.reader.read() {
                Ok(_) => continue,
                Err(TransportError::Closed) => return,
                Err(e) => panic!("unexpected transport error: {:?}", e),
            }
        }
    }
}

#[test]
fn simple_plugin_full_lifecycle() {
    let mut host = launch_runner();

    host.writer
        .write(
            MessageType::Configure,
            &json!({
                "adapter": "simple",
                "plugin": "sample-gauge",
                "intervalSeconds": 0.1,
            }),
        )
        .unwrap();
    host.expect_configure_ok();

    // One datapoint per tick at 100ms; three frames shows the interval
    // cadence actually repeats.
    let mut seen = 0;
    while seen < 3 {
        let message = host.read_skipping_logs();
        assert_eq!(message.mtype, MessageType::DatapointList);
        let gauges = message.payload["gauge"].as_array().unwrap();
        assert_eq!(gauges[0]["metric"], "sample.calls");
        assert_eq!(gauges[0]["dimensions"]["a"], "1");
        seen += 1;
    }

    host.writer.write_empty(MessageType::Shutdown).unwrap();
    host.child.take().unwrap().join().unwrap().unwrap();
    host.drain_to_eof();
}

#[test]
fn collectd_plugin_full_lifecycle() {
    let types_db = tempfile::NamedTempFile::new().unwrap();
    types_db
        .as_file()
        .write_all(b"# minimal types for the sample plugin\ngauge value:GAUGE:U:U\n")
        .unwrap();

    let mut host = launch_runner();
    host.writer
        .write(
            MessageType::Configure,
            &json!({
                "adapter": "collectd",
                "plugin": "sample-collectd",
                "intervalSeconds": 0.1,
                "pluginConfig": {"Instance": "it"},
                "typesDBPaths": [types_db.path()],
            }),
        )
        .unwrap();
    host.expect_configure_ok();

    let mut last_tick = 0.0;
    for _ in 0..3 {
        let message = host.read_skipping_logs();
        assert_eq!(message.mtype, MessageType::ValueList);
        assert_eq!(message.payload["type"], "gauge");
        assert_eq!(message.payload["plugin"], "sample_collectd");
        assert_eq!(message.payload["plugin_instance"], "it");
        assert_eq!(message.payload["dsnames"], json!(["value"]));
        assert_eq!(message.payload["dstypes"], json!(["GAUGE"]));

        let tick = message.payload["values"][0].as_f64().unwrap();
        assert!(tick > last_tick, "ticks should increase: {} vs {}", tick, last_tick);
        last_tick = tick;
    }

    host.writer.write_empty(MessageType::Shutdown).unwrap();
    host.child.take().unwrap().join().unwrap().unwrap();
    host.drain_to_eof();
}

#[test]
fn monitor_plugin_full_lifecycle() {
    let mut host = launch_runner();
    host.writer
        .write(
            MessageType::Configure,
            &json!({
                "adapter": "simple",
                "plugin": "sample-monitor",
                "intervalSeconds": 0.1,
            }),
        )
        .unwrap();
    host.expect_configure_ok();

    let message = host.read_skipping_logs();
    assert_eq!(message.mtype, MessageType::DatapointList);
    assert_eq!(message.payload["gauge"][0]["metric"], "sample.monitor.gauge");

    host.writer.write_empty(MessageType::Shutdown).unwrap();
    host.child.take().unwrap().join().unwrap().unwrap();
}

#[test]
fn configure_failure_reports_and_exits_without_running() {
    let mut host = launch_runner();
    host.writer
        .write(
            MessageType::Configure,
            &json!({
                "adapter": "simple",
                "plugin": "no-such-plugin",
                "intervalSeconds": 1.0,
            }),
        )
        .unwrap();

    let message = host.read_skipping_logs();
    assert_eq!(message.mtype, MessageType::ConfigureResult);
    let result: ConfigureResult = serde_json::from_value(message.payload).unwrap();
    assert!(result.error.unwrap().contains("no-such-plugin"));

    // The runner exits on its own; no Shutdown message was ever sent.
    host.child.take().unwrap().join().unwrap().unwrap();
    host.drain_to_eof();
}

#[test]
fn shutdown_completes_within_the_grace_period() {
    let mut host = launch_runner();
    host.writer
        .write(
            MessageType::Configure,
            &json!({
                "adapter": "simple",
                "plugin": "sample-gauge",
                "intervalSeconds": 0.05,
            }),
        )
        .unwrap();
    host.expect_configure_ok();

    thread::sleep(Duration::from_millis(120));
    host.writer.write_empty(MessageType::Shutdown).unwrap();

    let waited = std::time::Instant::now();
    host.child.take().unwrap().join().unwrap().unwrap();
    assert!(waited.elapsed() < monitor_runner::STOP_GRACE);
}
