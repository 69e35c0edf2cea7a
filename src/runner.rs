//! The top-level state machine tying transport, adapters, and schedulers
//! into the Configure → Run → Shutdown lifecycle of the child process.

use crate::adapters::{self, Adapter};
use crate::errors::{ConfigurationError, ProtocolError, RunnerError, TransportError};
use crate::messages::{ConfigureRequest, ConfigureResult};
use crate::output::Output;
use crate::plugins::PluginRegistry;
use crate::transport::{FrameReader, MessageType, MessageWriter};
use log::{debug, error, info};
use std::io::Read;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RunnerState {
    AwaitingConfigure,
    Configuring,
    Running,
    AwaitingShutdown,
    Stopped,
}

pub struct Runner<R> {
    reader: FrameReader<R>,
    writer: MessageWriter,
    registry: PluginRegistry,
    state: RunnerState,
}

impl<R: Read> Runner<R> {
    pub fn new(reader: FrameReader<R>, writer: MessageWriter, registry: PluginRegistry) -> Runner<R> {
        Runner {
            reader,
            writer,
            registry,
            state: RunnerState::AwaitingConfigure,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Drives the whole lifecycle. Returns when the host sent Shutdown and
    /// the plugin wound down, or with a fatal error (protocol violation,
    /// dead pipe, stuck scheduler).
    ///
    /// Configuration failures are not errors of this function: they are
    /// reported to the host in the ConfigureResult message, after which the
    /// runner stops cleanly without ever entering `Running`.
    pub fn run(mut self) -> Result<(), RunnerError> {
        let message = self.reader.read()?;
        if message.mtype != MessageType::Configure {
            return Err(TransportError::from(ProtocolError::UnexpectedMessage {
                got: message.mtype,
                state: "awaiting configure",
            })
            .into());
        }

        self.state = RunnerState::Configuring;

        // Constructed here so the send guard pins this thread as the one
        // configuration runs on.
        let output = Output::new(self.writer.clone());

        let mut adapter = match self.configure_adapter(message.payload, &output) {
            Ok(adapter) => adapter,
            Err(e) => {
                let report = error_chain(&e);
                error!("configuration failed: {}", report);
                self.writer.write(
                    MessageType::ConfigureResult,
                    &ConfigureResult {
                        error: Some(report),
                    },
                )?;
                self.state = RunnerState::Stopped;
                return Ok(());
            }
        };

        self.writer
            .write(MessageType::ConfigureResult, &ConfigureResult { error: None })?;
        output.mark_ready();

        adapter.start();
        self.state = RunnerState::Running;
        info!("plugin configured, reads started");

        self.state = RunnerState::AwaitingShutdown;
        let message = self.reader.read()?;
        if message.mtype != MessageType::Shutdown {
            return Err(TransportError::from(ProtocolError::UnexpectedMessage {
                got: message.mtype,
                state: "awaiting shutdown",
            })
            .into());
        }

        debug!("shutdown requested");
        adapter.shutdown()?;
        self.state = RunnerState::Stopped;
        Ok(())
    }

    fn configure_adapter(
        &mut self,
        payload: serde_json::Value,
        output: &Output,
    ) -> Result<Box<dyn Adapter>, ConfigurationError> {
        let request: ConfigureRequest =
            serde_json::from_value(payload).map_err(ConfigurationError::Payload)?;

        if !(request.interval_seconds > 0.0) || !request.interval_seconds.is_finite() {
            return Err(ConfigurationError::InvalidInterval(request.interval_seconds));
        }
        if !request.module_paths.is_empty() {
            debug!(
                "ignoring modulePaths {:?}; plugins are linked into this binary",
                request.module_paths
            );
        }
        info!(
            "configuring plugin {} via the {} adapter",
            request.plugin,
            request.adapter.as_str()
        );

        let registry = std::mem::take(&mut self.registry);
        let mut adapter = adapters::create(
            request.adapter,
            registry,
            self.writer.clone(),
            output.clone(),
        );
        adapter.configure(&request)?;
        Ok(adapter)
    }
}

/// Flattens an error and its sources into the single string a
/// ConfigureResult can carry.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::SharedBuf;
    use serde_json::json;
    use std::io::Cursor;

    fn host_frames(frames: &[(MessageType, Option<serde_json::Value>)]) -> Cursor<Vec<u8>> {
        let buf = SharedBuf::default();
        let writer = MessageWriter::new(buf.clone());
        for (mtype, payload) in frames {
            match payload {
                Some(p) => writer.write(*mtype, p).unwrap(),
                None => writer.write_empty(*mtype).unwrap(),
            }
        }
        Cursor::new(buf.contents())
    }

    fn runner_with(
        input: Cursor<Vec<u8>>,
        registry: PluginRegistry,
        out: &SharedBuf,
    ) -> Runner<Cursor<Vec<u8>>> {
        Runner::new(FrameReader::new(input), MessageWriter::new(out.clone()), registry)
    }

    #[test]
    fn first_message_must_be_configure() {
        let input = host_frames(&[(MessageType::Shutdown, None)]);
        let out = SharedBuf::default();
        let runner = runner_with(input, PluginRegistry::new(), &out);

        match runner.run() {
            Err(RunnerError::Transport(TransportError::Protocol(
                ProtocolError::UnexpectedMessage { got, state },
            ))) => {
                assert_eq!(got, MessageType::Shutdown);
                assert_eq!(state, "awaiting configure");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(out.read_frames().is_empty());
    }

    #[test]
    fn unknown_plugin_is_reported_through_configure_result() {
        let input = host_frames(&[(
            MessageType::Configure,
            Some(json!({
                "adapter": "simple",
                "plugin": "ghost",
                "intervalSeconds": 1.0,
            })),
        )]);
        let out = SharedBuf::default();
        let runner = runner_with(input, PluginRegistry::new(), &out);

        runner.run().unwrap();

        let frames = out.read_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].mtype, MessageType::ConfigureResult);
        let error = frames[0].payload["error"].as_str().unwrap();
        assert!(error.contains("ghost"), "error was: {}", error);
    }

    #[test]
    fn malformed_configure_payload_is_a_configuration_error() {
        let input = host_frames(&[(
            MessageType::Configure,
            Some(json!({"adapter": "nonsense"})),
        )]);
        let out = SharedBuf::default();
        let runner = runner_with(input, PluginRegistry::new(), &out);

        runner.run().unwrap();

        let frames = out.read_frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload["error"].is_string());
    }

    #[test]
    fn nonpositive_interval_is_rejected() {
        let input = host_frames(&[(
            MessageType::Configure,
            Some(json!({
                "adapter": "simple",
                "plugin": "p",
                "intervalSeconds": 0.0,
            })),
        )]);
        let out = SharedBuf::default();
        let runner = runner_with(input, PluginRegistry::new(), &out);

        runner.run().unwrap();
        let frames = out.read_frames();
        assert!(frames[0].payload["error"]
            .as_str()
            .unwrap()
            .contains("interval"));
    }

    #[test]
    fn message_other_than_shutdown_while_running_is_fatal() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", crate::plugins::PluginEntry::run(|| Box::new(|_, _| ())));

        let input = host_frames(&[
            (
                MessageType::Configure,
                Some(json!({
                    "adapter": "simple",
                    "plugin": "noop",
                    "intervalSeconds": 60.0,
                })),
            ),
            (
                MessageType::Configure,
                Some(json!({
                    "adapter": "simple",
                    "plugin": "noop",
                    "intervalSeconds": 60.0,
                })),
            ),
        ]);
        let out = SharedBuf::default();
        let runner = runner_with(input, registry, &out);

        match runner.run() {
            Err(RunnerError::Transport(TransportError::Protocol(
                ProtocolError::UnexpectedMessage { state, .. },
            ))) => assert_eq!(state, "awaiting shutdown"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let frames = out.read_frames();
        assert_eq!(frames[0].mtype, MessageType::ConfigureResult);
        assert!(frames[0].payload["error"].is_null());
    }

    #[test]
    fn clean_lifecycle_reaches_stopped() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", crate::plugins::PluginEntry::run(|| Box::new(|_, _| ())));

        let input = host_frames(&[
            (
                MessageType::Configure,
                Some(json!({
                    "adapter": "simple",
                    "plugin": "noop",
                    "intervalSeconds": 60.0,
                })),
            ),
            (MessageType::Shutdown, None),
        ]);
        let out = SharedBuf::default();
        let runner = runner_with(input, registry, &out);

        runner.run().unwrap();

        let frames = out.read_frames();
        assert_eq!(frames[0].mtype, MessageType::ConfigureResult);
        assert!(frames[0].payload["error"].is_null());
    }
}
