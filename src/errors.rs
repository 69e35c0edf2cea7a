use crate::transport::MessageType;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Violations of the framed wire protocol. These are always fatal: a peer
/// that frames messages incorrectly or sends them out of order cannot be
/// resynchronized with, so the process terminates.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The length field of a frame was negative or larger than any message
    /// the runtime is willing to buffer.
    #[error("frame length {0} is outside the accepted bounds")]
    FrameLength(i64),

    #[error("unrecognized message type: {0}")]
    UnknownMessageType(i32),

    /// A well-formed message arrived in a state that does not accept it,
    /// e.g. anything other than Configure before configuration.
    #[error("unexpected {got:?} message while {state}")]
    UnexpectedMessage {
        got: MessageType,
        state: &'static str,
    },
}

/// Errors that occur reading or writing frames on the pipe.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed the pipe between frames.
    #[error("transport closed by peer")]
    Closed,

    /// The peer closed the pipe in the middle of a frame.
    #[error("transport closed mid-frame")]
    Truncated,

    #[error("i/o failure on transport")]
    Io(#[from] io::Error),

    #[error("payload could not be serialized or deserialized")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors raised while parsing a types.db blob. The offending line is
/// carried in the message so a bad entry can be found without a line number.
#[derive(Error, Debug, PartialEq)]
pub enum TypesDbError {
    #[error("no data sources found in types.db line: {line}")]
    MissingSources { line: String },

    #[error("expected exactly 4 colon-separated fields in source spec {spec:?} (line: {line})")]
    MalformedSource { line: String, spec: String },

    #[error("unknown data source type {kind:?} in source spec {spec:?}")]
    UnknownType { spec: String, kind: String },
}

/// Errors caught at the runner boundary during configuration. These are
/// reported once to the host through a ConfigureResult message, after which
/// the process exits without ever starting the scheduler.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("plugin {0:?} is not present in the registry")]
    UnknownPlugin(String),

    #[error("plugin {plugin:?} cannot be driven by the {requested} adapter")]
    AdapterMismatch {
        plugin: String,
        requested: &'static str,
    },

    #[error("no config callback was registered, cannot configure")]
    MissingConfigCallback,

    #[error("no read callbacks were registered after configuring, this plugin is useless")]
    NoReadCallbacks,

    #[error("configure payload could not be decoded")]
    Payload(#[source] serde_json::Error),

    #[error("interval of {0} seconds is not usable")]
    InvalidInterval(f64),

    #[error("unable to read types.db file {path:?}")]
    TypesDbIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    TypesDb(#[from] TypesDbError),

    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}

/// Fatal runner failures. Configuration problems are not among these; they
/// are reported to the host through the ConfigureResult message instead.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Errors that occur stopping a scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// One or more task threads failed to quiesce within the grace period.
    /// Leaking a thread that may still invoke plugin code is not safe to
    /// ignore, so this is fatal for the caller.
    #[error("{pending} scheduled task(s) still running after {grace:?} stop grace period")]
    StopTimeout { pending: usize, grace: Duration },
}
