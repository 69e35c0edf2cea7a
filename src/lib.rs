//! Out-of-process runtime for monitoring plugins.
//!
//! A host process launches this runtime as a child and exchanges framed
//! JSON messages with it over two anonymous pipes: one Configure message to
//! select and configure a plugin, Log / ValueList / DatapointList messages
//! flowing back while reads run, and one Shutdown message to wind down.
//! Plugins are linked into the binary and looked up by name in a
//! [`PluginRegistry`]; the two supported authoring styles are the legacy
//! collectd callback interface (see [`CollectdHostApi`]) and the simple
//! run-function / [`Monitor`] shapes.

pub use crate::adapters::{
    Adapter, CollectdAdapter, CollectdHostApi, SimpleAdapter, ValueDispatcher, Values,
    ValuesBuilder,
};
pub use crate::api::{Config, ConfigValue, Datapoint, MetricKind, PipeLoggerBuilder};
pub use crate::errors::{
    ConfigurationError, ProtocolError, RunnerError, SchedulerError, TransportError, TypesDbError,
};
pub use crate::messages::{
    AdapterKind, ConfigureRequest, ConfigureResult, DatapointPayload, LogRecord,
};
pub use crate::output::Output;
pub use crate::plugins::{
    Monitor, PluginCapabilities, PluginEntry, PluginRegistry, RunFn, SimpleEntry,
};
pub use crate::runner::{Runner, RunnerState};
pub use crate::scheduler::{CancelHandle, IntervalScheduler, SimpleScheduler, STOP_GRACE};
pub use crate::transport::{
    FrameReader, Message, MessageType, MessageWriter, MAX_FRAME_LEN,
};
pub use crate::typesdb::{parse_types_db, DataSet, DataSetIndex, DataSource, DataSourceType};

mod adapters;
mod api;
mod errors;
mod messages;
mod output;
mod plugins;
mod runner;
pub mod sample;
mod scheduler;
#[cfg(test)]
mod testutil;
mod transport;
mod typesdb;
