//! The layer translating a plugin authoring style into scheduled callbacks
//! and protocol emissions.

use crate::errors::{ConfigurationError, SchedulerError};
use crate::messages::{AdapterKind, ConfigureRequest};
use crate::output::Output;
use crate::plugins::PluginRegistry;
use crate::transport::MessageWriter;

pub use self::collectd::{CollectdAdapter, CollectdHostApi, ValueDispatcher, Values, ValuesBuilder};
pub use self::simple::SimpleAdapter;

mod collectd;
mod simple;

/// The seam between the runner's state machine and a plugin authoring
/// style.
pub trait Adapter: Send {
    /// Loads and configures the plugin. Runs on the runner thread; no
    /// callback it triggers may use the output sink from that thread.
    fn configure(&mut self, request: &ConfigureRequest) -> Result<(), ConfigurationError>;

    /// Begins periodic reads. Only called after a successful configure.
    fn start(&mut self);

    /// Stops scheduling and runs the plugin's shutdown hooks in
    /// registration order.
    fn shutdown(&mut self) -> Result<(), SchedulerError>;
}

pub(crate) fn create(
    kind: AdapterKind,
    registry: PluginRegistry,
    writer: MessageWriter,
    output: Output,
) -> Box<dyn Adapter> {
    match kind {
        AdapterKind::Collectd => Box::new(CollectdAdapter::new(registry, writer)),
        AdapterKind::Simple => Box::new(SimpleAdapter::new(registry, output)),
    }
}
