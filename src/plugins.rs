//! The plugin-author facing API: how plugin code gets linked into the
//! runner binary and found at configure time.
//!
//! A plugin is registered under a name in a [`PluginRegistry`] as one of
//! three entry points, resolved once at load time: a collectd-style load
//! function that registers callbacks against a [`CollectdHostApi`], a
//! factory for a `run(config, output)` closure invoked once per interval,
//! or a factory for a [`Monitor`] that manages its own gathering. One
//! subprocess hosts exactly one configured plugin instance.

use crate::adapters::CollectdHostApi;
use crate::messages::ConfigureRequest;
use crate::output::Output;
use bitflags::bitflags;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// The callback kinds a collectd plugin has registered so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PluginCapabilities: u32 {
        const CONFIG =   0b0000_0001;
        const READ =     0b0000_0010;
        const SHUTDOWN = 0b0000_0100;
    }
}

impl PluginCapabilities {
    pub fn has_config(&self) -> bool {
        self.intersects(PluginCapabilities::CONFIG)
    }

    pub fn has_read(&self) -> bool {
        self.intersects(PluginCapabilities::READ)
    }

    pub fn has_shutdown(&self) -> bool {
        self.intersects(PluginCapabilities::SHUTDOWN)
    }
}

/// A plugin that manages its own lifecycle. `configure` is called once on
/// the runner thread and should return quickly; gathering belongs on
/// scheduler threads, and the [`Output`] must never be used from the
/// configure thread itself.
pub trait Monitor: Send {
    fn configure(&mut self, config: &ConfigureRequest) -> anyhow::Result<()>;

    /// Called once when the monitor should stop reporting.
    fn shutdown(&mut self) {}
}

/// The simple plugin shape: invoked once per configured interval. State
/// lives in the closure itself, owned by the adapter between calls.
pub type RunFn = Box<dyn FnMut(&ConfigureRequest, &Output) + Send>;

/// One registered plugin, tagged by authoring style.
#[derive(Clone)]
pub enum PluginEntry {
    /// Load function of a collectd-style plugin. Invoked once; registers
    /// its callbacks against the host API it is handed.
    Collectd(Arc<dyn Fn(&CollectdHostApi) + Send + Sync>),
    Simple(SimpleEntry),
}

#[derive(Clone)]
pub enum SimpleEntry {
    Run(Arc<dyn Fn() -> RunFn + Send + Sync>),
    Monitor(Arc<dyn Fn(Output) -> Box<dyn Monitor> + Send + Sync>),
}

impl PluginEntry {
    pub fn collectd<F>(load: F) -> PluginEntry
    where
        F: Fn(&CollectdHostApi) + Send + Sync + 'static,
    {
        PluginEntry::Collectd(Arc::new(load))
    }

    pub fn run<F>(factory: F) -> PluginEntry
    where
        F: Fn() -> RunFn + Send + Sync + 'static,
    {
        PluginEntry::Simple(SimpleEntry::Run(Arc::new(factory)))
    }

    pub fn monitor<F>(factory: F) -> PluginEntry
    where
        F: Fn(Output) -> Box<dyn Monitor> + Send + Sync + 'static,
    {
        PluginEntry::Simple(SimpleEntry::Monitor(Arc::new(factory)))
    }
}

/// Name to entry-point map consulted once per process at configure time.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> PluginRegistry {
        Default::default()
    }

    pub fn register<T: Into<String>>(&mut self, name: T, entry: PluginEntry) {
        let name = name.into();
        if self.entries.insert(name.clone(), entry).is_some() {
            warn!("plugin {} registered more than once, keeping the newest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.get(name)
    }
}
