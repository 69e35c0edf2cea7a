//! Emulation of the collectd Python plugin interface: registration entry
//! points, the `Values` dispatch object, and the adapter driving both.
//!
//! Collectd has no first-class concept of multiple instances of a plugin,
//! so this adapter hosts exactly one plugin with one unified configuration,
//! the same constraint collectd-python imposes per interpreter.

use crate::api::Config;
use crate::errors::{ConfigurationError, SchedulerError};
use crate::messages::ConfigureRequest;
use crate::plugins::{PluginCapabilities, PluginEntry, PluginRegistry};
use crate::scheduler::SimpleScheduler;
use crate::transport::{MessageType, MessageWriter};
use crate::typesdb::{parse_types_db, DataSetIndex};
use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Adapter;

/// The legacy collectd value-emission record, serialized as-is into a
/// ValueList message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Values {
    #[serde(rename = "type")]
    pub type_: String,
    pub values: Vec<serde_json::Value>,
    pub host: String,
    pub plugin: Option<String>,
    pub plugin_instance: String,

    /// Unix timestamp in float seconds; filled at dispatch when unset.
    pub time: Option<f64>,

    pub type_instance: String,
    pub interval: Option<f64>,
    pub meta: serde_json::Map<String, serde_json::Value>,

    /// Data source names, looked up from the configured types.db datasets
    /// immediately before dispatch.
    pub dsnames: Option<Vec<String>>,
    pub dstypes: Option<Vec<String>>,

    pub message: Option<String>,
    pub severity: Option<i64>,
}

/// Primes a value list for dispatch. `plugin` is the reporting plugin's
/// name and `type_` the dataset found in types.db that determines how many
/// values are expected and how they are interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesBuilder {
    list: Values,
}

impl ValuesBuilder {
    pub fn new<T: Into<String>, U: Into<String>>(plugin: T, type_: U) -> ValuesBuilder {
        ValuesBuilder {
            list: Values {
                type_: type_.into(),
                values: Vec::new(),
                host: String::new(),
                plugin: Some(plugin.into()),
                plugin_instance: String::new(),
                time: None,
                type_instance: String::new(),
                interval: None,
                meta: serde_json::Map::new(),
                dsnames: None,
                dstypes: None,
                message: None,
                severity: None,
            },
        }
    }

    /// The observed values, in the order the dataset's sources declare.
    pub fn values(mut self, values: Vec<serde_json::Value>) -> ValuesBuilder {
        self.list.values = values;
        self
    }

    /// Distinguishes entities that yield metrics, e.g. one instance per
    /// core for a cpu plugin.
    pub fn plugin_instance<T: Into<String>>(mut self, plugin_instance: T) -> ValuesBuilder {
        self.list.plugin_instance = plugin_instance.into();
        self
    }

    /// Separates values of identical type that nonetheless belong to one
    /// another, like "free" and "used" for a memory type.
    pub fn type_instance<T: Into<String>>(mut self, type_instance: T) -> ValuesBuilder {
        self.list.type_instance = type_instance.into();
        self
    }

    /// Overrides the hostname the values are attributed to.
    pub fn host<T: Into<String>>(mut self, host: T) -> ValuesBuilder {
        self.list.host = host.into();
        self
    }

    /// Unix timestamp of the observation. Defaults to the dispatch time.
    pub fn time(mut self, time: f64) -> ValuesBuilder {
        self.list.time = Some(time);
        self
    }

    pub fn interval(mut self, interval: f64) -> ValuesBuilder {
        self.list.interval = Some(interval);
        self
    }

    pub fn meta(mut self, meta: serde_json::Map<String, serde_json::Value>) -> ValuesBuilder {
        self.list.meta = meta;
        self
    }

    pub fn message<T: Into<String>>(mut self, message: T) -> ValuesBuilder {
        self.list.message = Some(message.into());
        self
    }

    pub fn severity(mut self, severity: i64) -> ValuesBuilder {
        self.list.severity = Some(severity);
        self
    }

    /// Annotates the list from the configured datasets and sends it.
    pub fn dispatch(self, dispatcher: &ValueDispatcher) {
        dispatcher.dispatch(self.list);
    }
}

/// Send-able handle that read callbacks capture to emit value lists.
#[derive(Clone)]
pub struct ValueDispatcher {
    datasets: Arc<DataSetIndex>,
    writer: MessageWriter,
}

impl ValueDispatcher {
    pub fn dispatch(&self, mut list: Values) {
        // Booleans become their integer value because that is what collectd
        // does.
        for value in &mut list.values {
            if let serde_json::Value::Bool(b) = value {
                *value = serde_json::Value::from(*b as i64);
            }
        }

        if list.time.is_none() {
            let now = Utc::now();
            list.time = Some(
                now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0,
            );
        }

        match self.datasets.annotation(&list.type_) {
            Some((names, types)) => {
                list.dsnames = Some(names);
                list.dstypes = Some(types);
            }
            None => {
                // The rest of the batch is unaffected; only this list drops.
                error!(
                    "type {} was not found in the configured types.db files",
                    list.type_
                );
                return;
            }
        }

        debug!("dispatching value list for type {}", list.type_);
        if let Err(e) = self.writer.write(MessageType::ValueList, &list) {
            error!("failed to write value list: {}", e);
        }
    }
}

type ConfigCallback = Box<dyn FnMut(&Config) -> anyhow::Result<()> + Send>;
type ReadInit = Box<dyn FnOnce(&mut SimpleScheduler) + Send>;

struct InterfaceState {
    config_callback: Option<ConfigCallback>,
    read_inits: Vec<ReadInit>,
    shutdown_callbacks: Vec<Box<dyn FnMut() + Send>>,
    names: HashSet<String>,
    capabilities: PluginCapabilities,
}

/// The registration surface handed to a collectd plugin's load function in
/// place of the `collectd` module that collectd-python plugins import.
/// Clone-able so callbacks registered early (like a config callback) can
/// register more callbacks later.
#[derive(Clone)]
pub struct CollectdHostApi {
    state: Arc<Mutex<InterfaceState>>,
    dispatcher: ValueDispatcher,
    default_interval: Duration,
}

impl CollectdHostApi {
    fn new(default_interval: Duration, dispatcher: ValueDispatcher) -> CollectdHostApi {
        CollectdHostApi {
            state: Arc::new(Mutex::new(InterfaceState {
                config_callback: None,
                read_inits: Vec::new(),
                shutdown_callbacks: Vec::new(),
                names: HashSet::new(),
                capabilities: PluginCapabilities::default(),
            })),
            dispatcher,
            default_interval,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, InterfaceState> {
        self.state.lock().expect("collectd interface lock poisoned")
    }

    /// Registers the callback that receives the config tree. The last
    /// registration wins.
    pub fn register_config<F>(&self, callback: F)
    where
        F: FnMut(&Config) -> anyhow::Result<()> + Send + 'static,
    {
        let mut state = self.state();
        if state.config_callback.is_some() {
            warn!("config callback was already registered, re-registering");
        }
        state.config_callback = Some(Box::new(callback));
        state.capabilities |= PluginCapabilities::CONFIG;
    }

    /// Schedules `callback` on the default interval once reads start. The
    /// name is derived from the callback's qualified type name.
    pub fn register_read<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let name = std::any::type_name::<F>().to_string();
        self.register_read_inner(name, None, Box::new(callback));
    }

    /// Like [`register_read`](Self::register_read) with an explicit name
    /// and, optionally, an interval overriding the configured default.
    pub fn register_read_named<F>(&self, name: &str, interval: Option<Duration>, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.register_read_inner(name.to_string(), interval, Box::new(callback));
    }

    fn register_read_inner(
        &self,
        name: String,
        interval: Option<Duration>,
        callback: Box<dyn FnMut() + Send>,
    ) {
        let mut state = self.state();
        if !state.names.insert(name.clone()) {
            // Known quirk of the collectd-python interface, deliberately
            // kept: both callbacks still get scheduled.
            error!("read callback name {} already registered, registering twice", name);
        }

        let interval = interval.unwrap_or(self.default_interval);
        state.read_inits.push(Box::new(move |scheduler| {
            scheduler.run_on_interval(interval, true, callback);
        }));
        state.capabilities |= PluginCapabilities::READ;
    }

    /// Init callbacks run right away when registered; there is no
    /// interpreter setup left to wait for by that point.
    pub fn register_init<F>(&self, callback: F)
    where
        F: FnOnce(),
    {
        callback();
    }

    pub fn register_shutdown<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.state();
        state.shutdown_callbacks.push(Box::new(callback));
        state.capabilities |= PluginCapabilities::SHUTDOWN;
    }

    /// The handle read callbacks capture to emit value lists.
    pub fn dispatcher(&self) -> ValueDispatcher {
        self.dispatcher.clone()
    }

    pub fn capabilities(&self) -> PluginCapabilities {
        self.state().capabilities
    }
}

/// Drives a collectd-style plugin through load, configure, scheduled
/// reads, and shutdown.
pub struct CollectdAdapter {
    registry: PluginRegistry,
    writer: MessageWriter,
    scheduler: SimpleScheduler,
    interface: Option<CollectdHostApi>,
}

impl CollectdAdapter {
    pub(crate) fn new(registry: PluginRegistry, writer: MessageWriter) -> CollectdAdapter {
        CollectdAdapter {
            registry,
            writer,
            scheduler: SimpleScheduler::new(),
            interface: None,
        }
    }

    fn load_datasets(request: &ConfigureRequest) -> Result<DataSetIndex, ConfigurationError> {
        info!("loading types.db files: {:?}", request.types_db_paths);

        let mut datasets = DataSetIndex::default();
        for path in &request.types_db_paths {
            let content = fs::read_to_string(path).map_err(|source| {
                ConfigurationError::TypesDbIo {
                    path: path.clone(),
                    source,
                }
            })?;
            datasets.insert_all(parse_types_db(&content)?);
        }
        Ok(datasets)
    }
}

impl Adapter for CollectdAdapter {
    fn configure(&mut self, request: &ConfigureRequest) -> Result<(), ConfigurationError> {
        let load = match self.registry.get(&request.plugin) {
            None => return Err(ConfigurationError::UnknownPlugin(request.plugin.clone())),
            Some(PluginEntry::Collectd(load)) => Arc::clone(load),
            Some(_) => {
                return Err(ConfigurationError::AdapterMismatch {
                    plugin: request.plugin.clone(),
                    requested: "collectd",
                })
            }
        };

        let datasets = Self::load_datasets(request)?;
        if datasets.is_empty() {
            warn!("no types.db datasets configured; every value dispatch will be dropped");
        }
        let dispatcher = ValueDispatcher {
            datasets: Arc::new(datasets),
            writer: self.writer.clone(),
        };
        let interface = CollectdHostApi::new(request.interval(), dispatcher);

        let load = load.as_ref();
        if panic::catch_unwind(AssertUnwindSafe(|| load(&interface))).is_err() {
            return Err(anyhow!("plugin panicked while loading").into());
        }
        debug!("plugin registered capabilities: {:?}", interface.capabilities());

        // The callback is taken out of the interface for the duration of
        // the call so it can register reads through its own clone of the
        // api without deadlocking.
        let callback = interface.state().config_callback.take();
        let mut callback = callback.ok_or(ConfigurationError::MissingConfigCallback)?;

        let config = Config::from_mapping(&request.plugin_config);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&config)))
            .unwrap_or_else(|_| Err(anyhow!("plugin panicked in its config callback")));
        interface.state().config_callback = Some(callback);
        outcome.map_err(ConfigurationError::Plugin)?;

        if !interface.capabilities().has_read() {
            return Err(ConfigurationError::NoReadCallbacks);
        }

        self.interface = Some(interface);
        Ok(())
    }

    fn start(&mut self) {
        if let Some(interface) = &self.interface {
            let inits: Vec<ReadInit> = interface.state().read_inits.drain(..).collect();
            for init in inits {
                init(&mut self.scheduler);
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.scheduler.stop()?;

        if let Some(interface) = &self.interface {
            let mut callbacks: Vec<Box<dyn FnMut() + Send>> =
                interface.state().shutdown_callbacks.drain(..).collect();
            for callback in &mut callbacks {
                callback();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::AdapterKind;
    use crate::testutil::SharedBuf;
    use serde_json::json;
    use std::thread;

    fn dispatcher_with(types_db: &str, buf: &SharedBuf) -> ValueDispatcher {
        let mut datasets = DataSetIndex::default();
        datasets.insert_all(parse_types_db(types_db).unwrap());
        ValueDispatcher {
            datasets: Arc::new(datasets),
            writer: MessageWriter::new(buf.clone()),
        }
    }

    fn request(plugin: &str, config: serde_json::Value) -> ConfigureRequest {
        serde_json::from_value(json!({
            "adapter": "collectd",
            "plugin": plugin,
            "intervalSeconds": 0.05,
            "pluginConfig": config,
        }))
        .unwrap()
    }

    #[test]
    fn dispatch_annotates_coerces_and_stamps() {
        let buf = SharedBuf::default();
        let dispatcher = dispatcher_with("mydata value:GAUGE:0:100, flag:GAUGE:0:1", &buf);

        ValuesBuilder::new("myplugin", "mydata")
            .plugin_instance("a")
            .values(vec![json!(3.5), json!(true)])
            .dispatch(&dispatcher);

        let frames = buf.read_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].mtype, MessageType::ValueList);

        let payload = &frames[0].payload;
        assert_eq!(payload["type"], "mydata");
        assert_eq!(payload["plugin"], "myplugin");
        assert_eq!(payload["plugin_instance"], "a");
        assert_eq!(payload["values"], json!([3.5, 1]));
        assert_eq!(payload["dsnames"], json!(["value", "flag"]));
        assert_eq!(payload["dstypes"], json!(["GAUGE", "GAUGE"]));
        assert!(payload["time"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn unknown_type_is_dropped_without_affecting_others() {
        let buf = SharedBuf::default();
        let dispatcher = dispatcher_with("known value:GAUGE:0:U", &buf);

        ValuesBuilder::new("p", "unknown")
            .values(vec![json!(1)])
            .dispatch(&dispatcher);
        ValuesBuilder::new("p", "known")
            .values(vec![json!(2)])
            .dispatch(&dispatcher);

        let frames = buf.read_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload["type"], "known");
    }

    #[test]
    fn explicit_time_is_not_overwritten() {
        let buf = SharedBuf::default();
        let dispatcher = dispatcher_with("mydata value:GAUGE:0:U", &buf);

        ValuesBuilder::new("p", "mydata")
            .values(vec![json!(1)])
            .time(123.5)
            .dispatch(&dispatcher);

        let frames = buf.read_frames();
        assert_eq!(frames[0].payload["time"], json!(123.5));
    }

    #[test]
    fn configure_requires_a_registered_plugin_of_the_right_kind() {
        let buf = SharedBuf::default();
        let mut adapter =
            CollectdAdapter::new(PluginRegistry::new(), MessageWriter::new(buf.clone()));

        match adapter.configure(&request("ghost", json!({}))) {
            Err(ConfigurationError::UnknownPlugin(name)) => assert_eq!(name, "ghost"),
            other => panic!("unexpected outcome: {:?}", other.err()),
        }

        let mut registry = PluginRegistry::new();
        registry.register("simple-only", crate::plugins::PluginEntry::run(|| Box::new(|_, _| ())));
        let mut adapter = CollectdAdapter::new(registry, MessageWriter::new(buf.clone()));
        match adapter.configure(&request("simple-only", json!({}))) {
            Err(ConfigurationError::AdapterMismatch { requested, .. }) => {
                assert_eq!(requested, "collectd");
            }
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
    }

    #[test]
    fn configure_fails_without_a_config_callback() {
        let mut registry = PluginRegistry::new();
        registry.register("silent", crate::plugins::PluginEntry::collectd(|_api| {}));

        let buf = SharedBuf::default();
        let mut adapter = CollectdAdapter::new(registry, MessageWriter::new(buf));
        match adapter.configure(&request("silent", json!({}))) {
            Err(ConfigurationError::MissingConfigCallback) => (),
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
    }

    #[test]
    fn configure_fails_without_read_callbacks() {
        let mut registry = PluginRegistry::new();
        registry.register(
            "readless",
            crate::plugins::PluginEntry::collectd(|api| {
                api.register_config(|_config| Ok(()));
            }),
        );

        let buf = SharedBuf::default();
        let mut adapter = CollectdAdapter::new(registry, MessageWriter::new(buf));
        match adapter.configure(&request("readless", json!({}))) {
            Err(ConfigurationError::NoReadCallbacks) => (),
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
    }

    #[test]
    fn config_callback_error_is_reported_not_raised() {
        let mut registry = PluginRegistry::new();
        registry.register(
            "grumpy",
            crate::plugins::PluginEntry::collectd(|api| {
                api.register_config(|_config| Err(anyhow!("bad Host value")));
            }),
        );

        let buf = SharedBuf::default();
        let mut adapter = CollectdAdapter::new(registry, MessageWriter::new(buf));
        match adapter.configure(&request("grumpy", json!({}))) {
            Err(ConfigurationError::Plugin(e)) => {
                assert!(e.to_string().contains("bad Host value"));
            }
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
    }

    #[test]
    fn full_cycle_schedules_reads_and_runs_shutdown_hooks() {
        let shutdown_count = Arc::new(Mutex::new(0));
        let shutdown_seen = Arc::clone(&shutdown_count);

        let mut registry = PluginRegistry::new();
        registry.register(
            "ticker",
            crate::plugins::PluginEntry::collectd(move |api| {
                let config_api = api.clone();
                let shutdown_count = Arc::clone(&shutdown_seen);
                api.register_config(move |config| {
                    assert!(config.child("Instance").is_some());
                    let dispatcher = config_api.dispatcher();
                    let mut ticks = 0u64;
                    config_api.register_read_named("ticker.read", None, move || {
                        ticks += 1;
                        ValuesBuilder::new("ticker", "mydata")
                            .values(vec![json!(ticks)])
                            .dispatch(&dispatcher);
                    });
                    let shutdown_count = Arc::clone(&shutdown_count);
                    config_api.register_shutdown(move || {
                        *shutdown_count.lock().unwrap() += 1;
                    });
                    Ok(())
                });
            }),
        );

        let types_db = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(types_db.path(), "mydata value:GAUGE:0:U\n").unwrap();

        let mut request = request("ticker", json!({"Instance": "a"}));
        request.types_db_paths = vec![types_db.path().to_path_buf()];
        assert_eq!(request.adapter, AdapterKind::Collectd);

        let buf = SharedBuf::default();
        let mut adapter = CollectdAdapter::new(registry, MessageWriter::new(buf.clone()));
        adapter.configure(&request).unwrap();
        adapter.start();

        thread::sleep(Duration::from_millis(140));
        adapter.shutdown().unwrap();

        let frames = buf.read_frames();
        assert!(frames.len() >= 2, "expected repeated reads, saw {}", frames.len());
        assert!(frames.iter().all(|f| f.mtype == MessageType::ValueList));
        assert_eq!(*shutdown_count.lock().unwrap(), 1);
    }
}
