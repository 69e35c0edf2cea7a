//! Built-in sample plugins: one per authoring style. They double as live
//! documentation for plugin authors and as the registry content the
//! end-to-end tests drive.

use crate::adapters::{CollectdHostApi, ValuesBuilder};
use crate::api::Datapoint;
use crate::output::Output;
use crate::plugins::{Monitor, PluginEntry, PluginRegistry, RunFn};
use crate::scheduler::SimpleScheduler;
use anyhow::Result;
use log::{error, info};
use serde_json::json;

pub fn register_samples(registry: &mut PluginRegistry) {
    registry.register("sample-collectd", PluginEntry::collectd(load_collectd_sample));
    registry.register("sample-gauge", PluginEntry::run(make_gauge_run));
    registry.register("sample-monitor", PluginEntry::monitor(|output| {
        Box::new(SampleMonitor::new(output))
    }));
}

/// Collectd-style sample: registers its read callback from inside the
/// config callback, the way most collectd plugins do, and emits one value
/// list of the `gauge` dataset per tick.
fn load_collectd_sample(api: &CollectdHostApi) {
    api.register_init(|| info!("sample collectd plugin loaded"));

    let config_api = api.clone();
    api.register_config(move |config| {
        let instance = config
            .child("Instance")
            .and_then(|c| c.values.first().cloned())
            .map(|v| match v {
                crate::api::ConfigValue::String(s) => s,
                other => format!("{:?}", other),
            })
            .unwrap_or_else(|| "default".to_string());

        let dispatcher = config_api.dispatcher();
        let mut ticks = 0u64;
        config_api.register_read_named("sample_collectd.read", None, move || {
            ticks += 1;
            ValuesBuilder::new("sample_collectd", "gauge")
                .plugin_instance(instance.clone())
                .values(vec![json!(ticks)])
                .dispatch(&dispatcher);
        });

        config_api.register_shutdown(|| info!("sample collectd plugin shutting down"));
        Ok(())
    });
}

/// Run-function sample. Call state lives in the closure, owned by the
/// adapter between invocations.
fn make_gauge_run() -> RunFn {
    let mut calls = 0u64;
    Box::new(move |_config, output| {
        calls += 1;
        output.send_datapoint(Datapoint::gauge("sample.calls", calls as f64).dimension("a", "1"));
    })
}

/// Full monitor sample: owns a scheduler and reports on its own cadence,
/// the shape to use when one tick per interval is not enough.
struct SampleMonitor {
    output: Output,
    scheduler: SimpleScheduler,
}

impl SampleMonitor {
    fn new(output: Output) -> SampleMonitor {
        SampleMonitor {
            output,
            scheduler: SimpleScheduler::new(),
        }
    }
}

impl Monitor for SampleMonitor {
    fn configure(&mut self, config: &crate::messages::ConfigureRequest) -> Result<()> {
        let output = self.output.clone();
        self.scheduler.run_on_interval(config.interval(), true, move || {
            output.send_datapoint(Datapoint::gauge("sample.monitor.gauge", 1.0));
        });
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.scheduler.stop() {
            error!("sample monitor failed to stop cleanly: {}", e);
        }
    }
}
