//! Adapter for the simple plugin shapes: a `run(config, output)` closure
//! invoked on the configured interval, or a monitor object that schedules
//! its own gathering.

use crate::errors::{ConfigurationError, SchedulerError};
use crate::messages::ConfigureRequest;
use crate::output::Output;
use crate::plugins::{Monitor, PluginEntry, PluginRegistry, RunFn, SimpleEntry};
use crate::scheduler::SimpleScheduler;

use super::Adapter;

enum SimpleState {
    /// Pending run closure plus the request it will be handed each tick.
    Run {
        run: Option<RunFn>,
        request: ConfigureRequest,
    },
    Monitor(Box<dyn Monitor>),
}

pub struct SimpleAdapter {
    registry: PluginRegistry,
    output: Output,
    scheduler: SimpleScheduler,
    state: Option<SimpleState>,
}

impl SimpleAdapter {
    pub(crate) fn new(registry: PluginRegistry, output: Output) -> SimpleAdapter {
        SimpleAdapter {
            registry,
            output,
            scheduler: SimpleScheduler::new(),
            state: None,
        }
    }
}

impl Adapter for SimpleAdapter {
    fn configure(&mut self, request: &ConfigureRequest) -> Result<(), ConfigurationError> {
        let entry = match self.registry.get(&request.plugin) {
            None => return Err(ConfigurationError::UnknownPlugin(request.plugin.clone())),
            Some(PluginEntry::Simple(entry)) => entry.clone(),
            Some(PluginEntry::Collectd(_)) => {
                return Err(ConfigurationError::AdapterMismatch {
                    plugin: request.plugin.clone(),
                    requested: "simple",
                })
            }
        };

        self.state = Some(match entry {
            SimpleEntry::Run(factory) => {
                let factory = factory.as_ref();
                SimpleState::Run {
                    run: Some(factory()),
                    request: request.clone(),
                }
            }
            SimpleEntry::Monitor(factory) => {
                let factory = factory.as_ref();
                let mut monitor = factory(self.output.clone());
                monitor.configure(request).map_err(ConfigurationError::Plugin)?;
                SimpleState::Monitor(monitor)
            }
        });
        Ok(())
    }

    fn start(&mut self) {
        if let Some(SimpleState::Run { run, request }) = &mut self.state {
            if let Some(mut run) = run.take() {
                let request = request.clone();
                let output = self.output.clone();
                let interval = request.interval();
                self.scheduler.run_on_interval(interval, true, move || {
                    run(&request, &output);
                });
            }
        }
        // A monitor took over scheduling in configure; nothing to start.
    }

    fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.scheduler.stop()?;
        if let Some(SimpleState::Monitor(monitor)) = &mut self.state {
            monitor.shutdown();
        }
        Ok(())
    }
}
