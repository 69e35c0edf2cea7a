//! Child-process entry point. The host wires two anonymous pipes to this
//! process's stdin and stdout; everything else is the runner's job.

use log::{error, LevelFilter};
use monitor_runner::{
    sample, FrameReader, MessageWriter, PipeLoggerBuilder, PluginRegistry, Runner,
};
use std::env;
use std::io;
use std::process;

/// env_logger-style filter spec for what gets forwarded as Log messages.
const LOG_ENV_VAR: &str = "MONITOR_RUNNER_LOG";

fn main() {
    let writer = MessageWriter::new(io::stdout());

    let mut logging = PipeLoggerBuilder::new(writer.clone());
    logging.filter_level(LevelFilter::Info);
    if let Ok(spec) = env::var(LOG_ENV_VAR) {
        logging.parse(&spec);
    }
    if logging.try_init().is_err() {
        eprintln!("logger was already installed");
    }

    let mut registry = PluginRegistry::new();
    sample::register_samples(&mut registry);

    let runner = Runner::new(FrameReader::new(io::stdin()), writer, registry);
    if let Err(e) = runner.run() {
        error!("runner terminated: {}", e);
        process::exit(1);
    }
}
