//! The datapoint path from plugin code to the host.

use crate::api::Datapoint;
use crate::messages::DatapointPayload;
use crate::transport::{MessageType, MessageWriter};
use chrono::Utc;
use log::error;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

struct Gate {
    acknowledged: Mutex<bool>,
    unblocked: Condvar,
}

/// Handle plugins use to report datapoints.
///
/// Sending blocks until the host has been told how configuration went, so
/// no telemetry escapes ahead of the ConfigureResult. Because the runner
/// thread is the one that opens that gate after configuring, calling `send`
/// from the thread that ran `configure` would deadlock; it is rejected
/// outright.
#[derive(Clone)]
pub struct Output {
    writer: MessageWriter,
    gate: Arc<Gate>,
    configure_thread: ThreadId,
}

impl Output {
    /// Must be constructed on the thread that will run adapter
    /// configuration; that thread identity is what the send guard checks.
    pub(crate) fn new(writer: MessageWriter) -> Output {
        Output {
            writer,
            gate: Arc::new(Gate {
                acknowledged: Mutex::new(false),
                unblocked: Condvar::new(),
            }),
            configure_thread: thread::current().id(),
        }
    }

    /// Opens the readiness gate once the ConfigureResult is on the wire.
    pub(crate) fn mark_ready(&self) {
        let mut acknowledged = self.gate.acknowledged.lock().expect("output gate poisoned");
        *acknowledged = true;
        self.gate.unblocked.notify_all();
    }

    pub fn send_datapoint(&self, datapoint: Datapoint) {
        self.send(vec![datapoint]);
    }

    /// Batches the datapoints into one DatapointList message, grouped by
    /// metric kind with relative order preserved within each group.
    ///
    /// # Panics
    ///
    /// When called from the thread that performed adapter configuration.
    pub fn send(&self, datapoints: Vec<Datapoint>) {
        assert!(
            thread::current().id() != self.configure_thread,
            "Output::send called from the configure thread; it would deadlock \
             waiting for configuration to be acknowledged"
        );

        self.wait_until_ready();

        if datapoints.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut groups: BTreeMap<&'static str, Vec<DatapointPayload>> = BTreeMap::new();
        for datapoint in datapoints {
            groups
                .entry(datapoint.kind.as_str())
                .or_insert_with(Vec::new)
                .push(datapoint.into_payload(now));
        }

        if let Err(e) = self.writer.write(MessageType::DatapointList, &groups) {
            error!("failed to write datapoint list: {}", e);
        }
    }

    fn wait_until_ready(&self) {
        let mut acknowledged = self.gate.acknowledged.lock().expect("output gate poisoned");
        while !*acknowledged {
            acknowledged = self
                .gate
                .unblocked
                .wait(acknowledged)
                .expect("output gate poisoned");
        }
    }
}
