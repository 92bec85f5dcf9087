//! Fluent sender: the public emission surface backed by a worker thread.
//!
//! A [`FluentSender`] owns a bounded queue and one background worker. `emit`
//! only enqueues (displacing the oldest record when full) and signals the
//! worker, which encodes events and writes them to the collector, dialling
//! and re-dialling on a fixed interval as needed. `close` flushes
//! best-effort within the configured timeout and joins the worker, so no
//! background activity survives it.

mod config;
mod connection;
mod queue;
mod worker;


pub use config::{
    ConfigError, FluentSenderConfig, TlsSettings, DEFAULT_HOST, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_TAG,
    DEFAULT_TIMEOUT_SECS,
};

use std::{
    sync::Arc,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crossbeam_channel::Sender as ChannelSender;
use parking_lot::Mutex;

use crate::{
    diagnostics::{DropReason, DropWarner},
    record::LogRecord,
};

use self::{
    queue::{EmitQueue, Event},
    worker::{spawn_worker, WorkerCommand},
};

/// Ships structured records to a collector over a persistent connection.
pub struct FluentSender {
    tag: String,
    queue: Arc<EmitQueue>,
    ctrl: Mutex<Option<ChannelSender<WorkerCommand>>>,
    wake: ChannelSender<()>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    warner: Arc<DropWarner>,
    flush_timeout: Duration,
}

impl FluentSender {
    /// Validate `config` and spawn the background worker.
    ///
    /// The collector link is established asynchronously; an unreachable
    /// collector never fails construction, it only delays delivery.
    pub fn new(config: FluentSenderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue = Arc::new(EmitQueue::with_capacity(config.capacity));
        let warner = Arc::new(DropWarner::new());
        let handles = spawn_worker(&config, Arc::clone(&queue), Arc::clone(&warner));
        Ok(Self {
            tag: config.tag,
            queue,
            ctrl: Mutex::new(Some(handles.ctrl)),
            wake: handles.wake,
            handle: Mutex::new(Some(handles.handle)),
            warner,
            flush_timeout: Duration::from_secs_f64(config.timeout),
        })
    }

    /// The routing tag attached to emitted events.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Queue `record` for delivery, stamped with the current time.
    ///
    /// Fire-and-forget: never blocks on the network and never fails.
    /// Records are dropped, with a rate-limited warning through the `log`
    /// facade, when the sender is closed, the queue displaces its oldest
    /// entry, or the record cannot be encoded.
    pub fn emit(&self, record: LogRecord) {
        self.enqueue(None, SystemTime::now(), record);
    }

    /// Queue `record` routed under `"{tag}.{label}"`.
    pub fn emit_with_label(&self, label: &str, record: LogRecord) {
        self.enqueue(Some(label), SystemTime::now(), record);
    }

    /// Queue `record` with an explicit event time.
    pub fn emit_at(&self, timestamp: SystemTime, record: LogRecord) {
        self.enqueue(None, timestamp, record);
    }

    fn enqueue(&self, label: Option<&str>, timestamp: SystemTime, record: LogRecord) {
        if self.ctrl.lock().is_none() {
            self.warner.record(DropReason::Closed);
            return;
        }
        let timestamp = timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let event = Event {
            timestamp,
            label: label.map(str::to_owned),
            record,
        };
        if self.queue.push(event).is_some() {
            self.warner.record(DropReason::QueueFull);
        }
        // A full wake channel already carries a pending drain signal.
        let _ = self.wake.try_send(());
    }

    /// Ask the worker to relay everything the current connection allows.
    ///
    /// Returns `true` when the worker acknowledges within the configured
    /// timeout, `false` once closed or when the acknowledgement is late.
    pub fn flush(&self) -> bool {
        let Some(ctrl) = self.ctrl.lock().clone() else {
            return false;
        };
        self.warner.flush();
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if ctrl.send(WorkerCommand::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(self.flush_timeout).is_ok()
    }

    /// Flush best-effort within the configured timeout, then stop the worker
    /// and release the connection.
    ///
    /// The first call performs the shutdown; later calls are no-ops, and
    /// emissions after close are dropped with a rate-limited warning.
    pub fn close(&self) {
        let Some(ctrl) = self.ctrl.lock().take() else {
            return;
        };
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if ctrl.send(WorkerCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(self.flush_timeout);
        }
        drop(ctrl);
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            log::warn!("FluentSender: worker thread panicked");
        }
    }
}

impl Drop for FluentSender {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FluentSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluentSender")
            .field("tag", &self.tag)
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}
