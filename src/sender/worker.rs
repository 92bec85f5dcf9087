//! Worker thread draining the emit queue into the collector link.

use std::{
    borrow::Cow,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{at, bounded, never, unbounded, Receiver, Sender};
use log::warn;

use crate::codec;
use crate::diagnostics::{DropReason, DropWarner};

use super::{config::FluentSenderConfig, connection::ConnectionManager, queue::EmitQueue};

/// Commands processed by the worker thread.
pub(crate) enum WorkerCommand {
    /// Relay what the current connection allows, then acknowledge.
    Flush(Sender<()>),
    /// Flush within the closing deadline, drop the link, acknowledge, exit.
    Shutdown(Sender<()>),
}

/// Channel handles the sender keeps for the worker it spawned.
pub(crate) struct WorkerHandles {
    pub ctrl: Sender<WorkerCommand>,
    pub wake: Sender<()>,
    pub handle: thread::JoinHandle<()>,
}

pub(crate) fn spawn_worker(
    config: &FluentSenderConfig,
    queue: Arc<EmitQueue>,
    warner: Arc<DropWarner>,
) -> WorkerHandles {
    let (ctrl_tx, ctrl_rx) = unbounded();
    // Wake-ups coalesce: one pending token is enough to trigger a drain.
    let (wake_tx, wake_rx) = bounded(1);
    let worker = Worker {
        queue,
        warner,
        connection: ConnectionManager::new(
            config.transport(),
            config.timeout_duration(),
            config.reconnect_interval_duration(),
        ),
        tag: config.tag.clone(),
        max_frame_size: config.max_frame_size,
        flush_timeout: config.timeout_duration(),
        ctrl: ctrl_rx,
        wake: wake_rx,
    };
    let handle = thread::spawn(move || worker.run());
    WorkerHandles {
        ctrl: ctrl_tx,
        wake: wake_tx,
        handle,
    }
}

enum Pulse {
    Command(WorkerCommand),
    ChannelClosed,
    Drain,
}

struct Worker {
    queue: Arc<EmitQueue>,
    warner: Arc<DropWarner>,
    connection: ConnectionManager,
    tag: String,
    max_frame_size: usize,
    flush_timeout: Duration,
    ctrl: Receiver<WorkerCommand>,
    wake: Receiver<()>,
}

impl Worker {
    fn run(mut self) {
        // Dial eagerly so a reachable collector is linked before the first
        // emission arrives.
        self.pump();
        loop {
            match self.next_pulse() {
                Pulse::Command(WorkerCommand::Flush(ack)) => {
                    self.pump();
                    let _ = ack.send(());
                }
                Pulse::Command(WorkerCommand::Shutdown(ack)) => {
                    self.drain_then_close();
                    let _ = ack.send(());
                    return;
                }
                Pulse::ChannelClosed => {
                    self.drain_then_close();
                    return;
                }
                Pulse::Drain => self.pump(),
            }
        }
    }

    /// Block until a command, a wake-up, or the reconnect slot arrives.
    fn next_pulse(&self) -> Pulse {
        let timer = match self.connection.retry_at() {
            Some(retry_at) => at(retry_at),
            None => never(),
        };
        crossbeam_channel::select! {
            recv(self.ctrl) -> cmd => match cmd {
                Ok(cmd) => Pulse::Command(cmd),
                Err(_) => Pulse::ChannelClosed,
            },
            recv(self.wake) -> msg => match msg {
                Ok(()) => Pulse::Drain,
                Err(_) => Pulse::ChannelClosed,
            },
            recv(timer) -> _ => Pulse::Drain,
        }
    }

    /// Connect when due and relay queued events until the queue empties or
    /// the link drops.
    fn pump(&mut self) {
        if !self.connection.is_connected() {
            let now = Instant::now();
            if !self.connection.connect_due(now) {
                return;
            }
            if let Err(err) = self.connection.connect(now) {
                warn!("FluentSender failed to connect: {err}");
                return;
            }
        }
        while let Some(event) = self.queue.pop() {
            let tag: Cow<'_, str> = match &event.label {
                Some(label) => Cow::Owned(format!("{}.{}", self.tag, label)),
                None => Cow::Borrowed(self.tag.as_str()),
            };
            let frame =
                match codec::encode(&tag, event.timestamp, &event.record, self.max_frame_size) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("FluentSender discarding record: {err}");
                        self.warner.record(DropReason::Unencodable);
                        continue;
                    }
                };
            if let Err(err) = self.connection.send(&frame, Instant::now()) {
                warn!("FluentSender write failed, retrying after the reconnect interval: {err}");
                // The in-flight event goes back to the front unless emitters
                // have refilled the queue meanwhile.
                if self.queue.requeue(event).is_some() {
                    self.warner.record(DropReason::QueueFull);
                }
                return;
            }
        }
    }

    /// Flush what the closing deadline allows, then drop the link.
    fn drain_then_close(&mut self) {
        let deadline = Instant::now() + self.flush_timeout;
        loop {
            self.pump();
            if self.queue.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let Some(retry_at) = self.connection.retry_at() else {
                break;
            };
            // No reconnect slot before the deadline means nothing more can
            // be delivered.
            if retry_at >= deadline {
                break;
            }
            thread::sleep(retry_at.saturating_duration_since(now));
        }
        let remaining = self.queue.len();
        if remaining > 0 {
            warn!("FluentSender discarded {remaining} queued records at close");
        }
        self.warner.flush();
        self.connection.close();
    }
}
