//! Adapter bridging levelled log calls onto a sender.

use std::sync::Arc;

use crate::{level::Level, record::LogRecord, sender::FluentSender};

/// Forwards `log(level, message)` calls to a [`FluentSender`] as structured
/// records shaped `{level, message, ...meta}`.
///
/// A pure adapter: it owns no buffering and adds no failure modes of its
/// own, so delivery follows the sender's fire-and-forget contract.
#[derive(Clone, Debug)]
pub struct FluentTransport {
    sender: Arc<FluentSender>,
    label: Option<String>,
}

impl FluentTransport {
    pub fn new(sender: Arc<FluentSender>) -> Self {
        Self {
            sender,
            label: None,
        }
    }

    /// Route this adapter's records under `"{tag}.{label}"`.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The sub-tag this adapter routes under, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The sender records are forwarded to.
    pub fn sender(&self) -> &FluentSender {
        &self.sender
    }

    /// Emit `message` at `level`.
    pub fn log(&self, level: Level, message: &str) {
        self.log_with(level, message, LogRecord::new());
    }

    /// Emit `message` at `level` with additional structured fields.
    ///
    /// `meta` wins when its keys collide with `level` or `message`.
    pub fn log_with(&self, level: Level, message: &str, meta: LogRecord) {
        let mut record = LogRecord::new();
        record.insert("level", level);
        record.insert("message", message);
        record.extend(meta);
        match &self.label {
            Some(label) => self.sender.emit_with_label(label, record),
            None => self.sender.emit(record),
        }
    }
}
