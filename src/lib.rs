//! Ship structured log records to a Fluentd-compatible collector over the
//! forward protocol.
//!
//! The crate has two halves. [`FluentSender`] owns a bounded queue and a
//! background worker that frames records as MessagePack
//! `[tag, timestamp, record]` events and writes them over a persistent,
//! self-healing connection; [`FluentTransport`] adapts levelled
//! `log(level, message)` calls onto it. [`BindingRegistry`] wires both into
//! a host application: factories are registered once, configured with JSON
//! values, and resolved on demand, failing deterministically when
//! configuration is absent.
//!
//! ```no_run
//! use fluentward::{global, LoggingComponent, LogRecord, FLUENT_SENDER};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), fluentward::ResolveError> {
//! let registry = global();
//! LoggingComponent::install(registry);
//! registry.configure(FLUENT_SENDER, json!({
//!     "host": "127.0.0.1",
//!     "port": 24224,
//!     "timeout": 3.0,
//!     "reconnectInterval": 600000,
//! }));
//! let sender = registry.resolve(FLUENT_SENDER)?;
//! sender.emit(LogRecord::new().with("greeting", "Hello, LoopBack!"));
//! sender.close();
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod component;
mod diagnostics;
mod level;
mod record;
mod registry;
mod sender;
mod transport;

pub use component::{LoggingComponent, FLUENT_SENDER, FLUENT_TRANSPORT};
pub use level::{Level, ParseLevelError};
pub use record::LogRecord;
pub use registry::{global, BindingKey, BindingRegistry, ConfigKey, ResolveError};
pub use sender::{
    ConfigError, FluentSender, FluentSenderConfig, TlsSettings, DEFAULT_HOST,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_RECONNECT_INTERVAL_MS,
    DEFAULT_TAG, DEFAULT_TIMEOUT_SECS,
};
pub use transport::FluentTransport;
