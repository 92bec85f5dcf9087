//! Composition root installing the logging bindings.

use serde::Deserialize;

use crate::{
    registry::{BindingKey, BindingRegistry, ResolveError},
    sender::{FluentSender, FluentSenderConfig},
    transport::FluentTransport,
};

/// Binding key for the collector-facing sender.
pub const FLUENT_SENDER: BindingKey<FluentSender> =
    BindingKey::new("logging.fluent.sender").with_subject("Fluent");

/// Binding key for the levelled-log transport adapter.
pub const FLUENT_TRANSPORT: BindingKey<FluentTransport> =
    BindingKey::new("logging.fluent.transport").with_subject("Fluent transport");

/// Optional configuration accepted by the transport binding.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TransportSettings {
    tag: Option<String>,
}

/// Installs the fluent sender and transport factories into a registry.
pub struct LoggingComponent;

impl LoggingComponent {
    /// Register both factories.
    ///
    /// The sender requires configuration; resolving it unconfigured fails
    /// with the registry's not-configured error. The transport resolves
    /// with or without configuration of its own and reuses the bound
    /// sender.
    pub fn install(registry: &BindingRegistry) {
        registry.register(FLUENT_SENDER, |_, value| {
            let config = FluentSenderConfig::from_value(value)
                .map_err(|err| ResolveError::invalid_config(FLUENT_SENDER.name(), &err))?;
            FluentSender::new(config)
                .map_err(|err| ResolveError::invalid_config(FLUENT_SENDER.name(), &err))
        });
        registry.register_optional(FLUENT_TRANSPORT, |registry, value| {
            let sender = registry.resolve(FLUENT_SENDER)?;
            let settings: TransportSettings = match value {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|err| ResolveError::invalid_config(FLUENT_TRANSPORT.name(), &err))?,
                None => TransportSettings::default(),
            };
            let transport = FluentTransport::new(sender);
            Ok(match settings.tag {
                Some(tag) => transport.with_label(tag),
                None => transport,
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::TcpListener;

    /// Config targeting a port that was bound and released, so sender
    /// construction succeeds without a live collector.
    fn idle_config() -> Value {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral listener");
        let port = listener.local_addr().expect("listener has address").port();
        json!({
            "host": "127.0.0.1",
            "port": port,
            "timeout": 1.0,
            "reconnectInterval": 600000,
        })
    }

    #[test]
    fn install_makes_the_sender_resolvable() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        registry.configure(FLUENT_SENDER, idle_config());
        let sender = registry.resolve(FLUENT_SENDER).expect("resolve sender");
        assert_eq!(sender.tag(), "LoopBack");
    }

    #[test]
    fn unconfigured_sender_reports_the_exact_message() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        let err = registry
            .resolve(FLUENT_SENDER)
            .expect_err("no configuration bound");
        assert_eq!(
            err.to_string(),
            "Fluent is not configured. Please configure logging.fluent.sender."
        );
    }

    #[test]
    fn invalid_sender_configuration_is_rejected_at_resolution() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        registry.configure(FLUENT_SENDER, json!({"host": "localhost", "port": 0}));
        let err = registry.resolve(FLUENT_SENDER).expect_err("invalid port");
        assert!(matches!(err, ResolveError::InvalidConfig { .. }));
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn out_of_range_sender_configuration_fails_resolution() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        registry.configure(
            FLUENT_SENDER,
            json!({"host": "localhost", "port": 24224, "timeout": 2.0e19}),
        );
        let err = registry.resolve(FLUENT_SENDER).expect_err("oversized timeout");
        assert!(matches!(err, ResolveError::InvalidConfig { .. }));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn transport_resolves_without_its_own_configuration() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        registry.configure(FLUENT_SENDER, idle_config());
        let transport = registry
            .resolve(FLUENT_TRANSPORT)
            .expect("resolve transport");
        assert!(transport.label().is_none());
        assert_eq!(transport.sender().tag(), "LoopBack");
    }

    #[test]
    fn transport_accepts_an_optional_tag() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        registry.configure(FLUENT_SENDER, idle_config());
        registry.configure(FLUENT_TRANSPORT, json!({"tag": "web"}));
        let transport = registry
            .resolve(FLUENT_TRANSPORT)
            .expect("resolve transport");
        assert_eq!(transport.label(), Some("web"));
    }

    #[test]
    fn transport_requires_a_configured_sender() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        let err = registry
            .resolve(FLUENT_TRANSPORT)
            .expect_err("sender unconfigured");
        assert_eq!(
            err.to_string(),
            "Fluent is not configured. Please configure logging.fluent.sender."
        );
    }

    #[test]
    fn transports_share_the_bound_sender() {
        let registry = BindingRegistry::new();
        LoggingComponent::install(&registry);
        registry.configure(FLUENT_SENDER, idle_config());
        let sender = registry.resolve(FLUENT_SENDER).expect("resolve sender");
        let transport = registry
            .resolve(FLUENT_TRANSPORT)
            .expect("resolve transport");
        assert!(std::ptr::eq(
            transport.sender() as *const _,
            std::sync::Arc::as_ptr(&sender)
        ));
    }
}
