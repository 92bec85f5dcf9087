//! Configuration-driven binding registry.
//!
//! Hosts register factories for named resources, attach configuration
//! values, and resolve instances on demand. Each binding caches the
//! instance it produced until its configuration changes; withdrawing the
//! configuration makes the next resolution fail with a deterministic
//! not-configured error. Factories run outside the registry lock, so a
//! factory may resolve other bindings while constructing.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

/// Typed handle naming a registered resource.
///
/// The `name` doubles as the configuration path shown in error messages;
/// the `subject` is the human-readable noun those messages open with.
pub struct BindingKey<T> {
    name: &'static str,
    subject: &'static str,
    _resource: PhantomData<fn() -> T>,
}

impl<T> BindingKey<T> {
    /// A key whose subject defaults to its name.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            subject: name,
            _resource: PhantomData,
        }
    }

    /// Override the subject used in not-configured messages.
    pub const fn with_subject(mut self, subject: &'static str) -> Self {
        self.subject = subject;
        self
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn subject(&self) -> &'static str {
        self.subject
    }

    /// The key addressing this binding's configuration slot.
    pub const fn config_key(&self) -> ConfigKey {
        ConfigKey { binding: self.name }
    }
}

impl<T> Clone for BindingKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BindingKey<T> {}

impl<T> fmt::Debug for BindingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingKey")
            .field("name", &self.name)
            .finish()
    }
}

/// Key addressing the configuration slot attached to a binding.
///
/// Displays as `"{binding}:config"`, the form hosts use to name the slot
/// in their own configuration stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigKey {
    binding: &'static str,
}

impl ConfigKey {
    /// Name of the binding the configuration belongs to.
    pub const fn binding(self) -> &'static str {
        self.binding
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:config", self.binding)
    }
}

/// Errors surfaced by [`BindingRegistry::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The binding exists but no configuration value is attached.
    #[error("{subject} is not configured. Please configure {key}.")]
    NotConfigured {
        subject: &'static str,
        key: &'static str,
    },
    /// Configuration is present but the factory rejected it.
    #[error("invalid configuration for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },
    /// No component registered a factory for the key.
    #[error("no binding registered for {key}")]
    NotRegistered { key: &'static str },
    /// The cached instance does not match the key's resource type.
    #[error("binding {key} resolved to an unexpected type")]
    TypeMismatch { key: &'static str },
}

impl ResolveError {
    /// Build an [`InvalidConfig`](Self::InvalidConfig) error for `key`.
    pub fn invalid_config(key: &'static str, reason: impl ToString) -> Self {
        Self::InvalidConfig {
            key,
            reason: reason.to_string(),
        }
    }
}

type Resource = Arc<dyn Any + Send + Sync>;

type BoxedFactory =
    Arc<dyn Fn(&BindingRegistry, Option<&Value>) -> Result<Resource, ResolveError> + Send + Sync>;

#[derive(Default)]
struct BindingEntry {
    factory: Option<BoxedFactory>,
    config: Option<Value>,
    instance: Option<Resource>,
    /// Bumped on every register/configure/unbind so in-flight resolutions
    /// notice the entry changed under them.
    epoch: u64,
}

/// Map from binding name to factory, configuration, and cached instance.
#[derive(Default)]
pub struct BindingRegistry {
    entries: RwLock<HashMap<&'static str, BindingEntry>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory that requires configuration.
    ///
    /// Resolving the key without an attached configuration value fails with
    /// [`ResolveError::NotConfigured`].
    pub fn register<T, F>(&self, key: BindingKey<T>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&BindingRegistry, &Value) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        let subject = key.subject();
        let name = key.name();
        self.register_optional(key, move |registry, config| match config {
            Some(value) => factory(registry, value),
            None => Err(ResolveError::NotConfigured { subject, key: name }),
        });
    }

    /// Register a factory that may resolve without configuration.
    pub fn register_optional<T, F>(&self, key: BindingKey<T>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&BindingRegistry, Option<&Value>) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        let boxed: BoxedFactory = Arc::new(move |registry, config| {
            factory(registry, config).map(|resource| Arc::new(resource) as Resource)
        });
        let stale = {
            let mut entries = self.entries.write();
            let entry = entries.entry(key.name()).or_default();
            entry.factory = Some(boxed);
            entry.epoch = entry.epoch.wrapping_add(1);
            entry.instance.take()
        };
        // Displaced instances drop outside the lock; their own teardown may
        // block.
        drop(stale);
    }

    /// Attach or replace the configuration for `key`, invalidating any
    /// cached instance. May be called before the factory is registered.
    pub fn configure<T>(&self, key: BindingKey<T>, value: Value) {
        let stale = {
            let mut entries = self.entries.write();
            let entry = entries.entry(key.name()).or_default();
            entry.config = Some(value);
            entry.epoch = entry.epoch.wrapping_add(1);
            entry.instance.take()
        };
        drop(stale);
    }

    /// Withdraw the configuration for a binding, invalidating any cached
    /// instance. Later resolutions fail until the host configures again.
    pub fn unbind(&self, key: ConfigKey) {
        let stale = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(key.binding()) else {
                return;
            };
            entry.config = None;
            entry.epoch = entry.epoch.wrapping_add(1);
            entry.instance.take()
        };
        drop(stale);
    }

    /// Resolve the resource bound to `key`, constructing and caching it on
    /// first use.
    ///
    /// Repeated resolutions return the same instance until the binding is
    /// reconfigured or unbound. Construction happens outside the registry
    /// lock; when a configure/unbind races with it, the freshly built
    /// instance is discarded and resolution starts over against the new
    /// configuration.
    pub fn resolve<T>(&self, key: BindingKey<T>) -> Result<Arc<T>, ResolveError>
    where
        T: Send + Sync + 'static,
    {
        loop {
            let (factory, config, epoch) = {
                let entries = self.entries.read();
                let Some(entry) = entries.get(key.name()) else {
                    return Err(ResolveError::NotRegistered { key: key.name() });
                };
                if let Some(instance) = &entry.instance {
                    return downcast(key, Arc::clone(instance));
                }
                let Some(factory) = entry.factory.clone() else {
                    return Err(ResolveError::NotRegistered { key: key.name() });
                };
                (factory, entry.config.clone(), entry.epoch)
            };

            let instance = factory(self, config.as_ref())?;

            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(key.name()) else {
                return Err(ResolveError::NotRegistered { key: key.name() });
            };
            if entry.epoch != epoch {
                continue;
            }
            if let Some(existing) = &entry.instance {
                // Another resolver won the race; its instance is the one
                // every caller shares.
                return downcast(key, Arc::clone(existing));
            }
            entry.instance = Some(Arc::clone(&instance));
            return downcast(key, instance);
        }
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.read().keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("BindingRegistry")
            .field("bindings", &names)
            .finish()
    }
}

fn downcast<T: Send + Sync + 'static>(
    key: BindingKey<T>,
    instance: Resource,
) -> Result<Arc<T>, ResolveError> {
    instance
        .downcast::<T>()
        .map_err(|_| ResolveError::TypeMismatch { key: key.name() })
}

static GLOBAL: Lazy<BindingRegistry> = Lazy::new(BindingRegistry::default);

/// Process-wide registry for hosts without a composition root of their own.
pub fn global() -> &'static BindingRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    #[derive(Debug, PartialEq)]
    struct Gauge {
        threshold: i64,
    }

    const GAUGE: BindingKey<Gauge> = BindingKey::new("test.gauge").with_subject("Gauge");

    fn install_gauge(registry: &BindingRegistry) {
        registry.register(GAUGE, |_, value| {
            let threshold = value.get("threshold").and_then(Value::as_i64).ok_or_else(|| {
                ResolveError::invalid_config(GAUGE.name(), "threshold must be an integer")
            })?;
            Ok(Gauge { threshold })
        });
    }

    #[test]
    fn resolves_configured_bindings() {
        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": 7}));
        let gauge = registry.resolve(GAUGE).expect("resolve gauge");
        assert_eq!(*gauge, Gauge { threshold: 7 });
    }

    #[test]
    fn resolution_is_idempotent_until_reconfigured() {
        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": 1}));
        let first = registry.resolve(GAUGE).expect("first resolve");
        let second = registry.resolve(GAUGE).expect("second resolve");
        assert!(Arc::ptr_eq(&first, &second));

        registry.configure(GAUGE, json!({"threshold": 2}));
        let third = registry.resolve(GAUGE).expect("resolve after reconfigure");
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*third, Gauge { threshold: 2 });
    }

    #[test]
    fn unbinding_configuration_fails_resolution() {
        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": 3}));
        registry.resolve(GAUGE).expect("resolve before unbind");

        registry.unbind(GAUGE.config_key());
        let err = registry.resolve(GAUGE).expect_err("resolve after unbind");
        assert!(matches!(err, ResolveError::NotConfigured { .. }));
        assert_eq!(
            err.to_string(),
            "Gauge is not configured. Please configure test.gauge."
        );
    }

    #[test]
    fn config_keys_render_the_binding_slot() {
        let key = GAUGE.config_key();
        assert_eq!(key.binding(), "test.gauge");
        assert_eq!(key.to_string(), "test.gauge:config");
    }

    #[test]
    fn configuration_may_precede_registration() {
        let registry = BindingRegistry::new();
        registry.configure(GAUGE, json!({"threshold": 9}));
        install_gauge(&registry);
        let gauge = registry.resolve(GAUGE).expect("resolve gauge");
        assert_eq!(*gauge, Gauge { threshold: 9 });
    }

    #[test]
    fn unregistered_keys_are_reported() {
        let registry = BindingRegistry::new();
        const MISSING: BindingKey<Gauge> = BindingKey::new("test.missing");
        let err = registry.resolve(MISSING).expect_err("nothing registered");
        assert!(matches!(err, ResolveError::NotRegistered { .. }));
    }

    #[test]
    fn optional_factories_resolve_without_configuration() {
        let registry = BindingRegistry::new();
        const LABELLED: BindingKey<String> = BindingKey::new("test.labelled");
        registry.register_optional(LABELLED, |_, config| {
            Ok(match config {
                Some(value) => value.to_string(),
                None => "default".to_owned(),
            })
        });
        let label = registry.resolve(LABELLED).expect("resolve without config");
        assert_eq!(*label, "default");
    }

    #[test]
    fn factory_failures_propagate() {
        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": "not a number"}));
        let err = registry.resolve(GAUGE).expect_err("factory should reject");
        assert!(matches!(err, ResolveError::InvalidConfig { .. }));
    }

    #[test]
    fn mismatched_key_types_are_detected() {
        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": 4}));
        registry.resolve(GAUGE).expect("resolve gauge");

        const ALIAS: BindingKey<String> = BindingKey::new("test.gauge");
        let err = registry.resolve(ALIAS).expect_err("wrong resource type");
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn factories_may_resolve_other_bindings() {
        #[derive(Debug)]
        struct Doubled {
            value: i64,
        }
        const DOUBLED: BindingKey<Doubled> = BindingKey::new("test.doubled");

        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": 21}));
        registry.register_optional(DOUBLED, |registry, _| {
            let gauge = registry.resolve(GAUGE)?;
            Ok(Doubled {
                value: gauge.threshold * 2,
            })
        });

        let doubled = registry.resolve(DOUBLED).expect("nested resolve");
        assert_eq!(doubled.value, 42);
    }

    #[test]
    fn concurrent_resolutions_share_one_instance() {
        let registry = BindingRegistry::new();
        install_gauge(&registry);
        registry.configure(GAUGE, json!({"threshold": 5}));

        let resolved = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.resolve(GAUGE).expect("resolve gauge")))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread"))
                .collect::<Vec<_>>()
        });

        let first = &resolved[0];
        for other in &resolved[1..] {
            assert!(Arc::ptr_eq(first, other));
        }
    }

    #[test]
    #[serial]
    fn global_registry_is_process_wide() {
        const SHARED: BindingKey<Gauge> = BindingKey::new("test.global.gauge");
        global().register(SHARED, |_, value| {
            let threshold = value.get("threshold").and_then(Value::as_i64).unwrap_or(0);
            Ok(Gauge { threshold })
        });
        global().configure(SHARED, json!({"threshold": 11}));
        let gauge = global().resolve(SHARED).expect("resolve global gauge");
        assert_eq!(*gauge, Gauge { threshold: 11 });

        global().unbind(SHARED.config_key());
        assert!(global().resolve(SHARED).is_err());
    }
}
