//! # Component Registry
//!
//! Maps qualified component names to their `Registration`.
//!
//! The registry has two phases. During startup, registrations are published;
//! `freeze()` ends that phase and the table becomes read-only. Lookups are
//! lock-free at any time (DashMap). Publishing is serialized so that the
//! cross-registration listener-name check is atomic with the insert.

use std::any::TypeId;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::registration::Registration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Component {0} is already registered")]
    Duplicate(String),
    #[error("Registration {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("Registration {0} declares neither Routed nor Unrouted")]
    MissingRouting(String),
    #[error("Registration {0} has no factory")]
    MissingFactory(String),
    #[error("Component {0} is not registered")]
    NotRegistered(String),
    #[error("No component implements interface {0}")]
    InterfaceNotRegistered(&'static str),
    #[error("Registry is frozen; cannot register {0}")]
    Frozen(String),
}

pub type Result<T> = std::result::Result<T, Error>;

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

#[derive(Default)]
pub struct Registry {
    by_name: DashMap<String, Arc<Registration>>,
    by_type: DashMap<TypeId, String>,
    /// Listener name to owning component.
    listeners: DashMap<String, String>,
    frozen: AtomicBool,
    publish: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry populated by application startup code.
    pub fn global() -> Arc<Registry> {
        GLOBAL.clone()
    }

    pub fn register(&self, registration: Registration) -> Result<Arc<Registration>> {
        let _guard = self.publish.lock().unwrap_or_else(|e| e.into_inner());
        let name = registration.name().to_string();

        if self.is_frozen() {
            return Err(Error::Frozen(name));
        }
        if self.by_name.contains_key(&name) {
            return Err(Error::Duplicate(name));
        }
        for l in registration.listeners() {
            if let Some(owner) = self.listeners.get(&l.name) {
                return Err(Error::Invalid {
                    name,
                    reason: format!("listener {} is already declared by {}", l.name, owner.value()),
                });
            }
        }

        let registration = Arc::new(registration);
        for l in registration.listeners() {
            self.listeners.insert(l.name.clone(), name.clone());
        }
        // The first registration of an interface wins type lookups.
        self.by_type
            .entry(registration.iface().id())
            .or_insert_with(|| name.clone());
        self.by_name.insert(name.clone(), registration.clone());

        tracing::debug!(component = %name, "registered component");
        Ok(registration)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Registration>> {
        self.by_name
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Resolves a registration by interface type, e.g. `lookup_type::<dyn Cache>()`.
    pub fn lookup_type<I: ?Sized + 'static>(&self) -> Result<Arc<Registration>> {
        let name = self
            .by_type
            .get(&TypeId::of::<I>())
            .map(|entry| entry.value().clone())
            .ok_or(Error::InterfaceNotRegistered(std::any::type_name::<I>()))?;
        self.lookup(&name)
    }

    pub fn freeze(&self) {
        let _guard = self.publish.lock().unwrap_or_else(|e| e.into_inner());
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.names())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
