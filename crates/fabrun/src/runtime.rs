//! # Runtime
//!
//! The per-process context that resolves components. It ties together the
//! frozen `Registry`, the `Host`, the application config, and the metrics,
//! and owns one `Component` per qualified name.
//!
//! ## Resolution
//!
//! ```text
//! get::<dyn Cache>() ──▶ Registry::lookup_type ──▶ Runtime::component (memoized)
//!                                                     │
//!                              Component::prepare ◀───┘
//!                              (implementation if hosted, else stub)
//!                                                     │
//!                  handle per (component, caller) ◀───┘
//! ```
//!
//! Uses DashMap so unrelated components never contend; waiting only happens
//! on the first access of a specific lazy cell.

use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use tracing::Instrument;

use crate::component::Component;
use crate::config;
use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::error::Result;
use crate::host::ClientTls;
use crate::host::Host;
use crate::host::ReplicaId;
use crate::host::StaticHost;
use crate::metrics::MetricsRegistry;
use crate::registration::Instance;
use crate::registry::Registry;
use crate::stub;
use crate::stub::CallFrame;
use crate::stub::ReplyFrame;

/// Caller name used for resolutions made by application code.
pub const MAIN: &str = "main";

pub struct Runtime {
    this: Weak<Runtime>,
    registry: Arc<Registry>,
    host: Arc<dyn Host>,
    config: AppConfig,
    tls: Option<ClientTls>,
    components: DashMap<String, Arc<Component>>,
    /// Keyed by (component, caller).
    handles: DashMap<(String, String), Instance>,
    metrics: MetricsRegistry,
}

#[derive(Default)]
pub struct RuntimeBuilder {
    registry: Option<Arc<Registry>>,
    host: Option<Arc<dyn Host>>,
    config: AppConfig,
    tls: Option<ClientTls>,
}

impl RuntimeBuilder {
    /// Defaults to `Registry::global()`.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to a single-process host.
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tls(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Freezes the registry and checks every config section.
    pub fn build(self) -> Result<Arc<Runtime>> {
        let registry = self.registry.unwrap_or_else(Registry::global);
        let host = self
            .host
            .unwrap_or_else(|| Arc::new(StaticHost::single_process()) as Arc<dyn Host>);
        registry.freeze();

        validate_config(&registry, &self.config)?;

        let runtime = Arc::new_cyclic(|this| Runtime {
            this: this.clone(),
            registry,
            host,
            config: self.config,
            tls: self.tls,
            components: DashMap::new(),
            handles: DashMap::new(),
            metrics: MetricsRegistry::new(),
        });
        tracing::debug!(
            replica = %runtime.host.replica_id(),
            components = runtime.registry.len(),
            "runtime ready"
        );
        Ok(runtime)
    }
}

fn validate_config(registry: &Registry, config: &AppConfig) -> Result<()> {
    for name in registry.names() {
        let registration = registry.lookup(&name)?;
        let section = config.section(&name);
        match (registration.config(), section) {
            (Some(decl), section) => decl.validate(&name, section)?,
            (None, Some(section)) => {
                if let Some(key) = section.keys().next() {
                    return Err(config::Error::UnknownKey {
                        section: name,
                        key: key.clone(),
                    }
                    .into());
                }
            }
            (None, None) => {}
        }
    }
    for section in config.section_names() {
        if registry.lookup(section).is_err() {
            tracing::warn!(section = %section, "config section names no registered component");
        }
    }
    Ok(())
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.host.replica_id()
    }

    /// The singleton component for `name`, created on first demand.
    pub fn component(&self, name: &str) -> Result<Arc<Component>> {
        if let Some(existing) = self.components.get(name) {
            return Ok(existing.value().clone());
        }
        let registration = self.registry.lookup(name)?;
        let component = self
            .components
            .entry(name.to_string())
            .or_insert_with(|| {
                let local = self.host.is_local(name);
                Arc::new(Component::new(
                    self.this.clone(),
                    registration,
                    self.tls.clone(),
                    local,
                ))
            })
            .value()
            .clone();
        Ok(component)
    }

    /// Resolves `name` into a type-erased handle for `caller`.
    pub async fn resolve(&self, name: &str, caller: &str) -> Result<Instance> {
        let key = (name.to_string(), caller.to_string());
        if let Some(existing) = self.handles.get(&key) {
            return Ok(existing.value().clone());
        }

        let component = self.component(name)?;
        component.prepare().await?;

        let handle = self
            .handles
            .entry(key)
            .or_insert_with(|| {
                let dispatcher = Dispatcher::new(component.clone(), caller);
                (component.registration().handle)(dispatcher)
            })
            .value()
            .clone();
        Ok(handle)
    }

    /// Resolves `name` as interface `I` on behalf of `caller`.
    pub async fn resolve_as<I: ?Sized + Send + Sync + 'static>(&self, name: &str, caller: &str) -> Result<Arc<I>> {
        let handle = self.resolve(name, caller).await?;
        handle
            .downcast_ref::<Arc<I>>()
            .cloned()
            .ok_or(Error::TypeMismatch {
                component: name.to_string(),
                expected: std::any::type_name::<I>(),
            })
    }

    /// Resolves the component implementing `I` on behalf of `caller`.
    pub async fn resolve_type<I: ?Sized + Send + Sync + 'static>(&self, caller: &str) -> Result<Arc<I>> {
        let registration = self.registry.lookup_type::<I>()?;
        self.resolve_as::<I>(registration.name(), caller).await
    }

    /// Resolves the component implementing `I` for application code.
    pub async fn get<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>> {
        self.resolve_type::<I>(MAIN).await
    }

    /// Handles one encoded `CallFrame` addressed to this replica and returns
    /// the encoded `ReplyFrame`.
    pub async fn serve(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let reply = match stub::decode::<CallFrame>(payload) {
            Ok(frame) => ReplyFrame::from_result(self.serve_frame(frame).await),
            Err(e) => ReplyFrame::Failure(e.to_string()),
        };
        stub::encode(&reply)
    }

    async fn serve_frame(&self, frame: CallFrame) -> Result<Vec<u8>> {
        let component = self.component(&frame.component)?;
        if component.registration().method(&frame.method).is_none() {
            return Err(Error::UnknownMethod {
                component: frame.component,
                method: frame.method,
            });
        }

        let imp = component.implementation().await?;
        if let (Some(key), Some(load)) = (&frame.key, component.load()) {
            load.add(key);
        }

        let span = imp.span().clone();
        tracing::trace!(parent: &span, method = %frame.method, caller = %frame.caller, "serving call");
        imp.server
            .handle(&frame.method, &frame.args)
            .instrument(span)
            .await
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("replica", &self.host.replica_id())
            .field("components", &self.components.len())
            .finish()
    }
}
