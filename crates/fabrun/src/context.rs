//! # Initialization Context
//!
//! A factory receives an `InitContext` and pulls its capabilities from it:
//! references to other components, its configuration, and its listeners.
//! Each capability must have been declared on the registration; anything
//! else is an error.

use std::sync::Arc;

use crate::config;
use crate::config::ComponentConfig;
use crate::error::Error;
use crate::error::Result;
use crate::host::ReplicaId;
use crate::listener;
use crate::listener::Listener;
use crate::registration::Registration;
use crate::registration::TypeTag;
use crate::runtime::Runtime;

pub struct InitContext {
    runtime: Arc<Runtime>,
    registration: Arc<Registration>,
    span: tracing::Span,
}

impl InitContext {
    pub(crate) fn new(runtime: Arc<Runtime>, registration: Arc<Registration>, span: tracing::Span) -> Self {
        Self {
            runtime,
            registration,
            span,
        }
    }

    /// Qualified name of the component being built.
    pub fn name(&self) -> &str {
        self.registration.name()
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.runtime.host().replica_id()
    }

    /// The component's logger; events recorded inside it carry the
    /// component name and replica.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Resolves a declared reference by interface type.
    pub async fn get<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>> {
        let target = self.runtime.registry().lookup_type::<I>()?;
        if !self.registration.refs().iter().any(|r| r == target.name()) {
            return Err(Error::UndeclaredRef {
                component: self.name().to_string(),
                reference: target.name().to_string(),
            });
        }
        self.runtime.resolve_as::<I>(target.name(), self.name()).await
    }

    /// Binds the component's configuration section into `C`.
    pub fn config<C: ComponentConfig>(&self) -> Result<C> {
        let decl = self
            .registration
            .config()
            .ok_or_else(|| config::Error::NotDeclared(self.name().to_string()))?;
        if decl.type_tag() != TypeTag::of::<C>() {
            return Err(config::Error::Mismatch {
                component: self.name().to_string(),
                declared: decl.type_tag().name(),
                requested: std::any::type_name::<C>(),
            }
            .into());
        }
        Ok(self.runtime.config().bind::<C>(self.name())?)
    }

    /// Binds the listener declared for `field` and exports it to the proxy.
    pub async fn listener(&self, field: &str) -> Result<Listener> {
        let decl = self
            .registration
            .listeners()
            .iter()
            .find(|l| l.field == field)
            .ok_or_else(|| Error::Listener {
                name: field.to_string(),
                reason: format!("{} declares no listener for field {}", self.name(), field),
            })?;

        let address = self
            .runtime
            .config()
            .listener(&decl.name)
            .map(|l| l.local_address.as_str())
            .unwrap_or(listener::DEFAULT_ADDRESS);
        let bound = Listener::bind(decl.name.clone(), address).await?;

        let proxy = self
            .runtime
            .host()
            .export_listener(&decl.name, &bound.local_addr().to_string())
            .await
            .map_err(|e| Error::Listener {
                name: decl.name.clone(),
                reason: e.to_string(),
            })?;
        let bound = bound.with_proxy(proxy);

        self.span.in_scope(|| {
            tracing::info!(listener = %decl.name, address = %bound, "listener ready")
        });
        Ok(bound)
    }
}

impl std::fmt::Debug for InitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitContext")
            .field("component", &self.name())
            .finish()
    }
}
