//! # Components
//!
//! A `Component` is the per-process singleton behind a qualified name. It
//! owns four independent lazy cells:
//!
//! | Cell           | Populated when                     | Holds                         |
//! |----------------|------------------------------------|-------------------------------|
//! | registered     | first use                          | host validation outcome       |
//! | implementation | first use, iff hosted here         | instance, span, server stub   |
//! | client         | first remote call                  | transports to remote replicas |
//! | stub           | first remote call                  | client-side proxy             |
//!
//! A failure in one cell is cached there and does not poison the others.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use tracing::Instrument;

use crate::context::InitContext;
use crate::error::Error;
use crate::error::Result;
use crate::host::ClientTls;
use crate::lazy::CellState;
use crate::lazy::LazyCell;
use crate::registration::Instance;
use crate::registration::Registration;
use crate::routing::LoadCollector;
use crate::runtime::Runtime;
use crate::stub::Client;
use crate::stub::ServerStub;
use crate::stub::Stub;

/// A constructed local implementation.
pub struct ImplState {
    pub(crate) instance: Instance,
    pub(crate) span: tracing::Span,
    pub(crate) server: Arc<dyn ServerStub>,
}

impl ImplState {
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Diagnostic view of a component's cells.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ComponentStates {
    pub registered: CellState,
    pub implementation: CellState,
    pub client: CellState,
    pub stub: CellState,
}

pub struct Component {
    runtime: Weak<Runtime>,
    registration: Arc<Registration>,
    tls: Option<ClientTls>,
    local: bool,
    registered: LazyCell<()>,
    implementation: LazyCell<Arc<ImplState>>,
    client: LazyCell<Arc<Client>>,
    stub: LazyCell<Stub>,
    routed_locally: OnceLock<bool>,
    load: Option<LoadCollector>,
}

impl Component {
    pub(crate) fn new(
        runtime: Weak<Runtime>,
        registration: Arc<Registration>,
        tls: Option<ClientTls>,
        local: bool,
    ) -> Self {
        let load = registration.is_routed().then(LoadCollector::new);
        Self {
            runtime,
            registration,
            tls,
            local,
            registered: LazyCell::new(),
            implementation: LazyCell::new(),
            client: LazyCell::new(),
            stub: LazyCell::new(),
            routed_locally: OnceLock::new(),
            load,
        }
    }

    pub fn name(&self) -> &str {
        self.registration.name()
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    /// Whether this process hosts the implementation.
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Present iff the component is routed.
    pub fn load(&self) -> Option<&LoadCollector> {
        self.load.as_ref()
    }

    pub(crate) fn runtime(&self) -> Result<Arc<Runtime>> {
        self.runtime.upgrade().ok_or(Error::RuntimeGone)
    }

    /// Whether routed calls stay in-process regardless of assignment.
    /// Fixed the first time it is asked.
    pub fn routed_locally(&self) -> bool {
        *self.routed_locally.get_or_init(|| {
            self.local
                && self
                    .runtime
                    .upgrade()
                    .is_some_and(|rt| rt.host().routes_locally(self.name()))
        })
    }

    pub fn states(&self) -> ComponentStates {
        ComponentStates {
            registered: self.registered.state(),
            implementation: self.implementation.state(),
            client: self.client.state(),
            stub: self.stub.state(),
        }
    }

    /// Validates the registration against the live deployment, once.
    pub async fn register(&self) -> Result<()> {
        self.registered
            .get_or_init(|| async {
                let runtime = self.runtime()?;
                runtime
                    .host()
                    .validate(&self.registration)
                    .map_err(|reason| Error::Validation {
                        component: self.name().to_string(),
                        reason,
                    })?;
                tracing::debug!(component = %self.name(), local = self.local, "component registered");
                Ok(())
            })
            .await
    }

    /// The local implementation, constructing it on first use.
    pub async fn implementation(&self) -> Result<Arc<ImplState>> {
        if !self.local {
            return Err(Error::NotLocal(self.name().to_string()));
        }
        self.register().await?;
        self.implementation
            .get_or_init(|| self.init_implementation())
            .await
    }

    async fn init_implementation(&self) -> Result<Arc<ImplState>> {
        let runtime = self.runtime()?;
        let name = self.name().to_string();
        let span = tracing::info_span!(
            "component",
            name = %name,
            replica = %runtime.host().replica_id()
        );

        let ctx = InitContext::new(runtime, self.registration.clone(), span.clone());
        let instance = (self.registration.factory)(ctx)
            .instrument(span.clone())
            .await
            .map_err(|e| {
                tracing::warn!(component = %name, error = %e, "factory failed");
                Error::Init {
                    component: name.clone(),
                    reason: e.to_string(),
                }
            })?;

        let server = (self.registration.server)(&instance).ok_or(Error::TypeMismatch {
            component: name.clone(),
            expected: self.registration.iface().name(),
        })?;

        span.in_scope(|| {
            tracing::debug!(implementation = %self.registration.implementation(), "implementation ready")
        });

        Ok(Arc::new(ImplState {
            instance,
            span,
            server,
        }))
    }

    /// Transports to the remote replicas, connecting on first use.
    pub async fn client(&self) -> Result<Arc<Client>> {
        self.register().await?;
        self.client
            .get_or_init(|| async {
                let runtime = self.runtime()?;
                let replicas = runtime.host().connect(self.name(), self.tls.as_ref()).await?;
                tracing::debug!(component = %self.name(), replicas = replicas.len(), "client connected");
                Ok(Arc::new(Client::new(self.name(), replicas)))
            })
            .await
    }

    pub async fn stub(&self) -> Result<Stub> {
        self.stub
            .get_or_init(|| async {
                let client = self.client().await?;
                Ok(Stub::new(self.name(), client))
            })
            .await
    }

    /// Brings up whatever a caller needs: the implementation if hosted here,
    /// otherwise the stub. Routed components hosted here build their stub on
    /// the first call routed away.
    pub(crate) async fn prepare(&self) -> Result<()> {
        self.register().await?;
        if self.local {
            self.implementation().await.map(|_| ())
        } else {
            self.stub().await.map(|_| ())
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name())
            .field("local", &self.local)
            .field("states", &self.states())
            .finish()
    }
}
