//! # Hosting Process
//!
//! The runtime never decides where components live. It asks a `Host`: which
//! replica this process is, which components it hosts, how to reach remote
//! replicas, and where routed keys are assigned.
//!
//! `StaticHost` is a fixed-topology implementation used for single-process
//! deployments, tests, and in-process multi-replica setups.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::registration::Registration;
use crate::routing::Assignment;
use crate::transport;
use crate::transport::Transport;

/// Strong type for replica identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection to one remote replica.
#[derive(Clone)]
pub struct Replica {
    pub id: ReplicaId,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica").field("id", &self.id).finish()
    }
}

/// Opaque client TLS material, handed to the host when connecting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientTls {
    pub certificate: Vec<u8>,
    pub key: Vec<u8>,
}

#[async_trait::async_trait]
pub trait Host: Send + Sync + 'static {
    fn replica_id(&self) -> ReplicaId;

    /// Whether this process hosts an implementation of `component`.
    fn is_local(&self, component: &str) -> bool;

    /// Whether routed calls to `component` should always stay in-process.
    fn routes_locally(&self, _component: &str) -> bool {
        false
    }

    /// Checks a registration against the live deployment.
    fn validate(&self, _registration: &Registration) -> Result<(), String> {
        Ok(())
    }

    /// Opens transports to every remote replica of `component`.
    async fn connect(
        &self,
        component: &str,
        tls: Option<&ClientTls>,
    ) -> transport::Result<Vec<Replica>>;

    fn assignment(&self, _component: &str) -> Option<Arc<dyn Assignment>> {
        None
    }

    /// Registers a bound listener with the proxy layer, returning the
    /// externally visible proxy address if there is one.
    async fn export_listener(
        &self,
        _listener: &str,
        _local_address: &str,
    ) -> transport::Result<Option<String>> {
        Ok(None)
    }
}

enum Placement {
    All,
    Only(HashSet<String>),
}

/// A host with a topology fixed at construction time.
pub struct StaticHost {
    id: ReplicaId,
    placement: Placement,
    routed_locally: HashSet<String>,
    peers: HashMap<String, Vec<Replica>>,
    assignments: DashMap<String, Arc<dyn Assignment>>,
    proxies: HashMap<String, String>,
    rejected: HashMap<String, String>,
}

impl StaticHost {
    /// A host that runs every component in-process.
    pub fn single_process() -> Self {
        Self::new(ReplicaId::new("main")).host_all()
    }

    /// A host that runs nothing until told otherwise.
    pub fn new(id: ReplicaId) -> Self {
        Self {
            id,
            placement: Placement::Only(HashSet::new()),
            routed_locally: HashSet::new(),
            peers: HashMap::new(),
            assignments: DashMap::new(),
            proxies: HashMap::new(),
            rejected: HashMap::new(),
        }
    }

    pub fn host_all(mut self) -> Self {
        self.placement = Placement::All;
        self
    }

    pub fn local(mut self, component: impl Into<String>) -> Self {
        if let Placement::Only(set) = &mut self.placement {
            set.insert(component.into());
        }
        self
    }

    pub fn route_locally(mut self, component: impl Into<String>) -> Self {
        self.routed_locally.insert(component.into());
        self
    }

    pub fn peer(
        mut self,
        component: impl Into<String>,
        id: ReplicaId,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.peers
            .entry(component.into())
            .or_default()
            .push(Replica { id, transport });
        self
    }

    pub fn with_assignment(
        self,
        component: impl Into<String>,
        assignment: Arc<dyn Assignment>,
    ) -> Self {
        self.assignments.insert(component.into(), assignment);
        self
    }

    pub fn proxy(mut self, listener: impl Into<String>, address: impl Into<String>) -> Self {
        self.proxies.insert(listener.into(), address.into());
        self
    }

    /// Makes `validate` fail for `component`, modelling a deployment mismatch.
    pub fn reject(mut self, component: impl Into<String>, reason: impl Into<String>) -> Self {
        self.rejected.insert(component.into(), reason.into());
        self
    }

    /// Replaces the assignment of a live host.
    pub fn set_assignment(&self, component: impl Into<String>, assignment: Arc<dyn Assignment>) {
        self.assignments.insert(component.into(), assignment);
    }
}

#[async_trait::async_trait]
impl Host for StaticHost {
    fn replica_id(&self) -> ReplicaId {
        self.id.clone()
    }

    fn is_local(&self, component: &str) -> bool {
        match &self.placement {
            Placement::All => true,
            Placement::Only(set) => set.contains(component),
        }
    }

    fn routes_locally(&self, component: &str) -> bool {
        self.routed_locally.contains(component)
    }

    fn validate(&self, registration: &Registration) -> Result<(), String> {
        match self.rejected.get(registration.name()) {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    async fn connect(
        &self,
        component: &str,
        _tls: Option<&ClientTls>,
    ) -> transport::Result<Vec<Replica>> {
        Ok(self.peers.get(component).cloned().unwrap_or_default())
    }

    fn assignment(&self, component: &str) -> Option<Arc<dyn Assignment>> {
        self.assignments.get(component).map(|e| e.value().clone())
    }

    async fn export_listener(
        &self,
        listener: &str,
        _local_address: &str,
    ) -> transport::Result<Option<String>> {
        Ok(self.proxies.get(listener).cloned())
    }
}
