//! # Stubs and Call Envelopes
//!
//! The client side of a remote call is a `Stub` over a `Client`; the server
//! side is a `ServerStub` that decodes arguments and invokes the local
//! implementation. Between them travels a bincode-encoded envelope:
//!
//! ```text
//! CallFrame { component, method, caller, key, args } ──▶ Runtime::serve
//!                                                           │
//! ReplyFrame::Ok(bytes) | Application(msg) | Failure(msg) ◀─┘
//! ```
//!
//! ## Replica selection
//!
//! `Client::call` tries the preferred replica first, then every other replica
//! in round-robin order. It moves on only when the transport reports the
//! request was never delivered (`Unreachable`), so a call is never executed
//! twice by fallback.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::error::Result;
use crate::host::Replica;
use crate::host::ReplicaId;
use crate::routing::RoutingKey;

/// Serializes a value with the envelope codec.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(Error::codec)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(Error::codec)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub component: String,
    pub method: String,
    pub caller: String,
    pub key: Option<RoutingKey>,
    pub args: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyFrame {
    Ok(Vec<u8>),
    /// The implementation returned an error.
    Application(String),
    /// The call never reached the implementation.
    Failure(String),
}

impl ReplyFrame {
    pub fn from_result(result: Result<Vec<u8>>) -> Self {
        match result {
            Ok(bytes) => Self::Ok(bytes),
            Err(Error::Application(msg)) => Self::Application(msg),
            Err(e) => Self::Failure(e.to_string()),
        }
    }

    pub fn into_result(self) -> Result<Vec<u8>> {
        match self {
            Self::Ok(bytes) => Ok(bytes),
            Self::Application(msg) => Err(Error::Application(msg)),
            Self::Failure(msg) => Err(Error::Remote(msg)),
        }
    }
}

/// Server-side glue: decodes `args` for `method`, calls the implementation,
/// and encodes the result.
#[async_trait::async_trait]
pub trait ServerStub: Send + Sync + 'static {
    async fn handle(&self, method: &str, args: &[u8]) -> Result<Vec<u8>>;
}

/// Transport handles to every remote replica of one component.
pub struct Client {
    component: String,
    replicas: Vec<Replica>,
    next: AtomicUsize,
}

impl Client {
    pub fn new(component: impl Into<String>, replicas: Vec<Replica>) -> Self {
        Self {
            component: component.into(),
            replicas,
            next: AtomicUsize::new(0),
        }
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn has_replica(&self, id: &ReplicaId) -> bool {
        self.replicas.iter().any(|r| &r.id == id)
    }

    /// Sends `payload`, preferring `preferred` when it is one of our replicas.
    pub async fn call(&self, preferred: Option<&ReplicaId>, payload: &[u8]) -> Result<Vec<u8>> {
        let n = self.replicas.len();
        if n == 0 {
            return Err(Error::NoReplica {
                component: self.component.clone(),
            });
        }

        let start = preferred
            .and_then(|id| self.replicas.iter().position(|r| &r.id == id))
            .unwrap_or_else(|| self.next.fetch_add(1, Ordering::Relaxed) % n);

        for i in 0..n {
            let replica = &self.replicas[(start + i) % n];
            match replica.transport.call(payload).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(
                        component = %self.component,
                        replica = %replica.id,
                        error = %e,
                        "replica unreachable, trying next"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::NoReplica {
            component: self.component.clone(),
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("component", &self.component)
            .field("replicas", &self.replicas)
            .finish()
    }
}

/// Client-side proxy: wraps arguments in a `CallFrame` and unwraps the reply.
#[derive(Clone, Debug)]
pub struct Stub {
    component: String,
    client: Arc<Client>,
}

impl Stub {
    pub fn new(component: impl Into<String>, client: Arc<Client>) -> Self {
        Self {
            component: component.into(),
            client,
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub async fn invoke(
        &self,
        caller: &str,
        method: &str,
        key: Option<&RoutingKey>,
        preferred: Option<&ReplicaId>,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let frame = CallFrame {
            component: self.component.clone(),
            method: method.to_string(),
            caller: caller.to_string(),
            key: key.cloned(),
            args,
        };
        let payload = encode(&frame)?;
        let reply = self.client.call(preferred, &payload).await?;
        decode::<ReplyFrame>(&reply)?.into_result()
    }
}
