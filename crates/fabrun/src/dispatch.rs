//! # Call Dispatch
//!
//! Every handle method asks its `Dispatcher` where the call goes:
//!
//! ```text
//! route(method, key)
//!   ├─ unrouted method ─────────────── hosted here? ── Local : Remote(any)
//!   └─ routed method
//!        ├─ routes locally ─────────── Local
//!        ├─ assignment picks us ────── Local
//!        ├─ assignment picks replica ─ Remote(preferred)
//!        └─ no assignment ──────────── hosted here? ── Local : Remote(any)
//! ```
//!
//! A remote call that cannot connect, or finds no reachable replica, runs on
//! the local implementation when there is one. Affinity is a preference,
//! never a reason to fail.
//!
//! Both call kinds measure themselves: metrics begin at `route` and end when
//! the call finishes. A call dropped before finishing counts as failed.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::component::Component;
use crate::component::ImplState;
use crate::error::Error;
use crate::error::Result;
use crate::host::ReplicaId;
use crate::metrics::CallHandle;
use crate::metrics::MethodMetrics;
use crate::routing::RoutingKey;
use crate::stub;

/// The caller-side view of one component, embedded in generated handles.
#[derive(Clone)]
pub struct Dispatcher {
    component: Arc<Component>,
    caller: String,
}

pub enum Route {
    Local(LocalCall),
    Remote(RemoteCall),
}

impl Dispatcher {
    pub(crate) fn new(component: Arc<Component>, caller: impl Into<String>) -> Self {
        Self {
            component,
            caller: caller.into(),
        }
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Decides where `method` runs. `key` is ignored for unrouted methods.
    pub async fn route(&self, method: &str, key: Option<RoutingKey>) -> Result<Route> {
        let component = &self.component;
        let desc = component
            .registration()
            .method(method)
            .ok_or_else(|| Error::UnknownMethod {
                component: component.name().to_string(),
                method: method.to_string(),
            })?;
        let key = key.filter(|_| desc.is_routed());

        let runtime = component.runtime()?;
        let host = runtime.host();
        let local = component.is_local();

        let target = match &key {
            Some(_) if local && component.routed_locally() => Target::Local,
            Some(k) => match host.assignment(component.name()).and_then(|a| a.pick(k)) {
                Some(replica) if local && replica == host.replica_id() => Target::Local,
                Some(replica) => Target::Remote(Some(replica)),
                None if local => Target::Local,
                None => Target::Remote(None),
            },
            None if local => Target::Local,
            None => Target::Remote(None),
        };

        match target {
            Target::Local => {
                let imp = component.implementation().await?;
                if let (Some(k), Some(load)) = (&key, component.load()) {
                    load.add(k);
                }
                let metrics = runtime
                    .metrics()
                    .method(&self.caller, component.name(), method, false);
                let handle = metrics.begin();
                Ok(Route::Local(LocalCall {
                    imp,
                    component: component.name().to_string(),
                    metrics,
                    handle: Some(handle),
                }))
            }
            Target::Remote(preferred) => {
                let metrics = runtime
                    .metrics()
                    .method(&self.caller, component.name(), method, true);
                let handle = metrics.begin();
                Ok(Route::Remote(RemoteCall {
                    component: component.clone(),
                    caller: self.caller.clone(),
                    method: method.to_string(),
                    key,
                    preferred,
                    metrics,
                    handle: Some(handle),
                }))
            }
        }
    }

    /// Routes and runs a call whose arguments and result are serde types.
    ///
    /// `local` receives the implementation and the arguments when the call
    /// stays in-process; otherwise the arguments are encoded and sent.
    pub async fn call<I, A, R, F, Fut>(
        &self,
        method: &str,
        key: Option<RoutingKey>,
        args: A,
        local: F,
    ) -> Result<R>
    where
        I: ?Sized + Send + Sync + 'static,
        A: Serialize,
        R: DeserializeOwned,
        F: FnOnce(Arc<I>, A) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        match self.route(method, key).await? {
            Route::Local(call) => call.run(|imp: Arc<I>| local(imp, args)).await,
            Route::Remote(call) => call.invoke(&args).await,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("component", &self.component.name())
            .field("caller", &self.caller)
            .finish()
    }
}

enum Target {
    Local,
    Remote(Option<ReplicaId>),
}

/// A call that runs on the in-process implementation.
pub struct LocalCall {
    imp: Arc<ImplState>,
    component: String,
    metrics: Arc<MethodMetrics>,
    handle: Option<CallHandle>,
}

impl LocalCall {
    pub fn instance<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>> {
        self.imp
            .instance
            .downcast_ref::<Arc<I>>()
            .cloned()
            .ok_or(Error::TypeMismatch {
                component: self.component.clone(),
                expected: std::any::type_name::<I>(),
            })
    }

    /// Records the outcome and hands it back.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        if let Some(handle) = self.handle.take() {
            self.metrics.end(handle, result.is_err(), 0, 0);
        }
        result
    }

    /// Runs `f` on the implementation inside the component's span.
    pub async fn run<I, T, F, Fut>(self, f: F) -> Result<T>
    where
        I: ?Sized + Send + Sync + 'static,
        F: FnOnce(Arc<I>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let imp = match self.instance::<I>() {
            Ok(imp) => imp,
            Err(e) => return self.finish(Err(e)),
        };
        let span = self.imp.span.clone();
        let result = f(imp).instrument(span).await;
        self.finish(result)
    }
}

impl Drop for LocalCall {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.metrics.end(handle, true, 0, 0);
        }
    }
}

/// A call forwarded through the component's stub.
///
/// Metrics record it as remote even when it falls back to the local
/// implementation.
pub struct RemoteCall {
    component: Arc<Component>,
    caller: String,
    method: String,
    key: Option<RoutingKey>,
    preferred: Option<ReplicaId>,
    metrics: Arc<MethodMetrics>,
    handle: Option<CallHandle>,
}

impl RemoteCall {
    pub fn preferred(&self) -> Option<&ReplicaId> {
        self.preferred.as_ref()
    }

    /// Sends pre-encoded arguments and decodes the reply with `decode`.
    pub async fn invoke_with<T>(
        mut self,
        args: Result<Vec<u8>>,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle.take().unwrap_or_else(|| self.metrics.begin());

        let args = match args {
            Ok(args) => args,
            Err(e) => {
                self.metrics.end(handle, true, 0, 0);
                return Err(e);
            }
        };

        let request_bytes = args.len();
        let (result, reply_bytes) = match self.send(args).await {
            Ok(reply) => (decode(&reply), reply.len()),
            Err(e) => (Err(e), 0),
        };
        self.metrics.end(handle, result.is_err(), request_bytes, reply_bytes);
        result
    }

    pub async fn invoke<A, R>(self, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke_with(stub::encode(args), stub::decode::<R>).await
    }

    async fn send(&self, args: Vec<u8>) -> Result<Vec<u8>> {
        let component = &self.component;
        let spare = component.is_local().then(|| args.clone());

        // Each error carries whether the request certainly never left this
        // process. A stub that could not be built sent nothing.
        let sent = match component.stub().await {
            Ok(stub) => stub
                .invoke(
                    &self.caller,
                    &self.method,
                    self.key.as_ref(),
                    self.preferred.as_ref(),
                    args,
                )
                .await
                .map_err(|e| {
                    let unsent = is_unavailable(&e);
                    (e, unsent)
                }),
            Err(e) => Err((e, true)),
        };

        match (sent, spare) {
            (Ok(reply), _) => Ok(reply),
            (Err((e, true)), Some(args)) => {
                tracing::warn!(
                    component = %component.name(),
                    method = %self.method,
                    error = %e,
                    "no remote replica, running locally"
                );
                let imp = component.implementation().await?;
                imp.server
                    .handle(&self.method, &args)
                    .instrument(imp.span.clone())
                    .await
            }
            (Err((e, _)), _) => Err(e),
        }
    }
}

impl Drop for RemoteCall {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.metrics.end(handle, true, 0, 0);
        }
    }
}

/// Errors from `Stub::invoke` after which the call was certainly not
/// executed remotely.
fn is_unavailable(e: &Error) -> bool {
    match e {
        Error::NoReplica { .. } => true,
        Error::Transport(t) => t.is_unreachable(),
        _ => false,
    }
}
