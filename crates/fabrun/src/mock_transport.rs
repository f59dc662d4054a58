//! In-memory transports for tests and single-binary demos.
//!
//! `LoopbackTransport` delivers call envelopes straight into another
//! `Runtime` in the same process, which is how multi-replica deployments are
//! exercised without a network.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::runtime::Runtime;
use crate::transport;
use crate::transport::Transport;

/// A request-response transport backed by a closure.
pub struct CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    handler: F,
}

impl<F> CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait::async_trait]
impl<F> Transport for CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync + 'static,
{
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        (self.handler)(payload)
    }
}

/// A transport whose replica can never be reached.
pub struct UnreachableTransport;

#[async_trait::async_trait]
impl Transport for UnreachableTransport {
    async fn call(&self, _payload: &[u8]) -> transport::Result<Vec<u8>> {
        Err(transport::Error::Unreachable("replica is down".into()))
    }
}

/// Delivers payloads to `Runtime::serve` of a runtime in this process.
///
/// May be created unbound and bound later, so that two runtimes can point
/// at each other.
#[derive(Default)]
pub struct LoopbackTransport {
    target: OnceLock<Weak<Runtime>>,
}

impl LoopbackTransport {
    pub fn new(target: &Arc<Runtime>) -> Self {
        let transport = Self::unbound();
        transport.bind(target);
        transport
    }

    pub fn unbound() -> Self {
        Self::default()
    }

    /// Binds the target runtime. Later binds are ignored.
    pub fn bind(&self, target: &Arc<Runtime>) {
        let _ = self.target.set(Arc::downgrade(target));
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let runtime = self
            .target
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| transport::Error::Unreachable("loopback target is gone".into()))?;
        runtime
            .serve(payload)
            .await
            .map_err(|e| transport::Error::Io(e.to_string()))
    }
}

/// Wraps a transport, counting calls and optionally simulating an outage.
pub struct CountingTransport {
    inner: Arc<dyn Transport>,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl CountingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    /// Calls attempted, including ones refused while down.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for CountingTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(transport::Error::Unreachable("simulated outage".into()));
        }
        self.inner.call(payload).await
    }
}
