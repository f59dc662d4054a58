//! Shared fixtures: a routed `Cache` component, an unrouted `Frontend` that
//! references it, their hand-written handles and server stubs, and helpers
//! for wiring several runtimes together in one process.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

use fabrun::Dispatcher;
use fabrun::Error;
use fabrun::InitContext;
use fabrun::Key;
use fabrun::Registration;
use fabrun::Registry;
use fabrun::ReplicaId;
use fabrun::Result;
use fabrun::Router;
use fabrun::Runtime;
use fabrun::ServerStub;
use fabrun::StaticHost;
use fabrun::listener::Listener;
use fabrun::mock_transport::CountingTransport;
use fabrun::mock_transport::LoopbackTransport;
use fabrun::registration::RegistrationBuilder;
use fabrun::routing::RendezvousAssignment;
use fabrun::stub::decode;
use fabrun::stub::encode;

pub const CACHE: &str = "shop/Cache";
pub const FRONTEND: &str = "shop/Frontend";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// --- Cache ---

#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: String) -> Result<Option<String>>;
    async fn put(&self, key: String, value: String) -> Result<()>;
    /// The replica that serves `key`.
    async fn owner(&self, key: String) -> Result<String>;
    async fn len(&self) -> Result<usize>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheConfig {
    pub size: usize,
    pub name: String,
}

#[derive(Default)]
pub struct CacheRouter;

impl Router for CacheRouter {
    type Key = String;
}

impl CacheRouter {
    pub fn get(&self, key: &str) -> String {
        key.to_string()
    }

    pub fn put(&self, key: &str, _value: &str) -> String {
        key.to_string()
    }

    pub fn owner(&self, key: &str) -> String {
        key.to_string()
    }
}

pub struct LruCache {
    replica: ReplicaId,
    capacity: usize,
    entries: Mutex<HashMap<String, String>>,
}

impl LruCache {
    pub fn new(replica: ReplicaId, capacity: usize) -> Self {
        Self {
            replica,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl Cache for LruCache {
    async fn get(&self, key: String) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(&key).cloned())
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        if key.is_empty() {
            return Err(Error::application("empty key"));
        }
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            return Err(Error::application("cache full"));
        }
        entries.insert(key, value);
        Ok(())
    }

    async fn owner(&self, _key: String) -> Result<String> {
        Ok(self.replica.to_string())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

pub struct CacheHandle {
    dispatcher: Dispatcher,
    router: CacheRouter,
}

#[async_trait::async_trait]
impl Cache for CacheHandle {
    async fn get(&self, key: String) -> Result<Option<String>> {
        let routing = self.router.get(&key).routing_key();
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Get", Some(routing), key, |imp, key| async move {
                imp.get(key).await
            })
            .await
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        let routing = self.router.put(&key, &value).routing_key();
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Put", Some(routing), (key, value), |imp, (key, value)| async move {
                imp.put(key, value).await
            })
            .await
    }

    async fn owner(&self, key: String) -> Result<String> {
        let routing = self.router.owner(&key).routing_key();
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Owner", Some(routing), key, |imp, key| async move {
                imp.owner(key).await
            })
            .await
    }

    async fn len(&self) -> Result<usize> {
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Len", None, (), |imp, ()| async move { imp.len().await })
            .await
    }
}

pub struct CacheServer {
    imp: Arc<dyn Cache>,
}

#[async_trait::async_trait]
impl ServerStub for CacheServer {
    async fn handle(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        match method {
            "Get" => encode(&self.imp.get(decode(args)?).await?),
            "Put" => {
                let (key, value): (String, String) = decode(args)?;
                encode(&self.imp.put(key, value).await?)
            }
            "Owner" => encode(&self.imp.owner(decode(args)?).await?),
            "Len" => encode(&self.imp.len().await?),
            other => Err(Error::UnknownMethod {
                component: CACHE.into(),
                method: other.into(),
            }),
        }
    }
}

/// Options for the cache fixture.
#[derive(Clone, Default)]
pub struct CacheFixture {
    pub inits: Arc<AtomicUsize>,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl CacheFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// The cache registration without its routing declaration.
    pub fn builder(&self) -> RegistrationBuilder<dyn Cache> {
        let fixture = self.clone();
        Registration::builder::<dyn Cache>(CACHE)
            .implementation("LruCache")
            .routed_method::<String>("Get")
            .routed_method::<String>("Put")
            .routed_method::<String>("Owner")
            .method("Len")
            .config::<CacheConfig>()
            .factory(move |ctx: InitContext| {
                let fixture = fixture.clone();
                async move {
                    fixture.inits.fetch_add(1, Ordering::SeqCst);
                    if let Some(delay) = fixture.delay {
                        tokio::time::sleep(delay).await;
                    }
                    if fixture.fail {
                        return Err(Error::application("disk on fire"));
                    }
                    let config: CacheConfig = ctx.config()?;
                    let capacity = if config.size == 0 { 1024 } else { config.size };
                    tracing::info!(parent: ctx.span(), capacity, "cache starting");
                    Ok(Arc::new(LruCache::new(ctx.replica_id(), capacity)) as Arc<dyn Cache>)
                }
            })
            .handle(|dispatcher| {
                Arc::new(CacheHandle {
                    dispatcher,
                    router: CacheRouter,
                }) as Arc<dyn Cache>
            })
            .server(|imp| Arc::new(CacheServer { imp }) as Arc<dyn ServerStub>)
    }

    pub fn registration(&self) -> Registration {
        self.builder()
            .routed::<CacheRouter>()
            .build()
            .expect("cache registration")
    }
}

// --- Frontend ---

#[async_trait::async_trait]
pub trait Frontend: Send + Sync {
    async fn lookup(&self, key: String) -> Result<String>;
    async fn address(&self) -> Result<String>;
}

pub struct FrontendImpl {
    cache: Arc<dyn Cache>,
    web: Listener,
}

#[async_trait::async_trait]
impl Frontend for FrontendImpl {
    async fn lookup(&self, key: String) -> Result<String> {
        match self.cache.get(key.clone()).await? {
            Some(value) => Ok(value),
            None => Err(Error::application(format!("{} not found", key))),
        }
    }

    async fn address(&self) -> Result<String> {
        Ok(self.web.to_string())
    }
}

pub struct FrontendHandle {
    dispatcher: Dispatcher,
}

#[async_trait::async_trait]
impl Frontend for FrontendHandle {
    async fn lookup(&self, key: String) -> Result<String> {
        self.dispatcher
            .call::<dyn Frontend, _, _, _, _>("Lookup", None, key, |imp, key| async move {
                imp.lookup(key).await
            })
            .await
    }

    async fn address(&self) -> Result<String> {
        self.dispatcher
            .call::<dyn Frontend, _, _, _, _>("Address", None, (), |imp, ()| async move {
                imp.address().await
            })
            .await
    }
}

pub struct FrontendServer {
    imp: Arc<dyn Frontend>,
}

#[async_trait::async_trait]
impl ServerStub for FrontendServer {
    async fn handle(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        match method {
            "Lookup" => encode(&self.imp.lookup(decode(args)?).await?),
            "Address" => encode(&self.imp.address().await?),
            other => Err(Error::UnknownMethod {
                component: FRONTEND.into(),
                method: other.into(),
            }),
        }
    }
}

/// The frontend registration; `declare_ref` controls whether it declares
/// its dependency on the cache.
pub fn frontend(declare_ref: bool) -> Registration {
    let builder = Registration::builder::<dyn Frontend>(FRONTEND)
        .implementation("FrontendImpl")
        .method("Lookup")
        .method("Address")
        .listener("web")
        .unrouted()
        .factory(|ctx: InitContext| async move {
            let cache = ctx.get::<dyn Cache>().await?;
            let web = ctx.listener("web").await?;
            Ok::<_, Error>(Arc::new(FrontendImpl { cache, web }) as Arc<dyn Frontend>)
        })
        .handle(|dispatcher| Arc::new(FrontendHandle { dispatcher }) as Arc<dyn Frontend>)
        .server(|imp| Arc::new(FrontendServer { imp }) as Arc<dyn ServerStub>);
    let builder = if declare_ref { builder.reference(CACHE) } else { builder };
    builder.build().expect("frontend registration")
}

pub fn registry(registrations: impl IntoIterator<Item = Registration>) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    for r in registrations {
        registry.register(r).expect("register");
    }
    registry
}

/// A single-process runtime hosting every registration.
pub fn single(registrations: impl IntoIterator<Item = Registration>) -> Arc<Runtime> {
    init_logging();
    Runtime::builder()
        .registry(registry(registrations))
        .build()
        .expect("runtime")
}

// --- Multi-replica wiring ---

/// Two cache replicas `a` and `b` plus a `client` replica that hosts
/// nothing, all in one process and sharing one registry.
pub struct Cluster {
    pub a: Arc<Runtime>,
    pub b: Arc<Runtime>,
    pub client: Arc<Runtime>,
    /// Transport into `a` as seen by the other replicas.
    pub to_a: Arc<CountingTransport>,
    pub to_b: Arc<CountingTransport>,
    pub assignment: Arc<RendezvousAssignment>,
}

#[derive(Default)]
pub struct ClusterOptions {
    pub route_locally_on_a: bool,
    pub no_assignment: bool,
}

impl Cluster {
    pub fn new(fixture: &CacheFixture) -> Self {
        Self::with_options(fixture, ClusterOptions::default())
    }

    pub fn with_options(fixture: &CacheFixture, options: ClusterOptions) -> Self {
        init_logging();
        let registry = registry([fixture.registration()]);
        let a_id = ReplicaId::new("a");
        let b_id = ReplicaId::new("b");
        let assignment = Arc::new(RendezvousAssignment::new([a_id.clone(), b_id.clone()]));

        let loop_a = Arc::new(LoopbackTransport::unbound());
        let loop_b = Arc::new(LoopbackTransport::unbound());
        let to_a = Arc::new(CountingTransport::new(loop_a.clone()));
        let to_b = Arc::new(CountingTransport::new(loop_b.clone()));

        let with_assignment = |host: StaticHost| {
            if options.no_assignment {
                host
            } else {
                host.with_assignment(CACHE, assignment.clone())
            }
        };

        let mut host_a = StaticHost::new(a_id.clone())
            .local(CACHE)
            .peer(CACHE, b_id.clone(), to_b.clone());
        if options.route_locally_on_a {
            host_a = host_a.route_locally(CACHE);
        }
        let host_b = StaticHost::new(b_id.clone())
            .local(CACHE)
            .peer(CACHE, a_id.clone(), to_a.clone());
        let host_client = StaticHost::new(ReplicaId::new("client"))
            .peer(CACHE, a_id, to_a.clone())
            .peer(CACHE, b_id, to_b.clone());

        let build = |host: StaticHost| {
            Runtime::builder()
                .registry(registry.clone())
                .host(Arc::new(with_assignment(host)))
                .build()
                .expect("runtime")
        };
        let a = build(host_a);
        let b = build(host_b);
        let client = build(host_client);

        loop_a.bind(&a);
        loop_b.bind(&b);

        Self {
            a,
            b,
            client,
            to_a,
            to_b,
            assignment,
        }
    }
}
