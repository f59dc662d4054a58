//! A routed key-value cache. Keys are sharded across replicas by the
//! `CacheRouter`; each replica keeps only the keys it owns.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

use fabrun::Dispatcher;
use fabrun::Error;
use fabrun::InitContext;
use fabrun::Key;
use fabrun::Registration;
use fabrun::ReplicaId;
use fabrun::Result;
use fabrun::Router;
use fabrun::ServerStub;
use fabrun::stub::decode;
use fabrun::stub::encode;

pub const NAME: &str = "fabdemo/Cache";

#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: String) -> Result<Option<String>>;
    async fn put(&self, key: String, value: String) -> Result<()>;
    /// Replica that stored or served `key`.
    async fn owner(&self, key: String) -> Result<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheConfig {
    pub size: usize,
}

#[derive(Default)]
pub struct CacheRouter;

impl Router for CacheRouter {
    type Key = String;
}

impl CacheRouter {
    fn key(&self, key: &str) -> String {
        key.to_string()
    }
}

struct MemCache {
    replica: ReplicaId,
    size: usize,
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl Cache for MemCache {
    async fn get(&self, key: String) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(&key).cloned())
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.size && !entries.contains_key(&key) {
            return Err(Error::application(format!("cache full at {} entries", self.size)));
        }
        tracing::debug!(key = %key, "stored");
        entries.insert(key, value);
        Ok(())
    }

    async fn owner(&self, _key: String) -> Result<String> {
        Ok(self.replica.to_string())
    }
}

struct CacheHandle {
    dispatcher: Dispatcher,
    router: CacheRouter,
}

#[async_trait::async_trait]
impl Cache for CacheHandle {
    async fn get(&self, key: String) -> Result<Option<String>> {
        let routing = self.router.key(&key).routing_key();
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Get", Some(routing), key, |imp, key| async move {
                imp.get(key).await
            })
            .await
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        let routing = self.router.key(&key).routing_key();
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Put", Some(routing), (key, value), |imp, (key, value)| async move {
                imp.put(key, value).await
            })
            .await
    }

    async fn owner(&self, key: String) -> Result<String> {
        let routing = self.router.key(&key).routing_key();
        self.dispatcher
            .call::<dyn Cache, _, _, _, _>("Owner", Some(routing), key, |imp, key| async move {
                imp.owner(key).await
            })
            .await
    }
}

struct CacheServer {
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
            other => Err(Error::UnknownMethod {
                component: NAME.into(),
                method: other.into(),
            }),
        }
    }
}

pub fn registration() -> fabrun::registry::Result<Registration> {
    Registration::builder::<dyn Cache>(NAME)
        .implementation("MemCache")
        .routed_method::<String>("Get")
        .routed_method::<String>("Put")
        .routed_method::<String>("Owner")
        .routed::<CacheRouter>()
        .config::<CacheConfig>()
        .factory(|ctx: InitContext| async move {
            let config: CacheConfig = ctx.config()?;
            let size = if config.size == 0 { 128 } else { config.size };
            tracing::info!(parent: ctx.span(), size, "cache up");
            Ok::<_, Error>(Arc::new(MemCache {
                replica: ctx.replica_id(),
                size,
                entries: Mutex::new(HashMap::new()),
            }) as Arc<dyn Cache>)
        })
        .handle(|dispatcher| {
            Arc::new(CacheHandle {
                dispatcher,
                router: CacheRouter,
            }) as Arc<dyn Cache>
        })
        .server(|imp| Arc::new(CacheServer { imp }) as Arc<dyn ServerStub>)
        .build()
}
