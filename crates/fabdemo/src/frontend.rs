//! The unrouted entry point. It references the cache and owns the `web`
//! listener.

use std::sync::Arc;

use fabrun::Dispatcher;
use fabrun::Error;
use fabrun::InitContext;
use fabrun::Registration;
use fabrun::Result;
use fabrun::ServerStub;
use fabrun::listener::Listener;
use fabrun::stub::decode;
use fabrun::stub::encode;

use crate::cache;
use crate::cache::Cache;

pub const NAME: &str = "fabdemo/Frontend";

#[async_trait::async_trait]
pub trait Frontend: Send + Sync {
    /// Stores `value` and reports which replica owns it.
    async fn remember(&self, key: String, value: String) -> Result<String>;
    async fn recall(&self, key: String) -> Result<Option<String>>;
    async fn address(&self) -> Result<String>;
}

struct Site {
    cache: Arc<dyn Cache>,
    web: Listener,
}

#[async_trait::async_trait]
impl Frontend for Site {
    async fn remember(&self, key: String, value: String) -> Result<String> {
        self.cache.put(key.clone(), value).await?;
        self.cache.owner(key).await
    }

    async fn recall(&self, key: String) -> Result<Option<String>> {
        self.cache.get(key).await
    }

    async fn address(&self) -> Result<String> {
        Ok(self.web.to_string())
    }
}

struct FrontendHandle {
    dispatcher: Dispatcher,
}

#[async_trait::async_trait]
impl Frontend for FrontendHandle {
    async fn remember(&self, key: String, value: String) -> Result<String> {
        self.dispatcher
            .call::<dyn Frontend, _, _, _, _>("Remember", None, (key, value), |imp, (key, value)| async move {
                imp.remember(key, value).await
            })
            .await
    }

    async fn recall(&self, key: String) -> Result<Option<String>> {
        self.dispatcher
            .call::<dyn Frontend, _, _, _, _>("Recall", None, key, |imp, key| async move {
                imp.recall(key).await
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

struct FrontendServer {
    imp: Arc<dyn Frontend>,
}

#[async_trait::async_trait]
impl ServerStub for FrontendServer {
    async fn handle(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        match method {
            "Remember" => {
                let (key, value): (String, String) = decode(args)?;
                encode(&self.imp.remember(key, value).await?)
            }
            "Recall" => encode(&self.imp.recall(decode(args)?).await?),
            "Address" => encode(&self.imp.address().await?),
            other => Err(Error::UnknownMethod {
                component: NAME.into(),
                method: other.into(),
            }),
        }
    }
}

pub fn registration() -> fabrun::registry::Result<Registration> {
    Registration::builder::<dyn Frontend>(NAME)
        .implementation("Site")
        .method("Remember")
        .method("Recall")
        .method("Address")
        .unrouted()
        .reference(cache::NAME)
        .listener("web")
        .factory(|ctx: InitContext| async move {
            let cache = ctx.get::<dyn Cache>().await?;
            let web = ctx.listener("web").await?;
            Ok::<_, Error>(Arc::new(Site { cache, web }) as Arc<dyn Frontend>)
        })
        .handle(|dispatcher| Arc::new(FrontendHandle { dispatcher }) as Arc<dyn Frontend>)
        .server(|imp| Arc::new(FrontendServer { imp }) as Arc<dyn ServerStub>)
        .build()
}
