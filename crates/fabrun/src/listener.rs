//! Network listeners handed to component implementations.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::error::Error;
use crate::error::Result;

/// The bind address used when the config names none.
pub const DEFAULT_ADDRESS: &str = "localhost:0";

/// A bound TCP endpoint, optionally fronted by a reverse proxy.
///
/// Displays as the proxy address when there is one, otherwise as the bound
/// socket address, so it can be printed as "where to reach me".
#[derive(Debug)]
pub struct Listener {
    name: String,
    inner: TcpListener,
    local_addr: SocketAddr,
    proxy_addr: Option<String>,
}

impl Listener {
    pub fn new(name: impl Into<String>, inner: TcpListener, proxy_addr: Option<String>) -> Result<Self> {
        let name = name.into();
        let local_addr = inner.local_addr().map_err(|e| Error::Listener {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name,
            inner,
            local_addr,
            proxy_addr,
        })
    }

    /// Binds `address` under the listener name `name`.
    pub async fn bind(name: impl Into<String>, address: &str) -> Result<Self> {
        let name = name.into();
        let inner = TcpListener::bind(address).await.map_err(|e| Error::Listener {
            name: name.clone(),
            reason: format!("bind {}: {}", address, e),
        })?;
        Self::new(name, inner, None)
    }

    pub(crate) fn with_proxy(mut self, proxy_addr: Option<String>) -> Self {
        self.proxy_addr = proxy_addr;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn proxy_addr(&self) -> Option<&str> {
        self.proxy_addr.as_deref()
    }

    pub fn inner(&self) -> &TcpListener {
        &self.inner
    }

    pub fn into_inner(self) -> TcpListener {
        self.inner
    }
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.proxy_addr {
            Some(proxy) => write!(f, "{}", proxy),
            None => write!(f, "{}", self.local_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_renders_bound_address_without_proxy() {
        let listener = Listener::bind("web", "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.to_string(), addr.to_string());
        assert_eq!(listener.proxy_addr(), None);
    }

    #[tokio::test]
    async fn test_renders_proxy_when_present() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::new("web", tcp, Some("proxy.example:443".into())).unwrap();
        assert_eq!(listener.to_string(), "proxy.example:443");
        assert_eq!(listener.name(), "web");
    }

    #[tokio::test]
    async fn test_accepts_connections() {
        let listener = Listener::bind("web", "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let connect = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await });
        let (_stream, _peer) = listener.inner().accept().await.unwrap();
        connect.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_address_is_a_listener_error() {
        let err = Listener::bind("web", "not an address").await.unwrap_err();
        assert!(matches!(err, Error::Listener { ref name, .. } if name == "web"));
    }
}
