//! Platform services the client depends on
//!
//! Connectivity, timers and token persistence differ per target (mobile,
//! browser, desktop, tests). The client only sees these traits.

use crate::token_store::{MemoryTokenStore, TokenStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Reports whether the network is usable right now
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Source of delays; requests time out and back off through it
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time via `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Connectivity flag driven by the host (e.g. OS network-change callbacks)
#[derive(Debug, Clone)]
pub struct StaticReachability {
    online: Arc<AtomicBool>,
}

impl StaticReachability {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticReachability {
    fn default() -> Self {
        Self::online()
    }
}

#[async_trait]
impl Reachability for StaticReachability {
    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Probes connectivity by opening a TCP connection to a known host
#[derive(Debug, Clone)]
pub struct TcpReachability {
    address: String,
    timeout: Duration,
}

impl TcpReachability {
    /// `address` is `host:port`, e.g. the API host.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                debug!(address = %self.address, "Reachability probe timed out");
                false
            }
        }
    }
}

/// Everything the client needs from its host platform
#[derive(Clone)]
pub struct PlatformServices {
    pub token_store: Arc<dyn TokenStore>,
    pub reachability: Arc<dyn Reachability>,
    pub clock: Arc<dyn Clock>,
}

impl PlatformServices {
    pub fn new(
        token_store: Arc<dyn TokenStore>,
        reachability: Arc<dyn Reachability>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token_store,
            reachability,
            clock,
        }
    }

    pub fn with_token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = token_store;
        self
    }

    pub fn with_reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = reachability;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for PlatformServices {
    /// In-memory tokens, always online, real time.
    fn default() -> Self {
        Self::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(StaticReachability::online()),
            Arc::new(TokioClock),
        )
    }
}
