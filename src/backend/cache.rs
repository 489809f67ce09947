//! Process-wide cache for the authenticated Grafana Cloud client.
//!
//! The cache is versioned by a generation counter. Invalidation bumps the
//! generation before taking the lock, so a build that started under an older
//! generation notices on completion and is discarded instead of cached.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::client::GrafanaCloudClient;
use crate::error::EngineResult;

struct CachedClient {
    generation: u64,
    client: Arc<GrafanaCloudClient>,
}

#[derive(Default)]
pub struct ClientCache {
    generation: AtomicU64,
    builds: AtomicU64,
    slot: RwLock<Option<CachedClient>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current invalidation epoch.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of clients constructed since startup.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Drop the cached client. The next lookup rebuilds it.
    pub async fn invalidate(&self) {
        let current = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.slot.write().await;
        if slot.as_ref().is_some_and(|cached| cached.generation < current) {
            *slot = None;
        }
    }

    /// Return the cached client, building it with `build` on a miss.
    ///
    /// Hits only take the shared lock. On a miss the exclusive lock is taken
    /// and the slot re-checked, so concurrent callers on a cold cache trigger
    /// a single build per generation.
    pub async fn get_or_build<F, Fut>(&self, build: F) -> EngineResult<Arc<GrafanaCloudClient>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngineResult<GrafanaCloudClient>>,
    {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.generation == self.generation() {
                    return Ok(Arc::clone(&cached.client));
                }
            }
        }

        let mut slot = self.slot.write().await;
        loop {
            let generation = self.generation();
            if let Some(cached) = slot.as_ref() {
                if cached.generation == generation {
                    return Ok(Arc::clone(&cached.client));
                }
            }

            let client = Arc::new(build().await?);
            self.builds.fetch_add(1, Ordering::SeqCst);

            if self.generation() == generation {
                *slot = Some(CachedClient {
                    generation,
                    client: Arc::clone(&client),
                });
                return Ok(client);
            }

            tracing::debug!(
                generation,
                "Configuration changed while building client, rebuilding"
            );
        }
    }
}
