//! Two-tier cache: local L1 in front of a shared L2

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::local::LocalCache;
use crate::domain::cache::{CacheProvider, CacheStats, StatsRecorder};
use crate::domain::ServiceResult;

/// L1/L2 cache with read-through promotion
///
/// Reads try L1 first and only reach L2 on an L1 miss. An L2 hit is copied
/// into L1 with the TTL L2 still reports for it, or the default TTL when L2
/// cannot tell. Writes go to L1 then L2; L1 may be ahead of L2 until its
/// entry expires if the second write fails.
#[derive(Debug)]
pub struct HybridCache {
    l1: LocalCache,
    l2: Arc<dyn CacheProvider>,
    default_ttl: Duration,
    stats: StatsRecorder,
    promotions: AtomicU64,
}

impl HybridCache {
    pub fn new(l1: LocalCache, l2: Arc<dyn CacheProvider>, default_ttl: Duration) -> Self {
        Self {
            l1,
            l2,
            default_ttl,
            stats: StatsRecorder::new(),
            promotions: AtomicU64::new(0),
        }
    }

    pub fn l1(&self) -> &LocalCache {
        &self.l1
    }

    pub fn l2(&self) -> &Arc<dyn CacheProvider> {
        &self.l2
    }

    /// Values copied from L2 into L1
    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheProvider for HybridCache {
    async fn get_raw(&self, key: &str) -> ServiceResult<Option<String>> {
        if let Some(value) = self.l1.get_raw(key).await? {
            self.stats.record_hit();
            return Ok(Some(value));
        }

        let Some(value) = self.l2.get_raw(key).await? else {
            self.stats.record_miss();
            return Ok(None);
        };

        let ttl = match self.l2.ttl(key).await {
            Ok(Some(remaining)) if !remaining.is_zero() => remaining,
            Ok(_) => self.default_ttl,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "L2 TTL lookup failed, promoting with default TTL");
                self.default_ttl
            }
        };

        self.l1.set_raw(key, &value, Some(ttl)).await?;
        self.promotions.fetch_add(1, Ordering::Relaxed);
        self.stats.record_hit();

        tracing::trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "Promoted L2 value into L1");

        Ok(Some(value))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> ServiceResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);

        self.l1.set_raw(key, value, Some(ttl)).await?;
        self.l2.set_raw(key, value, Some(ttl)).await?;

        self.stats.record_set();
        Ok(())
    }

    async fn delete(&self, key: &str) -> ServiceResult<bool> {
        let in_l1 = self.l1.delete(key).await?;
        let in_l2 = self.l2.delete(key).await?;

        let removed = in_l1 || in_l2;
        if removed {
            self.stats.record_delete();
        }
        Ok(removed)
    }

    async fn clear(&self) -> ServiceResult<()> {
        self.l1.clear().await?;
        self.l2.clear().await?;

        self.stats.reset();
        self.promotions.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn has(&self, key: &str) -> ServiceResult<bool> {
        if self.l1.has(key).await? {
            return Ok(true);
        }
        self.l2.has(key).await
    }

    async fn ttl(&self, key: &str) -> ServiceResult<Option<Duration>> {
        match self.l1.ttl(key).await? {
            Some(remaining) => Ok(Some(remaining)),
            None => self.l2.ttl(key).await,
        }
    }

    /// Union of both tiers, or `None` when L2 cannot enumerate
    async fn keys(&self) -> ServiceResult<Option<Vec<String>>> {
        let Some(l2_keys) = self.l2.keys().await? else {
            return Ok(None);
        };

        let mut keys: BTreeSet<String> = l2_keys.into_iter().collect();
        if let Some(l1_keys) = self.l1.keys().await? {
            keys.extend(l1_keys);
        }

        Ok(Some(keys.into_iter().collect()))
    }

    fn enumerates_keys(&self) -> bool {
        self.l2.enumerates_keys()
    }

    async fn stats(&self) -> ServiceResult<CacheStats> {
        let l1 = self.l1.stats().await?;
        let l2 = self.l2.stats().await?;

        let mut stats = self.stats.snapshot(l1.size.max(l2.size));
        stats.evictions = l1.evictions + l2.evictions;
        stats.expirations = l1.expirations + l2.expirations;

        Ok(stats)
    }

    async fn close(&self) -> ServiceResult<()> {
        self.l1.close().await?;
        self.l2.close().await
    }

    fn name(&self) -> &'static str {
        "hybrid"
    }
}
