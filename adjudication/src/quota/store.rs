//! Quota storage primitives.
//!
//! A `QuotaStore` holds sliding-window usage counters and their
//! write-through snapshots. All counter mutation goes through
//! `reserve`/`release`, which are atomic per scope key: the redis
//! backend runs a server-side script, the memory backend holds one
//! lock. Callers never read-modify-write a counter.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self(err.to_string())
    }
}

/// Write-through usage cache value for one scope key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

/// Result of one atomic reservation attempt.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Accepted {
        /// Usage including the units just reserved.
        used: u64,
        reset_at: DateTime<Utc>,
        /// Handle for releasing this reservation.
        reservation: String,
    },
    Rejected {
        used: u64,
        /// When enough window entries expire for a retry to make sense.
        reset_at: DateTime<Utc>,
    },
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically prune expired window entries and, if `used + units`
    /// stays within `limit`, record `units` new entries.
    async fn reserve(
        &self,
        scope: &str,
        units: u32,
        limit: u64,
        window: Duration,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Remove a reservation's window entries (admission rollback).
    async fn release(&self, scope: &str, reservation: &str, units: u32)
        -> Result<(), StoreError>;

    async fn write_snapshot(&self, scope: &str, snapshot: &UsageSnapshot)
        -> Result<(), StoreError>;

    /// Batched snapshot read; one `Option` per requested scope, in order.
    async fn read_snapshots(
        &self,
        scopes: &[String],
    ) -> Result<Vec<Option<UsageSnapshot>>, StoreError>;

    /// Delete the given scope keys outright. Returns how many existed.
    async fn reset(&self, scopes: &[String]) -> Result<u64, StoreError>;
}

// ── in-process store ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct WindowEntry {
    reservation: String,
    units: u32,
    at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    windows: HashMap<String, VecDeque<WindowEntry>>,
    snapshots: HashMap<String, UsageSnapshot>,
}

/// Single-process store for tests and redis-less deployments.
#[derive(Default)]
pub struct MemoryQuotaStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn window_duration(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(24))
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn reserve(
        &self,
        scope: &str,
        units: u32,
        limit: u64,
        window: Duration,
    ) -> Result<ReserveOutcome, StoreError> {
        let now = Utc::now();
        let span = window_duration(window);
        let cutoff = now - span;

        let mut inner = self.inner.lock().await;
        let entries = inner.windows.entry(scope.to_string()).or_default();
        while entries.front().is_some_and(|e| e.at <= cutoff) {
            entries.pop_front();
        }
        let used: u64 = entries.iter().map(|e| u64::from(e.units)).sum();

        if used + u64::from(units) > limit {
            let reset_at = entries
                .front()
                .map(|e| e.at + span)
                .unwrap_or_else(|| now + span);
            return Ok(ReserveOutcome::Rejected { used, reset_at });
        }

        let reservation = Uuid::new_v4().to_string();
        entries.push_back(WindowEntry {
            reservation: reservation.clone(),
            units,
            at: now,
        });
        Ok(ReserveOutcome::Accepted {
            used: used + u64::from(units),
            reset_at: now + span,
            reservation,
        })
    }

    async fn release(
        &self,
        scope: &str,
        reservation: &str,
        _units: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entries) = inner.windows.get_mut(scope) {
            entries.retain(|e| e.reservation != reservation);
        }
        Ok(())
    }

    async fn write_snapshot(
        &self,
        scope: &str,
        snapshot: &UsageSnapshot,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.snapshots.insert(scope.to_string(), snapshot.clone());
        Ok(())
    }

    async fn read_snapshots(
        &self,
        scopes: &[String],
    ) -> Result<Vec<Option<UsageSnapshot>>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(scopes
            .iter()
            .map(|scope| inner.snapshots.get(scope).cloned())
            .collect())
    }

    async fn reset(&self, scopes: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut removed = 0u64;
        for scope in scopes {
            if inner.windows.remove(scope).is_some() {
                removed += 1;
            }
            if inner.snapshots.remove(scope).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ── redis store ──────────────────────────────────────────────────────

const RESERVE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local units = tonumber(ARGV[4])
local resv = ARGV[5]
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, now - window)
local used = redis.call('ZCARD', KEYS[1])
if used + units > limit then
  local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
  local reset = now + window
  if oldest[2] then
    reset = tonumber(oldest[2]) + window
  end
  return {0, used, reset}
end
for i = 1, units do
  redis.call('ZADD', KEYS[1], now, resv .. ':' .. i)
end
redis.call('PEXPIRE', KEYS[1], window)
return {1, used + units, now + window}
"#;

/// Shared store over redis: one sorted-set member per reserved unit,
/// scored by reservation time, pruned and counted inside a script so
/// concurrent callers on different nodes serialize at the server.
///
/// Holds one multiplexed connection, reconnecting once on failure.
pub struct RedisQuotaStore {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    reserve_script: redis::Script,
}

impl RedisQuotaStore {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            reserve_script: redis::Script::new(RESERVE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        debug!("opening redis connection");
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn invalidate(&self) {
        *self.conn.lock().await = None;
    }

    async fn run_reserve(
        &self,
        conn: &mut MultiplexedConnection,
        scope: &str,
        units: u32,
        limit: u64,
        window: Duration,
        reservation: &str,
    ) -> Result<(i64, i64, i64), redis::RedisError> {
        let now_ms = Utc::now().timestamp_millis();
        self.reserve_script
            .key(scope)
            .arg(now_ms)
            .arg(window.as_millis() as i64)
            .arg(limit as i64)
            .arg(units)
            .arg(reservation)
            .invoke_async(conn)
            .await
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn reserve(
        &self,
        scope: &str,
        units: u32,
        limit: u64,
        window: Duration,
    ) -> Result<ReserveOutcome, StoreError> {
        let reservation = Uuid::new_v4().to_string();
        let mut conn = self.connection().await?;
        let result = match self
            .run_reserve(&mut conn, scope, units, limit, window, &reservation)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "redis reserve failed, reconnecting once");
                self.invalidate().await;
                let mut conn = self.connection().await?;
                self.run_reserve(&mut conn, scope, units, limit, window, &reservation)
                    .await?
            }
        };

        let (accepted, used, reset_ms) = result;
        let reset_at = ms_to_datetime(reset_ms);
        if accepted == 1 {
            Ok(ReserveOutcome::Accepted {
                used: used.max(0) as u64,
                reset_at,
                reservation,
            })
        } else {
            Ok(ReserveOutcome::Rejected {
                used: used.max(0) as u64,
                reset_at,
            })
        }
    }

    async fn release(
        &self,
        scope: &str,
        reservation: &str,
        units: u32,
    ) -> Result<(), StoreError> {
        let members: Vec<String> = (1..=units).map(|i| format!("{reservation}:{i}")).collect();
        if members.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(scope);
        for member in &members {
            cmd.arg(member);
        }
        let mut conn = self.connection().await?;
        if let Err(err) = cmd.query_async::<i64>(&mut conn).await {
            warn!(%err, "redis release failed, reconnecting once");
            self.invalidate().await;
            let mut conn = self.connection().await?;
            cmd.query_async::<i64>(&mut conn).await?;
        }
        Ok(())
    }

    async fn write_snapshot(
        &self,
        scope: &str,
        snapshot: &UsageSnapshot,
    ) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(snapshot).map_err(|e| StoreError(e.to_string()))?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(scope).arg(&payload);
        let mut conn = self.connection().await?;
        if let Err(err) = cmd.query_async::<()>(&mut conn).await {
            warn!(%err, "redis snapshot write failed, reconnecting once");
            self.invalidate().await;
            let mut conn = self.connection().await?;
            cmd.query_async::<()>(&mut conn).await?;
        }
        Ok(())
    }

    async fn read_snapshots(
        &self,
        scopes: &[String],
    ) -> Result<Vec<Option<UsageSnapshot>>, StoreError> {
        if scopes.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("MGET");
        for scope in scopes {
            cmd.arg(scope);
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = match cmd.query_async(&mut conn).await {
            Ok(values) => values,
            Err(err) => {
                warn!(%err, "redis snapshot read failed, reconnecting once");
                self.invalidate().await;
                let mut conn = self.connection().await?;
                cmd.query_async(&mut conn).await?
            }
        };
        Ok(values
            .into_iter()
            .map(|v| v.and_then(|raw| serde_json::from_str(&raw).ok()))
            .collect())
    }

    async fn reset(&self, scopes: &[String]) -> Result<u64, StoreError> {
        if scopes.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for scope in scopes {
            cmd.arg(scope);
        }
        let mut conn = self.connection().await?;
        let removed: i64 = match cmd.query_async(&mut conn).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(%err, "redis reset failed, reconnecting once");
                self.invalidate().await;
                let mut conn = self.connection().await?;
                cmd.query_async(&mut conn).await?
            }
        };
        Ok(removed.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn reserve_up_to_limit_then_reject() {
        let store = MemoryQuotaStore::new();
        for _ in 0..3 {
            let outcome = store.reserve("k", 1, 3, DAY).await.unwrap();
            assert!(matches!(outcome, ReserveOutcome::Accepted { .. }));
        }
        let outcome = store.reserve("k", 1, 3, DAY).await.unwrap();
        match outcome {
            ReserveOutcome::Rejected { used, .. } => assert_eq!(used, 3),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_consumes_nothing() {
        let store = MemoryQuotaStore::new();
        store.reserve("k", 4, 5, DAY).await.unwrap();
        // 4 + 3 > 5: rejected, usage must stay at 4.
        assert!(matches!(
            store.reserve("k", 3, 5, DAY).await.unwrap(),
            ReserveOutcome::Rejected { used: 4, .. }
        ));
        // 4 + 1 <= 5 still fits.
        assert!(matches!(
            store.reserve("k", 1, 5, DAY).await.unwrap(),
            ReserveOutcome::Accepted { used: 5, .. }
        ));
    }

    #[tokio::test]
    async fn release_returns_units() {
        let store = MemoryQuotaStore::new();
        let reservation = match store.reserve("k", 5, 5, DAY).await.unwrap() {
            ReserveOutcome::Accepted { reservation, .. } => reservation,
            other => panic!("expected accept, got {other:?}"),
        };
        assert!(matches!(
            store.reserve("k", 1, 5, DAY).await.unwrap(),
            ReserveOutcome::Rejected { .. }
        ));
        store.release("k", &reservation, 5).await.unwrap();
        assert!(matches!(
            store.reserve("k", 5, 5, DAY).await.unwrap(),
            ReserveOutcome::Accepted { used: 5, .. }
        ));
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let store = MemoryQuotaStore::new();
        store.reserve("a", 2, 2, DAY).await.unwrap();
        assert!(matches!(
            store.reserve("b", 2, 2, DAY).await.unwrap(),
            ReserveOutcome::Accepted { .. }
        ));
    }

    #[tokio::test]
    async fn expired_entries_fall_out_of_the_window() {
        let store = MemoryQuotaStore::new();
        let tiny = Duration::from_millis(10);
        store.reserve("k", 2, 2, tiny).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(
            store.reserve("k", 2, 2, tiny).await.unwrap(),
            ReserveOutcome::Accepted { used: 2, .. }
        ));
    }

    #[tokio::test]
    async fn snapshots_round_trip_and_reset() {
        let store = MemoryQuotaStore::new();
        let snap = UsageSnapshot {
            used: 7,
            reset_at: Utc::now(),
        };
        store.write_snapshot("s1", &snap).await.unwrap();
        let read = store
            .read_snapshots(&["s1".into(), "s2".into()])
            .await
            .unwrap();
        assert_eq!(read[0], Some(snap));
        assert_eq!(read[1], None);

        assert_eq!(store.reset(&["s1".into()]).await.unwrap(), 1);
        let read = store.read_snapshots(&["s1".into()]).await.unwrap();
        assert_eq!(read[0], None);
    }
}
