// Idempotency guards for webhook redeliveries, repeated questions and repeated replies.
//
// Single-process and best-effort. A hard clear can let a duplicate through and a
// restart forgets everything, so callers use these only to save work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Window and eviction settings of one cache instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupPolicy {
    /// Minimum age before a seen key is accepted again. `None` means never.
    pub window: Option<Duration>,
    /// Eviction runs when the cache holds more entries than this.
    pub capacity: usize,
    /// Entries older than this are dropped when eviction runs.
    pub retention: Option<Duration>,
    /// If the cache is still larger than this after dropping old entries,
    /// it is emptied and only the current key is kept.
    pub hard_clear_above: Option<usize>,
}

impl DedupPolicy {
    pub fn inbound_events() -> Self {
        Self {
            window: None,
            capacity: 100,
            retention: None,
            hard_clear_above: Some(100),
        }
    }

    pub fn recent_queries() -> Self {
        Self {
            window: Some(Duration::from_secs(5)),
            capacity: 200,
            retention: Some(Duration::from_secs(10 * 60)),
            hard_clear_above: Some(150),
        }
    }

    pub fn outbound_messages() -> Self {
        Self {
            window: Some(Duration::from_secs(3 * 60)),
            capacity: 50,
            retention: Some(Duration::from_secs(10 * 60)),
            hard_clear_above: None,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupStats {
    pub accepted: u64,
    pub suppressed: u64,
    pub expired: u64,
    pub hard_clears: u64,
}

/// Time-windowed "have I seen this key" guard.
pub struct DedupCache {
    name: &'static str,
    entries: Mutex<HashMap<String, Instant>>,
    policy: DedupPolicy,
    clock: Arc<dyn Clock>,
    stats: Mutex<DedupStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DedupCache {
    pub fn new(name: &'static str, policy: DedupPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            policy,
            clock,
            stats: Mutex::new(DedupStats::default()),
        }
    }

    /// Returns true and records the key if it is new or older than the window.
    /// Returns false for a duplicate.
    pub fn should_process(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        let mut stats = lock(&self.stats);

        if let Some(&last_seen) = entries.get(key) {
            let age = now.saturating_duration_since(last_seen);
            let expired = self.policy.window.is_some_and(|window| age >= window);
            if !expired {
                stats.suppressed += 1;
                tracing::debug!(
                    "[{}] duplicate key suppressed (seen {:.2}s ago): {}",
                    self.name,
                    age.as_secs_f64(),
                    key
                );
                return false;
            }
        }

        entries.insert(key.to_string(), now);
        stats.accepted += 1;

        if entries.len() > self.policy.capacity {
            self.evict(&mut entries, &mut stats, key, now);
        }
        true
    }

    fn evict(
        &self,
        entries: &mut HashMap<String, Instant>,
        stats: &mut DedupStats,
        current_key: &str,
        now: Instant,
    ) {
        let before = entries.len();

        if let Some(retention) = self.policy.retention {
            entries.retain(|_, seen| now.saturating_duration_since(*seen) <= retention);
            let removed = before - entries.len();
            stats.expired += removed as u64;
            tracing::info!(
                "[{}] cleaned up cache: {} entries deleted ({} remaining)",
                self.name,
                removed,
                entries.len()
            );
        }

        if let Some(limit) = self.policy.hard_clear_above {
            if entries.len() > limit {
                tracing::info!("[{}] clearing cache (size={})", self.name, entries.len());
                entries.clear();
                entries.insert(current_key.to_string(), now);
                stats.hard_clears += 1;
            }
        }
        tracing::debug!("[{}] {:?}", self.name, stats);
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn stats(&self) -> DedupStats {
        lock(&self.stats).clone()
    }

    /// Key for an inbound webhook delivery.
    pub fn event_key(event_id: &str, text: &str, channel: &str) -> String {
        format!("{}_{}_{}", event_id, text, channel)
    }

    /// Key for a question asked in a channel.
    pub fn query_key(channel: &str, question: &str) -> String {
        format!("{}:{}", channel, question.trim())
    }

    /// Key for an outgoing message. Long messages are reduced to their result-count
    /// line so that near-identical replies collapse onto one key.
    pub fn message_key(channel: &str, text: &str) -> String {
        const RESULT_MARKER: &str = "*Result:*";

        let mut signature = text.to_string();
        if text.len() > 50 {
            if let Some((_, rest)) = text.split_once(RESULT_MARKER) {
                let count_part = rest.lines().next().unwrap_or_default();
                signature = format!("WAF result:{}", count_part);
            }
        }
        format!("{}:{}", channel, signature)
    }
}

/// The three process-wide guards, built once at startup.
pub struct DedupCaches {
    pub inbound_events: DedupCache,
    pub recent_queries: DedupCache,
    pub outbound_messages: DedupCache,
}

impl DedupCaches {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inbound_events: DedupCache::new("inbound-events", DedupPolicy::inbound_events(), clock.clone()),
            recent_queries: DedupCache::new("recent-queries", DedupPolicy::recent_queries(), clock.clone()),
            outbound_messages: DedupCache::new("outbound-messages", DedupPolicy::outbound_messages(), clock),
        }
    }
}

impl Default for DedupCaches {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
