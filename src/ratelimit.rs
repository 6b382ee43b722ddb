use crate::storage::{ChangeListener, ChangeSignal, Storage, StorageChange};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

pub const RATE_LIMIT_KEY: &str = "aceai_rate_limit";

const HEADER_PREFIX: &str = "x-ratelimit";
const MINUTE_PREFIX: &str = "x-ratelimit-minute";
const DAY_PREFIX: &str = "x-ratelimit-day";

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    pub limit: String,
    pub remaining: String,
    pub reset_seconds: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitUpdate {
    pub limit: String,
    pub remaining: String,
    pub reset_seconds: String,
    pub minute: Option<RateLimitWindow>,
    pub day: Option<RateLimitWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub limit: String,
    pub remaining: String,
    pub reset_seconds: String,
    /// Epoch milliseconds, fixed when the snapshot was written.
    pub reset_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<RateLimitWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<RateLimitWindow>,
}

impl RateLimitSnapshot {
    pub fn seconds_until_reset(&self, now_millis: i64) -> u64 {
        let remaining_ms = self.reset_at.saturating_sub(now_millis);
        if remaining_ms <= 0 {
            return 0;
        }
        (remaining_ms as u64).div_ceil(1000)
    }

    pub fn badge_text(&self, now_millis: i64) -> String {
        let context = match (&self.minute, &self.day) {
            (Some(minute), Some(day)) => format!(
                "Minute {}/{} · Day {}/{}",
                minute.remaining, minute.limit, day.remaining, day.limit
            ),
            _ => format!("{}/{}", self.remaining, self.limit),
        };

        match self.seconds_until_reset(now_millis) {
            0 => format!("Rate limit: {} · resetting…", context),
            seconds => format!("Rate limit: {} · resets in {}s", context, seconds),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSnapshot {
    limit: Option<String>,
    remaining: Option<String>,
    reset_seconds: Option<String>,
    reset_at: Option<f64>,
    #[serde(default)]
    minute: Option<RateLimitWindow>,
    #[serde(default)]
    day: Option<RateLimitWindow>,
}

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: HashMap<u64, Callback>,
}

fn lock_listeners(listeners: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Each store has its own origin id; a store ignores cross-context echoes of
/// its own writes because those subscribers are already notified locally.
pub struct RateLimitStore {
    storage: Arc<dyn Storage>,
    signal: Arc<dyn ChangeSignal>,
    clock: Arc<dyn Clock>,
    origin: Uuid,
    listeners: Arc<Mutex<Listeners>>,
}

impl RateLimitStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        signal: Arc<dyn ChangeSignal>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            signal,
            clock,
            origin: Uuid::new_v4(),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn read(&self) -> Option<RateLimitSnapshot> {
        let raw = self.storage.get(RATE_LIMIT_KEY)?;
        let stored: StoredSnapshot = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                debug!(error = %err, "stored rate limit is unreadable");
                return None;
            }
        };

        let limit = stored.limit.filter(|v| !v.is_empty())?;
        let remaining = stored.remaining.filter(|v| !v.is_empty())?;
        let reset_seconds = stored.reset_seconds.filter(|v| !v.is_empty())?;
        let reset_at = match stored.reset_at {
            Some(at) if at.is_finite() && at != 0.0 => at as i64,
            _ => reset_at_from(self.clock.now_millis(), &reset_seconds),
        };

        Some(RateLimitSnapshot {
            limit,
            remaining,
            reset_seconds,
            reset_at,
            minute: stored.minute,
            day: stored.day,
        })
    }

    pub fn write(&self, update: RateLimitUpdate) -> Option<RateLimitSnapshot> {
        let reset_at = reset_at_from(self.clock.now_millis(), &update.reset_seconds);
        let snapshot = RateLimitSnapshot {
            limit: update.limit,
            remaining: update.remaining,
            reset_seconds: update.reset_seconds,
            reset_at,
            minute: update.minute,
            day: update.day,
        };

        let persisted = serde_json::to_string(&snapshot)
            .map_err(Into::into)
            .and_then(|value| self.storage.set(RATE_LIMIT_KEY, &value));
        if let Err(err) = persisted {
            warn!(error = %err, "failed to persist rate limit snapshot");
            return None;
        }

        self.notify_local();
        self.signal.publish(StorageChange {
            key: RATE_LIMIT_KEY.to_string(),
            origin: self.origin,
        });
        Some(snapshot)
    }

    /// The headline figures come from the day window. Without a complete day
    /// window nothing is written, even if a minute window is present.
    pub fn write_from_headers(&self, headers: &HeaderMap) -> bool {
        if read_window(headers, HEADER_PREFIX).is_none() {
            return false;
        }

        let minute = read_window(headers, MINUTE_PREFIX);
        let Some(day) = read_window(headers, DAY_PREFIX) else {
            if minute.is_some() {
                debug!("rate limit headers carry a minute window but no day window; skipping");
            }
            return false;
        };

        self.write(RateLimitUpdate {
            limit: day.limit.clone(),
            remaining: day.remaining.clone(),
            reset_seconds: day.reset_seconds.clone(),
            minute,
            day: Some(day),
        })
        .is_some()
    }

    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let callback: Callback = Arc::new(callback);

        let local_id = {
            let mut listeners = lock_listeners(&self.listeners);
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners.callbacks.insert(id, Arc::clone(&callback));
            id
        };

        let origin = self.origin;
        let remote: ChangeListener = Arc::new(move |change: &StorageChange| {
            if change.key == RATE_LIMIT_KEY && change.origin != origin {
                callback();
            }
        });
        let signal_id = self.signal.listen(remote);

        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            local_id,
            signal: Arc::clone(&self.signal),
            signal_id,
            active: AtomicBool::new(true),
        }
    }

    #[cfg(test)]
    fn local_listener_count(&self) -> usize {
        lock_listeners(&self.listeners).callbacks.len()
    }

    fn notify_local(&self) {
        let callbacks: Vec<Callback> = lock_listeners(&self.listeners)
            .callbacks
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    local_id: u64,
    signal: Arc<dyn ChangeSignal>,
    signal_id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            lock_listeners(&listeners).callbacks.remove(&self.local_id);
        }
        self.signal.unlisten(self.signal_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn read_window(headers: &HeaderMap, prefix: &str) -> Option<RateLimitWindow> {
    let limit = header(headers, &format!("{}-limit", prefix))?;
    let remaining = header(headers, &format!("{}-remaining", prefix))?;
    let reset_seconds = header(headers, &format!("{}-reset", prefix))?;
    Some(RateLimitWindow {
        limit: limit.to_string(),
        remaining: remaining.to_string(),
        reset_seconds: reset_seconds.to_string(),
    })
}

fn reset_at_from(now_millis: i64, reset_seconds: &str) -> i64 {
    let offset = match reset_seconds.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() => (seconds * 1000.0) as i64,
        _ => 0,
    };
    now_millis.saturating_add(offset)
}
