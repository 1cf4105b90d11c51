//! Rate limiting module to prevent abuse
//!
//! Every client identity owns one token bucket per action class and a single
//! penalty box shared by all classes. Exhausting any bucket puts the identity
//! in the penalty box for `ban_duration`; while it is there every action is
//! refused and the caller's connection is expected to be terminated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::constants::{
    AI_MAX_TOKENS, AI_REFILL_WINDOW, BAN_DURATION, CREATE_MAX_TOKENS, CREATE_REFILL_WINDOW,
    HOUSEKEEPING_INTERVAL, MESSAGE_MAX_TOKENS, MESSAGE_REFILL_WINDOW, RATE_RECORD_IDLE_TTL,
};
use crate::error::{RelayError, Result};

/// Action classes with independent budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// Room creation
    Create,
    /// Joins and chat messages
    Message,
    /// Requests forwarded to the generative-text collaborator
    Ai,
}

/// Budget for a single action class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimit {
    pub max_tokens: u32,
    pub refill_window: Duration,
}

/// Limits for every action class plus the shared ban duration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub create: BucketLimit,
    pub message: BucketLimit,
    pub ai: BucketLimit,
    pub ban_duration: Duration,
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            create: BucketLimit {
                max_tokens: CREATE_MAX_TOKENS,
                refill_window: CREATE_REFILL_WINDOW,
            },
            message: BucketLimit {
                max_tokens: MESSAGE_MAX_TOKENS,
                refill_window: MESSAGE_REFILL_WINDOW,
            },
            ai: BucketLimit {
                max_tokens: AI_MAX_TOKENS,
                refill_window: AI_REFILL_WINDOW,
            },
            ban_duration: BAN_DURATION,
            idle_ttl: RATE_RECORD_IDLE_TTL,
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, class: ActionClass) -> BucketLimit {
        match class {
            ActionClass::Create => self.create,
            ActionClass::Message => self.message,
            ActionClass::Ai => self.ai,
        }
    }

    /// Notice sent on the transition into the penalty box
    pub fn rate_limit_notice(&self) -> String {
        format!(
            "RATE LIMIT: Too many requests. Wait {}s.",
            self.ban_duration.as_secs()
        )
    }
}

/// Outcome of a single rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Token consumed, go ahead
    Allowed,
    /// Budget just ran out; the identity enters the penalty box now
    Limited,
    /// Identity is already in the penalty box; drop the connection
    Blocked,
}

impl RateDecision {
    /// Convert into a `Result` for `?` propagation at the gateway
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Limited => Err(RelayError::RateLimited),
            Self::Blocked => Err(RelayError::Blocked),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug)]
struct RateRecord {
    buckets: HashMap<ActionClass, Bucket>,
    blocked_until: Option<Instant>,
    last_seen: Instant,
}

impl RateRecord {
    fn new(now: Instant) -> Self {
        Self {
            buckets: HashMap::new(),
            blocked_until: None,
            last_seen: now,
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.map_or(false, |until| now < until)
    }
}

/// Token bucket rate limiter keyed by client identity
pub struct RateLimiter {
    config: RateLimitConfig,
    records: HashMap<String, RateRecord>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
        }
    }

    /// Check (and on success consume) one token for `identity` under `class`
    pub fn check(&mut self, identity: &str, class: ActionClass, now: Instant) -> RateDecision {
        let limit = self.config.limit_for(class);
        let ban_duration = self.config.ban_duration;

        let record = self
            .records
            .entry(identity.to_string())
            .or_insert_with(|| RateRecord::new(now));
        record.last_seen = now;

        if record.is_blocked(now) {
            log::debug!("Rejected {:?} from blocked identity {}", class, identity);
            return RateDecision::Blocked;
        }

        let bucket = record.buckets.entry(class).or_insert(Bucket {
            tokens: limit.max_tokens,
            last_refill: now,
        });

        if now.duration_since(bucket.last_refill) > limit.refill_window {
            bucket.tokens = limit.max_tokens;
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            RateDecision::Allowed
        } else {
            record.blocked_until = Some(now + ban_duration);
            log::warn!(
                "Rate limit exceeded for {} on {:?}, blocked for {}s",
                identity,
                class,
                ban_duration.as_secs()
            );
            RateDecision::Limited
        }
    }

    #[cfg(test)]
    fn is_blocked(&self, identity: &str, now: Instant) -> bool {
        self.records
            .get(identity)
            .map_or(false, |record| record.is_blocked(now))
    }

    /// Evict records that are idle and not banned; returns how many were dropped
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let idle_ttl = self.config.idle_ttl;
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.is_blocked(now) || now.duration_since(record.last_seen) <= idle_ttl
        });
        before - self.records.len()
    }

    /// Number of identities currently tracked
    fn tracked_identities(&self) -> usize {
        self.records.len()
    }
}

// Thread-safe rate limiter wrapper
pub type SharedRateLimiter = Arc<Mutex<RateLimiter>>;

/// Start the periodic sweep of idle rate records
pub fn start_cleanup_task(limiter: SharedRateLimiter) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            let mut limiter = limiter.lock().await;
            let evicted = limiter.evict_idle(Instant::now());
            if evicted > 0 {
                log::debug!(
                    "Rate limiter cleanup evicted {} idle records, {} still tracked",
                    evicted,
                    limiter.tracked_identities()
                );
            }
        }
    })
}
