//! Token bucket rate limiting persisted on disk.
//!
//! amoCRM rejects accounts that exceed 7 requests per second, so every
//! request first takes a token from a bucket holding `throttle` tokens and
//! refilled at `refill_per_second`. The bucket state is stored in
//! `{storage_dir}/cache/amocrm_limiter.json` and every read-refill-deduct
//! cycle happens under an exclusive advisory lock on
//! `{storage_dir}/cache/amocrm_limiter.lock`, so all clients, threads and
//! processes using the same storage directory share one budget.
//!
//! # Example
//!
//! ```rust,ignore
//! use amocrm_api::storage::{RateLimiter, TokenBucket};
//!
//! let limiter = RateLimiter::new("storage", TokenBucket::new(5, 5))?;
//! limiter.acquire_token(1).await?;
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::clients::AmoError;
use crate::config::AmoConfig;
use crate::storage::{subdir, CACHE_DIR};

const STATE_FILE: &str = "amocrm_limiter.json";
const LOCK_FILE: &str = "amocrm_limiter.lock";

/// Shortest wait between two acquisition attempts.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Persisted bucket contents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens currently available (fractional between refills).
    pub tokens: f64,
    /// Unix time of the last refill, in milliseconds.
    pub last_refill_ms: i64,
}

/// Token bucket parameters and arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_second: u32,
}

impl TokenBucket {
    /// Creates a bucket holding `capacity` tokens, refilled at `refill_per_second`.
    #[must_use]
    pub const fn new(capacity: u32, refill_per_second: u32) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }

    /// Returns the maximum number of tokens.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the number of tokens added per second.
    #[must_use]
    pub const fn refill_per_second(&self) -> u32 {
        self.refill_per_second
    }

    /// Returns a full bucket as of `now_ms`.
    #[must_use]
    pub fn full(&self, now_ms: i64) -> BucketState {
        BucketState {
            tokens: f64::from(self.capacity),
            last_refill_ms: now_ms,
        }
    }

    /// Refills `state` up to `now_ms`, then deducts `weight` tokens.
    ///
    /// # Errors
    ///
    /// When fewer than `weight` tokens are available nothing is deducted and
    /// the time until enough tokens accumulate is returned.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use amocrm_api::storage::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1, 4);
    /// let mut state = bucket.full(0);
    /// assert!(bucket.try_consume(&mut state, 1, 0).is_ok());
    /// assert_eq!(bucket.try_consume(&mut state, 1, 0), Err(Duration::from_millis(250)));
    /// assert!(bucket.try_consume(&mut state, 1, 250).is_ok());
    /// ```
    pub fn try_consume(
        &self,
        state: &mut BucketState,
        weight: u32,
        now_ms: i64,
    ) -> Result<(), Duration> {
        let capacity = f64::from(self.capacity);
        let rate = f64::from(self.refill_per_second);

        if now_ms > state.last_refill_ms {
            #[allow(clippy::cast_precision_loss)]
            let elapsed_secs = (now_ms - state.last_refill_ms) as f64 / 1000.0;
            state.tokens = elapsed_secs.mul_add(rate, state.tokens).min(capacity);
            state.last_refill_ms = now_ms;
        }
        state.tokens = state.tokens.clamp(0.0, capacity);

        let weight = f64::from(weight);
        if state.tokens >= weight {
            state.tokens -= weight;
            return Ok(());
        }

        let wait = Duration::from_secs_f64((weight - state.tokens) / rate);
        Err(wait.max(MIN_WAIT))
    }
}

/// Process- and host-wide request rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    bucket: TokenBucket,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl RateLimiter {
    /// Creates a limiter storing its state under `{storage_dir}/cache/`.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the cache directory cannot be created.
    pub fn new(storage_dir: impl AsRef<Path>, bucket: TokenBucket) -> Result<Self, AmoError> {
        let dir = subdir(storage_dir.as_ref(), CACHE_DIR)?;
        Ok(Self {
            bucket,
            state_path: dir.join(STATE_FILE),
            lock_path: dir.join(LOCK_FILE),
        })
    }

    /// Creates a limiter from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the cache directory cannot be created.
    pub fn from_config(config: &AmoConfig) -> Result<Self, AmoError> {
        Self::new(
            config.storage_dir(),
            TokenBucket::new(config.throttle(), config.refill_per_second()),
        )
    }

    /// Returns the bucket parameters.
    #[must_use]
    pub const fn bucket(&self) -> TokenBucket {
        self.bucket
    }

    /// Waits until `weight` tokens are available, then deducts them.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::RateLimitWeight`] if `weight` exceeds the bucket
    /// capacity, or [`AmoError::Storage`] if the state file is inaccessible.
    pub async fn acquire_token(&self, weight: u32) -> Result<(), AmoError> {
        if weight > self.bucket.capacity {
            return Err(AmoError::RateLimitWeight {
                weight,
                capacity: self.bucket.capacity,
            });
        }

        loop {
            let limiter = self.clone();
            let attempt = tokio::task::spawn_blocking(move || limiter.try_acquire_locked(weight))
                .await
                .map_err(|e| {
                    AmoError::storage(
                        &self.state_path,
                        std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                    )
                })??;

            match attempt {
                None => return Ok(()),
                Some(wait) => {
                    tracing::debug!(?wait, weight, "Rate limit reached, waiting for refill");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// One read-refill-deduct cycle under the exclusive file lock.
    fn try_acquire_locked(&self, weight: u32) -> Result<Option<Duration>, AmoError> {
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| AmoError::storage(&self.lock_path, e))?;
        lock.lock_exclusive()
            .map_err(|e| AmoError::storage(&self.lock_path, e))?;

        let result = self.consume(weight);

        unlock(&lock);
        result
    }

    fn consume(&self, weight: u32) -> Result<Option<Duration>, AmoError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut state = self.read_state().unwrap_or_else(|| self.bucket.full(now_ms));

        match self.bucket.try_consume(&mut state, weight, now_ms) {
            Ok(()) => {
                self.write_state(&state)?;
                Ok(None)
            }
            Err(wait) => {
                self.write_state(&state)?;
                Ok(Some(wait))
            }
        }
    }

    /// Reads the persisted state; a missing or corrupt file means a full bucket.
    fn read_state(&self) -> Option<BucketState> {
        let raw = std::fs::read_to_string(&self.state_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %self.state_path.display(), "Resetting unreadable rate limiter state: {e}");
                None
            }
        }
    }

    fn write_state(&self, state: &BucketState) -> Result<(), AmoError> {
        let json = serde_json::to_string(state).map_err(|e| {
            AmoError::storage(
                &self.state_path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        std::fs::write(&self.state_path, json).map_err(|e| AmoError::storage(&self.state_path, e))
    }
}

fn unlock(file: &File) {
    if let Err(e) = FileExt::unlock(file) {
        tracing::warn!("Failed to unlock rate limiter state: {e}");
    }
}
