//! On-disk state shared between clients and processes.
//!
//! Everything lives under the configured storage directory:
//!
//! ```text
//! {storage_dir}/
//! ├── cache/     rate limiter bucket state and its lock file
//! ├── locks/     one lock file per locked entity
//! └── cookies/   one cookie jar per account domain
//! ```
//!
//! # Overview
//!
//! - [`RateLimiter`]: Token bucket shared by every request of every client on the host
//! - [`LockManager`]: Exclusive, TTL-bounded locks around entity updates
//! - [`LockHandle`]: A held (or released) entity lock
//! - [`LockableEntity`]: Anything that can be locked by type and id
//! - [`CookieJar`]: Per-domain session cookie persistence for legacy sessions

mod cookie_jar;
mod lock;
mod rate_limit;

pub use cookie_jar::{CookieJar, StoredCookie};
pub use lock::{resource_key, LockHandle, LockManager, LockableEntity};
pub use rate_limit::{BucketState, RateLimiter, TokenBucket};

use std::path::{Path, PathBuf};

use crate::clients::AmoError;

/// Subdirectory holding rate limiter state.
pub const CACHE_DIR: &str = "cache";
/// Subdirectory holding entity lock files.
pub const LOCKS_DIR: &str = "locks";
/// Subdirectory holding cookie jars.
pub const COOKIES_DIR: &str = "cookies";

/// Creates `dir` (and its parents) if it does not exist.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), AmoError> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| AmoError::storage(dir, e))
}

/// Returns `{storage_dir}/{name}`, created if missing.
pub(crate) fn subdir(storage_dir: &Path, name: &str) -> Result<PathBuf, AmoError> {
    let dir = storage_dir.join(name);
    ensure_dir(&dir)?;
    Ok(dir)
}
