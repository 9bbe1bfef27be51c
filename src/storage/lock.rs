//! Exclusive entity locks backed by advisory file locks.
//!
//! Updating an amoCRM entity is a read-modify-write cycle; two workers saving
//! the same lead at once silently overwrite each other. Callers wrap updates
//! in a lock keyed by entity type and id (`amo_lock_{id}_{type}`), held as an
//! exclusive `flock` on `{storage_dir}/locks/{key}.lock`.
//!
//! The operating system drops the lock when the holding process dies. The TTL
//! is recorded in the lock file and on the [`LockHandle`], which reports
//! [`LockHandle::is_expired`] once it has been held longer than that.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use amocrm_api::storage::LockManager;
//!
//! let locks = LockManager::new("storage", Duration::from_secs(30))?;
//! let mut handle = locks.acquire("amo_lock_42_lead", None).await?;
//! // ... update the lead ...
//! handle.release();
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;

use crate::clients::AmoError;
use crate::config::AmoConfig;
use crate::storage::{subdir, LOCKS_DIR};

const KEY_PREFIX: &str = "amo_lock";

/// An amoCRM entity that can be locked around updates.
pub trait LockableEntity {
    /// Entity kind, e.g. `lead`, `contact` or `catalogelement`.
    fn entity_type(&self) -> &str;

    /// The entity id.
    fn entity_id(&self) -> u64;

    /// Returns the lock key, `amo_lock_{id}_{type}`.
    fn lock_key(&self) -> String {
        resource_key(self.entity_id(), self.entity_type())
    }
}

/// Builds the lock key for an entity.
///
/// The type is lowercased and anything outside `[a-z0-9_]` becomes `_`.
///
/// ```rust
/// use amocrm_api::storage::resource_key;
///
/// assert_eq!(resource_key(42, "Lead"), "amo_lock_42_lead");
/// assert_eq!(resource_key(7, "catalog/element"), "amo_lock_7_catalog_element");
/// ```
#[must_use]
pub fn resource_key(id: u64, entity_type: &str) -> String {
    let entity_type: String = entity_type
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{KEY_PREFIX}_{id}_{entity_type}")
}

/// A held (or released) entity lock.
///
/// Dropping the handle releases the lock.
#[derive(Debug)]
pub struct LockHandle {
    resource_key: String,
    ttl: Duration,
    acquired_at: DateTime<Utc>,
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    /// Returns the lock key.
    #[must_use]
    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    /// Returns the time-to-live recorded for this lock.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns when the lock was acquired.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` until the lock is released.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        self.file.is_some()
    }

    /// Returns `true` once the lock has been held longer than its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let held = Utc::now() - self.acquired_at;
        held.to_std().map_or(false, |held| held > self.ttl)
    }

    /// Releases the lock. Releasing twice is a no-op.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        if self.is_expired() {
            tracing::warn!(
                resource_key = %self.resource_key,
                ttl = ?self.ttl,
                "Releasing lock held longer than its TTL"
            );
        }

        if let Err(e) = FileExt::unlock(&file) {
            tracing::warn!(resource_key = %self.resource_key, "Failed to unlock: {e}");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out exclusive locks under `{storage_dir}/locks/`.
#[derive(Clone, Debug)]
pub struct LockManager {
    dir: PathBuf,
    default_ttl: Duration,
}

impl LockManager {
    /// Creates a manager, creating the locks directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the directory cannot be created.
    pub fn new(storage_dir: impl AsRef<Path>, default_ttl: Duration) -> Result<Self, AmoError> {
        Ok(Self {
            dir: subdir(storage_dir.as_ref(), LOCKS_DIR)?,
            default_ttl,
        })
    }

    /// Creates a manager from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the directory cannot be created.
    pub fn from_config(config: &AmoConfig) -> Result<Self, AmoError> {
        Self::new(config.storage_dir(), config.lock_ttl())
    }

    /// Returns the TTL used when none is given.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Acquires the lock for `resource_key`, waiting as long as it is held.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the lock file cannot be opened or locked.
    pub async fn acquire(
        &self,
        resource_key: &str,
        ttl: Option<Duration>,
    ) -> Result<LockHandle, AmoError> {
        let manager = self.clone();
        let key = resource_key.to_string();
        let ttl = ttl.unwrap_or(self.default_ttl);

        tokio::task::spawn_blocking(move || {
            let path = manager.lock_path(&key);
            let file = open_lock_file(&path)?;
            file.lock_exclusive()
                .map_err(|e| AmoError::storage(&path, e))?;
            Ok(LockHandle::new(key, ttl, path, file))
        })
        .await
        .map_err(|e| {
            AmoError::storage(
                self.lock_path(resource_key),
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )
        })?
    }

    /// Acquires the lock for `resource_key` only if it is free.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the lock file cannot be opened or the
    /// lock attempt fails for a reason other than contention.
    pub fn try_acquire(
        &self,
        resource_key: &str,
        ttl: Option<Duration>,
    ) -> Result<Option<LockHandle>, AmoError> {
        let path = self.lock_path(resource_key);
        let file = open_lock_file(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockHandle::new(
                resource_key.to_string(),
                ttl.unwrap_or(self.default_ttl),
                path,
                file,
            ))),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(AmoError::storage(path, e)),
        }
    }

    fn lock_path(&self, resource_key: &str) -> PathBuf {
        self.dir.join(format!("{resource_key}.lock"))
    }
}

impl LockHandle {
    fn new(resource_key: String, ttl: Duration, path: PathBuf, mut file: File) -> Self {
        let acquired_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| acquired_at.checked_add_signed(ttl));

        // Informational only; the flock is what excludes other holders.
        let record = format!(
            "{}\n{}\n",
            std::process::id(),
            expires_at.map_or_else(String::new, |at| at.to_rfc3339())
        );
        if let Err(e) = file
            .set_len(0)
            .and_then(|()| file.write_all(record.as_bytes()))
        {
            tracing::debug!(%resource_key, "Could not record lock owner: {e}");
        }

        Self {
            resource_key,
            ttl,
            acquired_at,
            path,
            file: Some(file),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, AmoError> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| AmoError::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lead(u64);

    impl LockableEntity for Lead {
        fn entity_type(&self) -> &str {
            "lead"
        }

        fn entity_id(&self) -> u64 {
            self.0
        }
    }

    fn manager() -> (tempfile::TempDir, LockManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path(), Duration::from_secs(30)).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_lock_key_format() {
        assert_eq!(Lead(42).lock_key(), "amo_lock_42_lead");
        assert_eq!(resource_key(1, "Catalog Element"), "amo_lock_1_catalog_element");
    }

    #[tokio::test]
    async fn test_sequential_acquire_release_cycles() {
        let (_dir, locks) = manager();
        for _ in 0..3 {
            let mut handle = locks.acquire("amo_lock_1_lead", None).await.unwrap();
            assert!(handle.is_acquired());
            assert_eq!(handle.ttl(), Duration::from_secs(30));
            handle.release();
            assert!(!handle.is_acquired());
        }
    }

    #[tokio::test]
    async fn test_try_acquire_returns_none_while_held() {
        let (_dir, locks) = manager();
        let mut held = locks.acquire("amo_lock_2_lead", None).await.unwrap();

        assert!(locks.try_acquire("amo_lock_2_lead", None).unwrap().is_none());
        assert!(locks.try_acquire("amo_lock_3_lead", None).unwrap().is_some());

        held.release();
        assert!(locks.try_acquire("amo_lock_2_lead", None).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_dir, locks) = manager();
        let mut handle = locks.acquire("amo_lock_4_lead", None).await.unwrap();
        handle.release();
        handle.release();
        assert!(!handle.is_acquired());
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let (_dir, locks) = manager();
        {
            let _handle = locks.acquire("amo_lock_5_lead", None).await.unwrap();
        }
        assert!(locks.try_acquire("amo_lock_5_lead", None).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let (_dir, locks) = manager();
        let mut first = locks.acquire("amo_lock_6_lead", None).await.unwrap();

        let contender = locks.clone();
        let waiter =
            tokio::spawn(async move { contender.acquire("amo_lock_6_lead", None).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!waiter.is_finished());

        first.release();
        let second = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should finish after release")
            .unwrap()
            .unwrap();
        assert!(second.is_acquired());
    }

    #[tokio::test]
    async fn test_expiry_and_lock_file_contents() {
        let (_dir, locks) = manager();
        let handle = locks
            .acquire("amo_lock_7_lead", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(handle.ttl(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.is_expired());

        let contents = std::fs::read_to_string(handle.path()).unwrap();
        assert!(contents.starts_with(&std::process::id().to_string()));
    }
}
