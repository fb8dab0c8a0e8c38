use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use relay_core::AttachmentId;
use tracing::{debug, warn};

use crate::entities::{AttachmentType, CacheStats, CachedAttachment};
use crate::error::Result;

/// `<storage_dir>/<type>/<attachment_id>/<attachment_id>.<ext>` plus a
/// sidecar `<attachment_id>.json` carrying the `CachedAttachment` fields.
/// The attachment cache is the sole owner of this directory tree.
pub struct AttachmentCache {
    entries: DashMap<AttachmentId, CachedAttachment>,
    order: Mutex<VecDeque<AttachmentId>>,
    storage_dir: PathBuf,
    max_total: usize,
    max_age_hours: i64,
    evicted_total: AtomicU64,
}

impl AttachmentCache {
    pub fn new(storage_dir: impl Into<PathBuf>, max_total: usize, max_age_hours: u64) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            storage_dir: storage_dir.into(),
            max_total,
            max_age_hours: max_age_hours as i64,
            evicted_total: AtomicU64::new(0),
        }
    }

    fn dir_for(&self, attachment_type: AttachmentType, id: &AttachmentId) -> PathBuf {
        self.storage_dir.join(attachment_type.as_str()).join(id.as_str())
    }

    pub fn local_file_path(&self, attachment: &CachedAttachment) -> PathBuf {
        self.dir_for(attachment.attachment_type, &attachment.attachment_id)
            .join(format!("{}.{}", attachment.attachment_id.as_str(), attachment.file_extension))
    }

    fn metadata_path(&self, attachment: &CachedAttachment) -> PathBuf {
        self.dir_for(attachment.attachment_type, &attachment.attachment_id)
            .join(format!("{}.json", attachment.attachment_id.as_str()))
    }

    /// Persist `bytes` to disk under the standard layout and register the
    /// attachment in the cache. Caller has already decided `processable`
    /// (oversize attachments never reach this method with bytes attached).
    pub async fn store(&self, mut attachment: CachedAttachment, bytes: &[u8]) -> Result<CachedAttachment> {
        let dir = self.dir_for(attachment.attachment_type, &attachment.attachment_id);
        tokio::fs::create_dir_all(&dir).await?;

        let file_path = dir.join(format!("{}.{}", attachment.attachment_id.as_str(), attachment.file_extension));
        tokio::fs::write(&file_path, bytes).await?;
        attachment.local_path = Some(file_path.to_string_lossy().to_string());

        let meta_path = self.metadata_path(&attachment);
        let json = serde_json::to_vec_pretty(&attachment)?;
        tokio::fs::write(&meta_path, json).await?;

        self.insert(attachment.clone());
        Ok(attachment)
    }

    /// Register an oversize/unprocessable attachment without writing any
    /// file to disk.
    pub fn store_unprocessable(&self, attachment: CachedAttachment) {
        self.insert(attachment);
    }

    fn insert(&self, attachment: CachedAttachment) {
        let id = attachment.attachment_id.clone();
        let is_new = !self.entries.contains_key(&id);
        self.entries.insert(id.clone(), attachment);
        if is_new {
            self.order.lock().unwrap().push_back(id);
            self.enforce_cap();
        }
    }

    fn enforce_cap(&self) {
        loop {
            let too_many = self.entries.len() > self.max_total;
            if !too_many {
                break;
            }
            let oldest = self.order.lock().unwrap().pop_front();
            match oldest {
                Some(id) => {
                    if let Some((_, attachment)) = self.entries.remove(&id) {
                        self.delete_on_disk(&attachment);
                        self.evicted_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }

    fn delete_on_disk(&self, attachment: &CachedAttachment) {
        if attachment.local_path.is_some() {
            let dir = self.dir_for(attachment.attachment_type, &attachment.attachment_id);
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    pub fn get(&self, id: &AttachmentId) -> Option<CachedAttachment> {
        self.entries.get(id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Scan `storage_dir` for `<type>/<id>/<id>.json` sidecars left over from
    /// a previous run and register each as a cache entry, so attachments
    /// downloaded before a restart stay addressable via `fetch_attachment`.
    /// Malformed or orphan directories are logged at `warn` and skipped —
    /// rehydration never fails the whole cache over one bad entry.
    pub fn rehydrate(&self) {
        let type_dirs = match std::fs::read_dir(&self.storage_dir) {
            Ok(rd) => rd,
            Err(_) => return, // storage_dir doesn't exist yet — nothing to rehydrate
        };

        for type_dir in type_dirs.flatten() {
            if !type_dir.path().is_dir() {
                continue;
            }
            let id_dirs = match std::fs::read_dir(type_dir.path()) {
                Ok(rd) => rd,
                Err(e) => {
                    warn!(path = %type_dir.path().display(), error = %e, "attachment cache: unreadable type dir, skipping");
                    continue;
                }
            };
            for id_dir in id_dirs.flatten() {
                if let Err(e) = self.rehydrate_one(&id_dir.path()) {
                    warn!(path = %id_dir.path().display(), error = %e, "attachment cache: skipping malformed entry on rehydrate");
                }
            }
        }

        debug!(count = self.entries.len(), "attachment cache: rehydrated from disk");
    }

    fn rehydrate_one(&self, dir: &Path) -> std::io::Result<()> {
        let id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 dir name"))?;
        let meta_path = dir.join(format!("{id}.json"));
        let contents = std::fs::read_to_string(&meta_path)?;
        let attachment: CachedAttachment = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let expected_id = attachment.attachment_id.as_str();
        if expected_id != id {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("metadata id {expected_id} does not match directory {id}"),
            ));
        }

        let key = attachment.attachment_id.clone();
        self.entries.insert(key.clone(), attachment);
        self.order.lock().unwrap().push_back(key);
        Ok(())
    }

    /// Age-based eviction, per §4.2's "age (`max_age_hours`) and capacity"
    /// predicate pair — capacity is already enforced on every insert, this
    /// adds the time predicate on a periodic sweep.
    fn sweep_expired(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(self.max_age_hours);
        let expired: Vec<AttachmentId> = self
            .entries
            .iter()
            .filter(|e| e.value().created_at < cutoff)
            .map(|e| e.key().clone())
            .collect();

        for id in &expired {
            if let Some((_, attachment)) = self.entries.remove(id) {
                self.delete_on_disk(&attachment);
                self.order.lock().unwrap().retain(|o| o != id);
                self.evicted_total.fetch_add(1, Ordering::Relaxed);
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "attachment cache: swept expired entries");
        }
    }

    pub fn start_maintenance(self: &std::sync::Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        let cache = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(id: &str) -> CachedAttachment {
        CachedAttachment {
            attachment_id: AttachmentId::from(id),
            attachment_type: AttachmentType::Image,
            file_extension: "png".into(),
            size_bytes: 1024,
            processable: true,
            local_path: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn store_writes_file_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path(), 100, 72);
        let stored = cache.store(attachment("a1"), b"fakepng").await.unwrap();
        let file_path = cache.local_file_path(&stored);
        assert!(file_path.exists());
        assert!(cache.get(&AttachmentId::from("a1")).is_some());
    }

    #[tokio::test]
    async fn rehydrate_recovers_entries_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = AttachmentCache::new(dir.path(), 100, 72);
            cache.store(attachment("a1"), b"fakepng").await.unwrap();
        }
        let cache2 = AttachmentCache::new(dir.path(), 100, 72);
        cache2.rehydrate();
        assert!(cache2.get(&AttachmentId::from("a1")).is_some());
    }

    #[test]
    fn oversize_attachment_marked_unprocessable_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path(), 100, 72);
        let mut a = attachment("big");
        a.processable = false;
        a.size_bytes = 20_971_520;
        cache.store_unprocessable(a);
        let got = cache.get(&AttachmentId::from("big")).unwrap();
        assert!(!got.processable);
        assert!(got.local_path.is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_and_deletes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path(), 2, 72);
        let a1 = cache.store(attachment("a1"), b"1").await.unwrap();
        cache.store(attachment("a2"), b"2").await.unwrap();
        cache.store(attachment("a3"), b"3").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&AttachmentId::from("a1")).is_none());
        assert!(!cache.local_file_path(&a1).exists());
    }

    #[tokio::test]
    async fn sweep_expired_evicts_stale_entries_and_deletes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path(), 100, 48);
        let mut stale = attachment("old");
        stale.created_at = Utc::now() - chrono::Duration::hours(72);
        let stored = cache.store(stale, b"old").await.unwrap();
        cache.store(attachment("fresh"), b"fresh").await.unwrap();

        cache.sweep_expired();

        assert!(cache.get(&AttachmentId::from("old")).is_none());
        assert!(!cache.local_file_path(&stored).exists());
        assert!(cache.get(&AttachmentId::from("fresh")).is_some());
    }
}
