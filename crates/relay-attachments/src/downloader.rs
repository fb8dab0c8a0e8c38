use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use relay_cache::{AttachmentCache, AttachmentType, CachedAttachment};
use relay_core::AttachmentId;
use relay_platform::{PlatformClient, RawAttachmentRef};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Downloads attachments referenced by incoming messages, gates them by
/// size, and hands the result to the `AttachmentCache`. Concurrent requests
/// for the same attachment id share one in-progress download — the
/// single-flight discipline spec'd for attachment fetches.
pub struct Downloader {
    cache: Arc<AttachmentCache>,
    max_file_size_bytes: u64,
    in_flight: DashMap<AttachmentId, Arc<AsyncMutex<()>>>,
}

impl Downloader {
    pub fn new(cache: Arc<AttachmentCache>, max_file_size_mb: u64) -> Self {
        Self {
            cache,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            in_flight: DashMap::new(),
        }
    }

    fn flight_lock(&self, id: &AttachmentId) -> Arc<AsyncMutex<()>> {
        self.in_flight.entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Resolve one attachment reference: oversize references never hit the
    /// platform client and are recorded as `processable=false`; the rest are
    /// downloaded (single-flight per id), base64-framed, and cached to disk.
    pub async fn resolve(&self, client: &dyn PlatformClient, reference: &RawAttachmentRef) -> AttachmentId {
        let id = AttachmentId::from(reference.platform_attachment_id.clone());
        let lock = self.flight_lock(&id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.cache.get(&id) {
            return existing.attachment_id;
        }

        let attachment_type = AttachmentType::classify(&reference.file_extension);

        if reference.size_bytes > self.max_file_size_bytes {
            info!(attachment_id = %id, size = reference.size_bytes, "attachment oversize, marking unprocessable");
            self.cache.store_unprocessable(CachedAttachment {
                attachment_id: id.clone(),
                attachment_type,
                file_extension: reference.file_extension.clone(),
                size_bytes: reference.size_bytes,
                processable: false,
                local_path: None,
                created_at: Utc::now(),
            });
            return id;
        }

        match client.download_attachment(reference).await {
            Ok(bytes) => {
                let attachment = CachedAttachment {
                    attachment_id: id.clone(),
                    attachment_type,
                    file_extension: reference.file_extension.clone(),
                    size_bytes: bytes.len() as u64,
                    processable: true,
                    local_path: None,
                    created_at: Utc::now(),
                };
                if let Err(e) = self.cache.store(attachment, &bytes).await {
                    warn!(attachment_id = %id, error = %e, "failed to persist downloaded attachment");
                }
            }
            Err(e) => {
                warn!(attachment_id = %id, error = %e, "attachment download failed, marking unprocessable");
                self.cache.store_unprocessable(CachedAttachment {
                    attachment_id: id.clone(),
                    attachment_type,
                    file_extension: reference.file_extension.clone(),
                    size_bytes: reference.size_bytes,
                    processable: false,
                    local_path: None,
                    created_at: Utc::now(),
                });
            }
        }

        self.in_flight.remove(&id);
        id
    }

    /// Base64-frame an on-disk attachment for a `fetch_attachment` reply.
    /// Cache-only: fails if the attachment is missing or unprocessable.
    pub async fn fetch_base64(&self, id: &AttachmentId) -> Option<String> {
        let attachment = self.cache.get(id)?;
        if !attachment.processable {
            return None;
        }
        let path = self.cache.local_file_path(&attachment);
        let bytes = tokio::fs::read(path).await.ok()?;
        Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_platform::test_support::FakeClient;

    fn reference(id: &str, size: u64) -> RawAttachmentRef {
        RawAttachmentRef {
            platform_attachment_id: id.to_string(),
            file_name: format!("{id}.png"),
            file_extension: "png".to_string(),
            size_bytes: size,
            download_ref: format!("https://example.invalid/{id}"),
        }
    }

    #[tokio::test]
    async fn small_attachment_is_downloaded_and_processable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(AttachmentCache::new(dir.path(), 100, 72));
        let downloader = Downloader::new(cache.clone(), 8);
        let client = FakeClient::new();

        let id = downloader.resolve(&client, &reference("a1", 10)).await;
        let attachment = cache.get(&id).unwrap();
        assert!(attachment.processable);
    }

    #[tokio::test]
    async fn oversize_attachment_is_marked_unprocessable_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(AttachmentCache::new(dir.path(), 100, 72));
        let downloader = Downloader::new(cache.clone(), 8); // 8 MB cap
        let client = FakeClient::new();

        let id = downloader.resolve(&client, &reference("big", 20 * 1024 * 1024)).await;
        let attachment = cache.get(&id).unwrap();
        assert!(!attachment.processable);
        assert!(attachment.local_path.is_none());
    }

    #[tokio::test]
    async fn fetch_base64_fails_for_unprocessable_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(AttachmentCache::new(dir.path(), 100, 72));
        let downloader = Downloader::new(cache.clone(), 8);
        let client = FakeClient::new();

        let id = downloader.resolve(&client, &reference("big", 20 * 1024 * 1024)).await;
        assert!(downloader.fetch_base64(&id).await.is_none());
    }
}
