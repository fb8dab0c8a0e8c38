use base64::Engine;
use relay_platform::PlatformClient;

use crate::error::{AttachmentError, Result};

/// Decodes a base64-framed outgoing attachment and hands the raw bytes to
/// the platform client. The wire format is the mirror of what the
/// `Downloader` produces for incoming attachments: base64 `content` plus a
/// file name, nothing else.
pub struct Uploader;

impl Uploader {
    pub fn new() -> Self {
        Self
    }

    pub async fn upload(
        &self,
        client: &dyn PlatformClient,
        conversation_id: &str,
        file_name: &str,
        content_base64: &str,
    ) -> Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(content_base64)
            .map_err(|_| AttachmentError::InvalidEncoding)?;

        client
            .upload_attachment(conversation_id, file_name, &bytes)
            .await
            .map_err(AttachmentError::from)
    }
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_platform::test_support::FakeClient;

    #[tokio::test]
    async fn upload_decodes_base64_and_calls_client() {
        let client = FakeClient::new();
        let uploader = Uploader::new();
        let content = base64::engine::general_purpose::STANDARD.encode(b"hello");

        let result = uploader.upload(&client, "conv-1", "hello.txt", &content).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn upload_rejects_invalid_base64() {
        let client = FakeClient::new();
        let uploader = Uploader::new();

        let result = uploader.upload(&client, "conv-1", "hello.txt", "not base64!!").await;
        assert!(result.is_err());
    }
}
