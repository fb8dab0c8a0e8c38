pub mod client;
pub mod error;
pub mod events;
pub mod registry;

pub use client::{OutgoingAttachment, OutgoingMention, PlatformClient};
pub use error::{PlatformError, Result};
pub use events::{RawAttachmentRef, RawEvent, RawMessage};
pub use registry::{PlatformFactory, PlatformRegistry};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! An in-memory fake `PlatformClient` for use in pipeline/event-bus
    //! tests, implemented as a plain trait-object test double rather than
    //! pulling in a mocking crate.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;

    pub struct FakeClient {
        alive: AtomicBool,
        sent: Mutex<Vec<(String, String)>>,
        event_rx: Mutex<Option<mpsc::Receiver<RawEvent>>>,
        event_tx: mpsc::Sender<RawEvent>,
        own_user_id: Mutex<Option<String>>,
    }

    impl FakeClient {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self {
                alive: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                event_rx: Mutex::new(Some(rx)),
                event_tx: tx,
                own_user_id: Mutex::new(None),
            }
        }

        pub fn set_self_user_id(&self, id: impl Into<String>) {
            *self.own_user_id.lock().unwrap() = Some(id.into());
        }

        pub async fn push_event(&self, event: RawEvent) {
            let _ = self.event_tx.send(event).await;
        }

        pub fn sent_messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn set_alive(&self, alive: bool) {
            self.alive.store(alive, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PlatformClient for FakeClient {
        fn adapter_type(&self) -> &'static str {
            "fake"
        }

        fn self_user_id(&self) -> Option<String> {
            self.own_user_id.lock().unwrap().clone()
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn take_event_stream(&self) -> Option<mpsc::Receiver<RawEvent>> {
            self.event_rx.lock().unwrap().take()
        }

        async fn send_message(
            &self,
            conversation_id: &str,
            text: &str,
            _mentions: &[OutgoingMention],
            _attachments: &[OutgoingAttachment],
        ) -> Result<Vec<String>> {
            self.sent.lock().unwrap().push((conversation_id.to_string(), text.to_string()));
            Ok(vec![uuid_like()])
        }

        async fn edit_message(&self, _conversation_id: &str, _message_id: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_message(&self, _conversation_id: &str, _message_id: &str) -> Result<()> {
            Ok(())
        }

        async fn add_reaction(&self, _conversation_id: &str, _message_id: &str, _emoji: &str) -> Result<()> {
            Ok(())
        }

        async fn remove_reaction(&self, _conversation_id: &str, _message_id: &str, _emoji: &str) -> Result<()> {
            Ok(())
        }

        async fn pin_message(&self, _conversation_id: &str, _message_id: &str) -> Result<()> {
            Ok(())
        }

        async fn unpin_message(&self, _conversation_id: &str, _message_id: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_history(
            &self,
            _conversation_id: &str,
            _limit: usize,
            _before_ms: Option<i64>,
            _after_ms: Option<i64>,
        ) -> Result<Vec<RawMessage>> {
            Ok(vec![])
        }

        async fn download_attachment(&self, _attachment_ref: &RawAttachmentRef) -> Result<Vec<u8>> {
            Ok(vec![0u8; 4])
        }

        async fn upload_attachment(&self, _conversation_id: &str, _name: &str, _bytes: &[u8]) -> Result<String> {
            Ok(uuid_like())
        }
    }

    fn uuid_like() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("fake-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}
