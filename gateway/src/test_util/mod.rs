//! In-memory collaborators for exercising the gateway without RabbitMQ or Redis.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use image::{ImageFormat, Rgb, RgbImage};
use procapi_common::{InputData, OutputData};
use tokio::sync::mpsc;

use crate::broker::{
    BrokerError, MessageBroker, OutboundMessage, ReplyMessage, REPLY_CHANNEL_CAPACITY,
};
use crate::cache::{CacheError, ResultCache};
use crate::config::Config;
use crate::dispatch::DispatchGateway;
use crate::preprocess::{InputPreprocessor, OutputPreprocessor, PredictionPipeline, PreprocessError};
use crate::AppState;

/// Broker that records publishes and lets tests inject replies.
pub struct InMemoryBroker {
    published: mpsc::UnboundedSender<OutboundMessage>,
    replies: Mutex<Option<mpsc::Receiver<ReplyMessage>>>,
    unavailable: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Test-side view of an [`InMemoryBroker`].
pub struct BrokerHandle {
    published: mpsc::UnboundedReceiver<OutboundMessage>,
    replies: Option<mpsc::Sender<ReplyMessage>>,
    unavailable: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new() -> (Self, BrokerHandle) {
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let unavailable = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let broker = Self {
            published: published_tx,
            replies: Mutex::new(Some(reply_rx)),
            unavailable: unavailable.clone(),
            closed: closed.clone(),
        };
        let handle = BrokerHandle {
            published: published_rx,
            replies: Some(reply_tx),
            unavailable,
            closed,
        };
        (broker, handle)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("broker unavailable".to_string()));
        }
        self.published
            .send(message)
            .map_err(|_| BrokerError::Publish("test handle dropped".to_string()))
    }

    async fn subscribe_replies(&self) -> Result<mpsc::Receiver<ReplyMessage>, BrokerError> {
        self.replies
            .lock()
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?
            .take()
            .ok_or_else(|| BrokerError::Subscribe("already subscribed".to_string()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl BrokerHandle {
    /// Wait for the next published message.
    pub async fn next_published(&mut self) -> Option<OutboundMessage> {
        tokio::time::timeout(Duration::from_secs(5), self.published.recv())
            .await
            .ok()
            .flatten()
    }

    /// Return a message already published, without waiting.
    pub fn try_published(&mut self) -> Option<OutboundMessage> {
        self.published.try_recv().ok()
    }

    /// Deliver a reply on the shared reply destination.
    pub async fn reply(&self, correlation_id: Option<&str>, body: &[u8]) {
        if let Some(tx) = &self.replies {
            let _ = tx
                .send(ReplyMessage {
                    correlation_id: correlation_id.map(str::to_string),
                    body: body.to_vec(),
                })
                .await;
        }
    }

    /// A sender for replying from spawned tasks.
    pub fn reply_sender(&self) -> Option<mpsc::Sender<ReplyMessage>> {
        self.replies.clone()
    }

    /// End the reply stream, as a lost broker connection would.
    pub fn close_replies(&mut self) {
        self.replies = None;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Result cache backed by a map, with failure injection.
#[derive(Default)]
pub struct InMemoryResultCache {
    entries: DashMap<String, String>,
    unavailable: AtomicBool,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result the way a backend worker would.
    pub fn insert(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }
}

/// Uses `img64` verbatim as the payload; rejects empty input.
pub struct PassthroughInputPreprocessor;

impl InputPreprocessor for PassthroughInputPreprocessor {
    fn encode_input(&self, input: &InputData) -> Result<String, PreprocessError> {
        if input.img64.is_empty() {
            return Err(PreprocessError::Image("empty input".to_string()));
        }
        Ok(input.img64.clone())
    }
}

/// Reports the raw backend output as the result class.
pub struct EchoOutputPreprocessor;

impl OutputPreprocessor for EchoOutputPreprocessor {
    fn decode_output(&self, raw: &str) -> OutputData {
        OutputData::new(raw)
    }
}

/// Base64 PNG of a small gradient, usable as `img64`.
pub fn png_base64(width: u32, height: u32) -> String {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 8 % 256) as u8, (y * 8 % 256) as u8, 128])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode test PNG");
    STANDARD.encode(bytes)
}

/// Application state wired to in-memory collaborators.
pub async fn test_state(
    broker: InMemoryBroker,
    cache: Arc<InMemoryResultCache>,
    pipeline: PredictionPipeline,
    reply_timeout: Duration,
) -> Arc<AppState> {
    let gateway = DispatchGateway::start(Arc::new(broker), cache, pipeline, reply_timeout)
        .await
        .expect("Failed to start test gateway");

    Arc::new(AppState {
        config: Config::default(),
        gateway,
    })
}
