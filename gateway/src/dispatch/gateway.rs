//! Dispatch gateway: turns prediction requests into backend messages and
//! matches replies back to callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use procapi_common::{parse_backend_output, BackendMessage, InputData, OutputData};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{MessageBroker, OutboundMessage, ReplyMessage};
use crate::cache::ResultCache;
use crate::error::{DispatchError, Result};
use crate::preprocess::PredictionPipeline;

use super::pending::PendingRegistry;

/// Default bounded-wait timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Front door to the backend worker pool.
///
/// Holds the process-wide broker and cache connections. Bounded-wait calls are
/// tagged with a fresh UUID that the backend echoes on its reply; a single
/// listener task routes every reply on the shared reply destination to the
/// slot registered under that tag.
pub struct DispatchGateway {
    broker: Arc<dyn MessageBroker>,
    cache: Arc<dyn ResultCache>,
    pipeline: PredictionPipeline,
    pending: Arc<PendingRegistry>,
    /// Set once the reply stream has ended; bounded-wait calls can no longer resolve.
    replies_closed: Arc<AtomicBool>,
    reply_timeout: Duration,
    reply_listener: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchGateway {
    /// Subscribe to replies and start routing them.
    pub async fn start(
        broker: Arc<dyn MessageBroker>,
        cache: Arc<dyn ResultCache>,
        pipeline: PredictionPipeline,
        reply_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let replies = broker.subscribe_replies().await?;
        let pending = Arc::new(PendingRegistry::new());
        let replies_closed = Arc::new(AtomicBool::new(false));
        let listener = tokio::spawn(route_replies(
            replies,
            pending.clone(),
            replies_closed.clone(),
        ));

        tracing::info!(reply_timeout = ?reply_timeout, "Dispatch gateway started");

        Ok(Arc::new(Self {
            broker,
            cache,
            pipeline,
            pending,
            replies_closed,
            reply_timeout,
            reply_listener: Mutex::new(Some(listener)),
        }))
    }

    /// Publish `input` and wait for the backend's reply.
    ///
    /// Fails with `BackendUnavailable` without publishing once the reply stream
    /// has ended.
    pub async fn dispatch_bounded(&self, input: InputData) -> Result<OutputData> {
        self.ensure_reply_route()?;
        let payload = self.encode_input(input).await?;
        let body = BackendMessage::bounded(payload)
            .to_bytes()
            .map_err(|e| DispatchError::Internal(e.to_string()))?;

        let tag = Uuid::new_v4().to_string();
        // Registered before publishing so a fast reply always finds its slot.
        let (guard, reply_rx) = self.pending.register(&tag);
        // The listener may have drained the registry between the first check and register.
        self.ensure_reply_route()?;
        let started = Instant::now();

        self.broker
            .publish(OutboundMessage::expecting_reply(body, tag.as_str()))
            .await?;
        tracing::debug!(tag = %tag, "Published bounded-wait request");

        let reply = match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(DispatchError::BackendUnavailable(
                    "reply stream closed".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!(
                    tag = guard.tag(),
                    timeout = ?self.reply_timeout,
                    "Bounded-wait request timed out"
                );
                return Err(DispatchError::Timeout(self.reply_timeout));
            }
        };
        drop(guard);

        let raw = parse_backend_output(&reply)
            .map_err(|e| DispatchError::Internal(format!("unreadable backend reply: {e}")))?;
        let output = self.pipeline.output.decode_output(&raw);

        tracing::info!(
            tag = %tag,
            latency = ?started.elapsed(),
            result_class = %output.result_class,
            "Bounded-wait request resolved"
        );
        Ok(output)
    }

    /// Publish `input` for background processing and return its correlation id.
    pub async fn dispatch_deferred(&self, input: InputData) -> Result<Uuid> {
        let payload = self.encode_input(input).await?;
        let id = Uuid::new_v4();
        let body = BackendMessage::deferred(payload, id)
            .to_bytes()
            .map_err(|e| DispatchError::Internal(e.to_string()))?;

        self.broker
            .publish(OutboundMessage::fire_and_forget(body))
            .await?;

        tracing::info!(id = %id, "Published deferred request");
        Ok(id)
    }

    /// Fetch the result of a deferred request, if the backend has stored one.
    pub async fn lookup_result(&self, correlation_id: &str) -> Result<Option<OutputData>> {
        let id = Uuid::parse_str(correlation_id.trim()).map_err(|_| {
            DispatchError::InvalidInput(format!("malformed result id '{correlation_id}'"))
        })?;
        let key = id.hyphenated().to_string();

        let Some(value) = self.cache.get(&key).await? else {
            tracing::debug!(id = %key, "Result not available yet");
            return Ok(None);
        };

        let raw = parse_backend_output(value.as_bytes())
            .map_err(|e| DispatchError::Internal(format!("unreadable cached result: {e}")))?;
        Ok(Some(self.pipeline.output.decode_output(&raw)))
    }

    /// Number of bounded-wait calls currently waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Stop routing replies and release the broker connection.
    pub async fn shutdown(&self) {
        let listener = self
            .reply_listener
            .lock()
            .ok()
            .and_then(|mut handle| handle.take());
        if let Some(listener) = listener {
            listener.abort();
        }
        self.replies_closed.store(true, Ordering::SeqCst);

        let oldest = self.pending.oldest_age();
        let abandoned = self.pending.fail_all();
        if abandoned > 0 {
            tracing::warn!(
                abandoned,
                oldest = ?oldest,
                "Shutting down with bounded-wait calls in flight"
            );
        }

        self.broker.close().await;
        tracing::info!("Dispatch gateway stopped");
    }

    fn ensure_reply_route(&self) -> Result<()> {
        if self.replies_closed.load(Ordering::SeqCst) {
            return Err(DispatchError::BackendUnavailable(
                "reply stream closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Run the input preprocessor on the blocking pool; image work is CPU-bound.
    async fn encode_input(&self, input: InputData) -> Result<String> {
        let preprocessor = self.pipeline.input.clone();
        let payload = tokio::task::spawn_blocking(move || preprocessor.encode_input(&input))
            .await
            .map_err(|e| DispatchError::Internal(format!("preprocessing task failed: {e}")))??;
        Ok(payload)
    }
}

/// Route each reply to the slot registered under its correlation id.
async fn route_replies(
    mut replies: mpsc::Receiver<ReplyMessage>,
    pending: Arc<PendingRegistry>,
    replies_closed: Arc<AtomicBool>,
) {
    while let Some(reply) = replies.recv().await {
        match reply.correlation_id {
            Some(tag) => {
                if !pending.complete(&tag, reply.body) {
                    tracing::warn!(tag = %tag, "Discarding reply with no waiting caller");
                }
            }
            None => {
                tracing::warn!("Discarding reply without correlation id");
            }
        }
    }

    // Flag first so no call registers after the drain and waits for nothing.
    replies_closed.store(true, Ordering::SeqCst);
    let failed = pending.fail_all();
    tracing::error!(failed, "Reply stream ended; failing in-flight bounded-wait calls");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{
        EchoOutputPreprocessor, InMemoryBroker, InMemoryResultCache, PassthroughInputPreprocessor,
    };

    fn echo_pipeline() -> PredictionPipeline {
        PredictionPipeline::new(
            Arc::new(PassthroughInputPreprocessor),
            Arc::new(EchoOutputPreprocessor),
        )
    }

    #[tokio::test]
    async fn test_bounded_reply_is_routed_by_tag() {
        let (broker, mut handle) = InMemoryBroker::new();
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            Arc::new(InMemoryResultCache::new()),
            echo_pipeline(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let call = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .dispatch_bounded(InputData { img64: "hello".into() })
                    .await
            })
        };

        let published = handle.next_published().await.unwrap();
        let envelope = BackendMessage::from_bytes(&published.body).unwrap();
        assert_eq!(envelope.data(), "hello");
        assert!(envelope.id().is_none());

        let tag = published.reply_tag.unwrap();
        handle.reply(Some(tag.as_str()), b"\"world\"").await;

        let output = call.await.unwrap().unwrap();
        assert_eq!(output.result_class, "world");
        assert_eq!(gateway.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_untagged_reply_is_ignored() {
        let (broker, mut handle) = InMemoryBroker::new();
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            Arc::new(InMemoryResultCache::new()),
            echo_pipeline(),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        let call = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.dispatch_bounded(InputData { img64: "x".into() }).await })
        };
        handle.next_published().await.unwrap();
        handle.reply(None, b"1").await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_reply_stream_end_fails_waiters() {
        let (broker, mut handle) = InMemoryBroker::new();
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            Arc::new(InMemoryResultCache::new()),
            echo_pipeline(),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let call = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.dispatch_bounded(InputData { img64: "x".into() }).await })
        };
        handle.next_published().await.unwrap();
        handle.close_replies();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_bounded_after_reply_stream_end_fails_fast() {
        let (broker, mut handle) = InMemoryBroker::new();
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            Arc::new(InMemoryResultCache::new()),
            echo_pipeline(),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        handle.close_replies();
        // Let the listener observe the closed stream.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let err = gateway
            .dispatch_bounded(InputData { img64: "x".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::BackendUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(handle.try_published().is_none());
        assert_eq!(gateway.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_lookup_normalises_id() {
        let (broker, _handle) = InMemoryBroker::new();
        let cache = Arc::new(InMemoryResultCache::new());
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            cache.clone(),
            echo_pipeline(),
            DEFAULT_REPLY_TIMEOUT,
        )
        .await
        .unwrap();

        let id = Uuid::new_v4();
        cache.insert(&id.to_string(), "done");

        let upper = id.to_string().to_uppercase();
        let output = gateway.lookup_result(&upper).await.unwrap();
        assert_eq!(output, Some(OutputData::new("done")));
    }

    #[tokio::test]
    async fn test_lookup_rejects_malformed_id() {
        let (broker, _handle) = InMemoryBroker::new();
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            Arc::new(InMemoryResultCache::new()),
            echo_pipeline(),
            DEFAULT_REPLY_TIMEOUT,
        )
        .await
        .unwrap();

        let err = gateway.lookup_result("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_broker() {
        let (broker, handle) = InMemoryBroker::new();
        let gateway = DispatchGateway::start(
            Arc::new(broker),
            Arc::new(InMemoryResultCache::new()),
            echo_pipeline(),
            DEFAULT_REPLY_TIMEOUT,
        )
        .await
        .unwrap();

        gateway.shutdown().await;
        assert!(handle.is_closed());
    }
}
