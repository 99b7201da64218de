//! Service registry: address book plus pending-response table.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::envelope::{HostEnvelope, MessagingPattern};
use crate::error::EngineError;
use crate::message::{Message, MessagePriority};

/// Result of processing a sync request: the target's output, if any.
pub type HostResponse = Option<Message>;

/// The queue-facing surface of a host, as seen by the registry.
///
/// Submission always goes through the target host's queue, so pause and
/// overflow policy apply to inter-host traffic exactly as they do to
/// external traffic.
#[async_trait]
pub trait HostPort: Send + Sync {
    /// The host's production-unique name.
    fn name(&self) -> &str;

    /// Enqueue an envelope. Returns `false` when the host is not running or
    /// its queue rejected the item under a non-blocking overflow policy.
    async fn submit_envelope(&self, envelope: HostEnvelope) -> bool;
}

/// In-process address book plus pending-response table.
///
/// Cheap to clone via `Arc`; all clones share state.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = ServiceRegistry::new();
/// registry.register("PDS.Lookup", host_port)?;
///
/// // Fire-and-forget
/// let correlation_id = registry
///     .send_request_async("ADT.Router", "PDS.Lookup", message, None)
///     .await?;
///
/// // Request/reply
/// let response = registry
///     .send_request_sync("ADT.Router", "PDS.Lookup", request, Duration::from_secs(5), None)
///     .await?;
/// ```
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    services: DashMap<String, Arc<dyn HostPort>>,
    pending: DashMap<Uuid, oneshot::Sender<HostResponse>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host under its name.
    ///
    /// # Errors
    ///
    /// Fails when the name is already taken.
    pub fn register(&self, name: &str, port: Arc<dyn HostPort>) -> Result<(), EngineError> {
        if self.inner.services.contains_key(name) {
            return Err(EngineError::configuration(format!(
                "service already registered: '{name}'"
            )));
        }
        self.inner.services.insert(name.to_string(), port);
        debug!(name, "service registered");
        Ok(())
    }

    /// Remove a host from the address book.
    pub fn unregister(&self, name: &str) {
        self.inner.services.remove(name);
        debug!(name, "service unregistered");
    }

    /// Look up a host by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn HostPort>> {
        self.inner.services.get(name).map(|e| Arc::clone(e.value()))
    }

    /// All registered host names.
    pub fn list_services(&self) -> Vec<String> {
        self.inner.services.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered hosts.
    pub fn service_count(&self) -> usize {
        self.inner.services.len()
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Fire-and-forget request: enqueue at the target and return the
    /// correlation id immediately.
    pub async fn send_request_async(
        &self,
        source: &str,
        target: &str,
        message: Message,
        priority: Option<MessagePriority>,
    ) -> Result<Uuid, EngineError> {
        let port = self.get(target).ok_or_else(|| EngineError::HostNotFound {
            name: target.to_string(),
        })?;

        let mut envelope = HostEnvelope::new(source, target, message, MessagingPattern::Async);
        if let Some(priority) = priority {
            envelope = envelope.with_priority(priority);
        }
        let correlation_id = envelope.correlation_id;

        if !port.submit_envelope(envelope).await {
            return Err(EngineError::Send {
                reason: format!("target '{target}' rejected the request"),
            });
        }
        Ok(correlation_id)
    }

    /// Request/reply: enqueue at the target and await the correlated
    /// response up to `deadline`.
    ///
    /// On timeout the pending entry is removed and `TimeoutError` returned;
    /// the in-flight request is not cancelled, and its late response is then
    /// dropped with a warning.
    pub async fn send_request_sync(
        &self,
        source: &str,
        target: &str,
        message: Message,
        deadline: Duration,
        priority: Option<MessagePriority>,
    ) -> Result<HostResponse, EngineError> {
        let port = self.get(target).ok_or_else(|| EngineError::HostNotFound {
            name: target.to_string(),
        })?;

        let mut envelope = HostEnvelope::new(source, target, message, MessagingPattern::Sync)
            .with_timeout(deadline);
        if let Some(priority) = priority {
            envelope = envelope.with_priority(priority);
        }
        let correlation_id = envelope.correlation_id;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(correlation_id, tx);

        if !port.submit_envelope(envelope).await {
            self.inner.pending.remove(&correlation_id);
            return Err(EngineError::Send {
                reason: format!("target '{target}' rejected the request"),
            });
        }

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Responder dropped without answering.
                self.inner.pending.remove(&correlation_id);
                Ok(None)
            }
            Err(_) => {
                self.inner.pending.remove(&correlation_id);
                warn!(
                    source,
                    target,
                    correlation_id = %correlation_id,
                    "sync request timed out"
                );
                Err(EngineError::Timeout {
                    operation: format!("sync request to '{target}'"),
                    timeout: deadline,
                })
            }
        }
    }

    /// Fulfil the pending future for a sync request.
    ///
    /// If no waiter exists (already timed out, or never sync) the response
    /// is dropped with a warning.
    pub fn send_response(&self, correlation_id: Uuid, response: HostResponse) {
        match self.inner.pending.remove(&correlation_id) {
            Some((_, tx)) => {
                if tx.send(response).is_err() {
                    warn!(correlation_id = %correlation_id, "response waiter already gone");
                }
            }
            None => {
                warn!(correlation_id = %correlation_id, "response with no waiter dropped");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::envelope::WorkItem;
    use crate::queue::ManagedQueue;

    /// Minimal port: pushes envelopes into a queue like a running host.
    struct QueuePort {
        name: String,
        queue: ManagedQueue<WorkItem>,
        accept: bool,
    }

    #[async_trait]
    impl HostPort for QueuePort {
        fn name(&self) -> &str {
            &self.name
        }

        async fn submit_envelope(&self, envelope: HostEnvelope) -> bool {
            if !self.accept {
                return false;
            }
            self.queue.put(WorkItem::from_envelope(envelope)).await
        }
    }

    fn port(name: &str, accept: bool) -> (Arc<QueuePort>, ManagedQueue<WorkItem>) {
        let queue = ManagedQueue::fifo(16);
        (
            Arc::new(QueuePort {
                name: name.to_string(),
                queue: queue.clone(),
                accept,
            }),
            queue,
        )
    }

    fn message() -> Message {
        Message::create(b"req".to_vec(), "text/plain", "A")
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ServiceRegistry::new();
        let (p, _q) = port("B", true);
        registry.register("B", p).unwrap();

        assert!(registry.get("B").is_some());
        assert!(registry.get("C").is_none());
        assert_eq!(registry.service_count(), 1);
        assert_eq!(registry.list_services(), vec!["B".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ServiceRegistry::new();
        let (p1, _q1) = port("B", true);
        let (p2, _q2) = port("B", true);
        registry.register("B", p1).unwrap();
        assert!(registry.register("B", p2).is_err());
    }

    #[tokio::test]
    async fn test_async_request_enqueues_at_target() {
        let registry = ServiceRegistry::new();
        let (p, queue) = port("B", true);
        registry.register("B", p).unwrap();

        let correlation_id = registry
            .send_request_async("A", "B", message(), None)
            .await
            .unwrap();

        let item = queue.try_get().unwrap();
        let meta = item.envelope.unwrap();
        assert_eq!(meta.correlation_id, correlation_id);
        assert_eq!(meta.pattern, MessagingPattern::Async);
        assert_eq!(meta.source, "A");
    }

    #[tokio::test]
    async fn test_async_request_unknown_target() {
        let registry = ServiceRegistry::new();
        let result = registry.send_request_async("A", "nowhere", message(), None).await;
        assert!(matches!(result, Err(EngineError::HostNotFound { .. })));
    }

    #[tokio::test]
    async fn test_async_request_rejected_by_target() {
        let registry = ServiceRegistry::new();
        let (p, _q) = port("B", false);
        registry.register("B", p).unwrap();
        let result = registry.send_request_async("A", "B", message(), None).await;
        assert!(matches!(result, Err(EngineError::Send { .. })));
    }

    #[tokio::test]
    async fn test_sync_request_reply() {
        let registry = ServiceRegistry::new();
        let (p, queue) = port("B", true);
        registry.register("B", p).unwrap();

        // A stand-in worker that answers the request.
        let responder = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let item = queue.get(None).await.unwrap();
                let meta = item.envelope.unwrap();
                let reply = item.message.derive("B");
                registry.send_response(meta.correlation_id, Some(reply));
            })
        };

        let response = registry
            .send_request_sync("A", "B", message(), Duration::from_secs(2), None)
            .await
            .unwrap();

        responder.await.unwrap();
        let reply = response.unwrap();
        assert_eq!(reply.envelope.routing.source, "B");
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_request_timeout_cleans_pending() {
        let registry = ServiceRegistry::new();
        let (p, _queue) = port("B", true);
        registry.register("B", p).unwrap();

        let result = registry
            .send_request_sync("A", "B", message(), Duration::from_millis(30), None)
            .await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let registry = ServiceRegistry::new();
        // No waiter registered: the response just logs a warning.
        registry.send_response(Uuid::new_v4(), Some(message()));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_priority_override_applied() {
        let registry = ServiceRegistry::new();
        let (p, queue) = port("B", true);
        registry.register("B", p).unwrap();

        registry
            .send_request_async("A", "B", message(), Some(MessagePriority::Urgent))
            .await
            .unwrap();
        let item = queue.try_get().unwrap();
        assert_eq!(item.message.envelope.priority, MessagePriority::Urgent);
    }
}
