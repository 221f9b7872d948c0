use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use ipcemit_frame::CorrelationId;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::envelope::AckError;

/// Receives the outcome of exactly one pending call.
pub(crate) type Completion = oneshot::Sender<Result<Value, AckError>>;

struct PendingCall {
    completion: Completion,
    created_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingCall {
    fn finish(self, outcome: Result<Value, AckError>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The awaiting side may already be gone; nothing to do then.
        let _ = self.completion.send(outcome);
    }
}

/// Outstanding reply-expecting calls, keyed by correlation id.
///
/// Every entry leaves the table exactly once: whoever removes it under the
/// lock is the only one that completes it.
#[derive(Default)]
pub struct PendingRegistry {
    calls: Mutex<HashMap<CorrelationId, PendingCall>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, id: CorrelationId) -> Option<PendingCall> {
        self.lock().remove(&id)
    }

    pub(crate) fn register(&self, id: CorrelationId, completion: Completion) {
        let call = PendingCall {
            completion,
            created_at: Instant::now(),
            timer: None,
        };
        let displaced = {
            let mut calls = self.lock();
            let displaced = calls.insert(id, call);
            trace!(ack = %id, pending = calls.len(), "registered pending call");
            displaced
        };
        if let Some(old) = displaced {
            warn!(ack = %id, "correlation id reused while still pending; dropping older call");
            old.finish(Err(AckError::dropped()));
        }
    }

    /// Arm a timer that rejects `id` with a timeout error after `timeout`.
    pub(crate) fn start_timer(self: &Arc<Self>, runtime: &Handle, id: CorrelationId, timeout: Duration) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(registry) = registry.upgrade() {
                if registry.reject(id, AckError::timeout()) {
                    debug!(ack = %id, ?timeout, "pending call timed out");
                }
            }
        });

        let orphan = {
            let mut calls = self.lock();
            match calls.get_mut(&id) {
                Some(call) => {
                    call.timer = Some(task.abort_handle());
                    false
                }
                None => true,
            }
        };
        if orphan {
            task.abort();
        }
    }

    /// Complete `id` with a value. Returns `false` if it was not pending.
    pub fn resolve(&self, id: CorrelationId, value: Value) -> bool {
        match self.take(id) {
            Some(call) => {
                call.finish(Ok(value));
                true
            }
            None => false,
        }
    }

    /// Complete `id` with an error. Returns `false` if it was not pending.
    pub fn reject(&self, id: CorrelationId, error: AckError) -> bool {
        match self.take(id) {
            Some(call) => {
                call.finish(Err(error));
                true
            }
            None => false,
        }
    }

    /// Forget `id` without completing it.
    pub(crate) fn cancel(&self, id: CorrelationId) -> bool {
        match self.take(id) {
            Some(call) => {
                if let Some(timer) = call.timer {
                    timer.abort();
                }
                trace!(ack = %id, "pending call cancelled");
                true
            }
            None => false,
        }
    }

    /// Reject every call at least `max_age` old with a timeout error.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(CorrelationId, PendingCall)> = {
            let mut calls = self.lock();
            let ids: Vec<CorrelationId> = calls
                .iter()
                .filter(|(_, call)| now.saturating_duration_since(call.created_at) >= max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| calls.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (id, call) in expired {
            trace!(ack = %id, "reaped pending call");
            call.finish(Err(AckError::timeout()));
        }
        if count > 0 {
            debug!(reaped = count, ?max_age, "swept pending calls");
        }
        count
    }

    /// Reject everything still pending. Used when the owning emitter goes away.
    pub(crate) fn drain(&self) -> usize {
        let calls: Vec<PendingCall> = self.lock().drain().map(|(_, call)| call).collect();
        let count = calls.len();
        for call in calls {
            call.finish(Err(AckError::dropped()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Outstanding ids in ascending order.
    pub fn ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<CorrelationId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::envelope::AckErrorKind;

    fn id(raw: u64) -> CorrelationId {
        CorrelationId::new(raw).unwrap()
    }

    fn register(registry: &PendingRegistry, raw: u64) -> oneshot::Receiver<Result<Value, AckError>> {
        let (tx, rx) = oneshot::channel();
        registry.register(id(raw), tx);
        rx
    }

    #[tokio::test]
    async fn resolve_completes_once() {
        let registry = PendingRegistry::new();
        let rx = register(&registry, 1);

        assert!(registry.resolve(id(1), json!("pong")));
        assert!(!registry.resolve(id(1), json!("again")));
        assert!(!registry.reject(id(1), AckError::timeout()));

        assert_eq!(rx.await.unwrap().unwrap(), json!("pong"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reject_completes_with_error() {
        let registry = PendingRegistry::new();
        let rx = register(&registry, 7);

        assert!(registry.reject(id(7), AckError::channel_closed()));
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), AckErrorKind::ChannelClosed);
    }

    #[test]
    fn unknown_id_is_a_noop() {
        let registry = PendingRegistry::new();
        assert!(!registry.resolve(id(99), json!(null)));
        assert!(!registry.reject(id(99), AckError::timeout()));
        assert!(!registry.cancel(id(99)));
    }

    #[tokio::test]
    async fn cancel_removes_without_completing() {
        let registry = PendingRegistry::new();
        let rx = register(&registry, 3);

        assert!(registry.cancel(id(3)));
        assert!(!registry.contains(id(3)));
        assert!(rx.await.is_err(), "sender dropped without a value");
    }

    #[tokio::test(start_paused = true)]
    async fn timer_rejects_with_timeout() {
        let registry = Arc::new(PendingRegistry::new());
        let rx = register(&registry, 5);
        registry.start_timer(&Handle::current(), id(5), Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(registry.contains(id(5)));

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert!(!registry.contains(id(5)));
        assert!(!registry.resolve(id(5), json!("late")));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_disarms_timer() {
        let registry = Arc::new(PendingRegistry::new());
        let rx = register(&registry, 6);
        registry.start_timer(&Handle::current(), id(6), Duration::from_millis(100));

        assert!(registry.resolve(id(6), json!(1)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rejects_only_old_entries() {
        let registry = PendingRegistry::new();
        let old = register(&registry, 1);
        tokio::time::advance(Duration::from_millis(500)).await;
        let young = register(&registry, 2);
        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(registry.sweep(Duration::from_millis(500)), 1);
        assert_eq!(registry.ids(), vec![id(2)]);
        assert!(old.await.unwrap().unwrap_err().is_timeout());

        assert_eq!(registry.sweep(Duration::from_millis(100)), 1);
        assert!(young.await.unwrap().unwrap_err().is_timeout());
        assert_eq!(registry.sweep(Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn drain_rejects_everything_as_dropped() {
        let registry = PendingRegistry::new();
        let a = register(&registry, 1);
        let b = register(&registry, 2);

        assert_eq!(registry.drain(), 2);
        assert_eq!(a.await.unwrap().unwrap_err().kind(), AckErrorKind::Dropped);
        assert_eq!(b.await.unwrap().unwrap_err().kind(), AckErrorKind::Dropped);
    }

    #[test]
    fn ids_are_sorted() {
        let registry = PendingRegistry::new();
        let _c = register(&registry, 30);
        let _a = register(&registry, 10);
        let _b = register(&registry, 20);
        assert_eq!(registry.ids(), vec![id(10), id(20), id(30)]);
    }
}
