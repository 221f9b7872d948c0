use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use ipcemit_transport::SendHandle;
use serde_json::Value;

use crate::envelope::Failure;

/// What a handler's future resolves to.
pub type HandlerResult = Result<Value, Failure>;

/// A registered event handler, type-erased.
pub type Handler =
    Arc<dyn Fn(Value, Option<SendHandle>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Erase a handler closure returning any `Result<Value, impl Into<Failure>>` future.
pub fn handler<F, Fut, Fail>(f: F) -> Handler
where
    F: Fn(Value, Option<SendHandle>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Fail>> + Send + 'static,
    Fail: Into<Failure> + 'static,
{
    Arc::new(move |message: Value, handle: Option<SendHandle>| {
        f(message, handle).map(|r| r.map_err(Into::into)).boxed()
    })
}

/// Event name to handler, for one endpoint. At most one handler per name.
#[derive(Default)]
pub(crate) struct EventTable {
    handlers: HashMap<String, Handler>,
}

impl EventTable {
    /// Returns `false`, leaving the existing entry untouched, if `event` is taken.
    pub(crate) fn insert(&mut self, event: &str, handler: Handler) -> bool {
        if self.handlers.contains_key(event) {
            return false;
        }
        self.handlers.insert(event.to_string(), handler);
        true
    }

    pub(crate) fn remove(&mut self, event: &str) -> bool {
        self.handlers.remove(event).is_some()
    }

    pub(crate) fn get(&self, event: &str) -> Option<Handler> {
        self.handlers.get(event).cloned()
    }

    pub(crate) fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn answer(value: Value) -> Handler {
        handler(move |_, _| {
            let value = value.clone();
            async move { Ok::<_, Failure>(value) }
        })
    }

    #[tokio::test]
    async fn insert_refuses_duplicates_and_keeps_original() {
        let mut table = EventTable::default();
        assert!(table.insert("ping", answer(json!("first"))));
        assert!(!table.insert("ping", answer(json!("second"))));
        assert_eq!(table.len(), 1);

        let h = table.get("ping").unwrap();
        assert_eq!(h(json!(null), None).await.unwrap(), json!("first"));
    }

    #[test]
    fn remove_is_quiet_when_absent() {
        let mut table = EventTable::default();
        assert!(!table.remove("nothing"));
        table.insert("x", answer(json!(1)));
        assert!(table.remove("x"));
        assert!(!table.contains("x"));
    }

    #[tokio::test]
    async fn handler_error_converts_into_failure() {
        let h = handler(|_, _| async { Err::<Value, _>("nope") });
        match h(json!(null), None).await {
            Err(Failure::Text(text)) => assert_eq!(text, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
