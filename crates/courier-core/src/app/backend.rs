//! ResultBackend - 結果の取得と完了待ち（rendezvous）
//!
//! The worker writes the result to `<prefix><task_id>` and publishes on a
//! channel of the same name. Waiting is subscribe-then-wait with a hard
//! deadline: if the deadline passes first, the wait resolves to `None` even
//! if the result shows up a moment later.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{StoredResult, TaskId, TaskResult};
use crate::ports::{Store, StoreError, Subscription};

/// Longest wait a watch honours. Longer timeouts, up to `Duration::MAX`,
/// are capped to this.
pub const MAX_RESULT_WAIT: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

pub struct ResultBackend {
    store: Arc<dyn Store>,
    key_prefix: String,
}

impl ResultBackend {
    pub fn new(store: Arc<dyn Store>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Result key, which is also the notification channel.
    pub fn result_key(&self, task_id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, task_id)
    }

    /// One GET, no waiting. `None` for both pending and unknown ids.
    pub async fn get_result(&self, task_id: &TaskId) -> Result<Option<TaskResult>, StoreError> {
        let raw = self.store.get(&self.result_key(task_id)).await?;
        Ok(raw.map(|raw| TaskResult::decode(&raw)))
    }

    /// Subscribe to the task's completion channel.
    ///
    /// When this returns, the subscription is acknowledged by the store and
    /// the deadline (`now + timeout`, capped at [`MAX_RESULT_WAIT`]) is running.
    pub async fn watch(&self, task_id: &TaskId, timeout: Duration) -> Result<ResultWatch, StoreError> {
        let key = self.result_key(task_id);
        let subscription = self.store.subscribe(&key).await?;
        tracing::debug!(task_id = %task_id, timeout_ms = timeout.as_millis() as u64, "watching for result");

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout.min(MAX_RESULT_WAIT))
            .unwrap_or(now);

        Ok(ResultWatch {
            task_id: task_id.clone(),
            key,
            subscription,
            deadline,
            store: Arc::clone(&self.store),
        })
    }

    /// `watch` + `wait`.
    pub async fn await_result(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Result<Option<TaskResult>, StoreError> {
        self.watch(task_id, timeout).await?.wait().await
    }

    /// Every stored result. KEYS + one MGET; unordered, no paging.
    pub async fn list_recent(&self) -> Result<Vec<StoredResult>, StoreError> {
        let keys = self.store.keys(&format!("{}*", escape_glob(&self.key_prefix))).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.store.mget(&keys).await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| {
                // expired or deleted between KEYS and MGET
                let raw = value?;
                let task_id = key.strip_prefix(&self.key_prefix)?;
                Some(StoredResult {
                    task_id: TaskId::new(task_id),
                    result: TaskResult::decode(&raw),
                })
            })
            .collect())
    }
}

/// Make `literal` match only itself in a KEYS pattern.
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A pending wait for one task's result.
///
/// Settles exactly once: `wait` consumes the watch and resolves on whichever
/// comes first, the notification or the deadline. The subscription is
/// released on both paths, and also when the watch is dropped unawaited.
pub struct ResultWatch {
    task_id: TaskId,
    key: String,
    subscription: Box<dyn Subscription>,
    deadline: Instant,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for ResultWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultWatch")
            .field("task_id", &self.task_id)
            .field("channel", &self.subscription.channel())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl ResultWatch {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolve to the notified result, or `None` once the deadline passes.
    pub async fn wait(self) -> Result<Option<TaskResult>, StoreError> {
        let ResultWatch {
            task_id,
            key,
            mut subscription,
            deadline,
            store,
        } = self;

        // A message that is already buffered wins over an expired timer.
        let notified = tokio::select! {
            biased;
            message = subscription.next_message() => Some(message),
            () = tokio::time::sleep_until(deadline) => None,
        };

        if let Err(err) = subscription.close().await {
            tracing::warn!(task_id = %task_id, error = %err, "failed to unsubscribe cleanly");
        }

        match notified {
            None => {
                tracing::debug!(task_id = %task_id, "result wait timed out");
                Ok(None)
            }
            Some(Err(err)) => Err(err),
            // notification without payload: the result itself is in the key
            Some(Ok(payload)) if payload.is_empty() => {
                let raw = store.get(&key).await?;
                Ok(raw.map(|raw| TaskResult::decode(&raw)))
            }
            Some(Ok(payload)) => {
                tracing::debug!(task_id = %task_id, "result notified");
                Ok(Some(TaskResult::decode(&payload)))
            }
        }
    }

    /// Give up without waiting and release the subscription.
    pub(crate) async fn release(self) {
        if let Err(err) = self.subscription.close().await {
            tracing::warn!(task_id = %self.task_id, error = %err, "failed to unsubscribe cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use serde_json::json;

    const PREFIX: &str = "celery-task-meta-";

    fn backend(store: &InMemoryStore) -> ResultBackend {
        ResultBackend::new(Arc::new(store.clone()), PREFIX)
    }

    #[tokio::test]
    async fn get_result_on_unknown_id_is_none() {
        let store = InMemoryStore::new();
        let result = backend(&store).get_result(&TaskId::new("nope")).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn get_result_decodes_or_keeps_raw() {
        let store = InMemoryStore::new();
        store.set("celery-task-meta-a", r#"{"status":"SUCCESS","result":3}"#);
        store.set("celery-task-meta-b", "plain text");
        let backend = backend(&store);

        let a = backend.get_result(&TaskId::new("a")).await.unwrap().unwrap();
        let b = backend.get_result(&TaskId::new("b")).await.unwrap().unwrap();

        assert_eq!(a.as_json(), Some(&json!({"status": "SUCCESS", "result": 3})));
        assert_eq!(b, TaskResult::Raw(b"plain text".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn notification_before_deadline_wins() {
        let store = InMemoryStore::new();
        let backend = backend(&store);
        let id = TaskId::new("t1");

        let watch = backend.watch(&id, Duration::from_millis(3000)).await.unwrap();
        let worker = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2999)).await;
            worker.publish("celery-task-meta-t1", r#"{"status":"SUCCESS","result":7}"#);
        });

        let result = watch.wait().await.unwrap().unwrap();

        assert_eq!(result.meta().unwrap().result, json!(7));
        assert_eq!(store.subscriber_count("celery-task-meta-t1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_before_notification_wins() {
        let store = InMemoryStore::new();
        let backend = backend(&store);
        let id = TaskId::new("t2");

        let watch = backend.watch(&id, Duration::from_millis(3000)).await.unwrap();
        let worker = store.clone();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3001)).await;
            worker.set("celery-task-meta-t2", r#"{"status":"SUCCESS","result":1}"#);
            worker.publish("celery-task-meta-t2", r#"{"status":"SUCCESS","result":1}"#)
        });

        let started = Instant::now();
        let result = watch.wait().await.unwrap();

        assert_eq!(result, None);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(store.subscriber_count("celery-task-meta-t2"), 0);
        // the late publish finds nobody listening
        assert_eq!(late.await.unwrap(), 0);
        // and the result is still readable afterwards
        assert!(backend.get_result(&id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn no_result_ever_times_out_cleanly() {
        let store = InMemoryStore::new();
        let backend = backend(&store);

        let started = Instant::now();
        let result = backend
            .await_result(&TaskId::new("never"), Duration::from_millis(3000))
            .await
            .unwrap();

        assert_eq!(result, None);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(store.subscriber_count("celery-task-meta-never"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_is_capped() {
        let store = InMemoryStore::new();
        let backend = backend(&store);

        let watch = backend.watch(&TaskId::new("forever"), Duration::MAX).await.unwrap();
        assert_eq!(watch.deadline(), Instant::now() + MAX_RESULT_WAIT);

        let worker = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            worker.publish("celery-task-meta-forever", "5");
        });

        assert_eq!(watch.wait().await.unwrap(), Some(TaskResult::Json(json!(5))));
        assert_eq!(store.subscriber_count("celery-task-meta-forever"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_notification_beats_an_expired_deadline() {
        let store = InMemoryStore::new();
        let backend = backend(&store);

        let watch = backend.watch(&TaskId::new("t3"), Duration::from_millis(10)).await.unwrap();
        store.publish("celery-task-meta-t3", "42");
        tokio::time::advance(Duration::from_millis(50)).await;

        let result = watch.wait().await.unwrap();
        assert_eq!(result, Some(TaskResult::Json(json!(42))));
    }

    #[tokio::test]
    async fn empty_notification_reads_the_key() {
        let store = InMemoryStore::new();
        let backend = backend(&store);

        let watch = backend.watch(&TaskId::new("t4"), Duration::from_secs(5)).await.unwrap();
        store.set("celery-task-meta-t4", r#"{"status":"FAILURE","result":null}"#);
        store.publish("celery-task-meta-t4", "");

        let result = watch.wait().await.unwrap().unwrap();
        assert!(result.meta().unwrap().is_failure());
    }

    #[tokio::test]
    async fn dropped_watch_releases_its_subscription() {
        let store = InMemoryStore::new();
        let backend = backend(&store);

        let watch = backend.watch(&TaskId::new("t5"), Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.subscriber_count("celery-task-meta-t5"), 1);
        drop(watch);
        assert_eq!(store.subscriber_count("celery-task-meta-t5"), 0);
    }

    #[tokio::test]
    async fn watch_fails_when_store_is_down() {
        let store = InMemoryStore::new();
        store.fail_with("down");

        let err = backend(&store)
            .watch(&TaskId::new("t6"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn list_recent_with_nothing_stored_is_empty() {
        let store = InMemoryStore::new();
        assert!(backend(&store).list_recent().await.unwrap().is_empty());
        // no MGET for zero keys
        assert_eq!(store.command_count(), 1);
    }

    #[tokio::test]
    async fn list_recent_treats_the_prefix_literally() {
        let store = InMemoryStore::new();
        store.set("meta[1]-a", "1");
        store.set("meta1-b", "2");
        store.set("metax-c", "3");
        let backend = ResultBackend::new(Arc::new(store.clone()), "meta[1]-");

        let listed = backend.list_recent().await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].task_id, TaskId::new("a"));
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("celery-task-meta-"), "celery-task-meta-");
        assert_eq!(escape_glob(r"a*b?[c]\"), r"a\*b\?\[c\]\\");
    }

    #[tokio::test]
    async fn list_recent_returns_every_result() {
        let store = InMemoryStore::new();
        store.set("celery-task-meta-a", "1");
        store.set("celery-task-meta-b", r#"{"status":"SUCCESS","result":2}"#);
        store.set("math", "not a result");

        let mut listed = backend(&store).list_recent().await.unwrap();
        listed.sort_by(|x, y| x.task_id.cmp(&y.task_id));

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].task_id, TaskId::new("a"));
        assert_eq!(listed[0].result, TaskResult::Json(json!(1)));
        assert_eq!(listed[1].task_id, TaskId::new("b"));
    }
}
