//! Broker - キューへの投入と参照
//!
//! Priority is approximated by which end of the list a message goes to.
//! Workers pop from the head, so:
//! - `priority > 0`  → RPUSH (tail)
//! - `priority <= 0` → LPUSH (head)
//!
//! This only orders messages that are waiting at the same time; it is not a
//! priority heap. Existing consumers rely on this placement, keep it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::domain::envelope::decode_body_in_place;
use crate::domain::{EncodeError, Envelope, TaskId, TaskOptions, decode_listed_envelope};
use crate::error::ClientError;
use crate::ports::{Store, StoreError};

/// Which end of the queue list a message is pushed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEnd {
    Head,
    Tail,
}

impl PushEnd {
    pub fn for_priority(priority: i64) -> Self {
        if priority > 0 {
            PushEnd::Tail
        } else {
            PushEnd::Head
        }
    }
}

/// An encoded message ready to be pushed. Building one issues no store command.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    envelope: Envelope,
    payload: String,
}

impl PreparedTask {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn task_id(&self) -> &TaskId {
        self.envelope.task_id()
    }
}

pub struct Broker {
    store: Arc<dyn Store>,
    scheduled_hash: String,
    scheduled_index: String,
}

impl Broker {
    pub fn new(
        store: Arc<dyn Store>,
        scheduled_hash: impl Into<String>,
        scheduled_index: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scheduled_hash: scheduled_hash.into(),
            scheduled_index: scheduled_index.into(),
        }
    }

    /// Encode a task invocation and serialize it for the queue.
    pub fn prepare<A, K>(
        task: &str,
        args: &A,
        kwargs: &K,
        opts: &TaskOptions,
    ) -> Result<PreparedTask, EncodeError>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let envelope = Envelope::encode(task, args, kwargs, opts)?;
        let payload = envelope.to_json()?;
        Ok(PreparedTask { envelope, payload })
    }

    /// Push a prepared message onto `delivery_info.routing_key`.
    ///
    /// Exactly one store command; a failure is returned as-is, never retried.
    pub async fn publish(&self, prepared: &PreparedTask) -> Result<TaskId, StoreError> {
        let envelope = &prepared.envelope;
        let queue = envelope.queue();
        let end = PushEnd::for_priority(envelope.priority());

        match end {
            PushEnd::Tail => self.store.rpush(queue, prepared.payload.clone()).await?,
            PushEnd::Head => self.store.lpush(queue, prepared.payload.clone()).await?,
        }

        tracing::debug!(
            task_id = %envelope.task_id(),
            task = %envelope.headers.task,
            queue,
            priority = envelope.priority(),
            end = ?end,
            "task enqueued"
        );
        Ok(envelope.task_id().clone())
    }

    /// `prepare` + `publish`.
    pub async fn enqueue<A, K>(
        &self,
        task: &str,
        args: &A,
        kwargs: &K,
        opts: &TaskOptions,
    ) -> Result<TaskId, ClientError>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let prepared = Self::prepare(task, args, kwargs, opts)?;
        Ok(self.publish(&prepared).await?)
    }

    /// Snapshot of a queue list in stored order (head first), bodies decoded.
    pub async fn list_queued(&self, queue: &str) -> Result<Vec<Value>, StoreError> {
        let raw = self.store.lrange_all(queue).await?;
        Ok(raw.iter().map(|m| decode_listed_envelope(m)).collect())
    }

    /// Messages held in the delayed/unacknowledged hash, in index order.
    ///
    /// The hash and the index are read with two separate commands, so ids
    /// that disappear in between are skipped.
    pub async fn list_scheduled(&self) -> Result<Vec<Value>, StoreError> {
        let messages = self.store.hgetall(&self.scheduled_hash).await?;
        let index = self.store.zrange_all(&self.scheduled_index).await?;

        let mut scheduled = Vec::with_capacity(index.len());
        for id in index {
            let Some(raw) = messages.get(&id) else {
                tracing::debug!(id = %id, "indexed message missing from hash, skipping");
                continue;
            };
            scheduled.push(decode_scheduled(&id, raw));
        }
        Ok(scheduled)
    }
}

/// Hash values are `[message, exchange, routing_key]`.
fn decode_scheduled(id: &str, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(mut parts)) if !parts.is_empty() => {
            let mut message = parts.swap_remove(0);
            decode_body_in_place(&mut message);
            message
        }
        Ok(mut message) => {
            decode_body_in_place(&mut message);
            message
        }
        Err(err) => {
            tracing::warn!(id = %id, error = %err, "scheduled message is not JSON, returning it raw");
            Value::String(raw.to_string())
        }
    }
}
