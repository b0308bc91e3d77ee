//! Client - producer 側のファサード
//!
//! Merges the configured default options with each call's options, turns
//! them into a protocol envelope, and pushes it. `submit_and_watch`
//! subscribes to the result channel *before* pushing, so a worker that
//! finishes immediately cannot publish into the void.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::app::backend::{ResultBackend, ResultWatch};
use crate::app::broker::Broker;
use crate::app::builder::ClientBuilder;
use crate::config::ClientConfig;
use crate::domain::{Canonicalizer, PartialTaskOptions, StoredResult, TaskId, TaskOptions, TaskResult};
use crate::error::ClientError;
use crate::impls::RedisStore;
use crate::ports::StoreError;

/// A pushed task together with the watch on its result.
#[derive(Debug)]
pub struct Submission {
    pub task_id: TaskId,
    pub result: ResultWatch,
}

pub struct Client {
    broker: Broker,
    backend: ResultBackend,
    canonicalizer: Canonicalizer,
    defaults: PartialTaskOptions,
    result_wait_timeout: Duration,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Validate `config`, connect to Redis and build a client on top of it.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let store = RedisStore::connect(&config.redis_url).await?;
        Ok(ClientBuilder::new().store(store).config(config).build()?)
    }

    pub(crate) fn from_parts(
        broker: Broker,
        backend: ResultBackend,
        canonicalizer: Canonicalizer,
        defaults: PartialTaskOptions,
        result_wait_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            backend,
            canonicalizer,
            defaults,
            result_wait_timeout,
        }
    }

    pub fn default_queue(&self) -> &str {
        self.canonicalizer.default_queue()
    }

    pub fn default_options(&self) -> &PartialTaskOptions {
        &self.defaults
    }

    /// Push one task. The returned id is the acknowledgement.
    pub async fn submit<A, K>(
        &self,
        task: &str,
        args: &A,
        kwargs: &K,
        options: &PartialTaskOptions,
    ) -> Result<TaskId, ClientError>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let (opts, _) = self.resolve(options);
        self.broker.enqueue(task, args, kwargs, &opts).await
    }

    /// Push one task and watch for its result.
    ///
    /// The subscription is acknowledged before the push is issued. The wait
    /// deadline starts at subscription time; its length is the merged
    /// `result_wait_timeout_ms`, or the configured default.
    pub async fn submit_and_watch<A, K>(
        &self,
        task: &str,
        args: &A,
        kwargs: &K,
        options: &PartialTaskOptions,
    ) -> Result<Submission, ClientError>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let (opts, timeout) = self.resolve(options);
        // encode first: a bad payload must not leave a subscription behind
        let prepared = Broker::prepare(task, args, kwargs, &opts)?;
        let watch = self.backend.watch(prepared.task_id(), timeout).await?;

        match self.broker.publish(&prepared).await {
            Ok(task_id) => Ok(Submission {
                task_id,
                result: watch,
            }),
            Err(err) => {
                watch.release().await;
                Err(err.into())
            }
        }
    }

    /// Current stored result, without waiting.
    pub async fn fetch_result(&self, task_id: &TaskId) -> Result<Option<TaskResult>, StoreError> {
        self.backend.get_result(task_id).await
    }

    /// Wait up to the configured timeout for the task's completion notice.
    pub async fn wait_result(&self, task_id: &TaskId) -> Result<Option<TaskResult>, StoreError> {
        self.wait_result_for(task_id, self.result_wait_timeout).await
    }

    pub async fn wait_result_for(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Result<Option<TaskResult>, StoreError> {
        self.backend.await_result(task_id, timeout).await
    }

    /// `None` lists the default queue.
    pub async fn list_queued(&self, queue: Option<&str>) -> Result<Vec<Value>, StoreError> {
        let queue = queue.unwrap_or_else(|| self.default_queue());
        self.broker.list_queued(queue).await
    }

    pub async fn list_scheduled(&self) -> Result<Vec<Value>, StoreError> {
        self.broker.list_scheduled().await
    }

    pub async fn list_recent(&self) -> Result<Vec<StoredResult>, StoreError> {
        self.backend.list_recent().await
    }

    fn resolve(&self, options: &PartialTaskOptions) -> (TaskOptions, Duration) {
        let merged = self.defaults.merged(options);
        let timeout = merged
            .result_wait_timeout_duration()
            .filter(|t| !t.is_zero())
            .unwrap_or(self.result_wait_timeout);
        (self.canonicalizer.canonicalize(&merged), timeout)
    }
}
