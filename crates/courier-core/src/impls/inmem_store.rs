//! InMemoryStore - 開発・テスト用のストア
//!
//! Implements the subset of Redis the client uses (lists, hashes, sorted
//! sets, strings, pub/sub) behind one mutex. Besides the `Store` commands it
//! exposes the worker-side writes (`set`, `hset`, `zadd`, `publish`) so tests
//! can play the external worker, plus a few inspection helpers.
//!
//! # 使用例
//! ```ignore
//! let store = InMemoryStore::new();
//! store.set("celery-task-meta-abc", br#"{"status":"SUCCESS","result":3}"#);
//! store.publish("celery-task-meta-abc", b"...");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ports::{Store, StoreError, Subscription};

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct InMemoryState {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    /// (score, member), kept sorted
    zsets: HashMap<String, Vec<(f64, String)>>,
    strings: HashMap<String, Vec<u8>>,
    channels: HashMap<String, Vec<Subscriber>>,
    next_subscriber_id: u64,
    /// Number of `Store` commands issued (including rejected ones).
    commands: usize,
    /// When set, every `Store` command fails with this reason.
    outage: Option<String>,
}

impl InMemoryState {
    fn unsubscribe(&mut self, channel: &str, id: u64) {
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                self.channels.remove(channel);
            }
        }
    }
}

/// In-memory `Store`. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count and gate one `Store` command.
    fn command<T>(&self, f: impl FnOnce(&mut InMemoryState) -> T) -> Result<T, StoreError> {
        let mut state = self.lock();
        state.commands += 1;
        if let Some(reason) = &state.outage {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        Ok(f(&mut state))
    }

    // ---- worker-side writes -------------------------------------------------

    /// SET
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.lock().strings.insert(key.to_string(), value.into());
    }

    /// HSET
    pub fn hset(&self, hash: &str, field: &str, value: impl Into<String>) {
        self.lock()
            .hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
    }

    /// ZADD (updates the score of an existing member)
    pub fn zadd(&self, key: &str, score: f64, member: &str) {
        let mut state = self.lock();
        let zset = state.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, m)| m != member);
        zset.push((score, member.to_string()));
        zset.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    }

    /// PUBLISH. Returns the number of subscribers that received the message.
    pub fn publish(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let state = self.lock();
        state
            .channels
            .get(channel)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|s| s.tx.send(payload.clone()).is_ok())
                    .count()
            })
            .unwrap_or(0)
    }

    // ---- inspection ---------------------------------------------------------

    /// Snapshot of a list, head first.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.lock()
            .lists
            .get(name)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().channels.get(channel).map_or(0, Vec::len)
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands
    }

    /// Make every following command fail until `recover` is called.
    pub fn fail_with(&self, reason: impl Into<String>) {
        self.lock().outage = Some(reason.into());
    }

    pub fn recover(&self) {
        self.lock().outage = None;
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn lpush(&self, list: &str, value: String) -> Result<(), StoreError> {
        self.command(|state| {
            state
                .lists
                .entry(list.to_string())
                .or_default()
                .push_front(value);
        })
    }

    async fn rpush(&self, list: &str, value: String) -> Result<(), StoreError> {
        self.command(|state| {
            state
                .lists
                .entry(list.to_string())
                .or_default()
                .push_back(value);
        })
    }

    async fn lrange_all(&self, list: &str) -> Result<Vec<String>, StoreError> {
        self.command(|state| {
            state
                .lists
                .get(list)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn hgetall(&self, hash: &str) -> Result<HashMap<String, String>, StoreError> {
        self.command(|state| state.hashes.get(hash).cloned().unwrap_or_default())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.command(|state| {
            state
                .zsets
                .get(key)
                .map(|zset| zset.iter().map(|(_, m)| m.clone()).collect())
                .unwrap_or_default()
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.command(|state| state.strings.get(key).cloned())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.command(|state| {
            state
                .strings
                .keys()
                .filter(|key| glob_match(pattern, key))
                .cloned()
                .collect()
        })
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.command(|state| keys.iter().map(|k| state.strings.get(k).cloned()).collect())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.command(|state| {
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state
                .channels
                .entry(channel.to_string())
                .or_default()
                .push(Subscriber { id, tx });
            id
        })?;

        Ok(Box::new(InMemorySubscription {
            channel: channel.to_string(),
            id,
            rx,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Registered until dropped.
struct InMemorySubscription {
    channel: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    state: Arc<Mutex<InMemoryState>>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn next_message(&mut self) -> Result<Vec<u8>, StoreError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| StoreError::SubscriptionClosed {
                channel: self.channel.clone(),
            })
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        // Drop が登録解除する
        drop(self);
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unsubscribe(&self.channel, self.id);
    }
}

enum GlobToken {
    Star,
    One,
    Literal(char),
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl GlobToken {
    fn matches(&self, c: char) -> bool {
        match self {
            GlobToken::Star | GlobToken::One => true,
            GlobToken::Literal(l) => *l == c,
            GlobToken::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated
            }
        }
    }
}

fn glob_tokens(pattern: &str) -> Vec<GlobToken> {
    let mut chars = pattern.chars().peekable();
    let mut tokens = Vec::new();

    while let Some(c) = chars.next() {
        let token = match c {
            '*' => GlobToken::Star,
            '?' => GlobToken::One,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut ranges = Vec::new();
                while let Some(c) = chars.next() {
                    match c {
                        ']' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                ranges.push((escaped, escaped));
                            }
                        }
                        lo => {
                            let mut ahead = chars.clone();
                            match (ahead.next(), ahead.next()) {
                                (Some('-'), Some(hi)) if hi != ']' => {
                                    chars.next();
                                    chars.next();
                                    ranges.push((lo.min(hi), lo.max(hi)));
                                }
                                _ => ranges.push((lo, lo)),
                            }
                        }
                    }
                }
                GlobToken::Class { negated, ranges }
            }
            c => GlobToken::Literal(c),
        };
        tokens.push(token);
    }
    tokens
}

/// Redis-style glob: `*`, `?`, `[...]` / `[^...]` classes with ranges, and
/// `\` escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = glob_tokens(pattern);
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        match p.get(pi) {
            Some(GlobToken::Star) => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some(token) if token.matches(t[ti]) => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                Some((star_pi, star_ti)) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    star = Some((star_pi, star_ti + 1));
                }
                None => return false,
            },
        }
    }
    while matches!(p.get(pi), Some(GlobToken::Star)) {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[tokio::test]
    async fn list_ends_follow_redis_semantics() {
        let store = InMemoryStore::new();
        store.rpush("q", "b".into()).await.unwrap();
        store.lpush("q", "a".into()).await.unwrap();
        store.rpush("q", "c".into()).await.unwrap();

        assert_eq!(store.lrange_all("q").await.unwrap(), vec!["a", "b", "c"]);
        assert!(store.lrange_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zrange_is_score_ordered() {
        let store = InMemoryStore::new();
        store.zadd("idx", 3.0, "c");
        store.zadd("idx", 1.0, "a");
        store.zadd("idx", 2.0, "b");
        store.zadd("idx", 0.5, "c");

        assert_eq!(store.zrange_all("idx").await.unwrap(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn mget_keeps_one_slot_per_key() {
        let store = InMemoryStore::new();
        store.set("k1", "v1");

        let values = store
            .mget(&["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(b"v1".to_vec()), None]);
    }

    #[tokio::test]
    async fn publish_reaches_live_subscribers_only() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("ch").await.unwrap();
        assert_eq!(store.subscriber_count("ch"), 1);

        assert_eq!(store.publish("ch", "hello"), 1);
        assert_eq!(sub.next_message().await.unwrap(), b"hello".to_vec());

        sub.close().await.unwrap();
        assert_eq!(store.subscriber_count("ch"), 0);
        assert_eq!(store.publish("ch", "late"), 0);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let store = InMemoryStore::new();
        let sub = store.subscribe("ch").await.unwrap();
        drop(sub);
        assert_eq!(store.subscriber_count("ch"), 0);
    }

    #[tokio::test]
    async fn next_message_waits_for_publish() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("ch").await.unwrap();

        let publisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher.publish("ch", "done");
        });

        assert_eq!(sub.next_message().await.unwrap(), b"done".to_vec());
    }

    #[tokio::test]
    async fn outage_rejects_commands_and_counts_them() {
        let store = InMemoryStore::new();
        store.fail_with("connection refused");

        let err = store.rpush("q", "x".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(reason) if reason == "connection refused"));
        assert_eq!(store.command_count(), 1);
        assert!(store.list("q").is_empty());

        store.recover();
        store.rpush("q", "x".into()).await.unwrap();
        assert_eq!(store.list("q"), vec!["x"]);
    }

    #[rstest]
    #[case("celery-task-meta-*", "celery-task-meta-abc", true)]
    #[case("celery-task-meta-*", "celery-task-meta-", true)]
    #[case("celery-task-meta-*", "other-abc", false)]
    #[case("a?c", "abc", true)]
    #[case("a*c*e", "abXcYYe", true)]
    #[case("a*c", "abcd", false)]
    #[case("*", "", true)]
    #[case("[ab]c", "bc", true)]
    #[case("[ab]c", "cc", false)]
    #[case("[^a]c", "bc", true)]
    #[case("[^a]c", "ac", false)]
    #[case("[a-c]x", "bx", true)]
    #[case("[a-c]x", "dx", false)]
    #[case(r"\*x", "*x", true)]
    #[case(r"\*x", "ax", false)]
    #[case(r"meta\[1\]-*", "meta[1]-abc", true)]
    #[case(r"meta\[1\]-*", "meta1-abc", false)]
    fn glob_matching(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }
}
