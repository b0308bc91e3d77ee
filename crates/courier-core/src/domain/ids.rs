//! Domain identifiers (strongly-typed string IDs).
//!
//! Celery identifies tasks with plain strings (usually UUIDs), and callers may
//! supply their own. We keep the value as-is and only add a phantom marker so a
//! task id and a delivery tag cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
///
/// `kind()` names the id in `Debug` output; it never reaches the wire.
pub trait IdMarker: Send + Sync + 'static {
    fn kind() -> &'static str;
}

/// Generic string identifier.
///
/// Serialized transparently as its string value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> AsRef<str> for Id<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(T::kind()).field(&self.value).finish()
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn kind() -> &'static str {
        "task"
    }
}

/// Delivery のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Delivery {}

impl IdMarker for Delivery {
    fn kind() -> &'static str {
        "delivery"
    }
}

/// Identifier of a submitted task. Also the suffix of its result key.
pub type TaskId = Id<Task>;

/// Per-publish transport token. Never reused, carries no task identity.
pub type DeliveryTag = Id<Delivery>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let task_id = TaskId::new("5f1c6a2e-0000-4000-8000-000000000001");

        let serialized = serde_json::to_string(&task_id).unwrap();
        assert_eq!(serialized, "\"5f1c6a2e-0000-4000-8000-000000000001\"");

        let deserialized: TaskId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, task_id);
    }

    #[test]
    fn display_is_the_raw_value() {
        let tag = DeliveryTag::from("tag-1");
        assert_eq!(tag.to_string(), "tag-1");
        assert_eq!(TaskId::from("abc".to_string()).as_str(), "abc");
    }

    #[test]
    fn debug_names_the_kind() {
        assert_eq!(format!("{:?}", TaskId::new("abc")), r#"task("abc")"#);
        assert_eq!(format!("{:?}", DeliveryTag::new("t-1")), r#"delivery("t-1")"#);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<TaskId>(), size_of::<String>());
        assert_eq!(size_of::<DeliveryTag>(), size_of::<String>());
    }
}
