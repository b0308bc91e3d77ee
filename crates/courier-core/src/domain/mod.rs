//! Domain model: identifiers, task options, the wire envelope and results.
//!
//! Everything here is pure (no I/O).

pub mod envelope;
pub mod ids;
pub mod options;
pub mod result;

pub use envelope::{DecodeError, Embed, EncodeError, Envelope, decode_listed_envelope};
pub use ids::{DeliveryTag, TaskId};
pub use options::{Canonicalizer, InvalidTaskOptions, PartialTaskOptions, Retries, TaskOptions, TimeSpec};
pub use result::{ResultMeta, StoredResult, TaskResult};
