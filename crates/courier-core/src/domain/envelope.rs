//! Envelope - Celery (protocol v2, Redis transport) のワイヤーフォーマット
//!
//! Field names and nesting here are fixed by the external worker. Do not
//! rename, reorder into sub-objects, or skip `null` fields.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::ids::{DeliveryTag, TaskId};
use super::options::TaskOptions;

pub const CONTENT_TYPE: &str = "application/json";
pub const CONTENT_ENCODING: &str = "utf-8";
pub const BODY_ENCODING: &str = "base64";
/// Language tag of the external worker.
pub const WORKER_LANG: &str = "py";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("task arguments are not serializable: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("positional args must serialize to a JSON array, got {0}")]
    ArgsNotSequence(&'static str),

    #[error("keyword args must serialize to a JSON object, got {0}")]
    KwargsNotMapping(&'static str),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The whole message pushed onto a queue list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// base64(JSON `[args, kwargs, embed]`)
    pub body: String,
    pub headers: Headers,
    pub properties: Properties,
    #[serde(rename = "content-type")]
    pub content_type: String,
    #[serde(rename = "content-encoding")]
    pub content_encoding: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    pub lang: String,
    pub task: String,
    pub id: TaskId,
    /// Same as `id`; only differs for chained tasks.
    pub root_id: TaskId,
    pub parent_id: Option<TaskId>,
    pub group: Option<String>,
    pub eta: Option<String>,
    pub expires: Option<String>,
    pub retries: u32,
    /// `[hard, soft]` in seconds.
    pub timelimit: (Option<f64>, Option<f64>),
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub body_encoding: String,
    pub priority: i64,
    pub correlation_id: TaskId,
    pub reply_to: Option<String>,
    pub delivery_info: DeliveryInfo,
    pub delivery_mode: u8,
    pub delivery_tag: DeliveryTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub routing_key: String,
    pub exchange: Option<String>,
}

/// Third element of the body. Composition is never used, so all four stay `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub chord: Option<Value>,
    pub callbacks: Option<Value>,
    pub errbacks: Option<Value>,
    pub chain: Option<Value>,
}

impl Embed {
    pub fn disabled() -> Self {
        Self::default()
    }
}

impl Envelope {
    /// Build the envelope for one task invocation. No I/O.
    pub fn encode<A, K>(
        task: &str,
        args: &A,
        kwargs: &K,
        opts: &TaskOptions,
    ) -> Result<Envelope, EncodeError>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let args = serde_json::to_value(args)?;
        if !args.is_array() {
            return Err(EncodeError::ArgsNotSequence(json_kind(&args)));
        }
        let kwargs = serde_json::to_value(kwargs)?;
        if !kwargs.is_object() {
            return Err(EncodeError::KwargsNotMapping(json_kind(&kwargs)));
        }

        let body = serde_json::to_vec(&(args, kwargs, Embed::disabled()))?;

        Ok(Envelope {
            body: BASE64.encode(body),
            headers: Headers {
                lang: WORKER_LANG.to_string(),
                task: task.to_string(),
                id: opts.id().clone(),
                root_id: opts.id().clone(),
                parent_id: None,
                group: None,
                eta: opts.eta().map(str::to_string),
                expires: opts.expires().map(str::to_string),
                retries: opts.retries(),
                timelimit: (opts.time_limit(), opts.soft_time_limit()),
                origin: opts.origin().map(str::to_string),
            },
            properties: Properties {
                body_encoding: BODY_ENCODING.to_string(),
                priority: opts.priority(),
                correlation_id: opts.id().clone(),
                reply_to: None,
                delivery_info: DeliveryInfo {
                    routing_key: opts.queue().to_string(),
                    exchange: None,
                },
                delivery_mode: opts.delivery_mode(),
                delivery_tag: opts.delivery_tag().clone(),
            },
            content_type: CONTENT_TYPE.to_string(),
            content_encoding: CONTENT_ENCODING.to_string(),
        })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.headers.id
    }

    pub fn queue(&self) -> &str {
        &self.properties.delivery_info.routing_key
    }

    pub fn priority(&self) -> i64 {
        self.properties.priority
    }

    /// Serialized form stored as the list element.
    pub fn to_json(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// `[args, kwargs, embed]` as JSON.
    pub fn decode_body(&self) -> Result<Value, DecodeError> {
        decode_body_text(&self.body)
    }
}

fn decode_body_text(body: &str) -> Result<Value, DecodeError> {
    let bytes = BASE64.decode(body)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Make a stored envelope readable: parse it and replace `body` with its
/// decoded JSON.
///
/// Listing is read-only and may see messages from other producers, so this
/// never fails. A body that is neither base64 JSON nor plain JSON text is
/// left as the stored string; an element that is not JSON at all comes
/// back as a JSON string.
pub fn decode_listed_envelope(raw: &str) -> Value {
    let mut message: Value = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "queued element is not JSON, returning it raw");
            return Value::String(raw.to_string());
        }
    };
    decode_body_in_place(&mut message);
    message
}

/// Same as `decode_listed_envelope` for an envelope that is already parsed.
pub(crate) fn decode_body_in_place(message: &mut Value) {
    let Some(body) = message.get_mut("body") else {
        return;
    };
    let decoded = match body {
        Value::String(text) => match decode_body_text(text) {
            Ok(value) => Some(value),
            Err(_) => serde_json::from_str(text).ok(),
        },
        _ => None,
    };
    if let Some(decoded) = decoded {
        *body = decoded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::options::{Canonicalizer, PartialTaskOptions};
    use crate::ports::UuidGenerator;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn options(raw: PartialTaskOptions) -> TaskOptions {
        Canonicalizer::new(Arc::new(UuidGenerator), "celery").canonicalize(&raw)
    }

    fn embed_json() -> Value {
        json!({"chord": null, "callbacks": null, "errbacks": null, "chain": null})
    }

    #[test]
    fn body_round_trips() {
        let opts = options(PartialTaskOptions::new());
        let args = json!([1, "two", {"three": 3.0}, [4]]);
        let kwargs = json!({"flag": true, "name": "x"});

        let envelope = Envelope::encode("tasks.mix", &args, &kwargs, &opts).unwrap();

        assert_eq!(
            envelope.decode_body().unwrap(),
            json!([args, kwargs, embed_json()])
        );
    }

    #[test]
    fn wire_shape_is_exact() {
        let opts = options(
            PartialTaskOptions::new()
                .id("abc")
                .priority(5)
                .queue("math")
                .retries(1u32)
                .time_limit(10.0)
                .origin("gen1@host"),
        );
        let envelope = Envelope::encode("add", &[1, 2], &json!({}), &opts).unwrap();
        let wire: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(wire["content-type"], "application/json");
        assert_eq!(wire["content-encoding"], "utf-8");

        let headers = &wire["headers"];
        assert_eq!(headers["lang"], "py");
        assert_eq!(headers["task"], "add");
        assert_eq!(headers["id"], "abc");
        assert_eq!(headers["root_id"], "abc");
        assert_eq!(headers["parent_id"], Value::Null);
        assert_eq!(headers["group"], Value::Null);
        assert_eq!(headers["eta"], Value::Null);
        assert_eq!(headers["expires"], Value::Null);
        assert_eq!(headers["retries"], 1);
        assert_eq!(headers["timelimit"], json!([10.0, null]));
        assert_eq!(headers["origin"], "gen1@host");

        let props = &wire["properties"];
        assert_eq!(props["body_encoding"], "base64");
        assert_eq!(props["priority"], 5);
        assert_eq!(props["correlation_id"], "abc");
        assert_eq!(props["reply_to"], Value::Null);
        assert_eq!(
            props["delivery_info"],
            json!({"routing_key": "math", "exchange": null})
        );
        assert_eq!(props["delivery_mode"], 2);
        assert_eq!(props["delivery_tag"], opts.delivery_tag().as_str());
    }

    #[test]
    fn non_sequence_args_are_rejected() {
        let opts = options(PartialTaskOptions::new());
        let err = Envelope::encode("add", &json!({"a": 1}), &json!({}), &opts).unwrap_err();
        assert!(matches!(err, EncodeError::ArgsNotSequence("object")));
    }

    #[test]
    fn non_mapping_kwargs_are_rejected() {
        let opts = options(PartialTaskOptions::new());
        let err = Envelope::encode("add", &[1], &json!([1]), &opts).unwrap_err();
        assert!(matches!(err, EncodeError::KwargsNotMapping("array")));
    }

    #[test]
    fn unserializable_kwargs_are_rejected() {
        let opts = options(PartialTaskOptions::new());
        // JSON object keys must be strings
        let mut kwargs = HashMap::new();
        kwargs.insert(vec![1u8], 1);
        let err = Envelope::encode("add", &[1], &kwargs, &opts).unwrap_err();
        assert!(matches!(err, EncodeError::Serialize(_)));
    }

    #[test]
    fn listed_envelope_gets_a_readable_body() {
        let opts = options(PartialTaskOptions::new().queue("math"));
        let envelope = Envelope::encode("add", &[1, 2], &json!({}), &opts).unwrap();

        let listed = decode_listed_envelope(&envelope.to_json().unwrap());

        assert_eq!(listed["body"], json!([[1, 2], {}, embed_json()]));
        assert_eq!(listed["headers"]["task"], "add");
    }

    #[test]
    fn listed_envelope_accepts_plain_json_bodies() {
        let raw = json!({"body": "[[3], {}, null]", "headers": {}}).to_string();
        assert_eq!(decode_listed_envelope(&raw)["body"], json!([[3], {}, null]));
    }

    #[test]
    fn listed_garbage_is_returned_raw() {
        assert_eq!(decode_listed_envelope("not json"), json!("not json"));

        let raw = json!({"body": "%%%"}).to_string();
        assert_eq!(decode_listed_envelope(&raw)["body"], "%%%");
    }
}
