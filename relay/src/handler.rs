use crate::{err_fmt, json_response, pusher::Trigger, Err, Handler};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use http::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of every community channel name.
pub const CHANNEL_PREFIX: &str = "community-";
/// The event name messages are published under.
pub const EVENT_NAME: &str = "message";

/// The inbound message post. Nothing is required and nothing is type-checked:
/// each field is carried through as whatever JSON value was sent, unless
/// validation is turned on. A field sent as `null` is present, not absent.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// The chat message.
    #[serde(default, deserialize_with = "present")]
    pub message: Option<Value>,
    /// The community whose channel receives the message.
    #[serde(default, deserialize_with = "present")]
    pub community_id: Option<Value>,
    /// The author.
    #[serde(default, deserialize_with = "present")]
    pub user_id: Option<Value>,
}

/// The payload published with each event. Absent fields are left out, `null`
/// fields are kept.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// The chat message.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<Value>,
    /// The author.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<Value>,
}

// A key that is there maps to `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Renders `value` the way a string template interpolates it.
fn template_text(value: &Value) -> String {
    match value {
        Value::Null => String::from("null"),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                item => template_text(item),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => String::from("[object Object]"),
    }
}

/// A request rejected by [`RelayRequest::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A field is absent, `null` or an empty string.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

impl RelayRequest {
    /// Decodes a request body. An empty, unparseable or `null` body is an
    /// error; any other non-object value decodes with every field absent.
    pub fn from_body(body: &[u8]) -> Result<Self, Err> {
        let value: Value = serde_json::from_slice(body)?;
        match value {
            Value::Null => Err(err_fmt!("request body is null").into()),
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Ok(Self::default()),
        }
    }

    /// The channel for this request's community. A missing id renders as
    /// `undefined`.
    pub fn channel(&self) -> String {
        let id = match &self.community_id {
            Some(id) => template_text(id),
            None => String::from("undefined"),
        };
        format!("{}{}", CHANNEL_PREFIX, id)
    }

    /// The event payload for this request.
    pub fn payload(&self) -> MessagePayload {
        MessagePayload {
            message: self.message.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// Requires every field to be present, not `null` and not an empty string.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("message", &self.message),
            ("communityId", &self.community_id),
            ("userId", &self.user_id),
        ];
        for (name, field) in fields {
            let missing = match field {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if missing {
                return Err(ValidationError::MissingField(name));
            }
        }
        Ok(())
    }
}

/// Forwards every POSTed message to `community-<communityId>` through a
/// [`Trigger`]. Other methods get a 405. A failed forward is returned as the
/// handler's error.
#[derive(Debug)]
pub struct RelayHandler<T> {
    trigger: Arc<T>,
    validate: bool,
}

impl<T> Clone for RelayHandler<T> {
    fn clone(&self) -> Self {
        Self {
            trigger: Arc::clone(&self.trigger),
            validate: self.validate,
        }
    }
}

impl<T> RelayHandler<T>
where
    T: Trigger + 'static,
{
    /// Creates a handler forwarding through `trigger`.
    pub fn new(trigger: Arc<T>) -> Self {
        Self {
            trigger,
            validate: false,
        }
    }

    /// Runs [`RelayRequest::validate`] before forwarding, answering 400 on failure.
    pub fn validating(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Handles one request.
    pub async fn relay(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Err> {
        if req.method() != Method::POST {
            debug!(method = %req.method(), "method not allowed");
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &json!({ "error": "Method not allowed" }),
            );
        }

        let body = RelayRequest::from_body(req.body())?;
        if self.validate {
            if let Err(err) = body.validate() {
                debug!(error = %err, "rejecting incomplete message");
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &json!({ "error": err.to_string() }),
                );
            }
        }

        let channel = body.channel();
        let payload = serde_json::to_value(body.payload())?;
        self.trigger.trigger(&channel, EVENT_NAME, &payload).await?;

        info!(%channel, "message relayed");
        json_response(StatusCode::OK, &json!({ "success": true }))
    }
}

impl<T> Handler<Request<Bytes>, Response<Bytes>> for RelayHandler<T>
where
    T: Trigger + 'static,
{
    type Err = Err;
    type Fut = BoxFuture<'static, Result<Response<Bytes>, Err>>;

    fn call(&self, req: Request<Bytes>) -> Self::Fut {
        let this = self.clone();
        async move { this.relay(req).await }.boxed()
    }
}
