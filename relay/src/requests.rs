use crate::pusher::{Credentials, TriggerError};
use bytes::Bytes;
use headers::{ContentType, HeaderMapExt};
use hmac::{Hmac, Mac};
use http::{uri::PathAndQuery, Method, Request, Uri};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// The signature scheme version sent as `auth_version`.
pub const AUTH_VERSION: &str = "1.0";

/// The JSON body of a trigger call: one event published on a set of channels.
/// `data` carries the payload already serialized to a string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    /// The event name.
    pub name: String,
    /// The channels the event is published on.
    pub channels: Vec<String>,
    /// The payload, as a JSON string.
    pub data: String,
}

/// A signed request that publishes a [`TriggerEvent`]. The request carries only
/// a path and query; the client resolves it against its own origin.
///
/// ```
/// use bytes::Bytes;
/// use http::Request;
/// use relay::Credentials;
/// use relay::requests::{TriggerEvent, TriggerRequest};
///
/// let credentials = Credentials {
///     app_id: String::from("3"),
///     key: String::from("278d425bdf160c739803"),
///     secret: String::from("7ad3773142a6692b25b8"),
/// };
/// let event = TriggerEvent {
///     name: String::from("message"),
///     channels: vec![String::from("community-abc")],
///     data: String::from(r#"{"message":"hi"}"#),
/// };
/// let req = TriggerRequest::from_components(&credentials, &event, 1353088179)?;
/// let req = Request::<Bytes>::try_from(req)?;
/// assert_eq!(req.uri().path(), "/apps/3/events");
/// # Ok::<(), relay::TriggerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    path_and_query: PathAndQuery,
    body: Bytes,
}

impl TriggerRequest {
    /// Serializes and signs `event` for `credentials` at `timestamp` (seconds
    /// since the Unix epoch).
    pub fn from_components(
        credentials: &Credentials,
        event: &TriggerEvent,
        timestamp: u64,
    ) -> Result<Self, TriggerError> {
        let body = serde_json::to_vec(event)?;
        let path = format!("/apps/{}/events", credentials.app_id);

        // Parameters must stay in alphabetical order, they are signed as written.
        let query = format!(
            "auth_key={}&auth_timestamp={}&auth_version={}&body_md5={}",
            credentials.key,
            timestamp,
            AUTH_VERSION,
            hex::encode(Md5::digest(&body)),
        );
        let signature = sign(&credentials.secret, &format!("POST\n{}\n{}", path, query));

        let path_and_query =
            PathAndQuery::try_from(format!("{}?{}&auth_signature={}", path, query, signature))?;
        let req = TriggerRequest {
            path_and_query,
            body: Bytes::from(body),
        };
        Ok(req)
    }

    /// The signed path and query.
    pub fn path_and_query(&self) -> &PathAndQuery {
        &self.path_and_query
    }

    /// The serialized event.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl TryFrom<TriggerRequest> for Request<Bytes> {
    type Error = TriggerError;

    fn try_from(req: TriggerRequest) -> Result<Self, Self::Error> {
        let uri = Uri::builder().path_and_query(req.path_and_query).build()?;
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(req.body)?;
        req.headers_mut().typed_insert(ContentType::json());
        Ok(req)
    }
}

/// Lowercase hex HMAC-SHA256 of `message` keyed by `secret`.
pub(crate) fn sign(secret: &str, message: &str) -> String {
    // HMAC pads or hashes the key, so every length is accepted.
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC takes keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
