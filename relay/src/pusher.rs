use crate::requests::{TriggerEvent, TriggerRequest};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use http::{
    uri::{Authority, PathAndQuery, Scheme},
    Request, StatusCode, Uri,
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// The longest channel name the API accepts.
pub const MAX_CHANNEL_NAME_LEN: usize = 200;
/// The longest event name the API accepts.
pub const MAX_EVENT_NAME_LEN: usize = 200;
/// The largest serialized payload the API accepts, in bytes.
pub const MAX_DATA_LEN: usize = 10 * 1024;

/// Errors produced while publishing an event.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The channel name is empty, too long, or contains a forbidden character.
    #[error("invalid channel name {0:?}")]
    InvalidChannel(String),
    /// The event name is too long.
    #[error("invalid event name {0:?}")]
    InvalidEvent(String),
    /// The serialized payload exceeds [`MAX_DATA_LEN`].
    #[error("event data is {0} bytes, over the {} byte limit", MAX_DATA_LEN)]
    PayloadTooLarge(usize),
    /// The event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    /// The configured host or a signed path is not a valid URI component.
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    /// The outbound request could not be assembled.
    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),
    /// The API answered with a non-success status.
    #[error("pub/sub API rejected the event with {status}: {body}")]
    Rejected {
        /// The status returned by the API.
        status: StatusCode,
        /// The response body, as text.
        body: String,
    },
    /// The API could not be reached.
    #[error("request to pub/sub API failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// The "trigger event on named channel" operation of a pub/sub service.
pub trait Trigger: Send + Sync {
    /// Publishes `event` with `payload` on `channel`, resolving once the service
    /// has accepted or rejected it.
    fn trigger<'a>(
        &'a self,
        channel: &'a str,
        event: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<(), TriggerError>>;
}

/// Application credentials for the pub/sub API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The application id.
    pub app_id: String,
    /// The application key.
    pub key: String,
    /// The application secret used to sign requests.
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn default_use_tls() -> bool {
    true
}

/// Pub/sub settings, read from `PUSHER_*` variables.
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct PusherConfig {
    /// `PUSHER_APP_ID`
    pub app_id: String,
    /// `PUSHER_KEY`
    pub key: String,
    /// `PUSHER_SECRET`
    pub secret: String,
    /// `PUSHER_CLUSTER`, e.g. `eu` or `mt1`.
    pub cluster: String,
    /// `PUSHER_USE_TLS`, on unless set to `false`.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// `PUSHER_HOST`, replaces the cluster host when set.
    #[serde(default)]
    pub host: Option<String>,
}

impl fmt::Debug for PusherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PusherConfig")
            .field("app_id", &self.app_id)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("cluster", &self.cluster)
            .field("use_tls", &self.use_tls)
            .field("host", &self.host)
            .finish()
    }
}

impl PusherConfig {
    /// The host requests are sent to.
    pub fn host(&self) -> String {
        match &self.host {
            Some(host) => host.clone(),
            None => format!("api-{}.pusher.com", self.cluster),
        }
    }

    /// The credentials part of the configuration.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            app_id: self.app_id.clone(),
            key: self.key.clone(),
            secret: self.secret.clone(),
        }
    }
}

/// Checks `channel` against the naming rules of the API.
pub fn validate_channel(channel: &str) -> Result<(), TriggerError> {
    let valid = !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_NAME_LEN
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-=@,.;".contains(c));
    if valid {
        Ok(())
    } else {
        Err(TriggerError::InvalidChannel(channel.to_owned()))
    }
}

/// Checks `event` against the naming rules of the API.
pub fn validate_event(event: &str) -> Result<(), TriggerError> {
    if event.len() > MAX_EVENT_NAME_LEN {
        return Err(TriggerError::InvalidEvent(event.to_owned()));
    }
    Ok(())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A [`Trigger`] backed by the hosted HTTP API.
#[derive(Debug, Clone)]
pub struct PusherClient {
    credentials: Credentials,
    base: (Scheme, Authority),
    http: reqwest::Client,
}

impl PusherClient {
    /// Builds a client from configuration. No request is made.
    pub fn new(config: &PusherConfig) -> Result<Self, TriggerError> {
        let scheme = if config.use_tls {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        };
        let authority: Authority = config.host().parse()?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            credentials: config.credentials(),
            base: (scheme, authority),
            http,
        })
    }

    fn add_origin(&self, query: PathAndQuery) -> Result<Uri, http::Error> {
        Uri::builder()
            .scheme(self.base.0.clone())
            .authority(self.base.1.clone())
            .path_and_query(query)
            .build()
    }

    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &Value,
    ) -> Result<(), TriggerError> {
        validate_channel(channel)?;
        validate_event(event)?;

        let data = serde_json::to_string(payload)?;
        if data.len() > MAX_DATA_LEN {
            return Err(TriggerError::PayloadTooLarge(data.len()));
        }

        let body = TriggerEvent {
            name: event.to_owned(),
            channels: vec![channel.to_owned()],
            data,
        };
        let mut req = Request::<Bytes>::try_from(TriggerRequest::from_components(
            &self.credentials,
            &body,
            unix_timestamp(),
        )?)?;
        let path_and_query = req
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        *req.uri_mut() = self.add_origin(path_and_query)?;

        let res = self.http.execute(reqwest::Request::try_from(req)?).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%channel, %event, %status, %body, "event rejected");
            return Err(TriggerError::Rejected { status, body });
        }

        debug!(%channel, %event, "event published");
        Ok(())
    }
}

impl Trigger for PusherClient {
    fn trigger<'a>(
        &'a self,
        channel: &'a str,
        event: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        self.publish(channel, event, payload).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> PusherConfig {
        PusherConfig {
            app_id: String::from("123"),
            key: String::from("key"),
            secret: String::from("secret"),
            cluster: String::from("eu"),
            use_tls: true,
            // Nothing listens here; every test below fails before connecting.
            host: Some(String::from("127.0.0.1:9")),
        }
    }

    #[test]
    fn cluster_host() {
        let mut config = config();
        config.host = None;
        assert_eq!(config.host(), "api-eu.pusher.com");

        let client = PusherClient::new(&config).unwrap();
        assert_eq!(client.base.0, Scheme::HTTPS);
        assert_eq!(client.base.1.as_str(), "api-eu.pusher.com");
    }

    #[test]
    fn secret_is_redacted() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn channel_names() {
        assert!(validate_channel("community-abc").is_ok());
        assert!(validate_channel("community-undefined").is_ok());
        assert!(validate_channel("a_b-c=d@e,f.g;h").is_ok());
        assert!(validate_channel("").is_err());
        assert!(validate_channel("community-a b").is_err());
        assert!(validate_channel("community-ü").is_err());
        assert!(validate_channel(&"c".repeat(MAX_CHANNEL_NAME_LEN)).is_ok());
        assert!(validate_channel(&"c".repeat(MAX_CHANNEL_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn event_names() {
        assert!(validate_event("message").is_ok());
        assert!(validate_event(&"e".repeat(MAX_EVENT_NAME_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn rejects_invalid_channel_before_sending() {
        let client = PusherClient::new(&config()).unwrap();
        let res = client
            .trigger("community-a b", "message", &json!({ "message": "hi" }))
            .await;
        assert!(matches!(res, Err(TriggerError::InvalidChannel(_))));
    }

    #[tokio::test]
    async fn rejects_oversized_payload_before_sending() {
        let client = PusherClient::new(&config()).unwrap();
        let payload = json!({ "message": "x".repeat(MAX_DATA_LEN) });
        let res = client.trigger("community-abc", "message", &payload).await;
        assert!(matches!(res, Err(TriggerError::PayloadTooLarge(_))));
    }
}
