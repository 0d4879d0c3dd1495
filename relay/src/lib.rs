#![deny(clippy::all)]
#![warn(missing_docs, nonstandard_style, rust_2018_idioms)]

//! A small HTTP relay that forwards community chat messages to a hosted
//! realtime pub/sub API. A [`RelayHandler`] is driven by a [`Trigger`]
//! implementation, normally a [`PusherClient`] built once from the
//! environment and passed in explicitly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay::{Config, PusherClient, RelayHandler};
//!
//! # async fn start() -> Result<(), relay::Err> {
//! let config = Config::from_env()?;
//! let client = PusherClient::new(&config.pusher)?;
//! let handler = RelayHandler::new(Arc::new(client));
//! relay::run(handler, config.relay.addr.as_str()).await?;
//! # Ok(())
//! # }
//! ```
use bytes::Bytes;
use headers::{ContentType, HeaderMapExt};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, env, future::Future, sync::Arc};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info, warn};

pub use crate::handler::{MessagePayload, RelayHandler, RelayRequest, ValidationError};
pub use crate::pusher::{Credentials, PusherClient, PusherConfig, Trigger, TriggerError};

/// Mechanism to provide a custom error reporting hook.
pub mod error_hook;
/// The community message relay.
pub mod handler;
/// The hosted pub/sub collaborator.
pub mod pusher;
/// Signed requests against the pub/sub HTTP API.
pub mod requests;

/// The boxed error type handlers report to the runtime.
pub type Err = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
/// A string error, which can be display
pub(crate) struct StringError(pub String);

impl std::error::Error for StringError {}

impl std::fmt::Display for StringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        self.0.fmt(f)
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! err_fmt {
    {$($t:tt)*} => {
        $crate::StringError(format!($($t)*))
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is missing or a value failed to parse.
    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),
}

fn default_addr() -> String {
    String::from("127.0.0.1:3000")
}

/// Settings for the relay's own HTTP listener, read from `RELAY_*` variables.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// The address to listen on (`RELAY_ADDR`).
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Reject requests missing a field with a 400 instead of forwarding
    /// them (`RELAY_VALIDATE`).
    #[serde(default)]
    pub validate: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            validate: false,
        }
    }
}

/// A struct containing configuration values derived from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Credentials and endpoint of the pub/sub API (`PUSHER_*`).
    pub pusher: PusherConfig,
    /// Listener settings (`RELAY_*`).
    pub relay: RelayConfig,
}

impl Config {
    /// Attempts to read configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars())
    }

    /// Reads configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let conf = Config {
            pusher: envy::prefixed("PUSHER_").from_iter(vars.clone())?,
            relay: envy::prefixed("RELAY_").from_iter(vars)?,
        };
        Ok(conf)
    }
}

/// A trait describing an asynchronous function from `Event` to `Output`.
pub trait Handler<Event, Output> {
    /// Errors returned by this handler.
    type Err: Into<Err>;
    /// The future response value of this handler.
    type Fut: Future<Output = Result<Output, Self::Err>> + Send;
    /// Process the incoming event and return the response asynchronously.
    fn call(&self, event: Event) -> Self::Fut;
}

/// A [`Handler`] over buffered HTTP requests and responses.
pub trait HttpHandler: Handler<Request<Bytes>, Response<Bytes>> {}

impl<T> HttpHandler for T where T: Handler<Request<Bytes>, Response<Bytes>> {}

/// Returns a new `HandlerFn` with the given closure.
pub fn handler_fn<Function>(f: Function) -> HandlerFn<Function> {
    HandlerFn { f }
}

/// A `Handler` implemented by a closure.
#[derive(Copy, Clone, Debug)]
pub struct HandlerFn<Function> {
    f: Function,
}

impl<Function, Event, Output, Error, Fut> Handler<Event, Output> for HandlerFn<Function>
where
    Function: Fn(Event) -> Fut,
    Error: Into<Err>,
    Fut: Future<Output = Result<Output, Error>> + Send,
{
    type Err = Error;
    type Fut = Fut;
    fn call(&self, event: Event) -> Self::Fut {
        (self.f)(event)
    }
}

pub(crate) fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Bytes>, Err> {
    let body = serde_json::to_vec(body)?;
    let mut res = Response::new(Bytes::from(body));
    *res.status_mut() = status;
    res.headers_mut().typed_insert(ContentType::json());
    Ok(res)
}

fn error_response(report: &error_hook::ErrorReport) -> Response<Bytes> {
    json_response(StatusCode::INTERNAL_SERVER_ERROR, report).unwrap_or_else(|_| {
        let mut res = Response::new(Bytes::new());
        *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        res
    })
}

/// Runs `handler` against a single request. An error returned by the handler
/// is passed through the [error hook](error_hook) and answered with a 500.
pub async fn dispatch<H>(handler: &H, req: Request<Bytes>) -> Response<Bytes>
where
    H: HttpHandler,
{
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    match handler.call(req).await {
        Ok(res) => {
            debug!(%method, %path, status = %res.status(), "request handled");
            res
        }
        Err(err) => {
            let err: Err = err.into();
            error!(%method, %path, error = %err, "handler failed");
            let report = error_hook::generate_report(err);
            error_response(&report)
        }
    }
}

async fn handle<H>(handler: &H, req: Request<Incoming>) -> Response<Full<Bytes>>
where
    H: HttpHandler,
{
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(body) => body.to_bytes(),
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            let mut res = Response::new(Full::new(Bytes::new()));
            *res.status_mut() = StatusCode::BAD_REQUEST;
            return res;
        }
    };

    dispatch(handler, Request::from_parts(parts, body))
        .await
        .map(Full::new)
}

/// Serves `handler` over HTTP/1.1 on an already bound listener. Every
/// connection runs on its own task; requests share nothing but the handler.
pub async fn serve<H>(handler: H, listener: TcpListener) -> Result<(), Err>
where
    H: HttpHandler + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let addr = listener.local_addr()?;
    info!(%addr, "relay listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, Infallible>(handle(&*handler, req).await) }
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                warn!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

/// Binds `addr` and serves `handler` on it.
///
/// # Arguments
/// * `handler` - A function or closure that conforms to the `HttpHandler` trait
/// * `addr` - The address to listen on
pub async fn run<H, A>(handler: H, addr: A) -> Result<(), Err>
where
    H: HttpHandler + Send + Sync + 'static,
    A: ToSocketAddrs,
{
    let listener = TcpListener::bind(addr).await?;
    serve(handler, listener).await
}
