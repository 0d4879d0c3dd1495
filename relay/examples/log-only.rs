use futures::future::{self, BoxFuture, FutureExt};
use relay::{Err, RelayHandler, Trigger, TriggerError};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Logs every event instead of publishing it. Useful for exercising the
/// relay locally without pub/sub credentials.
struct LogTrigger;

impl Trigger for LogTrigger {
    fn trigger<'a>(
        &'a self,
        channel: &'a str,
        event: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        info!(%channel, %event, %payload, "trigger");
        future::ready(Ok(())).boxed()
    }
}

#[tokio::main]
async fn main() -> Result<(), Err> {
    tracing_subscriber::fmt().init();
    let handler = RelayHandler::new(Arc::new(LogTrigger));
    relay::run(handler, "127.0.0.1:3000").await
}
