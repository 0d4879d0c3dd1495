use relay::{
    error_hook::{self, ErrorReport},
    Config, Err, PusherClient, RelayHandler, TriggerError,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Err> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    info!(
        app_id = %config.pusher.app_id,
        host = %config.pusher.host(),
        validate = config.relay.validate,
        "starting relay"
    );

    let client = PusherClient::new(&config.pusher)?;
    let handler = RelayHandler::new(Arc::new(client)).validating(config.relay.validate);
    error_hook::set_error_hook(report);

    tokio::select! {
        res = relay::run(handler, config.relay.addr.as_str()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

fn report(err: Err) -> ErrorReport {
    match err.downcast_ref::<TriggerError>() {
        Some(e) => ErrorReport {
            name: String::from("TriggerError"),
            err: e.to_string(),
        },
        None => error_hook::default_error_hook(err),
    }
}
