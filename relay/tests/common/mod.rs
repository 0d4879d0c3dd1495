#![allow(dead_code)]

use futures::future::{self, BoxFuture, FutureExt};
use http::StatusCode;
use relay::{Trigger, TriggerError};
use serde_json::Value;
use std::sync::Mutex;

/// One recorded trigger call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// A `Trigger` that records every call and optionally fails it.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    calls: Mutex<Vec<Call>>,
    fail: bool,
}

impl RecordingTrigger {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Trigger for RecordingTrigger {
    fn trigger<'a>(
        &'a self,
        channel: &'a str,
        event: &'a str,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        self.calls.lock().unwrap().push(Call {
            channel: channel.to_owned(),
            event: event.to_owned(),
            payload: payload.clone(),
        });

        let res = if self.fail {
            Err(TriggerError::Rejected {
                status: StatusCode::UNAUTHORIZED,
                body: String::from("Invalid signature"),
            })
        } else {
            Ok(())
        };
        future::ready(res).boxed()
    }
}
