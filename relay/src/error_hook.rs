use std::{
    mem, ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::Err;

static HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// A computer-readable report of an unhandled error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// The type of the error returned by the handler.
    pub name: String,
    /// The [std::fmt::Display] output of the error.
    pub err: String,
}

/// The report used when no hook has been registered.
pub fn default_error_hook(err: Err) -> ErrorReport {
    ErrorReport {
        name: String::from("UnknownError"),
        err: format!("{}", err),
    }
}

/// Transforms a handler error into the report sent back to the caller.
///
/// This function is called by the runtime if an error is returned from a Handler.
/// This implementation is a near-direct copy of [`std::alloc::set_alloc_error_hook`], down
/// to the transmute operation.
pub(crate) fn generate_report(err: Err) -> ErrorReport {
    let hook = HOOK.load(Ordering::SeqCst);
    let hook: fn(Err) -> ErrorReport = if hook.is_null() {
        default_error_hook
    } else {
        // SAFETY: the only non-null value ever stored is a `fn(Err) -> ErrorReport`.
        unsafe { mem::transmute::<*mut (), fn(Err) -> ErrorReport>(hook) }
    };
    hook(err)
}

/// Registers a custom error hook, replacing any that was previously registered.
///
/// The error hook is invoked when a [`Handler`](crate::Handler) returns an error, but prior
/// to the runtime answering the request with a 500. The report it returns becomes the
/// response body.
///
/// # Example
/// ```
/// use relay::error_hook::{self, ErrorReport};
/// use relay::{Err, TriggerError};
///
/// fn report(err: Err) -> ErrorReport {
///     match err.downcast_ref::<TriggerError>() {
///         Some(e) => ErrorReport {
///             name: String::from("TriggerError"),
///             err: e.to_string(),
///         },
///         None => error_hook::default_error_hook(err),
///     }
/// }
///
/// error_hook::set_error_hook(report);
/// ```
pub fn set_error_hook(hook: fn(err: Err) -> ErrorReport) {
    HOOK.store(hook as *mut (), Ordering::SeqCst);
}

#[test]
fn set_err_hook() {
    use crate::err_fmt;
    set_error_hook(|err: Err| {
        if let Some(e) = err.downcast_ref::<std::io::Error>() {
            ErrorReport {
                name: String::from("std::io::Error"),
                err: format!("{}", e),
            }
        } else {
            default_error_hook(err)
        }
    });

    let e = err_fmt!("An error");
    let e = generate_report(e.into());
    assert_eq!(String::from("UnknownError"), e.name);

    let e = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let e = generate_report(e.into());
    assert_eq!(String::from("std::io::Error"), e.name);
    assert_eq!(String::from("disk"), e.err);
}
