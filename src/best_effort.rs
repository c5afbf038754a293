use std::fmt::Debug;
use std::future::Future;

/// Runs a fallible step whose failure must not abort the surrounding operation.
///
/// Failures are logged at debug level and turned into `None`.
pub(crate) fn attempt<T, E: Debug>(what: &str, step: impl FnOnce() -> Result<T, E>) -> Option<T> {
    match step() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(?err, "{what} failed");
            None
        }
    }
}

pub(crate) async fn attempt_async<T, E: Debug>(
    what: &str,
    step: impl Future<Output = Result<T, E>>,
) -> Option<T> {
    match step.await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(?err, "{what} failed");
            None
        }
    }
}
