//! Moving synchronous work (driver calls, store scans) off the async
//! workers.

use crate::error::ConductorError;

/// Run `f` on the blocking pool under the caller's tracing dispatcher.
/// `f` runs to completion even if the returned future is dropped.
pub(crate) async fn on_blocking_pool<R>(
    f: impl FnOnce() -> R + Send + 'static,
) -> Result<R, ConductorError>
where
    R: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    tokio::task::spawn_blocking(move || tracing::dispatcher::with_default(&dispatch, f))
        .await
        .map_err(|err| ConductorError::Worker(err.to_string()))
}
