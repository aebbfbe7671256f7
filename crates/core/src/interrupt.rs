//! Cooperative interruption of a run
//!
//! A cancelled run stops at the next safe point. Branch switches always run
//! to completion; only waits on the preview server and on external tools are
//! cut short.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Fail with [`Error::Interrupted`] if `cancel` has fired
pub fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

/// Drive `fut` unless `cancel` fires first.
///
/// Dropping `fut` kills any child it was waiting on, so only pass futures
/// that may be abandoned midway.
pub async fn interruptible<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(Error::Interrupted),
    }
}
