use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Derives a child of `parent` that is additionally cancelled once `timeout` elapses.
///
/// The timer task exits as soon as the child is cancelled by either route, so
/// callers cancel the child (or hold a `drop_guard()` of it) when the scoped work ends.
pub fn child_with_timeout(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let child = parent.child_token();
    let timer = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    child
}
