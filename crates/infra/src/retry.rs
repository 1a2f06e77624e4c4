use tracing::warn;

use crate::command_dispatcher::DispatchError;

/// Re-run a whole operation while it fails with a concurrent modification.
///
/// `retries` is the number of extra attempts after the first; any other error
/// is returned immediately.
pub fn retry_on_conflict<T>(
    retries: u32,
    mut operation: impl FnMut() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let mut attempt = 0;
    loop {
        match operation() {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(attempt, error = %e, "retrying after concurrent modification");
            }
            result => return result,
        }
    }
}
