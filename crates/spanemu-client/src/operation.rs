use crate::traits::LongRunning;
use crate::types::Operation;
use crate::ClientError;
use std::time::Duration;
use tracing::debug;

const INITIAL_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_millis(500);

/// Poll `op` until it is done. A finished operation carrying an error status
/// becomes [`ClientError::Operation`].
pub fn wait_operation<C>(client: &C, op: Operation) -> Result<Operation, ClientError>
where
    C: LongRunning + ?Sized,
{
    let mut op = op;
    let mut delay = INITIAL_POLL;
    while !op.done {
        std::thread::sleep(delay);
        delay = next_delay(delay);
        op = client.get_operation(&op.name)?;
    }
    if let Some(status) = op.failed() {
        return Err(ClientError::Operation {
            name: op.name.clone(),
            code: status.code,
            message: status.message.clone(),
        });
    }
    debug!("operation {} done", op.name);
    Ok(op)
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_POLL)
}
