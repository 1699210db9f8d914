//! Classification of stage failures into "retry next iteration" and "abort".

use crate::rpc::RpcError;

/// True when some cause in `err`'s chain is a condition that may clear up on
/// its own (node unreachable, timed out, or still warming up).
///
/// Everything else, including errors this function does not recognise, is
/// treated as fatal.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<RpcError>()
            .is_some_and(RpcError::is_transient)
    })
}
