//! Error taxonomy shared by the mainchain and sidechain clients.
//!
//! `Unavailable` and `Rejected` describe a node that is not (yet) able to
//! answer and are retried by the driver on the next iteration.
//! `InvalidResponse` means the node answered successfully with something the
//! orchestrator cannot interpret, which is never fixed by waiting.

use jsonrpsee::core::client::Error as JsonRpcError;
use std::fmt;

#[derive(Debug)]
pub enum RpcError {
    Unavailable { method: String, detail: String },
    Rejected { method: String, code: i64, message: String },
    InvalidResponse { method: String, detail: String },
}

impl RpcError {
    pub fn unavailable(method: impl Into<String>, detail: impl fmt::Display) -> Self {
        RpcError::Unavailable {
            method: method.into(),
            detail: detail.to_string(),
        }
    }

    pub fn invalid(method: impl Into<String>, detail: impl fmt::Display) -> Self {
        RpcError::InvalidResponse {
            method: method.into(),
            detail: detail.to_string(),
        }
    }

    pub fn timed_out(method: impl Into<String>) -> Self {
        Self::unavailable(method, "request timed out")
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Unavailable { .. } | RpcError::Rejected { .. }
        )
    }

    pub fn method(&self) -> &str {
        match self {
            RpcError::Unavailable { method, .. }
            | RpcError::Rejected { method, .. }
            | RpcError::InvalidResponse { method, .. } => method,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Unavailable { method, detail } => {
                write!(f, "rpc {method} is unavailable: {detail}")
            }
            RpcError::Rejected {
                method,
                code,
                message,
            } => write!(f, "rpc {method} was rejected (code={code}, message={message})"),
            RpcError::InvalidResponse { method, detail } => {
                write!(f, "rpc {method} returned an unexpected response: {detail}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

pub(crate) fn map_client_error(method: &str, err: JsonRpcError) -> RpcError {
    match err {
        JsonRpcError::Call(object) => RpcError::Rejected {
            method: method.to_owned(),
            code: i64::from(object.code()),
            message: object.message().to_owned(),
        },
        JsonRpcError::ParseError(err) => RpcError::invalid(method, err),
        JsonRpcError::RequestTimeout => RpcError::timed_out(method),
        other => RpcError::unavailable(method, other),
    }
}
