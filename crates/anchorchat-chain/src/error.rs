use thiserror::Error;

/// JSON-RPC transport failures.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid rpc response: {0}")]
    Decode(String),

    #[error("rpc call timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ChainError {
    /// The ledger could not be reached or did not answer in time.
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// The ledger answered but refused the transaction.
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("message {0} not found on chain")]
    NotFound(String),

    #[error("undecodable chain data: {0}")]
    Decode(String),
}

impl From<RpcError> for ChainError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Transport(e) => Self::Unavailable(e.to_string()),
            RpcError::Timeout => Self::Unavailable("rpc call timed out".into()),
            RpcError::Rpc { code, message } => Self::Rejected(format!("{code}: {message}")),
            RpcError::Decode(msg) => Self::Decode(msg),
        }
    }
}

impl From<crate::abi::AbiError> for ChainError {
    fn from(err: crate::abi::AbiError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// EIP-1193 provider errors, keyed on the standard error codes.
#[derive(Debug, Error)]
pub enum WalletError {
    /// 4001
    #[error("request rejected by user")]
    Rejected,

    /// 4902
    #[error("network is not registered in the wallet")]
    UnknownChain,

    /// -32002
    #[error("a wallet request is already pending")]
    Pending,

    /// -32601
    #[error("wallet does not support {0}")]
    Unsupported(String),

    #[error("wallet error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("wallet unreachable: {0}")]
    Transport(String),
}

impl WalletError {
    pub fn from_rpc(err: RpcError, method: &str) -> Self {
        match err {
            RpcError::Rpc { code: 4001, .. } => Self::Rejected,
            RpcError::Rpc { code: 4902, .. } => Self::UnknownChain,
            RpcError::Rpc { code: -32002, .. } => Self::Pending,
            RpcError::Rpc { code: -32601, .. } => Self::Unsupported(method.to_string()),
            RpcError::Rpc { code, message } => Self::Provider { code, message },
            RpcError::Decode(message) => Self::Provider { code: 0, message },
            RpcError::Transport(e) => Self::Transport(e.to_string()),
            RpcError::Timeout => Self::Transport("request timed out".into()),
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}
