use thiserror::Error;

/// Daemon-level error taxonomy.
///
/// Every gateway, vault, and keyring failure surfaces as one of these; the
/// wire edge adds the provider-style numeric code from [`WalletdError::code`].
#[derive(Debug, Error)]
pub enum WalletdError {
    #[error("method not found")]
    MethodNotFound,

    #[error("chain disconnected")]
    ChainDisconnected,

    #[error("site not connected")]
    Disconnected,

    #[error("user rejected the request")]
    UserRejectedRequest,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("keyring does not support account export")]
    UnsupportedExportAccount,

    #[error("keyring does not support personal message signing")]
    UnsupportedSignPersonalMessage,

    #[error("Invalid keyring index")]
    InvalidKeyringIndex,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("password required")]
    PasswordRequired,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("no session found")]
    NoSession,
}

impl WalletdError {
    /// EIP-1193-style provider code used at the serialization edge.
    pub fn code(&self) -> i32 {
        match self {
            WalletdError::MethodNotFound => -32601,
            WalletdError::InvalidParams(_) => -32602,
            WalletdError::UserRejectedRequest => 4001,
            WalletdError::UnsupportedExportAccount
            | WalletdError::UnsupportedSignPersonalMessage => 4200,
            WalletdError::Disconnected | WalletdError::NoSession => 4900,
            WalletdError::ChainDisconnected => 4901,
            WalletdError::PasswordRequired | WalletdError::DecryptionFailed => 4100,
            WalletdError::Internal(_)
            | WalletdError::InvalidKeyringIndex
            | WalletdError::WalletNotFound => -32603,
        }
    }
}

impl From<wallet_keyring::KeyringError> for WalletdError {
    fn from(e: wallet_keyring::KeyringError) -> Self {
        use wallet_keyring::KeyringError as K;
        match e {
            K::UnsupportedExportAccount => WalletdError::UnsupportedExportAccount,
            K::UnsupportedSignPersonalMessage => WalletdError::UnsupportedSignPersonalMessage,
            K::AccountNotFound(_) => WalletdError::WalletNotFound,
            K::AccountOutOfRange(_) => WalletdError::InvalidKeyringIndex,
            other => WalletdError::Internal(other.to_string()),
        }
    }
}

impl From<crypto_utils::CryptoError> for WalletdError {
    fn from(e: crypto_utils::CryptoError) -> Self {
        match e {
            crypto_utils::CryptoError::DecryptionFailed(_) => WalletdError::DecryptionFailed,
            other => WalletdError::Internal(other.to_string()),
        }
    }
}

impl From<chain_btc::BtcError> for WalletdError {
    fn from(e: chain_btc::BtcError) -> Self {
        WalletdError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for WalletdError {
    fn from(e: serde_json::Error) -> Self {
        WalletdError::InvalidParams(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_index_error_has_exact_message() {
        assert_eq!(WalletdError::InvalidKeyringIndex.to_string(), "Invalid keyring index");
    }

    #[test]
    fn user_rejection_maps_to_4001() {
        assert_eq!(WalletdError::UserRejectedRequest.code(), 4001);
        assert_eq!(WalletdError::Disconnected.code(), 4900);
        assert_eq!(WalletdError::ChainDisconnected.code(), 4901);
        assert_eq!(WalletdError::MethodNotFound.code(), -32601);
    }

    #[test]
    fn keyring_capability_errors_pass_through() {
        let err: WalletdError = wallet_keyring::KeyringError::UnsupportedExportAccount.into();
        assert!(matches!(err, WalletdError::UnsupportedExportAccount));

        let err: WalletdError = wallet_keyring::KeyringError::AccountOutOfRange(9).into();
        assert!(matches!(err, WalletdError::InvalidKeyringIndex));
    }

    #[test]
    fn wrong_password_maps_to_decryption_failed() {
        let err: WalletdError =
            crypto_utils::CryptoError::DecryptionFailed("tag mismatch".into()).into();
        assert!(matches!(err, WalletdError::DecryptionFailed));
    }
}
