use thiserror::Error;

/// Bitcoin chain operation errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("psbt error: {0}")]
    PsbtError(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let err = BtcError::TransactionBuildError("insufficient funds".into());
        assert_eq!(
            err.to_string(),
            "transaction build error: insufficient funds"
        );

        let err = BtcError::PsbtError("malformed input map".into());
        assert_eq!(err.to_string(), "psbt error: malformed input map");
    }

    #[test]
    fn implements_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(BtcError::SigningError("test".into()));
        assert!(err.to_string().contains("test"));
    }
}
