use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("no account for address {0}")]
    AccountNotFound(String),

    #[error("account index {0} out of range")]
    AccountOutOfRange(u32),

    #[error("keyring does not support account export")]
    UnsupportedExportAccount,

    #[error("keyring does not support personal message signing")]
    UnsupportedSignPersonalMessage,

    #[error("invalid serialized keyring: {0}")]
    InvalidSerializedForm(String),

    #[error(transparent)]
    Btc(#[from] chain_btc::BtcError),
}
