use crate::encryption::{self, IV_SIZE};
use crate::error::CryptoError;
use crate::kdf::{self, SALT_SIZE};
use crate::zeroizing::ZeroizingBytes;

/// A password-sealed blob: ciphertext plus the IV and KDF salt needed to
/// open it again. This is the exact shape the vault persists as its `enc`
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// AES-256-GCM ciphertext + tag.
    pub data: Vec<u8>,
    /// GCM nonce.
    pub iv: [u8; IV_SIZE],
    /// Argon2id salt.
    pub salt: [u8; SALT_SIZE],
}

/// Seals `plaintext` under `password`: fresh salt, Argon2id key, fresh IV,
/// AES-256-GCM.
pub fn seal(plaintext: &[u8], password: &[u8]) -> Result<Sealed, CryptoError> {
    let salt = kdf::generate_salt();
    let key = kdf::derive_key(password, &salt)?;
    let iv = encryption::generate_iv();

    let data = encryption::encrypt(plaintext, &key, &iv)?;

    Ok(Sealed { data, iv, salt })
}

/// Opens a [`Sealed`] blob with `password`.
///
/// The plaintext comes back in a [`ZeroizingBytes`] wrapper since sealed
/// content is always secret material.
pub fn open(sealed: &Sealed, password: &[u8]) -> Result<ZeroizingBytes, CryptoError> {
    let key = kdf::derive_key(password, &sealed.salt)?;
    let plaintext = encryption::decrypt(&sealed.data, &key, &sealed.iv)?;
    Ok(ZeroizingBytes::new(plaintext))
}
