use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random::random_array;

/// Argon2id salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Derives a 32-byte AES key from `password` and `salt` using Argon2id.
///
/// Cost parameters: 64 MiB memory, 3 iterations, 4 lanes. The output is
/// wrapped in [`Zeroizing`] so the key is wiped when the caller drops it.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_SIZE]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let params = Params::new(65536, 3, 4, Some(32))
        .map_err(|e| CryptoError::KdfFailed(format!("invalid argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, output.as_mut_slice())
        .map_err(|e| CryptoError::KdfFailed(format!("argon2 hash failed: {e}")))?;

    Ok(output)
}

/// Generates a random Argon2id salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    random_array::<SALT_SIZE>()
}
