use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};

use crate::error::CryptoError;
use crate::random::random_array;

/// AES-256-GCM IV (nonce) size in bytes.
pub const IV_SIZE: usize = 12;

/// Generates a random 12-byte IV.
pub fn generate_iv() -> [u8; IV_SIZE] {
    random_array::<IV_SIZE>()
}

/// Encrypts `plaintext` under `key` with the caller-supplied `iv`.
///
/// The IV is NOT prepended; the vault stores it as a separate field next to
/// the ciphertext and salt. The returned bytes are ciphertext plus the
/// 16-byte GCM authentication tag.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Decrypts data produced by [`encrypt`] with the same `key` and `iv`.
///
/// Fails if the authentication tag does not verify (wrong key, wrong IV, or
/// tampered ciphertext).
pub fn decrypt(ciphertext: &[u8], key: &[u8; 32], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < 16 {
        return Err(CryptoError::InvalidInput(format!(
            "ciphertext too short: expected at least 16 bytes, got {}",
            ciphertext.len()
        )));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = (i * 7) as u8;
        }
        key
    }

    #[test]
    fn roundtrip() {
        let key = test_key();
        let iv = generate_iv();

        let ct = encrypt(b"keyring secrets", &key, &iv).unwrap();
        let pt = decrypt(&ct, &key, &iv).unwrap();

        assert_eq!(pt, b"keyring secrets");
    }

    #[test]
    fn ciphertext_carries_only_the_tag_overhead() {
        let key = test_key();
        let iv = generate_iv();

        let ct = encrypt(b"abcd", &key, &iv).unwrap();
        assert_eq!(ct.len(), 4 + 16);
    }

    #[test]
    fn same_iv_same_output() {
        let key = test_key();
        let iv = [0x11u8; IV_SIZE];

        let a = encrypt(b"deterministic", &key, &iv).unwrap();
        let b = encrypt(b"deterministic", &key, &iv).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_iv_fails() {
        let key = test_key();
        let iv = generate_iv();
        let mut other_iv = iv;
        other_iv[0] ^= 0xff;

        let ct = encrypt(b"secret", &key, &iv).unwrap();
        assert!(decrypt(&ct, &key, &other_iv).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let mut wrong = test_key();
        wrong[31] ^= 0x01;
        let iv = generate_iv();

        let ct = encrypt(b"secret", &key, &iv).unwrap();
        let result = decrypt(&ct, &wrong, &iv);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let iv = generate_iv();

        let mut ct = encrypt(b"tamper target", &key, &iv).unwrap();
        ct[0] ^= 0xff;
        assert!(decrypt(&ct, &key, &iv).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = test_key();
        let iv = generate_iv();
        let result = decrypt(&[0u8; 7], &key, &iv);
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }
}
