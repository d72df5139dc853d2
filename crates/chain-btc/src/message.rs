use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::hashes::{sha256, sha256d, Hash, HashEngine};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::error::BtcError;

const MESSAGE_PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";

fn push_compact_size(engine: &mut sha256::HashEngine, len: u64) {
    if len < 0xfd {
        engine.input(&[len as u8]);
    } else if len <= 0xffff {
        engine.input(&[0xfd]);
        engine.input(&(len as u16).to_le_bytes());
    } else if len <= 0xffff_ffff {
        engine.input(&[0xfe]);
        engine.input(&(len as u32).to_le_bytes());
    } else {
        engine.input(&[0xff]);
        engine.input(&len.to_le_bytes());
    }
}

/// Double-SHA256 digest of a message under the standard signed-message
/// envelope (prefix + compact-size length + body).
pub fn message_digest(message: &[u8]) -> [u8; 32] {
    let mut engine = sha256d::Hash::engine();
    engine.input(MESSAGE_PREFIX);
    push_compact_size(&mut engine, message.len() as u64);
    engine.input(message);
    sha256d::Hash::from_engine(engine).to_byte_array()
}

/// Sign a raw 32-byte digest, returning the 65-byte compact recoverable
/// signature (compressed-key header) encoded as base64.
pub fn sign_digest(digest: [u8; 32], secret_key: &SecretKey) -> Result<String, BtcError> {
    let secp = Secp256k1::new();
    let signature = secp.sign_ecdsa_recoverable(&Message::from_digest(digest), secret_key);

    let (recovery_id, compact) = signature.serialize_compact();
    let mut out = [0u8; 65];
    // 27 = uncompressed base, +4 marks a compressed public key.
    out[0] = 27 + recovery_id.to_i32() as u8 + 4;
    out[1..].copy_from_slice(&compact);

    Ok(BASE64.encode(out))
}

/// Sign a message under the standard signed-message envelope, in the base64
/// format wallets and verifiers exchange.
pub fn sign_message(message: &[u8], secret_key: &SecretKey) -> Result<String, BtcError> {
    sign_digest(message_digest(message), secret_key)
}

/// Verify a base64 signed-message signature against `pubkey`.
pub fn verify_message(
    message: &[u8],
    signature_b64: &str,
    pubkey: &PublicKey,
) -> Result<bool, BtcError> {
    let bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| BtcError::SigningError(format!("invalid base64 signature: {e}")))?;
    if bytes.len() != 65 {
        return Err(BtcError::SigningError(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }

    let recovery_id = RecoveryId::from_i32(((bytes[0] as i32) - 27) & 0x03)
        .map_err(|e| BtcError::SigningError(format!("invalid recovery id: {e}")))?;
    let signature = RecoverableSignature::from_compact(&bytes[1..], recovery_id)
        .map_err(|e| BtcError::SigningError(format!("invalid signature: {e}")))?;

    let secp = Secp256k1::new();
    let digest = Message::from_digest(message_digest(message));
    let recovered = secp
        .recover_ecdsa(&digest, &signature)
        .map_err(|e| BtcError::SigningError(format!("recovery failed: {e}")))?;

    Ok(recovered == *pubkey)
}
