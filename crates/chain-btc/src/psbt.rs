use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::script::{PushBytesBuf, ScriptBuf};
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot;
use bitcoin::{CompressedPublicKey, Psbt, Transaction, TxOut, Witness};

use crate::error::BtcError;

/// The output an input spends, from `witness_utxo` or `non_witness_utxo`.
fn spent_output(psbt: &Psbt, index: usize) -> Result<TxOut, BtcError> {
    let input = &psbt.inputs[index];
    if let Some(out) = &input.witness_utxo {
        return Ok(out.clone());
    }
    if let Some(prev_tx) = &input.non_witness_utxo {
        let vout = psbt.unsigned_tx.input[index].previous_output.vout as usize;
        return prev_tx.output.get(vout).cloned().ok_or_else(|| {
            BtcError::PsbtError(format!("input {index}: prevout index out of range"))
        });
    }
    Err(BtcError::PsbtError(format!(
        "input {index}: missing utxo information"
    )))
}

/// The ECDSA sighash flag for an input, or `None` if the input demands a
/// flag this signer cannot produce.
fn ecdsa_sighash_type(input: &bitcoin::psbt::Input) -> Option<EcdsaSighashType> {
    match input.sighash_type {
        None => Some(EcdsaSighashType::All),
        Some(ty) => ty.ecdsa_hash_ty().ok(),
    }
}

fn taproot_sighash_type(input: &bitcoin::psbt::Input) -> Option<TapSighashType> {
    match input.sighash_type {
        None => Some(TapSighashType::Default),
        Some(ty) => ty.taproot_hash_ty().ok(),
    }
}

/// Sign every PSBT input that `secret_key` controls and whose sighash type
/// is compatible, leaving all other inputs untouched.
///
/// Recognizes the key under all four supported script types. ECDSA
/// signatures land in `partial_sigs`; taproot key-spend signatures land in
/// `tap_key_sig` (with `tap_internal_key` set). Returns the number of
/// inputs signed. Key material never leaves this function.
pub fn sign_inputs(
    psbt: &mut Psbt,
    secret_key: &SecretKey,
    secp: &Secp256k1<All>,
) -> Result<usize, BtcError> {
    let pubkey = secret_key.public_key(secp);
    let compressed = CompressedPublicKey(pubkey);
    let full_pk = bitcoin::PublicKey::new(pubkey);
    let keypair = Keypair::from_secret_key(secp, secret_key);
    let (xonly, _) = pubkey.x_only_public_key();

    let p2wpkh_spk = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
    let p2pkh_spk = ScriptBuf::new_p2pkh(&full_pk.pubkey_hash());
    let p2sh_spk = ScriptBuf::new_p2sh(&p2wpkh_spk.script_hash());
    let p2tr_spk = ScriptBuf::new_p2tr(secp, xonly, None);

    // Taproot sighashes commit to every spent output.
    let spent: Vec<Option<TxOut>> = (0..psbt.inputs.len())
        .map(|i| spent_output(psbt, i).ok())
        .collect();
    let all_prevouts: Option<Vec<TxOut>> = spent.iter().cloned().collect();

    let unsigned_tx = psbt.unsigned_tx.clone();
    let mut cache = SighashCache::new(&unsigned_tx);

    let mut signed = 0usize;
    for index in 0..psbt.inputs.len() {
        let Some(spent) = spent[index].clone() else {
            continue;
        };
        let spk = &spent.script_pubkey;

        if *spk == p2wpkh_spk || *spk == p2sh_spk {
            let Some(sighash_type) = ecdsa_sighash_type(&psbt.inputs[index]) else {
                continue;
            };
            let sighash = cache
                .p2wpkh_signature_hash(index, &p2wpkh_spk, spent.value, sighash_type)
                .map_err(|e| BtcError::SigningError(format!("segwit sighash: {e}")))?;
            let signature =
                secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), secret_key);

            let input = &mut psbt.inputs[index];
            if *spk == p2sh_spk {
                input.redeem_script = Some(p2wpkh_spk.clone());
            }
            input.partial_sigs.insert(
                full_pk,
                ecdsa::Signature {
                    signature,
                    sighash_type,
                },
            );
            signed += 1;
        } else if *spk == p2pkh_spk {
            let Some(sighash_type) = ecdsa_sighash_type(&psbt.inputs[index]) else {
                continue;
            };
            let sighash = cache
                .legacy_signature_hash(index, &p2pkh_spk, sighash_type.to_u32())
                .map_err(|e| BtcError::SigningError(format!("legacy sighash: {e}")))?;
            let signature =
                secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), secret_key);
            psbt.inputs[index].partial_sigs.insert(
                full_pk,
                ecdsa::Signature {
                    signature,
                    sighash_type,
                },
            );
            signed += 1;
        } else if *spk == p2tr_spk {
            let Some(sighash_type) = taproot_sighash_type(&psbt.inputs[index]) else {
                continue;
            };
            let Some(prevouts) = &all_prevouts else {
                return Err(BtcError::PsbtError(
                    "taproot signing requires utxo information for every input".into(),
                ));
            };
            let sighash = cache
                .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts), sighash_type)
                .map_err(|e| BtcError::SigningError(format!("taproot sighash: {e}")))?;
            let tweaked = keypair.tap_tweak(secp, None);
            let signature = secp.sign_schnorr(
                &Message::from_digest(sighash.to_byte_array()),
                &tweaked.to_inner(),
            );

            let input = &mut psbt.inputs[index];
            input.tap_internal_key = Some(xonly);
            input.tap_key_sig = Some(taproot::Signature {
                signature,
                sighash_type,
            });
            signed += 1;
        }
    }

    Ok(signed)
}

/// DER signature + sighash flag byte, as pushed in witnesses and
/// script_sigs.
fn ecdsa_sig_bytes(sig: &ecdsa::Signature) -> Vec<u8> {
    let mut bytes = sig.signature.serialize_der().to_vec();
    bytes.push(sig.sighash_type as u8);
    bytes
}

/// 64-byte Schnorr signature, plus the sighash byte unless it is the
/// implicit default.
fn taproot_sig_bytes(sig: &taproot::Signature) -> Vec<u8> {
    let mut bytes = sig.signature.as_ref().to_vec();
    if sig.sighash_type != TapSighashType::Default {
        bytes.push(sig.sighash_type as u8);
    }
    bytes
}

/// Assemble the final transaction from a fully signed PSBT.
///
/// Supports the same four single-key script types as [`sign_inputs`]. Fails
/// if any input carries no signature.
pub fn finalize(psbt: &Psbt) -> Result<Transaction, BtcError> {
    let mut tx = psbt.unsigned_tx.clone();

    for (index, input) in psbt.inputs.iter().enumerate() {
        let spent = spent_output(psbt, index)?;
        let spk = &spent.script_pubkey;

        if let Some(signature) = &input.tap_key_sig {
            tx.input[index].witness = Witness::from_slice(&[taproot_sig_bytes(signature)]);
        } else if let Some((pk, sig)) = input.partial_sigs.iter().next() {
            if spk.is_p2wpkh() {
                tx.input[index].witness =
                    Witness::from_slice(&[ecdsa_sig_bytes(sig), pk.to_bytes()]);
            } else if spk.is_p2sh() {
                let redeem = input.redeem_script.clone().ok_or_else(|| {
                    BtcError::PsbtError(format!("input {index}: p2sh input missing redeem script"))
                })?;
                tx.input[index].witness =
                    Witness::from_slice(&[ecdsa_sig_bytes(sig), pk.to_bytes()]);
                let push = PushBytesBuf::try_from(redeem.into_bytes())
                    .map_err(|_| BtcError::PsbtError("redeem script too long".into()))?;
                tx.input[index].script_sig = ScriptBuf::builder().push_slice(push).into_script();
            } else if spk.is_p2pkh() {
                let sig_push = PushBytesBuf::try_from(ecdsa_sig_bytes(sig))
                    .map_err(|_| BtcError::PsbtError("oversized signature".into()))?;
                let pk_push = PushBytesBuf::try_from(pk.to_bytes())
                    .map_err(|_| BtcError::PsbtError("oversized public key".into()))?;
                tx.input[index].script_sig = ScriptBuf::builder()
                    .push_slice(sig_push)
                    .push_slice(pk_push)
                    .into_script();
            } else {
                return Err(BtcError::PsbtError(format!(
                    "input {index}: unsupported script type"
                )));
            }
        } else {
            return Err(BtcError::PsbtError(format!(
                "input {index}: no signature to finalize"
            )));
        }
    }

    Ok(tx)
}
