use bitcoin::absolute::LockTime;
use bitcoin::address::Address;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Psbt, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::address::AddressType;
use crate::error::BtcError;
use crate::network::BtcNetwork;
use crate::utxo::{estimate_fee, select_utxos, Utxo};

/// Outputs below this value are treated as dust and folded into the fee.
const DUST_THRESHOLD_SAT: u64 = 546;

/// A payment to build and sign from the sender's UTXO set.
#[derive(Debug, Clone)]
pub struct Payment {
    pub to: String,
    pub amount_sat: u64,
    pub change_address: String,
    pub fee_rate_sat_vbyte: u64,
    /// When set, the fee is deducted from the payment amount instead of
    /// being added on top of it.
    pub receiver_to_pay_fee: bool,
}

/// An unsigned transaction plus the prevouts its inputs spend.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub tx: Transaction,
    pub prevouts: Vec<TxOut>,
}

impl UnsignedTx {
    /// Wrap into a PSBT with `witness_utxo` populated for every input.
    pub fn into_psbt(self) -> Result<Psbt, BtcError> {
        let prevouts = self.prevouts;
        let mut psbt = Psbt::from_unsigned_tx(self.tx)
            .map_err(|e| BtcError::PsbtError(format!("from unsigned tx: {e}")))?;
        for (input, prevout) in psbt.inputs.iter_mut().zip(prevouts) {
            input.witness_utxo = Some(prevout);
        }
        Ok(psbt)
    }
}

fn parse_checked(address: &str, network: BtcNetwork, what: &str) -> Result<Address, BtcError> {
    address
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("invalid {what} address: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| BtcError::InvalidAddress(format!("{what} address wrong network: {e}")))
}

/// Build an unsigned payment transaction from the supplied UTXOs.
///
/// Selection is largest-first over `utxos`; a change output back to
/// `change_address` is added when the remainder exceeds the dust threshold.
/// In `receiver_to_pay_fee` mode the recipient output is reduced by the fee,
/// so the selection only has to cover the nominal amount.
pub fn build_payment(
    utxos: &[Utxo],
    payment: &Payment,
    address_type: AddressType,
    network: BtcNetwork,
) -> Result<UnsignedTx, BtcError> {
    let recipient = parse_checked(&payment.to, network, "recipient")?;
    let change = parse_checked(&payment.change_address, network, "change")?;

    // When the receiver pays the fee it comes out of the amount, so the
    // selection only has to cover the nominal amount (fee rate 0 disables
    // the running estimate select_utxos adds on top).
    let selection_fee_rate = if payment.receiver_to_pay_fee {
        0
    } else {
        payment.fee_rate_sat_vbyte
    };
    let selection = select_utxos(utxos, payment.amount_sat, selection_fee_rate, address_type)?;

    let mut inputs = Vec::with_capacity(selection.selected.len());
    let mut prevouts = Vec::with_capacity(selection.selected.len());

    for utxo in &selection.selected {
        let txid: Txid = utxo
            .txid
            .parse()
            .map_err(|e| BtcError::TransactionBuildError(format!("invalid txid: {e}")))?;
        let script = hex::decode(&utxo.script_pubkey)
            .map_err(|e| BtcError::TransactionBuildError(format!("invalid scriptPk hex: {e}")))?;

        inputs.push(TxIn {
            previous_output: OutPoint::new(txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        prevouts.push(TxOut {
            value: Amount::from_sat(utxo.amount_sat),
            script_pubkey: ScriptBuf::from(script),
        });
    }

    let fee = estimate_fee(
        selection.selected.len(),
        2,
        payment.fee_rate_sat_vbyte,
        address_type,
    );

    let (recipient_sat, change_sat) = if payment.receiver_to_pay_fee {
        let recipient_sat = payment
            .amount_sat
            .checked_sub(fee)
            .filter(|v| *v > DUST_THRESHOLD_SAT)
            .ok_or_else(|| {
                BtcError::TransactionBuildError(format!(
                    "amount {} sat does not cover the fee of {} sat",
                    payment.amount_sat, fee
                ))
            })?;
        (recipient_sat, selection.total_sat - payment.amount_sat)
    } else {
        (
            payment.amount_sat,
            selection
                .total_sat
                .saturating_sub(payment.amount_sat + fee),
        )
    };

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(recipient_sat),
        script_pubkey: recipient.script_pubkey(),
    }];
    if change_sat > DUST_THRESHOLD_SAT {
        outputs.push(TxOut {
            value: Amount::from_sat(change_sat),
            script_pubkey: change.script_pubkey(),
        });
    }

    Ok(UnsignedTx {
        tx: Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        },
        prevouts,
    })
}

/// Sign an unsigned payment with a single key and return the raw
/// consensus-serialized transaction.
///
/// All inputs must be controlled by `secret_key` under `address_type`.
pub fn sign_payment(
    unsigned: UnsignedTx,
    secret_key: &SecretKey,
) -> Result<Vec<u8>, BtcError> {
    let secp = Secp256k1::new();
    let mut psbt = unsigned.into_psbt()?;

    let signed = crate::psbt::sign_inputs(&mut psbt, secret_key, &secp)?;
    if signed != psbt.inputs.len() {
        return Err(BtcError::SigningError(format!(
            "signed {signed} of {} inputs; key does not control the rest",
            psbt.inputs.len()
        )));
    }

    let tx = crate::psbt::finalize(&psbt)?;
    Ok(bitcoin::consensus::serialize(&tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{derive_address, script_pubkey_for};

    fn key() -> SecretKey {
        SecretKey::from_slice(&[0x42; 32]).unwrap()
    }

    fn own_utxos(address_type: AddressType, amounts: &[u64]) -> Vec<Utxo> {
        let secp = Secp256k1::new();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &key());
        let spk = script_pubkey_for(&secp, &pk, address_type);
        amounts
            .iter()
            .enumerate()
            .map(|(i, sat)| Utxo {
                txid: format!("{:064x}", i + 1),
                vout: 0,
                amount_sat: *sat,
                script_pubkey: hex::encode(spk.as_bytes()),
            })
            .collect()
    }

    fn own_address(address_type: AddressType) -> String {
        let secp = Secp256k1::new();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &key());
        derive_address(&secp, &pk, address_type, BtcNetwork::Testnet).unwrap()
    }

    fn payment_to_self(address_type: AddressType, amount_sat: u64, receiver_pays: bool) -> Payment {
        Payment {
            to: own_address(address_type),
            amount_sat,
            change_address: own_address(address_type),
            fee_rate_sat_vbyte: 2,
            receiver_to_pay_fee: receiver_pays,
        }
    }

    #[test]
    fn sender_pays_fee_keeps_amount_intact() {
        let ty = AddressType::P2wpkh;
        let utxos = own_utxos(ty, &[100_000]);
        let unsigned =
            build_payment(&utxos, &payment_to_self(ty, 50_000, false), ty, BtcNetwork::Testnet)
                .unwrap();

        assert_eq!(unsigned.tx.output[0].value.to_sat(), 50_000);
        assert_eq!(unsigned.tx.output.len(), 2);
    }

    #[test]
    fn receiver_pays_fee_reduces_recipient_output() {
        let ty = AddressType::P2wpkh;
        let utxos = own_utxos(ty, &[100_000]);
        let unsigned =
            build_payment(&utxos, &payment_to_self(ty, 50_000, true), ty, BtcNetwork::Testnet)
                .unwrap();

        assert!(unsigned.tx.output[0].value.to_sat() < 50_000);
        // Change is everything above the nominal amount.
        assert_eq!(unsigned.tx.output[1].value.to_sat(), 50_000);
    }

    #[test]
    fn receiver_pays_fee_rejects_amount_below_fee() {
        let ty = AddressType::P2wpkh;
        let utxos = own_utxos(ty, &[100_000]);
        let mut payment = payment_to_self(ty, 300, true);
        payment.fee_rate_sat_vbyte = 10;
        assert!(build_payment(&utxos, &payment, ty, BtcNetwork::Testnet).is_err());
    }

    #[test]
    fn dust_change_is_folded_into_fee() {
        let ty = AddressType::P2wpkh;
        let utxos = own_utxos(ty, &[100_000]);
        let mut payment = payment_to_self(ty, 99_600, false);
        payment.fee_rate_sat_vbyte = 1;
        let unsigned = build_payment(&utxos, &payment, ty, BtcNetwork::Testnet).unwrap();
        assert_eq!(unsigned.tx.output.len(), 1);
    }

    #[test]
    fn wrong_network_recipient_is_rejected() {
        let ty = AddressType::P2wpkh;
        let utxos = own_utxos(ty, &[100_000]);
        let mut payment = payment_to_self(ty, 10_000, false);
        payment.to = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into();
        assert!(build_payment(&utxos, &payment, ty, BtcNetwork::Testnet).is_err());
    }

    #[test]
    fn signs_fully_for_every_address_type() {
        for ty in [
            AddressType::P2pkh,
            AddressType::P2wpkh,
            AddressType::P2shP2wpkh,
            AddressType::P2tr,
        ] {
            let utxos = own_utxos(ty, &[80_000, 40_000]);
            let unsigned = build_payment(
                &utxos,
                &payment_to_self(ty, 100_000, false),
                ty,
                BtcNetwork::Testnet,
            )
            .unwrap();

            let raw = sign_payment(unsigned, &key()).unwrap();
            let tx: Transaction = bitcoin::consensus::deserialize(&raw).unwrap();
            assert_eq!(tx.input.len(), 2, "type {ty}");
            for input in &tx.input {
                let has_witness = !input.witness.is_empty();
                let has_script_sig = !input.script_sig.is_empty();
                assert!(has_witness || has_script_sig, "unsigned input for {ty}");
            }
        }
    }

    #[test]
    fn foreign_utxo_fails_signing() {
        let ty = AddressType::P2wpkh;
        let mut utxos = own_utxos(ty, &[80_000]);
        // A script the key does not control.
        utxos.push(Utxo {
            txid: format!("{:064x}", 99),
            vout: 1,
            amount_sat: 80_000,
            script_pubkey: format!("0014{}", "cd".repeat(20)),
        });
        let unsigned =
            build_payment(&utxos, &payment_to_self(ty, 120_000, false), ty, BtcNetwork::Testnet)
                .unwrap();
        assert!(sign_payment(unsigned, &key()).is_err());
    }
}
