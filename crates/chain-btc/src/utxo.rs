use serde::{Deserialize, Serialize};

use crate::address::AddressType;
use crate::error::BtcError;

/// A single unspent transaction output (UTXO).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction ID as a hex string (display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in satoshis.
    #[serde(rename = "satoshis")]
    pub amount_sat: u64,
    /// The locking script (scriptPubKey) as hex.
    #[serde(rename = "scriptPk")]
    pub script_pubkey: String,
}

/// Result of UTXO selection: the chosen UTXOs and their aggregate value.
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    pub selected: Vec<Utxo>,
    pub total_sat: u64,
}

/// Estimate the fee for a transaction spending `num_inputs` outputs of the
/// sender's script type, with `num_outputs` outputs.
pub fn estimate_fee(
    num_inputs: usize,
    num_outputs: usize,
    fee_rate_sat_vbyte: u64,
    address_type: AddressType,
) -> u64 {
    // version + locktime + counts + (for segwit) marker/flag.
    const TX_OVERHEAD_VBYTES: u64 = 11;

    let vsize = TX_OVERHEAD_VBYTES
        + num_inputs as u64 * address_type.input_vbytes()
        + num_outputs as u64 * address_type.output_vbytes();
    vsize * fee_rate_sat_vbyte
}

/// Select UTXOs to cover `target_sat` plus the estimated fee.
///
/// Largest-first selection; the fee estimate assumes two outputs (recipient
/// plus change) and grows as inputs are added.
pub fn select_utxos(
    utxos: &[Utxo],
    target_sat: u64,
    fee_rate_sat_vbyte: u64,
    address_type: AddressType,
) -> Result<UtxoSelection, BtcError> {
    if utxos.is_empty() {
        return Err(BtcError::TransactionBuildError("no UTXOs available".into()));
    }

    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.amount_sat.cmp(&a.amount_sat));

    let mut selected: Vec<Utxo> = Vec::new();
    let mut total_sat: u64 = 0;

    for utxo in sorted {
        selected.push(utxo.clone());
        total_sat += utxo.amount_sat;

        let fee = estimate_fee(selected.len(), 2, fee_rate_sat_vbyte, address_type);
        if total_sat >= target_sat.saturating_add(fee) {
            return Ok(UtxoSelection { selected, total_sat });
        }
    }

    let fee = estimate_fee(selected.len(), 2, fee_rate_sat_vbyte, address_type);
    Err(BtcError::TransactionBuildError(format!(
        "insufficient funds: have {} sat, need {} sat (target {} + fee {})",
        total_sat,
        target_sat.saturating_add(fee),
        target_sat,
        fee,
    )))
}
