//! Transaction size and fee estimation for a funding transaction carrying an OP_RETURN payload.

use serde::Serialize;

use crate::Error;

/// Standard dust threshold in satoshis.
pub const DUST_LIMIT: u64 = 546;

/// Single-signature witness input, in vbytes.
pub const INPUT_VBYTES: u64 = 68;
/// Witness output, in vbytes.
pub const OUTPUT_VBYTES: u64 = 31;

/// Fixed overhead of 10.5 vbytes, kept in weight units so rounding happens once.
const OVERHEAD_WEIGHT: u64 = 42;
const WITNESS_SCALE: u64 = 4;

/// Bitcoin compact-size encoding length.
pub fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// value (8) + script length (1) + OP_RETURN (1) + push length + payload.
pub fn op_return_output_vbytes(payload_len: u64) -> Option<u64> {
    (8 + 1 + 1 + compact_size_len(payload_len)).checked_add(payload_len)
}

/// Fails with `Config` when the counts are too large to describe a transaction.
pub fn estimate_virtual_size(input_count: u64, output_count: u64, payload_len: u64) -> Result<u64, Error> {
    let vbytes = input_count
        .checked_mul(INPUT_VBYTES)
        .zip(output_count.checked_mul(OUTPUT_VBYTES))
        .and_then(|(inputs, outputs)| inputs.checked_add(outputs))
        .zip(op_return_output_vbytes(payload_len))
        .and_then(|(io, data)| io.checked_add(data))
        .and_then(|vbytes| vbytes.checked_mul(WITNESS_SCALE))
        .and_then(|weight| weight.checked_add(OVERHEAD_WEIGHT))
        .ok_or_else(|| {
            Error::Config(format!(
                "Transaction too large: {} inputs, {} outputs, {} byte payload",
                input_count, output_count, payload_len
            ))
        })?;
    Ok(vbytes.div_ceil(WITNESS_SCALE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FundingPlan {
    pub vsize: u64,
    pub fee: u64,
    pub change_amount: u64,
}

/// `ceil(vsize * fee_rate)` sats.
pub fn estimate_fee(vsize: u64, fee_rate: f64) -> u64 {
    (vsize as f64 * fee_rate).ceil() as u64
}

/// Fee and change for spending `utxo_total` sats at `fee_rate` sat/vB.
pub fn plan_funding(utxo_total: u64, fee_rate: f64, vsize: u64) -> Result<FundingPlan, Error> {
    if !fee_rate.is_finite() || fee_rate < 0.0 {
        return Err(Error::Config(format!("Invalid fee rate: {}", fee_rate)));
    }

    let fee = estimate_fee(vsize, fee_rate);
    let change = i128::from(utxo_total) - i128::from(fee);
    if change < i128::from(DUST_LIMIT) {
        return Err(Error::BelowDustLimit {
            change: i64::try_from(change).unwrap_or(i64::MIN),
        });
    }

    Ok(FundingPlan {
        vsize,
        fee,
        change_amount: utxo_total - fee,
    })
}

pub fn plan_for_payload(
    payload_len: u64,
    input_count: u64,
    output_count: u64,
    utxo_total: u64,
    fee_rate: f64,
) -> Result<FundingPlan, Error> {
    let vsize = estimate_virtual_size(input_count, output_count, payload_len)?;
    plan_funding(utxo_total, fee_rate, vsize)
}
