//! Ternary BitNet codecs `IQ1_BN` and `IQ2_BN`
//!
//! Both formats store the ternary classification
//! `q = 1 if |x| < 1e-6 else 0 if x < 0 else 2` (reconstructed value `q - 1`)
//! in 64-lane blocks without a scale.
//!
//! `IQ2_BN` spends a flat 2 bits per lane: byte `j` of a block packs lanes
//! `j`, `j+16`, `j+32`, `j+48`, low bits first.
//!
//! `IQ1_BN` packs five ternary digits per byte in radix 3: a group index
//! `idx = sum(3^j * q_j)` is stored as `ceil(256*idx/243)`, chosen so that
//! the decode `((v + (v >> 1)) >> 7) - 1` with `v = byte * k_mult[j] mod 256`
//! recovers every digit exactly. Twelve such bytes cover lanes 0..15 of each
//! 16-lane chunk three-at-a-time; the four chunk tails (lane 15 of each
//! chunk) share the `extra` byte the same way.

use super::dispatch::MatMulBackend;
use super::q8::Q8K64Row;
use super::tables::IQ1BN_VALUES;
use super::types::{BlockFormat, Iq1Bn, Iq2Bn};
use super::QK_IQ1BN;
use crate::error::{CuantizarError, Result};

/// Radix-3 digit weights, least significant first
const K_NB: [u32; 6] = [1, 3, 9, 27, 81, 243];

/// Decode multipliers: `k_mult[j] = 3^(4-j)` reduced mod 256 at use sites
const K_MULT: [u8; 5] = [81, 27, 9, 3, 1];

/// Near-zero band: values below this magnitude classify as ternary zero
const TERNARY_EPS: f32 = 1e-6;

/// Ternary class of one source value: 0 (negative), 1 (zero), 2 (positive)
#[inline]
fn ternary_class(v: f32) -> u8 {
    if v.abs() < TERNARY_EPS {
        1
    } else if v < 0.0 {
        0
    } else {
        2
    }
}

/// Store five ternary digits (or four, for `extra`) as one radix-3 byte
#[inline]
#[allow(clippy::cast_possible_truncation)]
fn pack_radix3(idx: u32) -> u8 {
    ((256 * idx + K_NB[5] - 1) / K_NB[5]) as u8
}

/// Decode digit `j` of a radix-3 packed byte back to a ternary value
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn unpack_radix3(byte: u8, j: usize) -> i8 {
    let v = u16::from(byte.wrapping_mul(K_MULT[j]));
    ((v + (v >> 1)) >> 7) as i8 - 1
}

fn validate_row(src: &[f32]) -> Result<usize> {
    if !src.len().is_multiple_of(QK_IQ1BN) {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "BN row length {} is not a multiple of block size {QK_IQ1BN}",
                src.len()
            ),
        });
    }
    Ok(src.len() / QK_IQ1BN)
}

/// Quantize one row of floats into packed `IQ1_BN` blocks.
///
/// `dst` must hold exactly `Iq1Bn::row_bytes(src.len())` bytes.
///
/// # Errors
///
/// Returns `InvalidShape` if the row length is not a multiple of 64 or the
/// destination size does not match.
pub fn quantize_row_iq1_bn_into(src: &[f32], dst: &mut [u8]) -> Result<()> {
    let nblock = validate_row(src)?;
    let expected = nblock * Iq1Bn::SUPERBLOCK_BYTES;
    if dst.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "IQ1_BN destination size {} does not match expected {expected}",
                dst.len()
            ),
        });
    }

    for (xb, block) in src
        .chunks_exact(QK_IQ1BN)
        .zip(dst.chunks_exact_mut(Iq1Bn::SUPERBLOCK_BYTES))
    {
        block.fill(0);
        let mut v13: u32 = 0;
        for i16_idx in 0..QK_IQ1BN / 16 {
            for k in 0..3 {
                let mut idx: u32 = 0;
                for j in 0..5 {
                    idx += K_NB[j] * u32::from(ternary_class(xb[16 * i16_idx + 5 * k + j]));
                }
                block[3 * i16_idx + k] = pack_radix3(idx);
            }
            v13 += K_NB[i16_idx] * u32::from(ternary_class(xb[16 * i16_idx + 15]));
        }
        block[12] = pack_radix3(v13);
    }
    Ok(())
}

/// Quantize one row of floats into packed `IQ2_BN` blocks.
///
/// # Errors
///
/// Returns `InvalidShape` if the row length is not a multiple of 64 or the
/// destination size does not match.
pub fn quantize_row_iq2_bn_into(src: &[f32], dst: &mut [u8]) -> Result<()> {
    let nblock = validate_row(src)?;
    let expected = nblock * Iq2Bn::SUPERBLOCK_BYTES;
    if dst.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "IQ2_BN destination size {} does not match expected {expected}",
                dst.len()
            ),
        });
    }

    const NJ: usize = QK_IQ1BN / 4;
    for (xb, block) in src
        .chunks_exact(QK_IQ1BN)
        .zip(dst.chunks_exact_mut(Iq2Bn::SUPERBLOCK_BYTES))
    {
        let mut classes = [0u8; QK_IQ1BN];
        for (c, &v) in classes.iter_mut().zip(xb) {
            *c = ternary_class(v);
        }
        for j in 0..NJ {
            block[j] = classes[j]
                | (classes[j + NJ] << 2)
                | (classes[j + 2 * NJ] << 4)
                | (classes[j + 3 * NJ] << 6);
        }
    }
    Ok(())
}

/// Quantize a batch of rows to `IQ1_BN`, returning the packed bytes.
///
/// # Errors
///
/// Returns `InvalidShape` when `n_per_row` is not a multiple of 64 or `src`
/// does not hold `nrows * n_per_row` values.
pub fn quantize_iq1_bn(src: &[f32], nrows: usize, n_per_row: usize) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; nrows * Iq1Bn::row_bytes(n_per_row)?];
    quantize_iq1_bn_into(src, &mut dst, nrows, n_per_row)?;
    Ok(dst)
}

/// Quantize a batch of rows to `IQ1_BN` into a caller buffer.
///
/// Returns the number of bytes written:
/// `nrows * (n_per_row / 64) * 13`.
///
/// # Errors
///
/// Same conditions as [`quantize_iq1_bn`], plus a too-small destination.
pub fn quantize_iq1_bn_into(
    src: &[f32],
    dst: &mut [u8],
    nrows: usize,
    n_per_row: usize,
) -> Result<usize> {
    batch_quantize(src, dst, nrows, n_per_row, Iq1Bn::row_bytes(n_per_row)?, quantize_row_iq1_bn_into)
}

/// Quantize a batch of rows to `IQ2_BN`, returning the packed bytes.
///
/// # Errors
///
/// Returns `InvalidShape` when `n_per_row` is not a multiple of 64 or `src`
/// does not hold `nrows * n_per_row` values.
pub fn quantize_iq2_bn(src: &[f32], nrows: usize, n_per_row: usize) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; nrows * Iq2Bn::row_bytes(n_per_row)?];
    quantize_iq2_bn_into(src, &mut dst, nrows, n_per_row)?;
    Ok(dst)
}

/// Quantize a batch of rows to `IQ2_BN` into a caller buffer.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Same conditions as [`quantize_iq2_bn`], plus a too-small destination.
pub fn quantize_iq2_bn_into(
    src: &[f32],
    dst: &mut [u8],
    nrows: usize,
    n_per_row: usize,
) -> Result<usize> {
    batch_quantize(src, dst, nrows, n_per_row, Iq2Bn::row_bytes(n_per_row)?, quantize_row_iq2_bn_into)
}

fn batch_quantize(
    src: &[f32],
    dst: &mut [u8],
    nrows: usize,
    n_per_row: usize,
    row_bytes: usize,
    row_fn: fn(&[f32], &mut [u8]) -> Result<()>,
) -> Result<usize> {
    if src.len() != nrows * n_per_row {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "source holds {} values, expected {nrows} rows x {n_per_row}",
                src.len()
            ),
        });
    }
    let total = nrows * row_bytes;
    if dst.len() < total {
        return Err(CuantizarError::InvalidShape {
            reason: format!("destination too small: need {total}, have {}", dst.len()),
        });
    }
    if total == 0 {
        return Ok(0);
    }
    for (row, out) in src
        .chunks_exact(n_per_row)
        .zip(dst.chunks_exact_mut(row_bytes))
    {
        row_fn(row, out)?;
    }
    Ok(total)
}

/// Dequantize packed `IQ1_BN` blocks back to floats.
///
/// # Errors
///
/// Returns `InvalidShape` when the data length is not a multiple of 13.
pub fn dequantize_iq1_bn(data: &[u8]) -> Result<Vec<f32>> {
    let nblock = Iq1Bn::validate_data(data)?;
    let mut out = Vec::with_capacity(nblock * QK_IQ1BN);

    for block in data.chunks_exact(Iq1Bn::SUPERBLOCK_BYTES) {
        let extra = block[12];
        for i16_idx in 0..QK_IQ1BN / 16 {
            for k in 0..3 {
                let byte = block[3 * i16_idx + k];
                for j in 0..5 {
                    out.push(f32::from(unpack_radix3(byte, j)));
                }
            }
            out.push(f32::from(unpack_radix3(extra, i16_idx)));
        }
    }
    Ok(out)
}

/// Dequantize packed `IQ2_BN` blocks back to floats.
///
/// # Errors
///
/// Returns `InvalidShape` when the data length is not a multiple of 16.
pub fn dequantize_iq2_bn(data: &[u8]) -> Result<Vec<f32>> {
    let nblock = Iq2Bn::validate_data(data)?;
    let mut out = vec![0.0f32; nblock * QK_IQ1BN];

    const NJ: usize = QK_IQ1BN / 4;
    let (d1, d2, d3, d4) = (1.0f32, 0.25f32, 0.0625f32, 0.015_625_f32);
    let m = -1.0f32;
    for (block, y) in data
        .chunks_exact(Iq2Bn::SUPERBLOCK_BYTES)
        .zip(out.chunks_exact_mut(QK_IQ1BN))
    {
        for j in 0..NJ {
            y[j] = d1 * f32::from(block[j] & 0x03) + m;
            y[j + NJ] = d2 * f32::from(block[j] & 0x0c) + m;
            y[j + 2 * NJ] = d3 * f32::from(block[j] & 0x30) + m;
            y[j + 3 * NJ] = d4 * f32::from(block[j] & 0xc0) + m;
        }
    }
    Ok(out)
}

fn validate_dot_lanes(format: &str, weight_lanes: usize, activations: &Q8K64Row) -> Result<()> {
    if activations.len() != weight_lanes {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "{format} dot: activation length {} doesn't match weight lanes {weight_lanes}",
                activations.len()
            ),
        });
    }
    Ok(())
}

/// Fused `IQ1_BN` x `Q8_K64` dot product (scalar kernel).
///
/// # Errors
///
/// Returns `InvalidShape` on block-size or length mismatches.
pub fn fused_iq1bn_q8k64_dot(weights: &[u8], activations: &Q8K64Row) -> Result<f32> {
    fused_iq1bn_q8k64_dot_with(&super::dispatch::ScalarBackend, weights, activations)
}

/// Fused `IQ1_BN` x `Q8_K64` dot product, offering the work to an external
/// backend before falling back to the scalar kernel.
///
/// The weight blocks are walked in outer tiles of 32 so the eight paired-lane
/// accumulators stay within i16 range (|sum| <= 32*8*127 = 32512 per tile).
///
/// # Errors
///
/// Returns `InvalidShape` on block-size or length mismatches.
#[allow(clippy::cast_precision_loss)]
pub fn fused_iq1bn_q8k64_dot_with(
    backend: &dyn MatMulBackend,
    weights: &[u8],
    activations: &Q8K64Row,
) -> Result<f32> {
    let nblock = Iq1Bn::validate_data(weights)?;
    validate_dot_lanes("IQ1_BN", nblock * QK_IQ1BN, activations)?;

    if let Some(s) = backend.iq1bn_q8k64_dot(weights, activations) {
        return Ok(s);
    }

    let q8 = &activations.qs;
    let mut sumi = [0i32; 8];
    let mut q1 = [0i8; 16];
    let mut q8_pos = 0usize;

    let mut ii = 0;
    while ii < nblock {
        let nb = (ii + 32).min(nblock);
        let mut sum16 = [0i16; 8];
        for i in ii..nb {
            let block = &weights[Iq1Bn::SUPERBLOCK_BYTES * i..Iq1Bn::SUPERBLOCK_BYTES * (i + 1)];
            let extra_row = &IQ1BN_VALUES[5 * block[12] as usize..5 * block[12] as usize + 5];
            for i16_idx in 0..QK_IQ1BN / 16 {
                for k in 0..3 {
                    let q = block[3 * i16_idx + k] as usize;
                    q1[5 * k..5 * k + 5].copy_from_slice(&IQ1BN_VALUES[5 * q..5 * q + 5]);
                }
                q1[15] = extra_row[i16_idx];
                // Eight paired products per 16-lane chunk; 256 products of
                // magnitude <= 127 per 32-block tile keep i16 exact.
                for j in 0..8 {
                    sum16[j] += i16::from(q8[q8_pos + 2 * j]) * i16::from(q1[2 * j])
                        + i16::from(q8[q8_pos + 2 * j + 1]) * i16::from(q1[2 * j + 1]);
                }
                q8_pos += 16;
            }
        }
        for (acc, &s) in sumi.iter_mut().zip(sum16.iter()) {
            *acc += i32::from(s);
        }
        ii = nb;
    }

    let d = &activations.d;
    Ok(d[0] * (sumi[0] + sumi[1]) as f32
        + d[1] * (sumi[2] + sumi[3]) as f32
        + d[2] * (sumi[4] + sumi[5]) as f32
        + d[3] * (sumi[6] + sumi[7]) as f32)
}

/// Fused `IQ2_BN` x `Q8_K64` dot product (scalar kernel).
///
/// # Errors
///
/// Returns `InvalidShape` on block-size or length mismatches.
pub fn fused_iq2bn_q8k64_dot(weights: &[u8], activations: &Q8K64Row) -> Result<f32> {
    fused_iq2bn_q8k64_dot_with(&super::dispatch::ScalarBackend, weights, activations)
}

/// Fused `IQ2_BN` x `Q8_K64` dot product, offering the work to an external
/// backend before falling back to the scalar kernel.
///
/// Accumulates the masked 2-bit fields without shifting, then folds the bit
/// positions out with the `1, 1/4, 1/16, 1/64` weights; the `- sum0` term
/// removes the `+1` class bias in one pass.
///
/// # Errors
///
/// Returns `InvalidShape` on block-size or length mismatches.
#[allow(clippy::cast_precision_loss)]
pub fn fused_iq2bn_q8k64_dot_with(
    backend: &dyn MatMulBackend,
    weights: &[u8],
    activations: &Q8K64Row,
) -> Result<f32> {
    let nblock = Iq2Bn::validate_data(weights)?;
    validate_dot_lanes("IQ2_BN", nblock * QK_IQ1BN, activations)?;

    if let Some(s) = backend.iq2bn_q8k64_dot(weights, activations) {
        return Ok(s);
    }

    const NJ: usize = QK_IQ1BN / 4;
    let mut sum = [0i32; 16];
    let mut sum0 = [0i32; 4];

    for (i, block) in weights.chunks_exact(Iq2Bn::SUPERBLOCK_BYTES).enumerate() {
        let q8 = &activations.qs[QK_IQ1BN * i..QK_IQ1BN * (i + 1)];
        for j in 0..NJ / 4 {
            for l in 0..4 {
                let p = 4 * j + l;
                sum[4 * j] += i32::from(q8[p]) * i32::from(block[p] & 0x03);
                sum[4 * j + 1] += i32::from(q8[p + NJ]) * i32::from(block[p] & 0x0c);
                sum[4 * j + 2] += i32::from(q8[p + 2 * NJ]) * i32::from(block[p] & 0x30);
                sum[4 * j + 3] += i32::from(q8[p + 3 * NJ]) * i32::from(block[p] & 0xc0);
                sum0[j] += i32::from(q8[p])
                    + i32::from(q8[p + NJ])
                    + i32::from(q8[p + 2 * NJ])
                    + i32::from(q8[p + 3 * NJ]);
            }
        }
    }

    let mut sumf = 0.0f32;
    for j in 0..4 {
        sumf += activations.d[j]
            * (sum[4 * j] as f32 + 0.25 * sum[4 * j + 1] as f32
                + 0.0625 * sum[4 * j + 2] as f32
                + 0.015_625 * sum[4 * j + 3] as f32
                - sum0[j] as f32);
    }
    Ok(sumf)
}
