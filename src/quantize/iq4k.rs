//! `IQ4_K` codec: 4-bit nonlinear codebook with per-16-lane signed scales
//!
//! Each 256-lane super-block stores an f16 scale `d`, sixteen 6-bit signed
//! sub-scales (`l - 32`), a 16-bit `extra` word selecting the baseline or
//! shifted codebook per sub-block, and 128 bytes of packed 4-bit indices.
//!
//! The codebook is asymmetric (not centered at zero), which makes both the
//! magnitude and the *sign* of each sub-scale meaningful: the quantizer
//! searches candidate scales of both polarities over both codebook variants
//! and keeps the pair maximizing the weighted projection figure of merit
//! `sumqx^2 / sumq2`.

use super::dispatch::MatMulBackend;
use super::tables::{best_index_iq4nl, IQ4K_VALUES};
use super::types::{BlockFormat, Iq4K};
use super::{nearest_int, read_f16, write_f16, QK_K};
use crate::error::{CuantizarError, Result};

/// Sub-block size: one 6-bit scale and one codebook flag per 16 lanes
const BLOCK_SIZE: usize = 16;

/// Candidate-scale sweep radius in the per-sub-block search
const NTRY: i32 = 7;

fn subblock_weights(xs: &[f32], qw: Option<&[f32]>, sigma2: f32, weight: &mut [f32; BLOCK_SIZE]) {
    match qw {
        Some(qw) => {
            for j in 0..BLOCK_SIZE {
                weight[j] = qw[j] * (sigma2 + xs[j] * xs[j]).sqrt();
            }
        }
        None => {
            for j in 0..BLOCK_SIZE {
                weight[j] = xs[j] * xs[j];
            }
        }
    }
}

/// Accumulate the weighted projection sums for candidate inverse scale `id`,
/// for both polarities at once.
fn projection_sums(
    values: &[i8],
    xs: &[f32],
    weight: &[f32; BLOCK_SIZE],
    id: f32,
) -> (f32, f32, f32, f32) {
    let mut sumqx_p = 0.0f32;
    let mut sumq2_p = 0.0f32;
    let mut sumqx_m = 0.0f32;
    let mut sumq2_m = 0.0f32;
    for j in 0..BLOCK_SIZE {
        let w = weight[j];
        let al = id * xs[j];
        let q = f32::from(values[best_index_iq4nl(values, al)]);
        sumqx_p += w * q * xs[j];
        sumq2_p += w * q * q;
        let q = f32::from(values[best_index_iq4nl(values, -al)]);
        sumqx_m += w * q * xs[j];
        sumq2_m += w * q * q;
    }
    (sumqx_p, sumq2_p, sumqx_m, sumq2_m)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize_superblock(xb: &[f32], qw: Option<&[f32]>, out: &mut [u8]) {
    debug_assert_eq!(xb.len(), QK_K);
    debug_assert_eq!(out.len(), Iq4K::SUPERBLOCK_BYTES);

    out.fill(0);

    let values = &IQ4K_VALUES[..16];
    let shifted_values = &IQ4K_VALUES[16..32];

    let mut sumx2 = 0.0f32;
    for &x in xb {
        sumx2 += x * x;
    }
    let sigma2 = 2.0 * sumx2 / QK_K as f32;

    let mut weight = [0.0f32; BLOCK_SIZE];
    let mut scales = [0.0f32; QK_K / BLOCK_SIZE];
    let mut extra: u16 = 0;
    let mut max_abs_scale = 0.0f32;
    let mut max_scale = 0.0f32;

    for ib in 0..QK_K / BLOCK_SIZE {
        let xs = &xb[ib * BLOCK_SIZE..(ib + 1) * BLOCK_SIZE];
        subblock_weights(xs, qw.map(|q| &q[ib * BLOCK_SIZE..(ib + 1) * BLOCK_SIZE]), sigma2, &mut weight);

        let mut amax = 0.0f32;
        let mut max = 0.0f32;
        for &x in xs {
            let ax = x.abs();
            if ax > amax {
                amax = ax;
                max = x;
            }
        }
        if amax == 0.0 {
            scales[ib] = 0.0;
            continue;
        }

        // Seed from the absolute-max lane, both polarities on the baseline
        // codebook. The negative-polarity seed is evaluated here even though
        // the sweep below may overwrite it.
        let d0 = -max / f32::from(values[0]);
        let (sumqx_p, sumq2_p, sumqx_m, sumq2_m) =
            projection_sums(values, xs, &weight, 1.0 / d0);
        let mut d = sumqx_p / sumq2_p;
        let mut best = d * sumqx_p;
        let mut is_shifted = false;
        if sumq2_m > 0.0 && sumqx_m * sumqx_m > best * sumq2_m {
            d = sumqx_m / sumq2_m;
            best = d * sumqx_m;
        }

        for itry in -NTRY..=NTRY {
            let id = (itry as f32 + f32::from(values[0])) / max;
            let (sumqx_p, sumq2_p, sumqx_m, sumq2_m) = projection_sums(values, xs, &weight, id);
            if sumq2_p > 0.0 && sumqx_p * sumqx_p > best * sumq2_p {
                d = sumqx_p / sumq2_p;
                best = d * sumqx_p;
                is_shifted = false;
            }
            if sumq2_m > 0.0 && sumqx_m * sumqx_m > best * sumq2_m {
                d = sumqx_m / sumq2_m;
                best = d * sumqx_m;
                is_shifted = false;
            }
            let id = (itry as f32 + f32::from(shifted_values[0])) / max;
            let (sumqx_p, sumq2_p, sumqx_m, sumq2_m) =
                projection_sums(shifted_values, xs, &weight, id);
            if sumq2_p > 0.0 && sumqx_p * sumqx_p > best * sumq2_p {
                d = sumqx_p / sumq2_p;
                best = d * sumqx_p;
                is_shifted = true;
            }
            if sumq2_m > 0.0 && sumqx_m * sumqx_m > best * sumq2_m {
                d = sumqx_m / sumq2_m;
                best = d * sumqx_m;
                is_shifted = true;
            }
        }

        scales[ib] = d;
        if is_shifted {
            extra |= 1 << ib;
        }
        let abs_d = d.abs();
        if abs_d > max_abs_scale {
            max_abs_scale = abs_d;
            max_scale = d;
        }
    }

    let d_super = -max_scale / 32.0;
    let id = if d_super == 0.0 { 0.0 } else { 1.0 / d_super };

    let mut indices = [0u8; QK_K];
    let mut sumqx = 0.0f32;
    let mut sumq2 = 0.0f32;

    let (header, qs) = out.split_at_mut(16);
    for ib in 0..QK_K / BLOCK_SIZE {
        let block_values = if extra & (1 << ib) != 0 {
            shifted_values
        } else {
            values
        };
        let l = nearest_int(id * scales[ib]).clamp(-32, 31);
        let dl = d_super * l as f32;
        let idl = if dl == 0.0 { 0.0 } else { 1.0 / dl };

        let xs = &xb[ib * BLOCK_SIZE..(ib + 1) * BLOCK_SIZE];
        subblock_weights(xs, qw.map(|q| &q[ib * BLOCK_SIZE..(ib + 1) * BLOCK_SIZE]), sigma2, &mut weight);
        for j in 0..BLOCK_SIZE {
            let idx = best_index_iq4nl(block_values, idl * xs[j]);
            indices[ib * BLOCK_SIZE + j] = idx as u8;
            let q = f32::from(block_values[idx]) * l as f32;
            sumqx += weight[j] * q * xs[j];
            sumq2 += weight[j] * q * q;
        }

        let ls = (l + 32) as u8;
        if ib % 2 == 0 {
            header[8 + ib / 2] = ls & 0xf;
        } else {
            header[8 + ib / 2] |= (ls & 0xf) << 4;
        }
        header[4 + ib / 4] |= (ls >> 4) << (2 * (ib % 4));
    }

    for g in 0..QK_K / 32 {
        for j in 0..BLOCK_SIZE {
            qs[16 * g + j] = indices[32 * g + j] | (indices[32 * g + 16 + j] << 4);
        }
    }

    header[2..4].copy_from_slice(&extra.to_le_bytes());
    let d_final = if sumq2 > 0.0 { sumqx / sumq2 } else { d_super };
    write_f16(header, d_final);
}

fn validate_row(src: &[f32], imatrix: Option<&[f32]>) -> Result<usize> {
    if !src.len().is_multiple_of(QK_K) {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "IQ4_K row length {} is not a multiple of super-block size {QK_K}",
                src.len()
            ),
        });
    }
    if let Some(qw) = imatrix {
        if qw.len() != src.len() {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "importance matrix length {} doesn't match row length {}",
                    qw.len(),
                    src.len()
                ),
            });
        }
    }
    Ok(src.len() / QK_K)
}

/// Quantize one row of floats into packed `IQ4_K` super-blocks.
///
/// `imatrix`, when given, supplies one importance weight per lane of the row.
///
/// # Errors
///
/// Returns `InvalidShape` if the row length is not a multiple of 256, the
/// importance matrix length differs from the row, or the destination size
/// does not match.
pub fn quantize_row_iq4_k_into(src: &[f32], dst: &mut [u8], imatrix: Option<&[f32]>) -> Result<()> {
    let nblock = validate_row(src, imatrix)?;
    let expected = nblock * Iq4K::SUPERBLOCK_BYTES;
    if dst.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "IQ4_K destination size {} does not match expected {expected}",
                dst.len()
            ),
        });
    }
    for (ib, (xb, out)) in src
        .chunks_exact(QK_K)
        .zip(dst.chunks_exact_mut(Iq4K::SUPERBLOCK_BYTES))
        .enumerate()
    {
        quantize_superblock(xb, imatrix.map(|q| &q[ib * QK_K..(ib + 1) * QK_K]), out);
    }
    Ok(())
}

/// Quantize a batch of rows to `IQ4_K`, returning the packed bytes.
///
/// The importance matrix, when given, covers one row and is shared across
/// all rows.
///
/// # Errors
///
/// Returns `InvalidShape` on any length mismatch.
pub fn quantize_iq4_k(
    src: &[f32],
    nrows: usize,
    n_per_row: usize,
    imatrix: Option<&[f32]>,
) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; nrows * Iq4K::row_bytes(n_per_row)?];
    quantize_iq4_k_into(src, &mut dst, nrows, n_per_row, imatrix)?;
    Ok(dst)
}

/// Quantize a batch of rows to `IQ4_K` into a caller buffer.
///
/// Returns the number of bytes written:
/// `nrows * (n_per_row / 256) * 144`.
///
/// # Errors
///
/// Returns `InvalidShape` on any length mismatch or a too-small destination.
pub fn quantize_iq4_k_into(
    src: &[f32],
    dst: &mut [u8],
    nrows: usize,
    n_per_row: usize,
    imatrix: Option<&[f32]>,
) -> Result<usize> {
    let row_bytes = Iq4K::row_bytes(n_per_row)?;
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
        quantize_row_iq4_k_into(row, out, imatrix)?;
    }
    Ok(total)
}

/// Dequantize packed `IQ4_K` super-blocks back to floats.
///
/// # Errors
///
/// Returns `InvalidShape` when the data length is not a multiple of 144.
#[allow(clippy::cast_precision_loss)]
pub fn dequantize_iq4_k(data: &[u8]) -> Result<Vec<f32>> {
    let nblock = Iq4K::validate_data(data)?;
    let mut out = vec![0.0f32; nblock * QK_K];

    for (block, y) in data
        .chunks_exact(Iq4K::SUPERBLOCK_BYTES)
        .zip(out.chunks_exact_mut(QK_K))
    {
        let d = read_f16(block);
        let mut extra = u16::from_le_bytes([block[2], block[3]]);
        let scales_h = &block[4..8];
        let scales_l = &block[8..16];
        let qs = &block[16..144];

        for ib32 in 0..QK_K / 32 {
            let sh = scales_h[ib32 / 2] >> (4 * (ib32 % 2));
            let ls1 = i32::from(scales_l[ib32] & 0xf | ((sh << 4) & 0x30)) - 32;
            let ls2 = i32::from(scales_l[ib32] >> 4 | ((sh << 2) & 0x30)) - 32;
            let dl1 = d * ls1 as f32;
            let dl2 = d * ls2 as f32;
            let values1 = &IQ4K_VALUES[16 * (extra & 1) as usize..][..16];
            let values2 = &IQ4K_VALUES[16 * ((extra >> 1) & 1) as usize..][..16];
            extra >>= 2;
            for j in 0..16 {
                let q = qs[16 * ib32 + j];
                y[32 * ib32 + j] = dl1 * f32::from(values1[(q & 0xf) as usize]);
                y[32 * ib32 + 16 + j] = dl2 * f32::from(values2[(q >> 4) as usize]);
            }
        }
    }
    Ok(out)
}

/// Fused `IQ4_K` x `Q8_K` dot product (scalar kernel).
///
/// # Errors
///
/// Returns `InvalidShape` on block-size or length mismatches.
pub fn fused_iq4k_q8k_dot(weights: &[u8], q8_scales: &[f32], q8_quants: &[i8]) -> Result<f32> {
    fused_iq4k_q8k_dot_with(&super::dispatch::ScalarBackend, weights, q8_scales, q8_quants)
}

/// Fused `IQ4_K` x `Q8_K` dot product, offering the work to an external
/// backend before falling back to the scalar kernel.
///
/// The high-nibble codebook offset is `8 * (extra & 2)`: the raw bit
/// pattern (0 or 2) yields the same 0/16 offset as the dequantizer's
/// bit-indexed form.
///
/// # Errors
///
/// Returns `InvalidShape` on block-size or length mismatches.
#[allow(clippy::cast_precision_loss)]
pub fn fused_iq4k_q8k_dot_with(
    backend: &dyn MatMulBackend,
    weights: &[u8],
    q8_scales: &[f32],
    q8_quants: &[i8],
) -> Result<f32> {
    let nblock = Iq4K::validate_data(weights)?;
    validate_q8k(Iq4K::FORMAT_ID, nblock, q8_scales, q8_quants)?;

    if let Some(s) = backend.iq4k_q8k_dot(weights, q8_scales, q8_quants) {
        return Ok(s);
    }

    let mut sumf = 0.0f32;
    for (ibl, block) in weights.chunks_exact(Iq4K::SUPERBLOCK_BYTES).enumerate() {
        let d4d8 = read_f16(block) * q8_scales[ibl];
        let mut extra = u16::from_le_bytes([block[2], block[3]]);
        let mut h = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
        let scales_l = &block[8..16];
        let qs = &block[16..144];
        let q8 = &q8_quants[ibl * QK_K..(ibl + 1) * QK_K];

        let mut sum = 0i32;
        for ib in 0..QK_K / 32 {
            let ls1 = (i32::from(scales_l[ib] & 0xf) | ((h << 4) & 0x30) as i32) - 32;
            let ls2 = (i32::from(scales_l[ib] >> 4) | ((h << 2) & 0x30) as i32) - 32;
            h >>= 4;
            let values1 = &IQ4K_VALUES[16 * (extra & 1) as usize..][..16];
            let values2 = &IQ4K_VALUES[8 * (extra & 2) as usize..][..16];
            extra >>= 2;
            let mut sumi1 = 0i32;
            let mut sumi2 = 0i32;
            for j in 0..16 {
                let q = qs[16 * ib + j];
                sumi1 += i32::from(q8[32 * ib + j]) * i32::from(values1[(q & 0xf) as usize]);
                sumi2 += i32::from(q8[32 * ib + 16 + j]) * i32::from(values2[(q >> 4) as usize]);
            }
            sum += ls1 * sumi1 + ls2 * sumi2;
        }
        sumf += d4d8 * sum as f32;
    }
    Ok(sumf)
}

pub(crate) fn validate_q8k(
    format: &str,
    nblock: usize,
    q8_scales: &[f32],
    q8_quants: &[i8],
) -> Result<()> {
    if q8_scales.len() < nblock {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "{format} dot: Q8_K scales count {} < expected {nblock}",
                q8_scales.len()
            ),
        });
    }
    if q8_quants.len() < nblock * QK_K {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "{format} dot: Q8_K quants count {} < expected {}",
                q8_quants.len(),
                nblock * QK_K
            ),
        });
    }
    Ok(())
}
