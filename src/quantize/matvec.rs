//! Row-parallel fused matrix-vector products
//!
//! The activation vector is quantized once (`Q8_K64` for the BN formats,
//! `Q8_K` for the IQ*_K formats); each output row is then one fused dot
//! product over packed weight bytes. Validation and parallel dispatch are
//! format-independent and live here; the per-row kernels stay in the codec
//! modules.
//!
//! Tuning constants:
//!
//! - `PARALLEL_THRESHOLD = 256`: below this output dimension the sequential
//!   path avoids rayon overhead
//! - `MIDI_TILE_M = 64`: output rows per parallel work unit (L2 reuse)

use super::bn::{fused_iq1bn_q8k64_dot, fused_iq2bn_q8k64_dot};
use super::iq2k::fused_iq2k_q8k_dot;
use super::iq4k::fused_iq4k_q8k_dot;
use super::q8::Q8K64Row;
use super::types::{BlockFormat, Iq1Bn, Iq2Bn, Iq2K, Iq4K};
use super::QK_K;
use crate::error::{CuantizarError, Result};

/// Use the sequential path below this output dimension
const PARALLEL_THRESHOLD: usize = 256;

/// Output rows per parallel work unit (L2 cache reuse)
const MIDI_TILE_M: usize = 64;

/// Format-independent outer loop: one fused dot per output row.
fn parallel_matvec_rows<F, D>(
    weight_data: &[u8],
    in_dim: usize,
    out_dim: usize,
    output: &mut [f32],
    dot_fn: D,
) -> Result<()>
where
    F: BlockFormat,
    D: Fn(&[u8]) -> Result<f32> + Sync,
{
    let bytes_per_row = F::row_bytes(in_dim)?;

    let expected_weight_bytes = out_dim * bytes_per_row;
    if weight_data.len() < expected_weight_bytes {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "{} weight data too small: need {expected_weight_bytes} bytes for {out_dim}x{in_dim}, have {}",
                F::FORMAT_ID,
                weight_data.len()
            ),
        });
    }
    if output.len() < out_dim {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Output buffer too small: need {out_dim}, have {}",
                output.len()
            ),
        });
    }

    if out_dim < PARALLEL_THRESHOLD {
        for (o, out) in output[..out_dim].iter_mut().enumerate() {
            let row = &weight_data[o * bytes_per_row..(o + 1) * bytes_per_row];
            *out = dot_fn(row).unwrap_or(0.0);
        }
    } else {
        use rayon::prelude::*;

        output[..out_dim]
            .par_chunks_mut(MIDI_TILE_M)
            .enumerate()
            .for_each(|(midi_idx, midi_chunk)| {
                let midi_start = midi_idx * MIDI_TILE_M;
                for (local_idx, out) in midi_chunk.iter_mut().enumerate() {
                    let row = midi_start + local_idx;
                    let row_data = &weight_data[row * bytes_per_row..(row + 1) * bytes_per_row];
                    *out = dot_fn(row_data).unwrap_or(0.0);
                }
            });
    }

    Ok(())
}

fn validate_q8k64_activations(in_dim: usize, activations: &Q8K64Row) -> Result<()> {
    if activations.len() != in_dim {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Activation length {} doesn't match in_dim {in_dim}",
                activations.len()
            ),
        });
    }
    Ok(())
}

fn validate_q8k_activations(in_dim: usize, scales: &[f32], quants: &[i8]) -> Result<()> {
    if quants.len() < in_dim || scales.len() < in_dim.div_ceil(QK_K) {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Q8_K activations too small for in_dim {in_dim}: {} scales, {} quants",
                scales.len(),
                quants.len()
            ),
        });
    }
    Ok(())
}

/// Fused `IQ1_BN` matrix-vector multiply into a pre-allocated buffer.
///
/// # Errors
///
/// Returns `InvalidShape` when buffer sizes don't match the dimensions.
pub fn fused_iq1bn_matvec_into(
    weight_data: &[u8],
    activations: &Q8K64Row,
    in_dim: usize,
    out_dim: usize,
    output: &mut [f32],
) -> Result<()> {
    validate_q8k64_activations(in_dim, activations)?;
    parallel_matvec_rows::<Iq1Bn, _>(weight_data, in_dim, out_dim, output, |row| {
        fused_iq1bn_q8k64_dot(row, activations)
    })
}

/// Fused `IQ2_BN` matrix-vector multiply into a pre-allocated buffer.
///
/// # Errors
///
/// Returns `InvalidShape` when buffer sizes don't match the dimensions.
pub fn fused_iq2bn_matvec_into(
    weight_data: &[u8],
    activations: &Q8K64Row,
    in_dim: usize,
    out_dim: usize,
    output: &mut [f32],
) -> Result<()> {
    validate_q8k64_activations(in_dim, activations)?;
    parallel_matvec_rows::<Iq2Bn, _>(weight_data, in_dim, out_dim, output, |row| {
        fused_iq2bn_q8k64_dot(row, activations)
    })
}

/// Fused `IQ4_K` matrix-vector multiply into a pre-allocated buffer.
///
/// Activations are `Q8_K`-quantized once by the caller (see
/// [`super::q8::quantize_activations_q8k_into`]) and shared across rows.
///
/// # Errors
///
/// Returns `InvalidShape` when buffer sizes don't match the dimensions.
pub fn fused_iq4k_matvec_into(
    weight_data: &[u8],
    q8_scales: &[f32],
    q8_quants: &[i8],
    in_dim: usize,
    out_dim: usize,
    output: &mut [f32],
) -> Result<()> {
    validate_q8k_activations(in_dim, q8_scales, q8_quants)?;
    parallel_matvec_rows::<Iq4K, _>(weight_data, in_dim, out_dim, output, |row| {
        fused_iq4k_q8k_dot(row, q8_scales, q8_quants)
    })
}

/// Fused `IQ2_K` matrix-vector multiply into a pre-allocated buffer.
///
/// # Errors
///
/// Returns `InvalidShape` when buffer sizes don't match the dimensions.
pub fn fused_iq2k_matvec_into(
    weight_data: &[u8],
    q8_scales: &[f32],
    q8_quants: &[i8],
    in_dim: usize,
    out_dim: usize,
    output: &mut [f32],
) -> Result<()> {
    validate_q8k_activations(in_dim, q8_scales, q8_quants)?;
    parallel_matvec_rows::<Iq2K, _>(weight_data, in_dim, out_dim, output, |row| {
        fused_iq2k_q8k_dot(row, q8_scales, q8_quants)
    })
}

#[cfg(test)]
mod tests {
    use super::super::bn::quantize_iq2_bn;
    use super::super::iq4k::quantize_iq4_k;
    use super::super::q8::quantize_activations_q8k_into;
    use super::*;

    #[test]
    fn test_iq2bn_matvec_matches_per_row_dots() {
        let in_dim = 128;
        let out_dim = 5;
        let weights: Vec<f32> = (0..in_dim * out_dim)
            .map(|i| [-1.0f32, 0.0, 1.0, 1.0][i % 4])
            .collect();
        let packed = quantize_iq2_bn(&weights, out_dim, in_dim).unwrap();

        let x: Vec<f32> = (0..in_dim).map(|i| (i as f32 - 64.0) / 64.0).collect();
        let q8 = Q8K64Row::quantize(&x).unwrap();

        let mut output = vec![0.0f32; out_dim];
        fused_iq2bn_matvec_into(&packed, &q8, in_dim, out_dim, &mut output).unwrap();

        let row_bytes = Iq2Bn::row_bytes(in_dim).unwrap();
        for (o, &got) in output.iter().enumerate() {
            let row = &packed[o * row_bytes..(o + 1) * row_bytes];
            let expected = fused_iq2bn_q8k64_dot(row, &q8).unwrap();
            assert_eq!(got, expected, "row {o}");
        }
    }

    #[test]
    fn test_iq4k_matvec_matches_per_row_dots() {
        let in_dim = 256;
        let out_dim = 3;
        let weights: Vec<f32> = (0..in_dim * out_dim)
            .map(|i| ((i * 17) % 61) as f32 / 30.5 - 1.0)
            .collect();
        let packed = quantize_iq4_k(&weights, out_dim, in_dim, None).unwrap();

        let x: Vec<f32> = (0..in_dim).map(|i| ((i * 7) % 19) as f32 / 9.5 - 1.0).collect();
        let mut scales = vec![0.0f32; in_dim / QK_K];
        let mut quants = vec![0i8; in_dim];
        quantize_activations_q8k_into(&x, &mut scales, &mut quants).unwrap();

        let mut output = vec![0.0f32; out_dim];
        fused_iq4k_matvec_into(&packed, &scales, &quants, in_dim, out_dim, &mut output).unwrap();

        let row_bytes = Iq4K::row_bytes(in_dim).unwrap();
        for (o, &got) in output.iter().enumerate() {
            let row = &packed[o * row_bytes..(o + 1) * row_bytes];
            assert_eq!(got, fused_iq4k_q8k_dot(row, &scales, &quants).unwrap());
        }
    }

    #[test]
    fn test_matvec_parallel_path_matches_sequential() {
        // out_dim above the threshold exercises the rayon path.
        let in_dim = 64;
        let out_dim = 300;
        let weights: Vec<f32> = (0..in_dim * out_dim)
            .map(|i| [1.0f32, -1.0, 0.0][(i / 7) % 3])
            .collect();
        let packed = quantize_iq2_bn(&weights, out_dim, in_dim).unwrap();
        let x: Vec<f32> = (0..in_dim).map(|i| (i as f32).sin()).collect();
        let q8 = Q8K64Row::quantize(&x).unwrap();

        let mut parallel = vec![0.0f32; out_dim];
        fused_iq2bn_matvec_into(&packed, &q8, in_dim, out_dim, &mut parallel).unwrap();

        let row_bytes = Iq2Bn::row_bytes(in_dim).unwrap();
        for (o, &got) in parallel.iter().enumerate() {
            let row = &packed[o * row_bytes..(o + 1) * row_bytes];
            assert_eq!(got, fused_iq2bn_q8k64_dot(row, &q8).unwrap());
        }
    }

    #[test]
    fn test_matvec_rejects_bad_buffers() {
        let packed = vec![0u8; 16];
        let q8 = Q8K64Row::quantize(&[0.0f32; 64]).unwrap();
        let mut out = vec![0.0f32; 1];
        // Weight data too small for two rows.
        assert!(fused_iq2bn_matvec_into(&packed, &q8, 64, 2, &mut out).is_err());
        // Output buffer too small.
        assert!(fused_iq2bn_matvec_into(&packed, &q8, 64, 1, &mut []).is_err());
        // Activation mismatch.
        let q8_short = Q8K64Row::quantize(&[0.0f32; 128]).unwrap();
        assert!(fused_iq2bn_matvec_into(&packed, &q8_short, 64, 1, &mut out).is_err());
    }
}
