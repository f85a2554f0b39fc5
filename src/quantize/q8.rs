//! 8-bit activation quantizers consumed by the fused dot products
//!
//! Two formats:
//!
//! - `Q8K64Row`: companion of the ternary BN weight formats. One row of
//!   activations (length a multiple of 64) carries **four** f32 scales, one
//!   per stride-16 lane class, plus one signed byte per lane in natural
//!   order. Lane `n` belongs to scale class `(n % 16) / 4`, i.e. each scale
//!   covers the 4-lane packets repeating every 16 lanes. The BN dot products
//!   assume exactly this mapping.
//! - `Q8KSuperBlock`: companion of the IQ*_K weight formats. One f32 scale
//!   per 256-lane super-block, symmetric quantization `d = max|x| / 127`.
//!
//! Both are produced per inference step and live in memory only; weights, by
//! contrast, are packed little-endian byte streams.

use super::{nearest_int, QK_IQ1BN, QK_K};
use crate::error::{CuantizarError, Result};

/// Scale class of a lane within a `Q8K64Row`
#[inline]
pub(crate) fn q8k64_scale_class(lane: usize) -> usize {
    (lane % 16) / 4
}

/// A row of activations quantized for the BN ternary dot products.
///
/// Four scales cover the whole row (one per stride-16 lane class); the
/// quantized bytes are stored in natural lane order.
#[derive(Debug, Clone)]
pub struct Q8K64Row {
    /// Per-class scale factors
    pub d: [f32; 4],
    /// Quantized values, one per input lane
    pub qs: Vec<i8>,
}

impl Q8K64Row {
    /// Quantize a float row for the BN dot products.
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the row length is not a multiple of 64.
    #[allow(clippy::cast_possible_truncation)]
    pub fn quantize(x: &[f32]) -> Result<Self> {
        if !x.len().is_multiple_of(QK_IQ1BN) {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "Q8_K64 quantization requires length multiple of {QK_IQ1BN}, got {}",
                    x.len()
                ),
            });
        }

        let mut amax = [0.0f32; 4];
        for (n, &v) in x.iter().enumerate() {
            let class = q8k64_scale_class(n);
            amax[class] = amax[class].max(v.abs());
        }

        let mut d = [0.0f32; 4];
        let mut id = [0.0f32; 4];
        for i in 0..4 {
            d[i] = amax[i] / 127.0;
            id[i] = if d[i] > 0.0 { 1.0 / d[i] } else { 0.0 };
        }

        let qs = x
            .iter()
            .enumerate()
            .map(|(n, &v)| nearest_int(id[q8k64_scale_class(n)] * v) as i8)
            .collect();

        Ok(Self { d, qs })
    }

    /// Dequantize back to f32 values
    #[must_use]
    pub fn dequantize(&self) -> Vec<f32> {
        self.qs
            .iter()
            .enumerate()
            .map(|(n, &q)| f32::from(q) * self.d[q8k64_scale_class(n)])
            .collect()
    }

    /// Number of quantized lanes
    #[must_use]
    pub fn len(&self) -> usize {
        self.qs.len()
    }

    /// Whether the row is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.qs.is_empty()
    }
}

/// A 256-lane activation super-block for the IQ*_K dot products.
///
/// Symmetric quantization with a single scale: `d = max|x| / 127`.
#[derive(Debug, Clone)]
pub struct Q8KSuperBlock {
    /// Scale factor for the entire super-block
    pub scale: f32,
    /// 256 quantized int8 values
    pub quants: [i8; QK_K],
}

impl Q8KSuperBlock {
    /// Quantize 256 f32 values to one `Q8_K` super-block
    #[must_use]
    pub fn quantize(values: &[f32; QK_K]) -> Self {
        let mut block = Self {
            scale: 0.0,
            quants: [0i8; QK_K],
        };
        Self::quantize_into(values, &mut block.scale, &mut block.quants);
        block
    }

    /// Zero-allocation quantization into pre-allocated buffers
    ///
    /// `values` must hold at least 256 floats and `quants_out` at least 256
    /// slots; only the first 256 of each are touched.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn quantize_into(values: &[f32], scale_out: &mut f32, quants_out: &mut [i8]) {
        debug_assert!(values.len() >= QK_K);
        debug_assert!(quants_out.len() >= QK_K);

        let max_abs = values[..QK_K].iter().map(|v| v.abs()).fold(0.0f32, f32::max);

        if max_abs == 0.0 {
            *scale_out = 0.0;
            quants_out[..QK_K].fill(0);
            return;
        }

        let scale = max_abs / 127.0;
        *scale_out = scale;
        let inv_scale = 1.0 / scale;

        for (q, &v) in quants_out[..QK_K].iter_mut().zip(&values[..QK_K]) {
            *q = nearest_int(inv_scale * v).clamp(-127, 127) as i8;
        }
    }

    /// Dequantize back to f32 values
    #[must_use]
    pub fn dequantize(&self) -> [f32; QK_K] {
        let mut values = [0.0f32; QK_K];
        for (v, &q) in values.iter_mut().zip(self.quants.iter()) {
            *v = f32::from(q) * self.scale;
        }
        values
    }
}

/// Quantize f32 activations to `Q8_K` super-blocks (zero-allocation variant)
///
/// Used for amortized activation quantization in the hot matvec path: the
/// scales and quants buffers are pre-allocated once and reused per token.
///
/// # Arguments
/// * `activations` - Input f32 values (length must be a multiple of 256)
/// * `scales` - Output scales buffer (len >= activations.len() / 256)
/// * `quants` - Output int8 buffer (len >= activations.len())
///
/// # Errors
///
/// Returns `InvalidShape` if the length is not a multiple of 256 or a buffer
/// is too small.
pub fn quantize_activations_q8k_into(
    activations: &[f32],
    scales: &mut [f32],
    quants: &mut [i8],
) -> Result<()> {
    if !activations.len().is_multiple_of(QK_K) {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Q8_K quantization requires length multiple of {QK_K}, got {}",
                activations.len()
            ),
        });
    }

    let num_superblocks = activations.len() / QK_K;

    if scales.len() < num_superblocks {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Scales buffer too small: need {num_superblocks}, have {}",
                scales.len()
            ),
        });
    }

    if quants.len() < activations.len() {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Quants buffer too small: need {}, have {}",
                activations.len(),
                quants.len()
            ),
        });
    }

    for (sb_idx, chunk) in activations.chunks_exact(QK_K).enumerate() {
        Q8KSuperBlock::quantize_into(
            chunk,
            &mut scales[sb_idx],
            &mut quants[sb_idx * QK_K..(sb_idx + 1) * QK_K],
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q8k64_rejects_partial_block() {
        let x = vec![0.0f32; 100];
        assert!(Q8K64Row::quantize(&x).is_err());
    }

    #[test]
    fn test_q8k64_zero_row() {
        let row = Q8K64Row::quantize(&[0.0f32; 64]).unwrap();
        assert_eq!(row.d, [0.0; 4]);
        assert!(row.qs.iter().all(|&q| q == 0));
        assert_eq!(row.dequantize(), vec![0.0f32; 64]);
    }

    #[test]
    fn test_q8k64_scale_classes() {
        // Put a single spike in lane 5 => class 1 only.
        let mut x = [0.0f32; 64];
        x[5] = 2.54;
        let row = Q8K64Row::quantize(&x).unwrap();
        assert_eq!(row.d[1], 2.54 / 127.0);
        assert_eq!(row.d[0], 0.0);
        assert_eq!(row.d[2], 0.0);
        assert_eq!(row.d[3], 0.0);
        assert_eq!(row.qs[5], 127);
        assert_eq!(row.qs.iter().filter(|&&q| q != 0).count(), 1);
    }

    #[test]
    fn test_q8k64_class_mapping_is_stride_16() {
        // Lanes 4..8, 20..24, 36..40, 52..56 all share class 1.
        for g in 0..4 {
            for l in 0..4 {
                assert_eq!(q8k64_scale_class(16 * g + 4 + l), 1);
            }
        }
    }

    #[test]
    fn test_q8k64_roundtrip_error_bound() {
        let x: Vec<f32> = (0..128).map(|i| ((i * 37) % 101) as f32 / 50.0 - 1.0).collect();
        let row = Q8K64Row::quantize(&x).unwrap();
        let y = row.dequantize();
        let step = row.d.iter().fold(0.0f32, |a, &b| a.max(b));
        for (a, b) in x.iter().zip(y.iter()) {
            assert!((a - b).abs() <= 0.5 * step + 1e-7);
        }
    }

    #[test]
    fn test_q8k_superblock_quantize_max_maps_to_127() {
        let mut values = [0.5f32; QK_K];
        values[17] = -2.0;
        let block = Q8KSuperBlock::quantize(&values);
        assert_eq!(block.quants[17], -127);
        assert!((block.scale - 2.0 / 127.0).abs() < 1e-9);
    }

    #[test]
    fn test_q8k_superblock_zero_block() {
        let block = Q8KSuperBlock::quantize(&[0.0f32; QK_K]);
        assert_eq!(block.scale, 0.0);
        assert!(block.quants.iter().all(|&q| q == 0));
    }

    #[test]
    fn test_quantize_activations_q8k_into() {
        let activations: Vec<f32> = (0..512).map(|i| (i as f32 - 256.0) / 64.0).collect();
        let mut scales = vec![0.0f32; 2];
        let mut quants = vec![0i8; 512];
        quantize_activations_q8k_into(&activations, &mut scales, &mut quants).unwrap();
        assert!(scales[0] > 0.0 && scales[1] > 0.0);

        // Per-super-block reconstruction stays within half a step.
        for sb in 0..2 {
            for j in 0..QK_K {
                let rec = f32::from(quants[sb * QK_K + j]) * scales[sb];
                assert!((rec - activations[sb * QK_K + j]).abs() <= 0.5 * scales[sb] + 1e-7);
            }
        }
    }

    #[test]
    fn test_quantize_activations_q8k_into_rejects_bad_buffers() {
        let activations = vec![0.0f32; 256];
        let mut scales = vec![0.0f32; 0];
        let mut quants = vec![0i8; 256];
        assert!(quantize_activations_q8k_into(&activations, &mut scales, &mut quants).is_err());

        let mut scales = vec![0.0f32; 1];
        let mut short_quants = vec![0i8; 100];
        assert!(
            quantize_activations_q8k_into(&activations, &mut scales, &mut short_quants).is_err()
        );

        let odd = vec![0.0f32; 100];
        let mut quants = vec![0i8; 100];
        assert!(quantize_activations_q8k_into(&odd, &mut scales, &mut quants).is_err());
    }
}
