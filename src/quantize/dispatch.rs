//! External fused-matmul fast-path interface
//!
//! An optimized SIMD engine (out of crate) may be able to evaluate a fused
//! dot product directly on the packed bytes. Every fused dot product offers
//! the work to a [`MatMulBackend`] first; when the backend declines
//! (`None`), the scalar kernel runs. The backend contract is strict: a
//! `Some(s)` return means `s` is the complete result and the scalar path is
//! skipped entirely.
//!
//! The default [`ScalarBackend`] declines everything, so plain
//! `fused_*_dot` calls always take the scalar kernels.

use super::q8::Q8K64Row;

/// Hook for an external engine that can evaluate fused dot products on
/// packed blocks directly.
///
/// Each method receives the packed weight row and the quantized activations
/// and returns `Some(result)` when the engine handled the work, `None` to
/// fall back to the scalar kernel. All methods decline by default, so an
/// implementation only overrides the formats it accelerates.
pub trait MatMulBackend: Sync {
    /// Fused `IQ1_BN` x `Q8_K64` dot product
    fn iq1bn_q8k64_dot(&self, weights: &[u8], activations: &Q8K64Row) -> Option<f32> {
        let _ = (weights, activations);
        None
    }

    /// Fused `IQ2_BN` x `Q8_K64` dot product
    fn iq2bn_q8k64_dot(&self, weights: &[u8], activations: &Q8K64Row) -> Option<f32> {
        let _ = (weights, activations);
        None
    }

    /// Fused `IQ4_K` x `Q8_K` dot product
    fn iq4k_q8k_dot(&self, weights: &[u8], scales: &[f32], quants: &[i8]) -> Option<f32> {
        let _ = (weights, scales, quants);
        None
    }

    /// Fused `IQ2_K` x `Q8_K` dot product
    fn iq2k_q8k_dot(&self, weights: &[u8], scales: &[f32], quants: &[i8]) -> Option<f32> {
        let _ = (weights, scales, quants);
        None
    }
}

/// Backend that declines every request, forcing the scalar kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarBackend;

impl MatMulBackend for ScalarBackend {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_backend_declines_everything() {
        let backend = ScalarBackend;
        let row = Q8K64Row {
            d: [0.0; 4],
            qs: vec![0i8; 64],
        };
        assert_eq!(backend.iq1bn_q8k64_dot(&[0u8; 13], &row), None);
        assert_eq!(backend.iq2bn_q8k64_dot(&[0u8; 16], &row), None);
        assert_eq!(backend.iq4k_q8k_dot(&[0u8; 144], &[0.0], &[0i8; 256]), None);
        assert_eq!(backend.iq2k_q8k_dot(&[0u8; 76], &[0.0], &[0i8; 256]), None);
    }
}
