//! # Cuantizar
//!
//! Ultra-low-bit blocked quantization codecs for large-language-model
//! weights, with fused dot products against 8-bit quantized activations.
//!
//! Cuantizar (Spanish: "to quantize") implements the packed block formats,
//! forward quantizers, dequantizers and fused dot-product kernels for:
//!
//! - `IQ1_BN`: ternary (~1.625 bits/weight), radix-3 packed, 64-lane blocks
//! - `IQ2_BN`: ternary (2 bits/weight), 64-lane blocks
//! - `IQ4_K`: 4-bit nonlinear codebook, 256-lane super-blocks with per-16-lane
//!   signed 6-bit sub-scales and a per-sub-block codebook-shift bit
//! - `IQ2_K`: 2-bit nonlinear codebook, 256-lane super-blocks with per-16-lane
//!   4-bit sub-scales and a per-sub-block codebook-shift bit
//! - `Q8_K64` / `Q8_K`: the companion activation quantizers consumed by the
//!   fused dot products
//!
//! ## Example
//!
//! ```rust
//! use cuantizar::quantize::{
//!     dequantize_iq2_bn, fused_iq2bn_q8k64_dot, quantize_iq2_bn, Q8K64Row,
//! };
//!
//! // One 64-lane block of ternary weights.
//! let row: Vec<f32> = (0..64).map(|i| [-1.0f32, 0.0, 1.0][i % 3]).collect();
//! let packed = quantize_iq2_bn(&row, 1, 64).unwrap();
//! assert_eq!(packed.len(), 16);
//!
//! // Ternary inputs round-trip exactly.
//! let decoded = dequantize_iq2_bn(&packed).unwrap();
//! assert_eq!(decoded, row);
//!
//! // Fused dot against Q8_K64-quantized activations.
//! let activations: Vec<f32> = (0..64).map(|i| (i as f32 - 31.5) / 31.5).collect();
//! let q8 = Q8K64Row::quantize(&activations).unwrap();
//! let dot = fused_iq2bn_q8k64_dot(&packed, &q8).unwrap();
//! assert!(dot.is_finite());
//! ```
//!
//! ## Design
//!
//! All operations are pure functions over caller-provided buffers: no global
//! mutable state, no I/O, no internal locking. Packed weights are plain
//! little-endian byte slices (the on-disk representation); activations are
//! in-memory structs produced per inference step. Static codebook tables are
//! read-only and shared freely across threads, so rows may be quantized and
//! dot products evaluated in parallel over disjoint (row, output) pairs.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Large stack arrays are acceptable in tests for test data
#![allow(clippy::large_stack_arrays)]

pub mod error;
pub mod quantize;

// Re-exports for convenience
pub use error::{CuantizarError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'));
        assert!(!VERSION.is_empty());
    }
}
