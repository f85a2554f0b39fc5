//! Quantization and dequantization kernels for model weights
//!
//! Implements the ultra-low-bit blocked formats and their fused dot products:
//!
//! - `IQ1_BN`: ternary, 64-lane blocks, 13 bytes (~1.625 bits/weight)
//! - `IQ2_BN`: ternary, 64-lane blocks, 16 bytes (2 bits/weight)
//! - `IQ4_K`: 4-bit K-quantization, 256-lane super-blocks, 144 bytes
//! - `IQ2_K`: 2-bit K-quantization, 256-lane super-blocks, 76 bytes
//! - `Q8_K64`: 8-bit activation quantization for the BN dot products
//! - `Q8_K`: 8-bit activation quantization for the IQ*_K dot products
//!
//! ## `IQ1_BN` Format
//!
//! `IQ1_BN` stores ternary weights {-1, 0, +1} in blocks of 64 values:
//! - 12 bytes of radix-3 packed digits (five ternary digits per byte)
//! - 1 byte packing the four chunk-tail digits the same way
//! - No scale; dequantization is the bare ternary value
//!
//! ## `IQ2_BN` Format
//!
//! `IQ2_BN` stores the same ternary classes in blocks of 64 values:
//! - 16 bytes, each packing four 2-bit classes from lanes j, j+16, j+32, j+48
//! - Dequantization: `value = class - 1`
//!
//! ## `IQ4_K` Format
//!
//! `IQ4_K` uses super-blocks of 256 values divided into 16 blocks of 16:
//! - 1 half-precision super-block scale (`d`)
//! - 16 codebook-shift flags (`extra`, one bit per sub-block)
//! - 12 bytes of 6-bit signed sub-block scales (packed low/high)
//! - 128 bytes of 4-bit codebook indices (2 values per byte)
//! - Dequantization: `value = d * (scale - 32) * codebook[index]`
//!
//! ## `IQ2_K` Format
//!
//! `IQ2_K` uses super-blocks of 256 values divided into 16 blocks of 16:
//! - 1 half-precision super-block scale (`d`)
//! - 16 codebook-shift flags (`extra`)
//! - 8 bytes of 4-bit sub-block scales, decoded as `2*ls - 15`
//! - 64 bytes of 2-bit codebook indices
//! - Dequantization: `value = d * (2*ls - 15) * codebook[index]`

use std::sync::LazyLock;

pub mod bn;
pub mod dispatch;
pub mod iq2k;
pub mod iq4k;
pub mod matvec;
pub mod q8;
pub mod tables;
pub mod types;

pub use bn::{
    dequantize_iq1_bn, dequantize_iq2_bn, fused_iq1bn_q8k64_dot, fused_iq1bn_q8k64_dot_with,
    fused_iq2bn_q8k64_dot, fused_iq2bn_q8k64_dot_with, quantize_iq1_bn, quantize_iq1_bn_into,
    quantize_iq2_bn, quantize_iq2_bn_into, quantize_row_iq1_bn_into, quantize_row_iq2_bn_into,
};
pub use dispatch::{MatMulBackend, ScalarBackend};
pub use iq2k::{
    dequantize_iq2_k, fused_iq2k_q8k_dot, fused_iq2k_q8k_dot_with, quantize_iq2_k,
    quantize_iq2_k_into, quantize_row_iq2_k_into,
};
pub use iq4k::{
    dequantize_iq4_k, fused_iq4k_q8k_dot, fused_iq4k_q8k_dot_with, quantize_iq4_k,
    quantize_iq4_k_into, quantize_row_iq4_k_into,
};
pub use matvec::{
    fused_iq1bn_matvec_into, fused_iq2bn_matvec_into, fused_iq2k_matvec_into,
    fused_iq4k_matvec_into,
};
pub use q8::{quantize_activations_q8k_into, Q8K64Row, Q8KSuperBlock};
pub use types::{BlockFormat, Iq1Bn, Iq2Bn, Iq2K, Iq4K};

/// Super-block size for K-quantization formats (`IQ4_K`, `IQ2_K`, `Q8_K`)
pub const QK_K: usize = 256;

/// Super-block size for the ternary BitNet formats (`IQ1_BN`, `IQ2_BN`, `Q8_K64`)
pub const QK_IQ1BN: usize = 64;

/// Pre-computed f16 to f32 lookup table (65536 entries = 256KB)
///
/// Eliminates per-block f16 conversion overhead in hot paths.
/// The table is initialized once on first access and is immutable thereafter.
static F16_TO_F32_LUT: LazyLock<Box<[f32; 65536]>> = LazyLock::new(|| {
    let mut lut = Box::new([0.0f32; 65536]);
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = half::f16::from_bits(u16::try_from(i).unwrap_or(0)).to_f32();
    }
    lut
});

/// Fast f16 to f32 conversion using the pre-computed LUT
///
/// Takes raw u16 bits (little-endian) and returns the f32 value.
#[inline]
#[must_use]
pub fn f16_to_f32_lut(bits: u16) -> f32 {
    F16_TO_F32_LUT[bits as usize]
}

/// Read a little-endian f16 scale from the first two bytes of `data`
#[inline]
pub(crate) fn read_f16(data: &[u8]) -> f32 {
    f16_to_f32_lut(u16::from_le_bytes([data[0], data[1]]))
}

/// Write `value` as a little-endian f16 into the first two bytes of `data`
#[inline]
pub(crate) fn write_f16(data: &mut [u8], value: f32) {
    let bits = half::f16::from_f32(value).to_bits();
    data[..2].copy_from_slice(&bits.to_le_bytes());
}

/// Round-to-nearest-even of a finite float with |f| <= 4.2e6
///
/// Classical "add 2^23 + 2^22" trick: the addition shifts the integer part
/// into the low mantissa bits with the FPU doing the (banker's) rounding.
#[inline]
pub(crate) fn nearest_int(fval: f32) -> i32 {
    debug_assert!(fval.abs() <= 4_194_303.0);
    let val = fval + 12_582_912.0;
    (i32::from_ne_bytes(val.to_ne_bytes()) & 0x007f_ffff) - 0x0040_0000
}


#[cfg(test)]
mod primitive_tests {
    use super::*;

    #[test]
    fn test_f16_lut_matches_half() {
        for bits in [0u16, 0x3C00, 0x3800, 0xBC00, 0x7BFF, 0x0001, 0x8000] {
            assert_eq!(f16_to_f32_lut(bits), half::f16::from_bits(bits).to_f32());
        }
    }

    #[test]
    fn test_read_write_f16_roundtrip() {
        let mut buf = [0u8; 2];
        for v in [0.0f32, 1.0, -0.5, 1024.0, 6.1e-5] {
            write_f16(&mut buf, v);
            let back = read_f16(&buf);
            assert!((back - v).abs() <= v.abs() * 1e-3 + 1e-7, "{v} -> {back}");
        }
    }

    #[test]
    fn test_nearest_int_rounds_to_even() {
        assert_eq!(nearest_int(0.5), 0);
        assert_eq!(nearest_int(1.5), 2);
        assert_eq!(nearest_int(2.5), 2);
        assert_eq!(nearest_int(-0.5), 0);
        assert_eq!(nearest_int(-1.5), -2);
        assert_eq!(nearest_int(7.5), 8);
    }

    #[test]
    fn test_nearest_int_exact_integers() {
        for i in -1000..1000 {
            #[allow(clippy::cast_precision_loss)]
            let f = i as f32;
            assert_eq!(nearest_int(f), i);
        }
    }
}
