//! Blocked format geometry as compile-time constants
//!
//! Encodes the structure of each packed format so generic code (row-parallel
//! matvec, size contracts, validation) is monomorphized per format with zero
//! runtime overhead.

use crate::error::{CuantizarError, Result};

/// Trait encoding the block geometry of a packed quantization format.
///
/// All associated constants are known at compile time, so kernels
/// parameterized by this trait compile to format-specific code.
pub trait BlockFormat: Send + Sync + 'static {
    /// Format identifier used in error messages
    const FORMAT_ID: &'static str;

    /// Number of quantized values per super-block
    const ELEMENTS_PER_SUPERBLOCK: usize;

    /// Byte size of one super-block in the packed format
    const SUPERBLOCK_BYTES: usize;

    /// Bits per weight (including metadata overhead)
    const BITS_PER_WEIGHT: f32;

    /// Packed byte count of one row of `n_per_row` values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` when `n_per_row` is not a multiple of the
    /// super-block size.
    fn row_bytes(n_per_row: usize) -> Result<usize> {
        if !n_per_row.is_multiple_of(Self::ELEMENTS_PER_SUPERBLOCK) {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "{} row length {} is not a multiple of super-block size {}",
                    Self::FORMAT_ID,
                    n_per_row,
                    Self::ELEMENTS_PER_SUPERBLOCK
                ),
            });
        }
        Ok(n_per_row / Self::ELEMENTS_PER_SUPERBLOCK * Self::SUPERBLOCK_BYTES)
    }

    /// Validate that `data` holds a whole number of packed super-blocks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` when the length is not a multiple of
    /// `SUPERBLOCK_BYTES`.
    fn validate_data(data: &[u8]) -> Result<usize> {
        if !data.len().is_multiple_of(Self::SUPERBLOCK_BYTES) {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "{} data length {} is not a multiple of super-block size {}",
                    Self::FORMAT_ID,
                    data.len(),
                    Self::SUPERBLOCK_BYTES
                ),
            });
        }
        Ok(data.len() / Self::SUPERBLOCK_BYTES)
    }
}

/// `IQ1_BN`: ternary, radix-3 packed, 64-lane blocks of 13 bytes
pub struct Iq1Bn;

impl BlockFormat for Iq1Bn {
    const FORMAT_ID: &'static str = "IQ1_BN";
    const ELEMENTS_PER_SUPERBLOCK: usize = super::QK_IQ1BN;
    const SUPERBLOCK_BYTES: usize = 13;
    const BITS_PER_WEIGHT: f32 = 1.625;
}

/// `IQ2_BN`: ternary, 2-bit packed, 64-lane blocks of 16 bytes
pub struct Iq2Bn;

impl BlockFormat for Iq2Bn {
    const FORMAT_ID: &'static str = "IQ2_BN";
    const ELEMENTS_PER_SUPERBLOCK: usize = super::QK_IQ1BN;
    const SUPERBLOCK_BYTES: usize = 16;
    const BITS_PER_WEIGHT: f32 = 2.0;
}

/// `IQ4_K`: 4-bit nonlinear codebook, 256-lane super-blocks of 144 bytes
pub struct Iq4K;

impl BlockFormat for Iq4K {
    const FORMAT_ID: &'static str = "IQ4_K";
    const ELEMENTS_PER_SUPERBLOCK: usize = super::QK_K;
    const SUPERBLOCK_BYTES: usize = 144;
    const BITS_PER_WEIGHT: f32 = 4.5;
}

/// `IQ2_K`: 2-bit nonlinear codebook, 256-lane super-blocks of 76 bytes
pub struct Iq2K;

impl BlockFormat for Iq2K {
    const FORMAT_ID: &'static str = "IQ2_K";
    const ELEMENTS_PER_SUPERBLOCK: usize = super::QK_K;
    const SUPERBLOCK_BYTES: usize = 76;
    const BITS_PER_WEIGHT: f32 = 2.375;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_bytes() {
        assert_eq!(Iq1Bn::row_bytes(64).unwrap(), 13);
        assert_eq!(Iq1Bn::row_bytes(256).unwrap(), 52);
        assert_eq!(Iq2Bn::row_bytes(128).unwrap(), 32);
        assert_eq!(Iq4K::row_bytes(512).unwrap(), 288);
        assert_eq!(Iq2K::row_bytes(256).unwrap(), 76);
    }

    #[test]
    fn test_row_bytes_rejects_partial_block() {
        assert!(Iq1Bn::row_bytes(100).is_err());
        assert!(Iq4K::row_bytes(255).is_err());
    }

    #[test]
    fn test_validate_data() {
        assert_eq!(Iq4K::validate_data(&[0u8; 288]).unwrap(), 2);
        assert!(Iq4K::validate_data(&[0u8; 100]).is_err());
        assert_eq!(Iq2K::validate_data(&[]).unwrap(), 0);
    }

    #[test]
    fn test_bits_per_weight_consistent_with_layout() {
        #[allow(clippy::cast_precision_loss)]
        fn bpw(bytes: usize, elems: usize) -> f32 {
            8.0 * bytes as f32 / elems as f32
        }
        assert!((bpw(13, 64) - Iq1Bn::BITS_PER_WEIGHT).abs() < 1e-6);
        assert!((bpw(16, 64) - Iq2Bn::BITS_PER_WEIGHT).abs() < 1e-6);
        assert!((bpw(144, 256) - Iq4K::BITS_PER_WEIGHT).abs() < 1e-6);
        assert!((bpw(76, 256) - Iq2K::BITS_PER_WEIGHT).abs() < 1e-6);
    }
}
