//! Precomputed quantizer tables
//!
//! Both tables are pure functions of the algorithm constants and are
//! built once per process on first use.

use crate::constants::{
    H1_RANGE, HOP_RANGE_FRACTION, MAX_QUALITY_LEVEL, MIN_HOP_1, PPP_MAX,
};
use crate::types::Hop;

lazy_static! {
    /// Quantized sample values for the large hops at every
    /// `(predicted, h1)` pair.
    pub static ref HOP_CACHE: HopCache = HopCache::build();

    /// Perceptual-relevance scale factors per PPP ceiling and quality
    /// level.
    pub static ref COMPRESSION_FACTORS: CompressionFactors = CompressionFactors::build();
}

/// Quantized values of the hops at distance two and beyond.
///
/// The three large hops above the prediction follow a geometric
/// progression whose last step spans `HOP_RANGE_FRACTION` of the
/// headroom between the prediction and the upper sample bound; the
/// negative side mirrors the construction against the lower bound.
/// When the headroom is too small for a real progression the steps
/// degenerate to multiples of `h1`.
pub struct HopCache {
    pos: Box<[[[u8; 3]; H1_RANGE]; 256]>,
    neg: Box<[[[u8; 3]; H1_RANGE]; 256]>,
}

fn large_hop_offsets(headroom: u32, h1: u8, offsets: &mut [u32; 3]) {
    let h1 = f64::from(h1);
    let ratio = (f64::from(HOP_RANGE_FRACTION) * f64::from(headroom) / h1).cbrt();
    for (i, offset) in offsets.iter_mut().enumerate() {
        let step = if ratio > 1.0 {
            h1 * ratio.powi(i as i32 + 1)
        } else {
            h1 * (i as f64 + 2.0)
        };
        *offset = step.round() as u32;
    }
}

impl HopCache {
    fn build() -> HopCache {
        let mut pos = Box::new([[[0u8; 3]; H1_RANGE]; 256]);
        let mut neg = Box::new([[[0u8; 3]; H1_RANGE]; 256]);
        let mut offsets = [0u32; 3];

        for predicted in 0..256usize {
            for h1_index in 0..H1_RANGE {
                let h1 = MIN_HOP_1 + h1_index as u8;

                large_hop_offsets(255 - predicted as u32, h1, &mut offsets);
                for (i, &offset) in offsets.iter().enumerate() {
                    let value = (predicted as u32 + offset).min(255).max(1);
                    pos[predicted][h1_index][i] = value as u8;
                }

                large_hop_offsets((predicted as u32).saturating_sub(1), h1, &mut offsets);
                for (i, &offset) in offsets.iter().enumerate() {
                    let value = (predicted as i32 - offset as i32).max(1);
                    neg[predicted][h1_index][i] = value as u8;
                }
            }
        }

        HopCache { pos, neg }
    }

    /// The reconstructed sample value of a hop at distance two or
    /// more. Callers must not pass a small hop.
    pub fn value(&self, predicted: u8, h1: u8, hop: Hop) -> u8 {
        debug_assert!(hop.magnitude() >= 2);
        let h1_index = (h1 - MIN_HOP_1) as usize;
        let magnitude_index = hop.magnitude() as usize - 2;
        if hop.is_positive() {
            self.pos[predicted as usize][h1_index][magnitude_index]
        } else {
            self.neg[predicted as usize][h1_index][magnitude_index]
        }
    }
}

/// `ppp_max ^ (-ql / 99)` per integer PPP ceiling: quality 0 keeps the
/// full elastic range, quality 99 collapses every block to PPP 1.
pub struct CompressionFactors {
    table: Box<[[f32; MAX_QUALITY_LEVEL as usize + 1]]>,
}

impl CompressionFactors {
    fn build() -> CompressionFactors {
        let ceilings = PPP_MAX as usize + 1;
        let mut table = vec![[1.0f32; MAX_QUALITY_LEVEL as usize + 1]; ceilings];
        for (ppp, row) in table.iter_mut().enumerate().skip(1) {
            for (ql, factor) in row.iter_mut().enumerate() {
                let exponent = -(ql as f32) / f32::from(MAX_QUALITY_LEVEL);
                *factor = (ppp as f32).powf(exponent);
            }
        }
        CompressionFactors {
            table: table.into_boxed_slice(),
        }
    }

    /// Factor for a block whose theoretical PPP ceiling is `ppp_max`.
    pub fn factor(&self, ppp_max: f32, quality_level: u8) -> f32 {
        let index = (ppp_max.ceil() as usize).clamp(1, PPP_MAX as usize);
        self.table[index][quality_level.min(MAX_QUALITY_LEVEL) as usize]
    }
}
