//! Delta-frame pipeline pieces
//!
//! Differential frames code a companded residual between the current
//! downsampled block and the previous reconstruction remapped to the
//! current block geometry. Companding expands the residual so the
//! hop quantizer, tuned for full-range samples, resolves the small
//! differences that dominate static content; the decoder applies the
//! exact inverse before adding the adapted reference back.

use crate::constants::{DELTA_PASS_MAX, DELTA_X4_EDGE};
use crate::geometry::{AdvancedBlock, BlockSpan};

/// Edge of the doubled region on the expanded scale.
const EXPAND_KNEE: i32 = DELTA_X4_EDGE - 128;

/// Edge of the doubled region on the residual scale.
const RESIDUAL_KNEE: i32 = DELTA_PASS_MAX + 2 * (EXPAND_KNEE - DELTA_PASS_MAX);

/// Compand one residual into a stored sample in `[1, 255]`.
pub fn compand(residual: i32) -> u8 {
    let magnitude = residual.unsigned_abs().min(254) as i32;
    let companded = if magnitude <= DELTA_PASS_MAX {
        magnitude
    } else if magnitude <= RESIDUAL_KNEE {
        DELTA_PASS_MAX + (magnitude - DELTA_PASS_MAX + 1) / 2
    } else {
        EXPAND_KNEE + (magnitude - RESIDUAL_KNEE + 2) / 4
    };
    let stored = 128 + companded * residual.signum();
    stored.clamp(1, 255) as u8
}

/// Invert [`compand`]. Exact in the pass-through band, within the
/// band's quantization step beyond it.
pub fn decompand(stored: u8) -> i32 {
    let companded = i32::from(stored) - 128;
    let magnitude = companded.abs();
    let residual = if magnitude <= DELTA_PASS_MAX {
        magnitude
    } else if magnitude <= EXPAND_KNEE {
        DELTA_PASS_MAX + 2 * (magnitude - DELTA_PASS_MAX)
    } else {
        RESIDUAL_KNEE + 4 * (magnitude - EXPAND_KNEE)
    };
    residual * companded.signum()
}

/// Remap the previous frame's downsampled block onto the current
/// block geometry by ratio-mapped nearest lookup. Both buffers are
/// full planes sharing `stride`; block origins never move between
/// frames, only the downsampled sides do.
pub fn adapt_block(
    last: &[u8],
    adapted: &mut [u8],
    stride: usize,
    span: BlockSpan,
    current: &AdvancedBlock,
    previous: &AdvancedBlock,
) {
    for cell_y in 0..current.down_y_side {
        let source_y = cell_y * previous.down_y_side / current.down_y_side;
        for cell_x in 0..current.down_x_side {
            let source_x = cell_x * previous.down_x_side / current.down_x_side;
            adapted[(span.y_ini + cell_y) * stride + span.x_ini + cell_x] =
                last[(span.y_ini + source_y) * stride + span.x_ini + source_x];
        }
    }
}
