//! Hop predictor core
//!
//! Executed once per coded sample on both sides of the codec. The
//! encoder selects the minimum-error hop against the original sample;
//! the decoder replays the reconstruction. Both walk the same spatial
//! prediction over the same already-reconstructed neighbors, so the
//! state machines stay in lockstep.

use crate::cache::HOP_CACHE;
use crate::constants::{MAX_HOP_1, MIN_HOP_1};
use crate::geometry::BlockSpan;
use crate::types::Hop;

/// Predictor state, reset at the start of every block row.
#[derive(Debug, Clone, Copy)]
pub struct PredictorState {
    /// Adaptive small-hop step.
    pub h1: u8,
    last_small_hop: bool,
    /// Running gradient correction added to the spatial prediction.
    /// Held at zero in delta mode.
    pub grad: i32,
}

impl PredictorState {
    pub fn new() -> PredictorState {
        PredictorState {
            h1: MIN_HOP_1,
            last_small_hop: true,
            grad: 0,
        }
    }

    /// Advance `h1`, the small-hop memory and the gradient after one
    /// coded hop.
    pub fn update(&mut self, hop: Hop, delta_mode: bool) {
        let small = hop.is_small();
        if small && self.last_small_hop {
            self.h1 = (self.h1 - 1).max(MIN_HOP_1);
        } else {
            self.h1 = MAX_HOP_1;
        }
        self.last_small_hop = small;

        if !delta_mode {
            match hop {
                Hop::Pos1 => self.grad = 1,
                Hop::Neg1 => self.grad = -1,
                _ if hop.magnitude() >= 2 => self.grad = 0,
                _ => {}
            }
        }
    }
}

impl Default for PredictorState {
    fn default() -> PredictorState {
        PredictorState::new()
    }
}

/// Neighbor information for predicting the first sample of a block.
///
/// `west_edge_x` is the column of the west block's last downsampled
/// sample, valid on this block's first row; `north_edge_y` is the row
/// of the north block's last downsampled sample, valid on this
/// block's first column. A block with a transmitted seed carries it
/// in `seed` instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockSeeds {
    pub seed: Option<u8>,
    pub west_edge_x: Option<usize>,
    pub north_edge_y: Option<usize>,
}

pub fn clamp_sample(value: i32) -> u8 {
    value.clamp(1, 255) as u8
}

/// Seeds for one block of an advanced or delta frame.
///
/// The origin block carries the transmitted seed; every other block
/// predicts its first sample from the west and north neighbors, but
/// only from neighbors whose plane region was written in the same
/// coding domain this frame (`eligible`).
pub fn advanced_block_seeds(
    advanced: &crate::geometry::AdvancedMesh,
    block_x: usize,
    block_y: usize,
    header_seed: u8,
    eligible: &dyn Fn(usize, usize) -> bool,
) -> BlockSeeds {
    BlockSeeds {
        seed: (block_x == 0 && block_y == 0).then_some(header_seed),
        west_edge_x: (block_x > 0 && eligible(block_x - 1, block_y))
            .then(|| advanced.get(block_x - 1, block_y).x_fin_down - 1),
        north_edge_y: (block_y > 0 && eligible(block_x, block_y - 1))
            .then(|| advanced.get(block_x, block_y - 1).y_fin_down - 1),
    }
}

fn average(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b)) / 2) as u8
}

/// Spatial prediction for the sample at `(x, y)` inside a block,
/// reading only neighbors the reconstruction pass has already
/// written.
pub fn predict(
    plane: &[u8],
    stride: usize,
    span: BlockSpan,
    seeds: &BlockSeeds,
    x: usize,
    y: usize,
) -> u8 {
    if x == span.x_ini && y == span.y_ini {
        if let Some(seed) = seeds.seed {
            return seed;
        }
        let west = seeds.west_edge_x.map(|wx| plane[y * stride + wx]);
        let north = seeds.north_edge_y.map(|ny| plane[ny * stride + x]);
        return match (west, north) {
            (Some(w), Some(n)) => average(w, n),
            (Some(w), None) => w,
            (None, Some(n)) => n,
            (None, None) => 128,
        };
    }

    if y == span.y_ini {
        return plane[y * stride + x - 1];
    }

    let top = plane[(y - 1) * stride + x];
    if x == span.x_ini {
        return if x + 1 < span.x_fin {
            average(top, plane[(y - 1) * stride + x + 1])
        } else {
            top
        };
    }

    let left = plane[y * stride + x - 1];
    if x == span.x_fin - 1 {
        average(left, top)
    } else {
        average(left, plane[(y - 1) * stride + x + 1])
    }
}

/// Reconstructed sample value of `hop` against `predicted`.
pub fn reconstruct(hop: Hop, predicted: u8, h1: u8) -> u8 {
    match hop {
        Hop::Zero => predicted,
        Hop::Pos1 => clamp_sample(i32::from(predicted) + i32::from(h1)),
        Hop::Neg1 => clamp_sample(i32::from(predicted) - i32::from(h1)),
        _ => HOP_CACHE.value(predicted, h1, hop),
    }
}

/// Pick the hop whose reconstruction is closest to the original
/// sample.
///
/// Candidates are scanned outward in the direction of the error;
/// their magnitudes are monotone, so the scan stops at the first
/// candidate that fails to improve.
pub fn select_hop(original: u8, predicted: u8, h1: u8) -> (Hop, u8) {
    let error = i32::from(original) - i32::from(predicted);
    if error.abs() <= i32::from(h1 / 2) {
        return (Hop::Zero, predicted);
    }

    const POSITIVE: [Hop; 4] = [Hop::Pos1, Hop::Pos2, Hop::Pos3, Hop::Pos4];
    const NEGATIVE: [Hop; 4] = [Hop::Neg1, Hop::Neg2, Hop::Neg3, Hop::Neg4];
    let candidates = if error > 0 { &POSITIVE } else { &NEGATIVE };

    let mut best = (Hop::Zero, predicted);
    let mut best_error = error.abs();
    for &hop in candidates {
        let value = reconstruct(hop, predicted, h1);
        let candidate_error = (i32::from(original) - i32::from(value)).abs();
        if candidate_error < best_error {
            best_error = candidate_error;
            best = (hop, value);
        } else {
            break;
        }
    }
    best
}

/// Hop-code one block of `original`, writing hop indices and the
/// reconstruction the decoder will reproduce.
pub fn encode_block(
    original: &[u8],
    reconstruction: &mut [u8],
    hops: &mut [u8],
    stride: usize,
    span: BlockSpan,
    seeds: &BlockSeeds,
    delta_mode: bool,
) {
    for y in span.y_ini..span.y_fin {
        let mut state = PredictorState::new();
        for x in span.x_ini..span.x_fin {
            let mut predicted = predict(reconstruction, stride, span, seeds, x, y);
            if !delta_mode {
                predicted = clamp_sample(i32::from(predicted) + state.grad);
            }
            let (hop, value) = select_hop(original[y * stride + x], predicted, state.h1);
            hops[y * stride + x] = hop.index();
            reconstruction[y * stride + x] = value;
            state.update(hop, delta_mode);
        }
    }
}

/// Rebuild one block of samples from its hop indices.
pub fn decode_block(
    hops: &[u8],
    reconstruction: &mut [u8],
    stride: usize,
    span: BlockSpan,
    seeds: &BlockSeeds,
    delta_mode: bool,
) {
    for y in span.y_ini..span.y_fin {
        let mut state = PredictorState::new();
        for x in span.x_ini..span.x_fin {
            let mut predicted = predict(reconstruction, stride, span, seeds, x, y);
            if !delta_mode {
                predicted = clamp_sample(i32::from(predicted) + state.grad);
            }
            let hop = Hop::from_index(hops[y * stride + x]).unwrap_or(Hop::Zero);
            reconstruction[y * stride + x] = reconstruct(hop, predicted, state.h1);
            state.update(hop, delta_mode);
        }
    }
}
