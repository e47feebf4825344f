//! Elastic downsampler and upsampler
//!
//! Both directions derive per-axis source cells from the same
//! boundary walk as the extent integration, so the sample counts
//! always match the transmitted geometry. Downsampling runs on the
//! encoder; upsampling on the decoder, optionally blending across
//! cell and block seams where the local relevance is low.

use crate::constants::INTERPOLATION_PR_LIMIT;
use crate::geometry::{
    elastic_boundaries, AdvancedBlock, AdvancedMesh, BlockGrid, BlockSpan, BOT_LEFT, BOT_RIGHT,
    TOP_LEFT, TOP_RIGHT,
};
use crate::mesh::PrMesh;
use crate::types::DownsampleMode;

fn lerp(sample_a: u8, sample_b: u8, amount_b: f32) -> u8 {
    (f32::from(sample_a) * (1.0 - amount_b) + f32::from(sample_b) * amount_b + 0.5) as u8
}

fn x_boundaries(span: BlockSpan, block: &AdvancedBlock) -> Vec<f32> {
    elastic_boundaries(
        span.width(),
        (block.ppp_x[TOP_LEFT] + block.ppp_x[BOT_LEFT]) / 2.0,
        (block.ppp_x[TOP_RIGHT] + block.ppp_x[BOT_RIGHT]) / 2.0,
    )
}

fn y_boundaries(span: BlockSpan, block: &AdvancedBlock) -> Vec<f32> {
    elastic_boundaries(
        span.height(),
        (block.ppp_y[TOP_LEFT] + block.ppp_y[TOP_RIGHT]) / 2.0,
        (block.ppp_y[BOT_LEFT] + block.ppp_y[BOT_RIGHT]) / 2.0,
    )
}

fn cell_center(boundaries: &[f32], cell: usize, limit: usize) -> usize {
    let center = (boundaries[cell] + boundaries[cell + 1]) / 2.0;
    (center as usize).min(limit - 1)
}

/// Area average of a 1-D span `[from, to)` of samples fetched through
/// `fetch`, honoring fractional edges.
fn fractional_average(from: f32, to: f32, fetch: impl Fn(usize) -> u8) -> u8 {
    let mut total = 0.0f32;
    let first = from.floor() as usize;
    let last = (to.ceil() as usize).max(first + 1);
    for index in first..last {
        let overlap = (to.min(index as f32 + 1.0) - from.max(index as f32)).max(0.0);
        total += overlap * f32::from(fetch(index));
    }
    (total / (to - from) + 0.5).clamp(0.0, 255.0) as u8
}

/// Downsample one block of `source` into the block's downsampled
/// region of `destination`; both buffers are full planes with the
/// same stride. `scratch` holds the horizontal pass of the two-pass
/// kernels.
pub fn downsample_block(
    source: &[u8],
    scratch: &mut [u8],
    destination: &mut [u8],
    stride: usize,
    span: BlockSpan,
    block: &AdvancedBlock,
    mode: DownsampleMode,
) {
    let x_bounds = x_boundaries(span, block);
    let y_bounds = y_boundaries(span, block);
    debug_assert_eq!(x_bounds.len() - 1, block.down_x_side);
    debug_assert_eq!(y_bounds.len() - 1, block.down_y_side);

    if mode == DownsampleMode::Sps {
        // Single-pass point sampling at the 2-D cell centers.
        for cell_y in 0..block.down_y_side {
            let source_y = span.y_ini + cell_center(&y_bounds, cell_y, span.height());
            for cell_x in 0..block.down_x_side {
                let source_x = span.x_ini + cell_center(&x_bounds, cell_x, span.width());
                destination[(span.y_ini + cell_y) * stride + span.x_ini + cell_x] =
                    source[source_y * stride + source_x];
            }
        }
        return;
    }

    let average_x = matches!(mode, DownsampleMode::Avg | DownsampleMode::AvgSps);
    let average_y = mode == DownsampleMode::Avg;

    // Horizontal pass over every source row of the block.
    for y in span.y_ini..span.y_fin {
        for cell_x in 0..block.down_x_side {
            let value = if average_x {
                fractional_average(x_bounds[cell_x], x_bounds[cell_x + 1], |index| {
                    source[y * stride + span.x_ini + index.min(span.width() - 1)]
                })
            } else {
                let source_x = span.x_ini + cell_center(&x_bounds, cell_x, span.width());
                source[y * stride + source_x]
            };
            scratch[y * stride + span.x_ini + cell_x] = value;
        }
    }

    // Vertical pass over the narrowed columns.
    for cell_x in 0..block.down_x_side {
        let column = span.x_ini + cell_x;
        for cell_y in 0..block.down_y_side {
            let value = if average_y {
                fractional_average(y_bounds[cell_y], y_bounds[cell_y + 1], |index| {
                    scratch[(span.y_ini + index.min(span.height() - 1)) * stride + column]
                })
            } else {
                let source_y = span.y_ini + cell_center(&y_bounds, cell_y, span.height());
                scratch[source_y * stride + column]
            };
            destination[(span.y_ini + cell_y) * stride + column] = value;
        }
    }
}

/// Integer destination rows (or columns) covered by each elastic
/// cell. Boundaries advance by at least one sample per cell, so the
/// floors are strictly increasing and tile the axis exactly.
fn cell_extents(boundaries: &[f32], length: usize) -> Vec<(usize, usize)> {
    let cells = boundaries.len() - 1;
    let mut extents = Vec::with_capacity(cells);
    for cell in 0..cells {
        let start = boundaries[cell].floor() as usize;
        let end = if cell + 1 == cells {
            length
        } else {
            boundaries[cell + 1].floor() as usize
        };
        extents.push((start, end));
    }
    extents
}

/// Upsample one whole plane from the downsampled block regions of
/// `down` into `output`. The vertical pass expands each block column
/// into `scratch`; the horizontal pass expands rows into `output`.
///
/// With `adaptive` set, destination samples inside a block whose mean
/// relevance along the pass axis is below the interpolation limit are
/// blended between the two nearest sources; blending across a block
/// seam maps the neighbor's coordinate proportionally to the two
/// downsampled sides, and frame edges fall back to replication.
pub fn upsample_plane(
    down: &[u8],
    scratch: &mut [u8],
    output: &mut [u8],
    stride: usize,
    grid: &BlockGrid,
    advanced: &AdvancedMesh,
    mesh: &PrMesh,
    adaptive: bool,
) {
    // Vertical pass: block columns grow to full height.
    for (bx, by) in grid.blocks() {
        let block = advanced.get(bx, by);
        let span = grid.span(bx, by);
        let y_bounds = y_boundaries(span, block);
        let extents = cell_extents(&y_bounds, span.height());
        let blend = adaptive && mesh.block_mean_y(bx, by) < INTERPOLATION_PR_LIMIT;

        for cell_x in 0..block.down_x_side {
            let column = span.x_ini + cell_x;
            for (cell_y, &(row_start, row_end)) in extents.iter().enumerate() {
                let current = down[(span.y_ini + cell_y) * stride + column];
                let next = if cell_y + 1 < block.down_y_side {
                    Some(down[(span.y_ini + cell_y + 1) * stride + column])
                } else if by + 1 < grid.blocks_h {
                    let south = advanced.get(bx, by + 1);
                    let south_span = grid.span(bx, by + 1);
                    let mapped = cell_x * south.down_x_side / block.down_x_side;
                    Some(down[south_span.y_ini * stride + south_span.x_ini + mapped])
                } else {
                    None
                };
                for row in row_start..row_end {
                    let value = match (blend, next) {
                        (true, Some(next)) if row_end > row_start + 1 => {
                            let amount =
                                (row - row_start) as f32 / (row_end - row_start) as f32;
                            lerp(current, next, amount)
                        }
                        _ => current,
                    };
                    scratch[(span.y_ini + row) * stride + column] = value;
                }
            }
        }
    }

    // Horizontal pass: full-height block columns grow to full width.
    for (bx, by) in grid.blocks() {
        let block = advanced.get(bx, by);
        let span = grid.span(bx, by);
        let x_bounds = x_boundaries(span, block);
        let extents = cell_extents(&x_bounds, span.width());
        let blend = adaptive && mesh.block_mean_x(bx, by) < INTERPOLATION_PR_LIMIT;

        for y in span.y_ini..span.y_fin {
            for (cell_x, &(col_start, col_end)) in extents.iter().enumerate() {
                let current = scratch[y * stride + span.x_ini + cell_x];
                let next = if cell_x + 1 < block.down_x_side {
                    Some(scratch[y * stride + span.x_ini + cell_x + 1])
                } else if bx + 1 < grid.blocks_w {
                    let east_span = grid.span(bx + 1, by);
                    Some(scratch[y * stride + east_span.x_ini])
                } else {
                    None
                };
                for column in col_start..col_end {
                    let value = match (blend, next) {
                        (true, Some(next)) if col_end > col_start + 1 => {
                            let amount =
                                (column - col_start) as f32 / (col_end - col_start) as f32;
                            lerp(current, next, amount)
                        }
                        _ => current,
                    };
                    output[y * stride + span.x_ini + column] = value;
                }
            }
        }
    }
}
