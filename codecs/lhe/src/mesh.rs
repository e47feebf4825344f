//! Perceptual-relevance mesh
//!
//! The encoder measures two relevance scalars at every block corner
//! of the luma plane: sign-change-weighted luminance differences
//! along horizontal scans (PRx) and vertical scans (PRy). The
//! decoder never computes relevance, it reads the quantized mesh
//! from the bitstream.

use crate::constants::{PR_DIF, PR_MIN, PR_QUANT_LEVELS, QUANT_LUM};
use crate::geometry::BlockGrid;
use crate::types::ProtectedRectangle;

/// Quantized relevance lattice of `(blocks_h + 1) × (blocks_w + 1)`
/// nodes shared between adjacent blocks. Nodes store quantum indices
/// into [`PR_QUANT_LEVELS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrMesh {
    cols: usize,
    rows: usize,
    x: Vec<u8>,
    y: Vec<u8>,
}

impl PrMesh {
    pub fn new(blocks_w: usize, blocks_h: usize) -> PrMesh {
        let cols = blocks_w + 1;
        let rows = blocks_h + 1;
        PrMesh {
            cols,
            rows,
            x: vec![0; cols * rows],
            y: vec![0; cols * rows],
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn nodes(&self) -> usize {
        self.cols * self.rows
    }

    fn index(&self, node_x: usize, node_y: usize) -> usize {
        node_y * self.cols + node_x
    }

    pub fn x_index(&self, node_x: usize, node_y: usize) -> u8 {
        self.x[self.index(node_x, node_y)]
    }

    pub fn y_index(&self, node_x: usize, node_y: usize) -> u8 {
        self.y[self.index(node_x, node_y)]
    }

    pub fn x_level(&self, node_x: usize, node_y: usize) -> f32 {
        PR_QUANT_LEVELS[self.x_index(node_x, node_y) as usize]
    }

    pub fn y_level(&self, node_x: usize, node_y: usize) -> f32 {
        PR_QUANT_LEVELS[self.y_index(node_x, node_y) as usize]
    }

    pub fn set_x(&mut self, node_x: usize, node_y: usize, quantum: u8) {
        let index = self.index(node_x, node_y);
        self.x[index] = quantum;
    }

    pub fn set_y(&mut self, node_x: usize, node_y: usize, quantum: u8) {
        let index = self.index(node_x, node_y);
        self.y[index] = quantum;
    }

    /// Raster iteration of one lattice for entropy coding; `vertical`
    /// selects PRy.
    pub fn lattice(&self, vertical: bool) -> &[u8] {
        if vertical {
            &self.y
        } else {
            &self.x
        }
    }

    pub fn lattice_mut(&mut self, vertical: bool) -> &mut [u8] {
        if vertical {
            &mut self.y
        } else {
            &mut self.x
        }
    }

    /// Occurrences of each quantum, the weights for the mesh Huffman
    /// code.
    pub fn count_quanta(&self) -> [u32; 5] {
        let mut counts = [0u32; 5];
        for &quantum in self.x.iter().chain(self.y.iter()) {
            counts[quantum as usize] += 1;
        }
        counts
    }

    /// Mean quantized PRx over the four corners of one block.
    pub fn block_mean_x(&self, block_x: usize, block_y: usize) -> f32 {
        (self.x_level(block_x, block_y)
            + self.x_level(block_x + 1, block_y)
            + self.x_level(block_x, block_y + 1)
            + self.x_level(block_x + 1, block_y + 1))
            / 4.0
    }

    pub fn block_mean_y(&self, block_x: usize, block_y: usize) -> f32 {
        (self.y_level(block_x, block_y)
            + self.y_level(block_x + 1, block_y)
            + self.y_level(block_x, block_y + 1)
            + self.y_level(block_x + 1, block_y + 1))
            / 4.0
    }
}

/// Largest relevance change any corner of the block saw between two
/// meshes. Drives the per-block intra-refresh decision of delta
/// frames on both sides of the codec.
pub fn block_movement(current: &PrMesh, last: &PrMesh, block_x: usize, block_y: usize) -> f32 {
    let mut movement = 0.0f32;
    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let nx = block_x + dx;
        let ny = block_y + dy;
        movement = movement
            .max((current.x_level(nx, ny) - last.x_level(nx, ny)).abs())
            .max((current.y_level(nx, ny) - last.y_level(nx, ny)).abs());
    }
    movement
}

fn luminance_bucket(difference: u32) -> u32 {
    if difference >= QUANT_LUM[3] {
        4
    } else if difference >= QUANT_LUM[2] {
        3
    } else if difference >= QUANT_LUM[1] {
        2
    } else if difference >= QUANT_LUM[0] {
        1
    } else {
        0
    }
}

/// Quantize an expanded relevance value to its level index.
pub fn quantize_level(expanded: f32) -> u8 {
    if expanded < PR_QUANT_LEVELS[1] {
        0
    } else if expanded < PR_QUANT_LEVELS[2] {
        1
    } else if expanded < PR_QUANT_LEVELS[3] {
        2
    } else if expanded < PR_QUANT_LEVELS[4] {
        3
    } else {
        4
    }
}

/// Sign-change-weighted difference statistic over one window, along
/// one scan direction.
fn window_relevance(
    luma: &[u8],
    width: usize,
    window: (usize, usize, usize, usize),
    stride: usize,
    vertical: bool,
) -> f32 {
    let (x_ini, x_fin, y_ini, y_fin) = window;
    let mut sum = 0u64;
    let mut samples = 0u64;

    if !vertical {
        let mut y = y_ini;
        while y < y_fin {
            let mut last_sign = 0i32;
            let mut x = x_ini + 1;
            while x < x_fin {
                let difference = i32::from(luma[y * width + x]) - i32::from(luma[y * width + x - 1]);
                samples += 1;
                let weight = luminance_bucket(difference.unsigned_abs());
                if weight > 0 {
                    let sign = difference.signum();
                    if sign != last_sign || weight == 4 {
                        sum += u64::from(weight);
                    }
                    last_sign = sign;
                }
                x += stride;
            }
            y += stride;
        }
    } else {
        let mut x = x_ini;
        while x < x_fin {
            let mut last_sign = 0i32;
            let mut y = y_ini + 1;
            while y < y_fin {
                let difference =
                    i32::from(luma[y * width + x]) - i32::from(luma[(y - 1) * width + x]);
                samples += 1;
                let weight = luminance_bucket(difference.unsigned_abs());
                if weight > 0 {
                    let sign = difference.signum();
                    if sign != last_sign || weight == 4 {
                        sum += u64::from(weight);
                    }
                    last_sign = sign;
                }
                y += stride;
            }
            x += stride;
        }
    }

    if samples == 0 {
        return 0.0;
    }
    (sum as f32 / (4 * samples) as f32).min(0.5)
}

/// Relevance forced by the first matching protected rectangle. The
/// scan terminates at the first inactive entry.
fn forced_relevance(
    rectangles: &[ProtectedRectangle],
    window: (usize, usize, usize, usize),
) -> Option<bool> {
    let (x_ini, x_fin, y_ini, y_fin) = window;
    let mut forced = None;
    for rectangle in rectangles {
        if !rectangle.active {
            break;
        }
        if x_ini < rectangle.x_fin
            && rectangle.x_ini < x_fin
            && y_ini < rectangle.y_fin
            && rectangle.y_ini < y_fin
        {
            forced = Some(rectangle.protection);
        }
    }
    forced
}

/// Compute, expand and quantize both relevance lattices over the
/// original luma plane.
pub fn compute_pr_mesh(
    luma: &[u8],
    width: usize,
    height: usize,
    grid: &BlockGrid,
    rectangles: &[ProtectedRectangle],
) -> PrMesh {
    let mut mesh = PrMesh::new(grid.blocks_w, grid.blocks_h);
    let stride = (width / 128).max(1);
    let half_w = grid.theoretical_w / 2;
    let half_h = grid.theoretical_h / 2;

    for node_y in 0..mesh.rows() {
        for node_x in 0..mesh.cols() {
            let center_x = (node_x * grid.theoretical_w).min(width);
            let center_y = (node_y * grid.theoretical_h).min(height);
            let window = (
                center_x.saturating_sub(half_w),
                (center_x + half_w).min(width),
                center_y.saturating_sub(half_h),
                (center_y + half_h).min(height),
            );

            if let Some(protection) = forced_relevance(rectangles, window) {
                let quantum = if protection { 4 } else { 0 };
                mesh.set_x(node_x, node_y, quantum);
                mesh.set_y(node_x, node_y, quantum);
                continue;
            }

            let raw_x = window_relevance(luma, width, window, stride, false);
            let raw_y = window_relevance(luma, width, window, stride, true);
            let expanded_x = ((raw_x - PR_MIN) / PR_DIF).clamp(0.0, 1.0);
            let expanded_y = ((raw_y - PR_MIN) / PR_DIF).clamp(0.0, 1.0);
            mesh.set_x(node_x, node_y, quantize_level(expanded_x));
            mesh.set_y(node_x, node_y, quantize_level(expanded_y));
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_dimensions;

    fn grid_for(width: usize, height: usize) -> BlockGrid {
        let (bw, bh) = mesh_dimensions(width, height).unwrap();
        BlockGrid::new(width, height, bw, bh).unwrap()
    }

    #[test]
    fn flat_plane_has_zero_relevance() {
        let width = 64;
        let height = 64;
        let luma = vec![128u8; width * height];
        let mesh = compute_pr_mesh(&luma, width, height, &grid_for(width, height), &[]);
        assert!(mesh.lattice(false).iter().all(|&q| q == 0));
        assert!(mesh.lattice(true).iter().all(|&q| q == 0));
    }

    #[test]
    fn horizontal_ramp_is_horizontally_relevant_only() {
        let width = 32;
        let height = 32;
        let mut luma = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                luma[y * width + x] = (x * 8).min(255) as u8;
            }
        }
        let mesh = compute_pr_mesh(&luma, width, height, &grid_for(width, height), &[]);
        for node_y in 0..mesh.rows() {
            for node_x in 1..mesh.cols() - 1 {
                assert!(
                    mesh.x_index(node_x, node_y) >= 2,
                    "interior PRx must be at least the mid quantum"
                );
            }
        }
        assert!(mesh.lattice(true).iter().all(|&q| q == 0));
    }

    #[test]
    fn checkerboard_saturates_both_lattices() {
        let width = 64;
        let height = 64;
        let mut luma = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                luma[y * width + x] = if (x + y) % 2 == 0 { 255 } else { 0 };
            }
        }
        let mesh = compute_pr_mesh(&luma, width, height, &grid_for(width, height), &[]);
        assert!(mesh.lattice(false).iter().all(|&q| q == 4));
        assert!(mesh.lattice(true).iter().all(|&q| q == 4));
    }

    #[test]
    fn protection_pins_relevance() {
        let width = 64;
        let height = 64;
        let luma = vec![128u8; width * height];
        let rectangles = [ProtectedRectangle {
            x_ini: 16,
            x_fin: 32,
            y_ini: 16,
            y_fin: 32,
            protection: true,
            active: true,
        }];
        let mesh = compute_pr_mesh(&luma, width, height, &grid_for(width, height), &rectangles);
        // Nodes whose windows touch the rectangle are pinned to full
        // relevance; far-away corners stay flat.
        assert_eq!(mesh.x_index(2, 2), 4);
        assert_eq!(mesh.x_index(4, 4), 4);
        assert_eq!(mesh.x_index(0, 0), 0);
        assert_eq!(mesh.y_index(3, 3), 4);
    }

    #[test]
    fn inactive_rectangle_stops_the_scan() {
        let width = 64;
        let height = 64;
        let luma = vec![128u8; width * height];
        let rectangles = [
            ProtectedRectangle {
                x_ini: 0,
                x_fin: 64,
                y_ini: 0,
                y_fin: 64,
                protection: true,
                active: false,
            },
            ProtectedRectangle {
                x_ini: 0,
                x_fin: 64,
                y_ini: 0,
                y_fin: 64,
                protection: true,
                active: true,
            },
        ];
        let mesh = compute_pr_mesh(&luma, width, height, &grid_for(width, height), &rectangles);
        assert!(mesh.lattice(false).iter().all(|&q| q == 0));
    }

    #[test]
    fn movement_tracks_the_largest_corner_change() {
        let mut current = PrMesh::new(4, 4);
        let last = PrMesh::new(4, 4);
        assert_eq!(block_movement(&current, &last, 1, 1), 0.0);
        current.set_x(2, 2, 3);
        assert!((block_movement(&current, &last, 1, 1) - 0.5).abs() < 1e-6);
        assert!((block_movement(&current, &last, 2, 2) - 0.5).abs() < 1e-6);
        assert_eq!(block_movement(&current, &last, 0, 0), 0.0);
    }
}
