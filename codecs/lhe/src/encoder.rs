//! Frame encoder
//!
//! Owns every per-plane working buffer and the double-buffered
//! references of the video profile. The first encoded frame of a
//! session is always intra (basic or advanced); subsequent frames are
//! delta frames whose blocks individually fall back to intra coding
//! when the scene moves or their refresh TTL runs out.

use crate::constants::{MOVEMENT_THRESHOLD, REFINEMENT_TTL};
use crate::delta::{adapt_block, compand, decompand};
use crate::entropy::{HopWriter, MeshHuffman};
use crate::error::{Error, Result};
use crate::frame::{chroma_extent, YuvFrame};
use crate::geometry::{
    antidiagonals, build_advanced_mesh, mesh_dimensions, AdvancedMesh, BlockGrid, BlockSpan,
};
use crate::mesh::{block_movement, compute_pr_mesh, PrMesh};
use crate::parser::BitWriter;
use crate::predictor::{advanced_block_seeds, clamp_sample, encode_block, BlockSeeds};
use crate::resample::downsample_block;
use crate::types::{EncoderConfig, EncoderFlags, Hop, LheMode, ProtectedRectangle};

use log::{debug, trace};

struct PlaneState {
    width: usize,
    height: usize,
    grid: BlockGrid,
    /// Elastically reduced original samples.
    downsampled: Vec<u8>,
    /// Hop reconstruction of intra-coded content.
    reconstruction: Vec<u8>,
    /// Companded residual, the input of delta hop coding.
    delta: Vec<u8>,
    /// Hop reconstruction of the delta plane.
    delta_recon: Vec<u8>,
    /// Previous reconstruction remapped to current geometry.
    adapted: Vec<u8>,
    /// Double-buffered downsampled reference planes.
    reference: [Vec<u8>; 2],
    hops: Vec<u8>,
    scratch: Vec<u8>,
}

impl PlaneState {
    fn new(width: usize, height: usize, blocks_w: usize, blocks_h: usize) -> Result<PlaneState> {
        let grid = BlockGrid::new(width, height, blocks_w, blocks_h)?;
        let size = width * height;
        Ok(PlaneState {
            width,
            height,
            grid,
            downsampled: vec![0; size],
            reconstruction: vec![0; size],
            delta: vec![0; size],
            delta_recon: vec![0; size],
            adapted: vec![0; size],
            reference: [vec![0; size], vec![0; size]],
            hops: vec![0; size],
            scratch: vec![0; size],
        })
    }
}

/// LHE/MLHE encoder.
pub struct LheEncoder {
    config: EncoderConfig,
    blocks_w: usize,
    blocks_h: usize,
    planes: [PlaneState; 3],
    /// Advanced-block lattices per plane kind (luma, chroma), double
    /// buffered: `[current, last]` selected by `current_index`.
    advanced_y: [AdvancedMesh; 2],
    advanced_uv: [AdvancedMesh; 2],
    meshes: [PrMesh; 2],
    /// Selects the "current" half of the double buffers.
    current_index: usize,
    /// Selects the "last" half of the reference planes.
    reference_index: usize,
    /// Remaining intra-refresh TTL per block.
    ttl: Vec<u8>,
    rectangles: Vec<ProtectedRectangle>,
    rectangles_ttl: u32,
    input_frames: u64,
    encoded_frames: u64,
    metrics_mesh: Option<PrMesh>,
}

impl LheEncoder {
    pub fn new(config: EncoderConfig) -> Result<LheEncoder> {
        config.validate()?;

        let (blocks_w, blocks_h) = mesh_dimensions(config.width, config.height)?;
        let (cfw, cfh) = config.pixel_format.chroma_factors();
        let chroma_w = chroma_extent(config.width, cfw);
        let chroma_h = chroma_extent(config.height, cfh);

        let planes = [
            PlaneState::new(config.width, config.height, blocks_w, blocks_h)?,
            PlaneState::new(chroma_w, chroma_h, blocks_w, blocks_h)?,
            PlaneState::new(chroma_w, chroma_h, blocks_w, blocks_h)?,
        ];

        let rectangles = config.rectangles.clone();
        let rectangles_ttl = config.rectangles_ttl;

        Ok(LheEncoder {
            blocks_w,
            blocks_h,
            planes,
            advanced_y: [
                AdvancedMesh::new(blocks_w, blocks_h),
                AdvancedMesh::new(blocks_w, blocks_h),
            ],
            advanced_uv: [
                AdvancedMesh::new(blocks_w, blocks_h),
                AdvancedMesh::new(blocks_w, blocks_h),
            ],
            meshes: [PrMesh::new(blocks_w, blocks_h), PrMesh::new(blocks_w, blocks_h)],
            current_index: 0,
            reference_index: 0,
            ttl: vec![0; blocks_w * blocks_h],
            rectangles,
            rectangles_ttl,
            input_frames: 0,
            encoded_frames: 0,
            metrics_mesh: None,
            config,
        })
    }

    /// Encode the next frame. Returns `Ok(None)` when the frame is
    /// dropped by the configured skip stride; dropped frames advance
    /// neither references nor TTLs.
    pub fn encode_frame(&mut self, frame: &YuvFrame) -> Result<Option<Vec<u8>>> {
        if frame.width() != self.config.width
            || frame.height() != self.config.height
            || frame.pixel_format() != self.config.pixel_format
        {
            return Err(Error::InvalidConfiguration);
        }

        let index = self.input_frames;
        self.input_frames += 1;
        if self.config.skip_frames > 0 && index % (u64::from(self.config.skip_frames) + 1) != 0 {
            trace!("dropping input frame {index}");
            return Ok(None);
        }

        let packet = if self.config.flags.contains(EncoderFlags::FORCE_BASIC) {
            self.encode_basic(frame)
        } else if self.encoded_frames == 0 {
            self.encode_advanced(frame)?
        } else {
            self.encode_delta(frame)?
        };

        self.encoded_frames += 1;
        self.expire_rectangles();
        Ok(Some(packet))
    }

    /// The reconstruction the decoder will reproduce for a plane of
    /// the last encoded frame: full-resolution for basic frames,
    /// downsampled elsewhere.
    pub fn reconstruction(&self, plane: usize) -> &[u8] {
        &self.planes[plane].reconstruction
    }

    /// Downsampled reference plane the next delta frame will code
    /// against.
    pub fn reference(&self, plane: usize) -> &[u8] {
        &self.planes[plane].reference[self.reference_index]
    }

    /// Quantized relevance meshes of the last advanced or delta
    /// frame. Only retained with [`EncoderFlags::PR_METRICS`].
    pub fn pr_metrics(&self) -> Option<&PrMesh> {
        self.metrics_mesh.as_ref()
    }

    fn expire_rectangles(&mut self) {
        if self.rectangles_ttl > 0 {
            self.rectangles_ttl -= 1;
            if self.rectangles_ttl == 0 {
                if let Some(first) = self.rectangles.first_mut() {
                    first.active = false;
                }
            }
        }
    }

    fn advanced_kind(&self, plane: usize, index: usize) -> &AdvancedMesh {
        if plane == 0 {
            &self.advanced_y[index]
        } else {
            &self.advanced_uv[index]
        }
    }

    // ---- basic profile ----------------------------------------------------

    fn encode_basic(&mut self, frame: &YuvFrame) -> Vec<u8> {
        let mut seeds = [0u8; 3];
        for plane in 0..3 {
            seeds[plane] = clamp_sample(i32::from(frame.plane(plane)[0]));
        }

        let mut writer = BitWriter::new();
        write_image_header(&mut writer, LheMode::Basic, frame, &seeds);

        for plane in 0..3 {
            let state = &mut self.planes[plane];
            let span = BlockSpan {
                x_ini: 0,
                x_fin: state.width,
                y_ini: 0,
                y_fin: state.height,
            };
            let block_seeds = BlockSeeds {
                seed: Some(seeds[plane]),
                ..Default::default()
            };
            encode_block(
                frame.plane(plane),
                &mut state.reconstruction,
                &mut state.hops,
                state.width,
                span,
                &block_seeds,
                false,
            );
            write_plane_hops_raw(&mut writer, &state.hops, state.width, span);
        }

        debug!(
            "basic frame: {}x{} -> {} bits",
            frame.width(),
            frame.height(),
            writer.bit_count()
        );
        writer.finish()
    }

    // ---- advanced profile -------------------------------------------------

    fn encode_advanced(&mut self, frame: &YuvFrame) -> Result<Vec<u8>> {
        let current = self.current_index;
        let mesh = compute_pr_mesh(
            frame.plane(0),
            self.config.width,
            self.config.height,
            &self.planes[0].grid,
            &self.rectangles,
        );
        self.meshes[current] = mesh;

        let ql = self.config.quality_level;
        self.advanced_y[current] = build_advanced_mesh(&self.planes[0].grid, &self.meshes[current], ql)?;
        self.advanced_uv[current] =
            build_advanced_mesh(&self.planes[1].grid, &self.meshes[current], ql)?;

        let mut seeds = [0u8; 3];
        for plane in 0..3 {
            self.downsample_plane(frame, plane);
            let state = &self.planes[plane];
            seeds[plane] = clamp_sample(i32::from(state.downsampled[0]));
        }

        for plane in 0..3 {
            self.intra_code_plane(plane, seeds[plane]);
        }

        let huffman = MeshHuffman::build(&self.meshes[current].count_quanta());
        let mut writer = BitWriter::new();
        write_image_header(&mut writer, LheMode::Advanced, frame, &seeds);
        huffman.write_table(&mut writer);
        writer.put_bits(u32::from(ql), 8);
        write_mesh(&mut writer, &huffman, &self.meshes[current]);
        for plane in 0..3 {
            self.write_plane_hops(&mut writer, plane, current);
        }

        // The intra reconstruction is the next frame's reference.
        let next = 1 - self.reference_index;
        for plane in 0..3 {
            let state = &mut self.planes[plane];
            state.reference[next].copy_from_slice(&state.reconstruction);
        }
        self.reference_index = next;
        self.ttl.fill(self.config.block_gop);
        self.finish_frame_state();

        debug!(
            "advanced frame: ql {} -> {} bits",
            ql,
            writer.bit_count()
        );
        Ok(writer.finish())
    }

    // ---- delta profile ----------------------------------------------------

    fn encode_delta(&mut self, frame: &YuvFrame) -> Result<Vec<u8>> {
        let current = self.current_index;
        let last = 1 - current;
        let mut mesh = compute_pr_mesh(
            frame.plane(0),
            self.config.width,
            self.config.height,
            &self.planes[0].grid,
            &self.rectangles,
        );

        // Boost static blocks about to be refreshed so the intra pass
        // receives full detail.
        for block_y in 0..self.blocks_h {
            for block_x in 0..self.blocks_w {
                if self.ttl[block_y * self.blocks_w + block_x] <= REFINEMENT_TTL {
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        mesh.set_x(block_x + dx, block_y + dy, 4);
                        mesh.set_y(block_x + dx, block_y + dy, 4);
                    }
                }
            }
        }
        self.meshes[current] = mesh;

        let ql = self.config.quality_level;
        self.advanced_y[current] = build_advanced_mesh(&self.planes[0].grid, &self.meshes[current], ql)?;
        self.advanced_uv[current] =
            build_advanced_mesh(&self.planes[1].grid, &self.meshes[current], ql)?;

        // Per-block intra/delta decisions, shared by every plane.
        let mut intra = vec![false; self.blocks_w * self.blocks_h];
        let mut refreshed = 0usize;
        for block_y in 0..self.blocks_h {
            for block_x in 0..self.blocks_w {
                let index = block_y * self.blocks_w + block_x;
                let movement = block_movement(
                    &self.meshes[current],
                    &self.meshes[last],
                    block_x,
                    block_y,
                );
                if movement > MOVEMENT_THRESHOLD || self.ttl[index] == 0 {
                    intra[index] = true;
                    self.ttl[index] = self.config.block_gop;
                    refreshed += 1;
                } else {
                    self.ttl[index] -= 1;
                }
            }
        }
        debug!(
            "delta frame {}: {refreshed}/{} blocks refreshed",
            self.encoded_frames,
            intra.len()
        );

        let mut seeds = [0u8; 3];
        let next = 1 - self.reference_index;
        for plane in 0..3 {
            self.downsample_plane(frame, plane);
            self.delta_code_plane(plane, &intra, &mut seeds);
        }

        let huffman = MeshHuffman::build(&self.meshes[current].count_quanta());
        let mut writer = BitWriter::new();
        writer.put_bits(u32::from(LheMode::Delta.code()), 2);
        for seed in seeds {
            writer.put_bits(u32::from(seed), 8);
        }
        writer.put_bits(u32::from(self.config.block_gop), 8);
        huffman.write_table(&mut writer);
        write_mesh(&mut writer, &huffman, &self.meshes[current]);
        for plane in 0..3 {
            self.write_plane_hops(&mut writer, plane, current);
        }

        self.reference_index = next;
        self.finish_frame_state();
        Ok(writer.finish())
    }

    // ---- shared passes ----------------------------------------------------

    fn downsample_plane(&mut self, frame: &YuvFrame, plane: usize) {
        let advanced = if plane == 0 {
            &self.advanced_y[self.current_index]
        } else {
            &self.advanced_uv[self.current_index]
        };
        let state = &mut self.planes[plane];
        for (bx, by) in state.grid.blocks() {
            downsample_block(
                frame.plane(plane),
                &mut state.scratch,
                &mut state.downsampled,
                state.width,
                state.grid.span(bx, by),
                advanced.get(bx, by),
                self.config.down_mode,
            );
        }
    }

    fn intra_code_plane(&mut self, plane: usize, seed: u8) {
        let advanced = if plane == 0 {
            &self.advanced_y[self.current_index]
        } else {
            &self.advanced_uv[self.current_index]
        };
        let state = &mut self.planes[plane];
        let always = |_: usize, _: usize| true;
        for group in antidiagonals(state.grid.blocks_w, state.grid.blocks_h) {
            for (bx, by) in group {
                let seeds = advanced_block_seeds(advanced, bx, by, seed, &always);
                encode_block(
                    &state.downsampled,
                    &mut state.reconstruction,
                    &mut state.hops,
                    state.width,
                    advanced.down_span(&state.grid, bx, by),
                    &seeds,
                    false,
                );
            }
        }
    }

    fn delta_code_plane(&mut self, plane: usize, intra: &[bool], seeds: &mut [u8; 3]) {
        let current = self.current_index;
        let last_index = 1 - current;
        let next = 1 - self.reference_index;
        let advanced = if plane == 0 {
            &self.advanced_y[current]
        } else {
            &self.advanced_uv[current]
        };
        let previous = if plane == 0 {
            &self.advanced_y[last_index]
        } else {
            &self.advanced_uv[last_index]
        };
        let blocks_w = self.blocks_w;
        let reference_index = self.reference_index;
        let state = &mut self.planes[plane];
        let stride = state.width;

        // Seed of an intra origin block; a delta origin block's seed
        // is captured once its residual exists.
        if intra[0] {
            seeds[plane] = clamp_sample(i32::from(state.downsampled[0]));
        }

        for group in antidiagonals(state.grid.blocks_w, state.grid.blocks_h) {
            for (bx, by) in group {
                let block_intra = intra[by * blocks_w + bx];
                let span = state.grid.span(bx, by);
                let down = advanced.down_span(&state.grid, bx, by);

                if block_intra {
                    let eligible = |x: usize, y: usize| intra[y * blocks_w + x];
                    let seeds_block =
                        advanced_block_seeds(advanced, bx, by, seeds[plane], &eligible);
                    encode_block(
                        &state.downsampled,
                        &mut state.reconstruction,
                        &mut state.hops,
                        stride,
                        down,
                        &seeds_block,
                        false,
                    );
                    // The reconstruction doubles as the player image.
                    for y in down.y_ini..down.y_fin {
                        for x in down.x_ini..down.x_fin {
                            state.reference[next][y * stride + x] =
                                state.reconstruction[y * stride + x];
                        }
                    }
                } else {
                    adapt_block(
                        &state.reference[reference_index],
                        &mut state.adapted,
                        stride,
                        span,
                        advanced.get(bx, by),
                        previous.get(bx, by),
                    );
                    for y in down.y_ini..down.y_fin {
                        for x in down.x_ini..down.x_fin {
                            let index = y * stride + x;
                            let residual = i32::from(state.downsampled[index])
                                - i32::from(state.adapted[index]);
                            state.delta[index] = compand(residual);
                        }
                    }
                    if bx == 0 && by == 0 {
                        seeds[plane] = state.delta[0];
                    }
                    let eligible = |x: usize, y: usize| !intra[y * blocks_w + x];
                    let seeds_block =
                        advanced_block_seeds(advanced, bx, by, seeds[plane], &eligible);
                    encode_block(
                        &state.delta,
                        &mut state.delta_recon,
                        &mut state.hops,
                        stride,
                        down,
                        &seeds_block,
                        true,
                    );
                    for y in down.y_ini..down.y_fin {
                        for x in down.x_ini..down.x_fin {
                            let index = y * stride + x;
                            let player = i32::from(state.adapted[index])
                                + decompand(state.delta_recon[index]);
                            state.reference[next][index] = clamp_sample(player);
                        }
                    }
                }
            }
        }
    }

    fn write_plane_hops(&self, writer: &mut BitWriter, plane: usize, mesh_index: usize) {
        let advanced = self.advanced_kind(plane, mesh_index);
        let state = &self.planes[plane];
        let mut hop_writer = HopWriter::new();
        for (bx, by) in state.grid.blocks() {
            let down = advanced.down_span(&state.grid, bx, by);
            for y in down.y_ini..down.y_fin {
                for x in down.x_ini..down.x_fin {
                    let hop = Hop::from_index(state.hops[y * state.width + x]).unwrap_or(Hop::Zero);
                    hop_writer.write_hop(writer, hop);
                }
            }
        }
        hop_writer.finish_plane(writer);
    }

    fn finish_frame_state(&mut self) {
        if self.config.flags.contains(EncoderFlags::PR_METRICS) {
            self.metrics_mesh = Some(self.meshes[self.current_index].clone());
        }
        // Flip the current/last halves; no data moves.
        self.current_index = 1 - self.current_index;
    }
}

// ---- bitstream helpers ----------------------------------------------------

fn write_image_header(writer: &mut BitWriter, mode: LheMode, frame: &YuvFrame, seeds: &[u8; 3]) {
    writer.put_bits(u32::from(mode.code()), 2);
    writer.put_bits(u32::from(frame.pixel_format().code()), 3);
    writer.put_bits(frame.width() as u32, 16);
    writer.put_bits(frame.height() as u32, 16);
    for &seed in seeds {
        writer.put_bits(u32::from(seed), 8);
    }
}

fn write_mesh(writer: &mut BitWriter, huffman: &MeshHuffman, mesh: &PrMesh) {
    for vertical in [false, true] {
        for &quantum in mesh.lattice(vertical) {
            huffman.encode(writer, quantum);
        }
    }
}

fn write_plane_hops_raw(writer: &mut BitWriter, hops: &[u8], stride: usize, span: BlockSpan) {
    let mut hop_writer = HopWriter::new();
    for y in span.y_ini..span.y_fin {
        for x in span.x_ini..span.x_fin {
            let hop = Hop::from_index(hops[y * stride + x]).unwrap_or(Hop::Zero);
            hop_writer.write_hop(writer, hop);
        }
    }
    hop_writer.finish_plane(writer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;

    #[test]
    fn constant_basic_frame_is_all_zero_hops() {
        let mut config = EncoderConfig::new(8, 8, PixelFormat::Yuv420);
        config.flags = EncoderFlags::FORCE_BASIC;
        config.quality_level = 25;
        let mut encoder = LheEncoder::new(config).unwrap();

        let mut frame = YuvFrame::new(8, 8, PixelFormat::Yuv420);
        frame.fill(128, 128);
        let packet = encoder.encode_frame(&frame).unwrap().unwrap();
        assert!(!packet.is_empty());

        assert!(encoder.planes[0]
            .hops
            .iter()
            .all(|&h| h == Hop::Zero.index()));
        assert_eq!(encoder.reconstruction(0), frame.plane(0));
    }

    #[test]
    fn skip_stride_drops_frames_without_advancing_state() {
        let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
        config.skip_frames = 1;
        let mut encoder = LheEncoder::new(config).unwrap();
        let mut frame = YuvFrame::new(16, 16, PixelFormat::Yuv444);
        frame.fill(90, 120);

        assert!(encoder.encode_frame(&frame).unwrap().is_some());
        let encoded = encoder.encoded_frames;
        assert!(encoder.encode_frame(&frame).unwrap().is_none());
        assert_eq!(encoder.encoded_frames, encoded);
        assert!(encoder.encode_frame(&frame).unwrap().is_some());
    }

    #[test]
    fn mismatched_frame_geometry_is_rejected() {
        let config = EncoderConfig::new(32, 32, PixelFormat::Yuv420);
        let mut encoder = LheEncoder::new(config).unwrap();
        let frame = YuvFrame::new(16, 16, PixelFormat::Yuv420);
        assert_eq!(
            encoder.encode_frame(&frame),
            Err(Error::InvalidConfiguration)
        );
    }

    #[test]
    fn second_frame_switches_to_delta_mode() {
        let config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
        let mut encoder = LheEncoder::new(config).unwrap();
        let mut frame = YuvFrame::new(16, 16, PixelFormat::Yuv444);
        frame.fill(100, 100);

        let first = encoder.encode_frame(&frame).unwrap().unwrap();
        assert_eq!(first[0] >> 6, LheMode::Advanced.code());
        let second = encoder.encode_frame(&frame).unwrap().unwrap();
        assert_eq!(second[0] >> 6, LheMode::Delta.code());
    }

    #[test]
    fn static_scene_keeps_blocks_in_delta_mode() {
        let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
        config.block_gop = 30;
        let mut encoder = LheEncoder::new(config).unwrap();
        let mut frame = YuvFrame::new(16, 16, PixelFormat::Yuv444);
        frame.fill(100, 100);

        encoder.encode_frame(&frame).unwrap();
        assert!(encoder.ttl.iter().all(|&t| t == 30));
        encoder.encode_frame(&frame).unwrap();
        assert!(encoder.ttl.iter().all(|&t| t == 29));

        // A static delta frame codes every downsampled sample as a
        // ZERO hop.
        let advanced = &encoder.advanced_y[1 - encoder.current_index];
        let state = &encoder.planes[0];
        for (bx, by) in state.grid.blocks() {
            let down = advanced.down_span(&state.grid, bx, by);
            for y in down.y_ini..down.y_fin {
                for x in down.x_ini..down.x_fin {
                    assert_eq!(state.hops[y * state.width + x], Hop::Zero.index());
                }
            }
        }
    }

    #[test]
    fn rectangle_list_expires_with_its_ttl() {
        let mut config = EncoderConfig::new(64, 64, PixelFormat::Yuv444);
        config.rectangles.push(ProtectedRectangle {
            x_ini: 16,
            x_fin: 32,
            y_ini: 16,
            y_fin: 32,
            protection: true,
            active: true,
        });
        config.rectangles_ttl = 2;
        let mut encoder = LheEncoder::new(config).unwrap();
        let mut frame = YuvFrame::new(64, 64, PixelFormat::Yuv444);
        frame.fill(128, 128);

        encoder.encode_frame(&frame).unwrap();
        assert!(encoder.rectangles[0].active);
        encoder.encode_frame(&frame).unwrap();
        assert!(!encoder.rectangles[0].active);
    }
}
