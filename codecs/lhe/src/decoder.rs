//! Frame decoder
//!
//! Parses packets, rebuilds the elastic geometry from the transmitted
//! relevance mesh, replays the hop predictor, and upsamples the
//! reduced planes back to frame size. Delta packets are refused until
//! an intra frame has established a reference, and any failed packet
//! poisons the reference until the next intra frame decodes.

use crate::constants::{MAX_QUALITY_LEVEL, MOVEMENT_THRESHOLD, RLC2_MAX};
use crate::delta::{adapt_block, decompand};
use crate::entropy::{HopReader, MeshHuffman};
use crate::error::{Error, Result};
use crate::frame::{chroma_extent, YuvFrame};
use crate::geometry::{
    antidiagonals, build_advanced_mesh, mesh_dimensions, AdvancedMesh, BlockGrid, BlockSpan,
};
use crate::mesh::{block_movement, PrMesh};
use crate::parser::LheReader;
use crate::predictor::{advanced_block_seeds, clamp_sample, decode_block, BlockSeeds};
use crate::resample::upsample_plane;
use crate::types::{LheMode, PixelFormat};

use log::debug;

struct PlaneState {
    width: usize,
    grid: BlockGrid,
    /// Intra hop reconstruction (downsampled domain).
    reconstruction: Vec<u8>,
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
            grid,
            reconstruction: vec![0; size],
            delta_recon: vec![0; size],
            adapted: vec![0; size],
            reference: [vec![0; size], vec![0; size]],
            hops: vec![0; size],
            scratch: vec![0; size],
        })
    }
}

/// Geometry and profile state shared by consecutive packets of one
/// stream.
struct StreamState {
    width: usize,
    height: usize,
    pixel_format: PixelFormat,
    quality_level: u8,
    blocks_w: usize,
    blocks_h: usize,
    planes: [PlaneState; 3],
    advanced_y: [AdvancedMesh; 2],
    advanced_uv: [AdvancedMesh; 2],
    meshes: [PrMesh; 2],
    current_index: usize,
    reference_index: usize,
    ttl: Vec<u8>,
    ttl_primed: bool,
}

impl StreamState {
    fn new(width: usize, height: usize, pixel_format: PixelFormat) -> Result<StreamState> {
        let (blocks_w, blocks_h) = mesh_dimensions(width, height)?;
        let (cfw, cfh) = pixel_format.chroma_factors();
        let chroma_w = chroma_extent(width, cfw);
        let chroma_h = chroma_extent(height, cfh);
        Ok(StreamState {
            width,
            height,
            pixel_format,
            quality_level: 0,
            blocks_w,
            blocks_h,
            planes: [
                PlaneState::new(width, height, blocks_w, blocks_h)?,
                PlaneState::new(chroma_w, chroma_h, blocks_w, blocks_h)?,
                PlaneState::new(chroma_w, chroma_h, blocks_w, blocks_h)?,
            ],
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
            ttl_primed: false,
        })
    }

    fn advanced_kind(&self, plane: usize, index: usize) -> &AdvancedMesh {
        if plane == 0 {
            &self.advanced_y[index]
        } else {
            &self.advanced_uv[index]
        }
    }
}

/// LHE/MLHE decoder.
pub struct LheDecoder {
    stream: Option<StreamState>,
    /// A reference frame exists and is intact.
    have_reference: bool,
}

impl LheDecoder {
    pub fn new() -> LheDecoder {
        LheDecoder {
            stream: None,
            have_reference: false,
        }
    }

    /// Decode one packet into a frame.
    pub fn decode_frame(&mut self, packet: &[u8]) -> Result<YuvFrame> {
        let result = self.decode_inner(packet);
        if result.is_err() {
            // A corrupted frame invalidates every following delta
            // frame until the next intra frame decodes.
            self.have_reference = false;
        }
        result
    }

    /// Downsampled reconstruction of the last decoded advanced or
    /// delta frame, i.e. the reference the next delta frame codes
    /// against.
    pub fn reference(&self, plane: usize) -> Option<&[u8]> {
        self.stream
            .as_ref()
            .map(|stream| stream.planes[plane].reference[stream.reference_index].as_slice())
    }

    fn decode_inner(&mut self, packet: &[u8]) -> Result<YuvFrame> {
        let mut reader = LheReader::new(packet);
        let mode = LheMode::from_code(reader.read_bits::<u8>(2)?)?;
        match mode {
            LheMode::Basic => self.decode_basic(&mut reader),
            LheMode::Advanced => self.decode_advanced(&mut reader),
            LheMode::Delta => self.decode_delta(&mut reader),
        }
    }

    fn read_image_header(reader: &mut LheReader<'_>) -> Result<(usize, usize, PixelFormat, [u8; 3])> {
        let pixel_format = PixelFormat::from_code(reader.read_bits::<u8>(3)?)?;
        let width = reader.read_bits::<u16>(16)? as usize;
        let height = reader.read_bits::<u16>(16)? as usize;
        if width == 0 || height == 0 {
            return Err(Error::InvalidHeader);
        }
        let mut seeds = [0u8; 3];
        for seed in seeds.iter_mut() {
            *seed = reader.read_u8()?;
        }
        Ok((width, height, pixel_format, seeds))
    }

    /// Cheapest possible encoding of `samples` hops: almost all of
    /// them folded into maximal run-length fields. A reader with
    /// fewer bits than this cannot carry the plane payloads, so the
    /// packet is rejected before any plane allocation.
    fn check_bit_budget(reader: &LheReader<'_>, samples: usize) -> Result<()> {
        if reader.remaining_bits() < samples / RLC2_MAX as usize {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    fn ensure_stream(
        &mut self,
        width: usize,
        height: usize,
        pixel_format: PixelFormat,
    ) -> Result<&mut StreamState> {
        let rebuild = match &self.stream {
            Some(stream) => {
                stream.width != width
                    || stream.height != height
                    || stream.pixel_format != pixel_format
            }
            None => true,
        };
        if rebuild {
            self.stream = Some(StreamState::new(width, height, pixel_format)?);
            self.have_reference = false;
        }
        Ok(self.stream.as_mut().expect("stream state was just ensured"))
    }

    // ---- basic profile ----------------------------------------------------

    fn decode_basic(&mut self, reader: &mut LheReader<'_>) -> Result<YuvFrame> {
        let (width, height, pixel_format, seeds) = Self::read_image_header(reader)?;
        let (cfw, cfh) = pixel_format.chroma_factors();
        let chroma_samples = chroma_extent(width, cfw) * chroma_extent(height, cfh);
        Self::check_bit_budget(reader, width * height + 2 * chroma_samples)?;

        let mut frame = YuvFrame::new(width, height, pixel_format);
        for plane in 0..3 {
            let (plane_w, plane_h) = frame.plane_dimensions(plane);
            let span = BlockSpan {
                x_ini: 0,
                x_fin: plane_w,
                y_ini: 0,
                y_fin: plane_h,
            };
            let mut hops = vec![0u8; plane_w * plane_h];
            read_plane_hops_raw(reader, &mut hops, plane_w, span)?;
            let block_seeds = BlockSeeds {
                seed: Some(seeds[plane]),
                ..Default::default()
            };
            decode_block(&hops, frame.plane_mut(plane), plane_w, span, &block_seeds, false);
        }

        debug!("decoded basic frame {width}x{height}");
        Ok(frame)
    }

    // ---- advanced profile -------------------------------------------------

    fn decode_advanced(&mut self, reader: &mut LheReader<'_>) -> Result<YuvFrame> {
        let (width, height, pixel_format, seeds) = Self::read_image_header(reader)?;
        let huffman = MeshHuffman::read_table(reader)?;
        let quality_level = reader.read_u8()?;
        if quality_level > MAX_QUALITY_LEVEL {
            return Err(Error::InvalidHeader);
        }

        let stream = self.ensure_stream(width, height, pixel_format)?;
        let current = stream.current_index;
        read_mesh(reader, &huffman, &mut stream.meshes[current])?;
        stream.quality_level = quality_level;
        stream.advanced_y[current] =
            build_advanced_mesh(&stream.planes[0].grid, &stream.meshes[current], quality_level)?;
        stream.advanced_uv[current] =
            build_advanced_mesh(&stream.planes[1].grid, &stream.meshes[current], quality_level)?;

        let expected: usize = (0..3)
            .map(|plane| stream.advanced_kind(plane, current).coded_samples())
            .sum();
        Self::check_bit_budget(reader, expected)?;

        let mut frame = YuvFrame::new(width, height, pixel_format);
        let stream = self.stream.as_mut().expect("stream state exists");
        for plane in 0..3 {
            decode_intra_plane(stream, plane, reader, seeds[plane])?;
            let advanced = if plane == 0 {
                &stream.advanced_y[current]
            } else {
                &stream.advanced_uv[current]
            };
            let mesh = &stream.meshes[current];
            let state = &mut stream.planes[plane];
            upsample_plane(
                &state.reconstruction,
                &mut state.scratch,
                frame.plane_mut(plane),
                state.width,
                &state.grid,
                advanced,
                mesh,
                true,
            );
        }

        // The intra reconstruction becomes the delta reference.
        let next = 1 - stream.reference_index;
        for plane in 0..3 {
            let state = &mut stream.planes[plane];
            state.reference[next].copy_from_slice(&state.reconstruction);
        }
        stream.reference_index = next;
        stream.ttl_primed = false;
        stream.current_index = 1 - current;
        self.have_reference = true;

        debug!("decoded advanced frame {width}x{height} ql {quality_level}");
        Ok(frame)
    }

    // ---- delta profile ----------------------------------------------------

    fn decode_delta(&mut self, reader: &mut LheReader<'_>) -> Result<YuvFrame> {
        if !self.have_reference || self.stream.is_none() {
            return Err(Error::DeltaWithoutReference);
        }

        let mut seeds = [0u8; 3];
        for seed in seeds.iter_mut() {
            *seed = reader.read_u8()?;
        }
        let gop = reader.read_u8()?;
        if gop == 0 {
            return Err(Error::InvalidHeader);
        }
        let huffman = MeshHuffman::read_table(reader)?;

        let stream = self.stream.as_mut().expect("reference implies stream state");
        let current = stream.current_index;
        let last = 1 - current;
        read_mesh(reader, &huffman, &mut stream.meshes[current])?;
        stream.advanced_y[current] = build_advanced_mesh(
            &stream.planes[0].grid,
            &stream.meshes[current],
            stream.quality_level,
        )?;
        stream.advanced_uv[current] = build_advanced_mesh(
            &stream.planes[1].grid,
            &stream.meshes[current],
            stream.quality_level,
        )?;

        let expected: usize = (0..3)
            .map(|plane| stream.advanced_kind(plane, current).coded_samples())
            .sum();
        Self::check_bit_budget(reader, expected)?;

        // Mirror the encoder's TTL bookkeeping: blocks refresh when
        // the transmitted mesh moved or their countdown expired.
        if !stream.ttl_primed {
            stream.ttl.fill(gop);
            stream.ttl_primed = true;
        }
        let mut intra = vec![false; stream.blocks_w * stream.blocks_h];
        for block_y in 0..stream.blocks_h {
            for block_x in 0..stream.blocks_w {
                let index = block_y * stream.blocks_w + block_x;
                let movement = block_movement(
                    &stream.meshes[current],
                    &stream.meshes[last],
                    block_x,
                    block_y,
                );
                if movement > MOVEMENT_THRESHOLD || stream.ttl[index] == 0 {
                    intra[index] = true;
                    stream.ttl[index] = gop;
                } else {
                    stream.ttl[index] -= 1;
                }
            }
        }

        let mut frame = YuvFrame::new(stream.width, stream.height, stream.pixel_format);
        let next = 1 - stream.reference_index;
        for plane in 0..3 {
            decode_delta_plane(stream, plane, reader, seeds[plane], &intra)?;
            let advanced = if plane == 0 {
                &stream.advanced_y[current]
            } else {
                &stream.advanced_uv[current]
            };
            let mesh = &stream.meshes[current];
            let state = &mut stream.planes[plane];
            upsample_plane(
                &state.reference[next],
                &mut state.scratch,
                frame.plane_mut(plane),
                state.width,
                &state.grid,
                advanced,
                mesh,
                true,
            );
        }

        stream.reference_index = 1 - stream.reference_index;
        stream.current_index = 1 - current;
        debug!("decoded delta frame (gop {gop})");
        Ok(frame)
    }
}

impl Default for LheDecoder {
    fn default() -> LheDecoder {
        LheDecoder::new()
    }
}

// ---- plane passes ---------------------------------------------------------

fn read_mesh(reader: &mut LheReader<'_>, huffman: &MeshHuffman, mesh: &mut PrMesh) -> Result<()> {
    for vertical in [false, true] {
        let lattice = mesh.lattice_mut(vertical);
        for quantum in lattice.iter_mut() {
            *quantum = huffman.decode(reader)?;
        }
    }
    Ok(())
}

fn read_plane_hops_raw(
    reader: &mut LheReader<'_>,
    hops: &mut [u8],
    stride: usize,
    span: BlockSpan,
) -> Result<()> {
    let mut hop_reader = HopReader::new();
    for y in span.y_ini..span.y_fin {
        for x in span.x_ini..span.x_fin {
            hops[y * stride + x] = hop_reader.read_hop(reader)?.index();
        }
    }
    hop_reader.finish_plane(reader)
}

/// Read one plane's hop stream into the block-layout hop array.
fn read_plane_hops(
    reader: &mut LheReader<'_>,
    hops: &mut [u8],
    stride: usize,
    grid: &BlockGrid,
    advanced: &AdvancedMesh,
) -> Result<()> {
    let mut hop_reader = HopReader::new();
    for (bx, by) in grid.blocks() {
        let down = advanced.down_span(grid, bx, by);
        for y in down.y_ini..down.y_fin {
            for x in down.x_ini..down.x_fin {
                hops[y * stride + x] = hop_reader.read_hop(reader)?.index();
            }
        }
    }
    hop_reader.finish_plane(reader)
}

fn decode_intra_plane(
    stream: &mut StreamState,
    plane: usize,
    reader: &mut LheReader<'_>,
    seed: u8,
) -> Result<()> {
    let current = stream.current_index;
    let advanced = if plane == 0 {
        &stream.advanced_y[current]
    } else {
        &stream.advanced_uv[current]
    };
    let state = &mut stream.planes[plane];
    read_plane_hops(reader, &mut state.hops, state.width, &state.grid, advanced)?;

    let always = |_: usize, _: usize| true;
    for group in antidiagonals(state.grid.blocks_w, state.grid.blocks_h) {
        for (bx, by) in group {
            let seeds = advanced_block_seeds(advanced, bx, by, seed, &always);
            decode_block(
                &state.hops,
                &mut state.reconstruction,
                state.width,
                advanced.down_span(&state.grid, bx, by),
                &seeds,
                false,
            );
        }
    }
    Ok(())
}

fn decode_delta_plane(
    stream: &mut StreamState,
    plane: usize,
    reader: &mut LheReader<'_>,
    seed: u8,
    intra: &[bool],
) -> Result<()> {
    let current = stream.current_index;
    let last_index = 1 - current;
    let blocks_w = stream.blocks_w;
    let reference_index = stream.reference_index;
    let next = 1 - reference_index;
    let (advanced, previous) = if plane == 0 {
        (&stream.advanced_y[current], &stream.advanced_y[last_index])
    } else {
        (&stream.advanced_uv[current], &stream.advanced_uv[last_index])
    };
    let state = &mut stream.planes[plane];
    let stride = state.width;
    read_plane_hops(reader, &mut state.hops, stride, &state.grid, advanced)?;

    for group in antidiagonals(state.grid.blocks_w, state.grid.blocks_h) {
        for (bx, by) in group {
            let block_intra = intra[by * blocks_w + bx];
            let span = state.grid.span(bx, by);
            let down = advanced.down_span(&state.grid, bx, by);

            if block_intra {
                let eligible = |x: usize, y: usize| intra[y * blocks_w + x];
                let seeds = advanced_block_seeds(advanced, bx, by, seed, &eligible);
                decode_block(
                    &state.hops,
                    &mut state.reconstruction,
                    stride,
                    down,
                    &seeds,
                    false,
                );
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
                let eligible = |x: usize, y: usize| !intra[y * blocks_w + x];
                let seeds = advanced_block_seeds(advanced, bx, by, seed, &eligible);
                decode_block(&state.hops, &mut state.delta_recon, stride, down, &seeds, true);
                for y in down.y_ini..down.y_fin {
                    for x in down.x_ini..down.x_fin {
                        let index = y * stride + x;
                        let player =
                            i32::from(state.adapted[index]) + decompand(state.delta_recon[index]);
                        state.reference[next][index] = clamp_sample(player);
                    }
                }
            }
        }
    }
    Ok(())
}
