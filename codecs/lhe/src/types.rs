//! Shared codec types

use crate::constants::{MAX_QUALITY_LEVEL, MAX_RECTANGLES};
use crate::error::{Error, Result};

/// The nine-symbol hop alphabet.
///
/// The central symbol means "the spatial prediction was already
/// correct". The symbols at distance one encode a jump of the
/// adaptive step `h1`; the outer symbols encode the precomputed
/// non-linear quantizer outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Neg4,
    Neg3,
    Neg2,
    Neg1,
    Zero,
    Pos1,
    Pos2,
    Pos3,
    Pos4,
}

impl Hop {
    /// The alphabet index, 0..=8 with `Zero` at 4.
    pub fn index(self) -> u8 {
        match self {
            Hop::Neg4 => 0,
            Hop::Neg3 => 1,
            Hop::Neg2 => 2,
            Hop::Neg1 => 3,
            Hop::Zero => 4,
            Hop::Pos1 => 5,
            Hop::Pos2 => 6,
            Hop::Pos3 => 7,
            Hop::Pos4 => 8,
        }
    }

    pub fn from_index(index: u8) -> Option<Hop> {
        Some(match index {
            0 => Hop::Neg4,
            1 => Hop::Neg3,
            2 => Hop::Neg2,
            3 => Hop::Neg1,
            4 => Hop::Zero,
            5 => Hop::Pos1,
            6 => Hop::Pos2,
            7 => Hop::Pos3,
            8 => Hop::Pos4,
            _ => return None,
        })
    }

    /// Distance from the central symbol, 0..=4.
    pub fn magnitude(self) -> u8 {
        (self.index() as i8 - 4).unsigned_abs()
    }

    pub fn is_zero(self) -> bool {
        self == Hop::Zero
    }

    /// Whether this hop participates in the `h1` shrink rule.
    pub fn is_small(self) -> bool {
        self.magnitude() <= 1
    }

    pub fn is_positive(self) -> bool {
        self.index() > 4
    }

    /// Probability rank used by the prefix code: the central symbol
    /// first, then alternating positive/negative by magnitude.
    pub fn rank(self) -> u8 {
        match self {
            Hop::Zero => 0,
            Hop::Pos1 => 1,
            Hop::Neg1 => 2,
            Hop::Pos2 => 3,
            Hop::Neg2 => 4,
            Hop::Pos3 => 5,
            Hop::Neg3 => 6,
            Hop::Pos4 => 7,
            Hop::Neg4 => 8,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Hop> {
        Some(match rank {
            0 => Hop::Zero,
            1 => Hop::Pos1,
            2 => Hop::Neg1,
            3 => Hop::Pos2,
            4 => Hop::Neg2,
            5 => Hop::Pos3,
            6 => Hop::Neg3,
            7 => Hop::Pos4,
            8 => Hop::Neg4,
            _ => return None,
        })
    }
}

/// Frame coding modes, in the order of the 2-bit header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LheMode {
    /// Raster predictive coding of every sample.
    Basic,
    /// Elastic downsampling driven by the perceptual-relevance mesh,
    /// then hop coding of the reduced planes.
    Advanced,
    /// Differential coding against the adapted previous
    /// reconstruction, with per-block intra refresh.
    Delta,
}

impl LheMode {
    pub fn code(self) -> u8 {
        match self {
            LheMode::Basic => 0,
            LheMode::Advanced => 1,
            LheMode::Delta => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<LheMode> {
        match code {
            0 => Ok(LheMode::Basic),
            1 => Ok(LheMode::Advanced),
            2 => Ok(LheMode::Delta),
            _ => Err(Error::InvalidHeader),
        }
    }
}

/// Planar YUV sample layouts understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420,
    Yuv422,
    Yuv444,
}

impl PixelFormat {
    /// `(width factor, height factor)` of the chroma planes.
    pub fn chroma_factors(self) -> (usize, usize) {
        match self {
            PixelFormat::Yuv420 => (2, 2),
            PixelFormat::Yuv422 => (2, 1),
            PixelFormat::Yuv444 => (1, 1),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PixelFormat::Yuv420 => 0,
            PixelFormat::Yuv422 => 1,
            PixelFormat::Yuv444 => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<PixelFormat> {
        match code {
            0 => Ok(PixelFormat::Yuv420),
            1 => Ok(PixelFormat::Yuv422),
            2 => Ok(PixelFormat::Yuv444),
            _ => Err(Error::InvalidHeader),
        }
    }
}

/// Selectable downsampling kernels of the advanced profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleMode {
    /// Point sampling at the center of each elastic cell.
    Sps,
    /// Area average over the fractional cell, both axes.
    Avg,
    /// Point sampling split into separate horizontal and vertical
    /// passes.
    SpsTwoPass,
    /// Area average horizontally, point sampling vertically.
    AvgSps,
}

impl DownsampleMode {
    pub fn from_code(code: u8) -> Result<DownsampleMode> {
        match code {
            0 => Ok(DownsampleMode::Sps),
            1 => Ok(DownsampleMode::Avg),
            2 => Ok(DownsampleMode::SpsTwoPass),
            3 => Ok(DownsampleMode::AvgSps),
            _ => Err(Error::InvalidConfiguration),
        }
    }
}

bitflags::bitflags! {
    /// Boolean encoder options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EncoderFlags: u8 {
        /// Code every frame in the basic profile (image only).
        const FORCE_BASIC = 0b01;
        /// Retain the perceptual-relevance meshes of the last frame
        /// on a side channel; nothing is added to the bitstream.
        const PR_METRICS = 0b10;
    }
}

/// A region whose perceptual relevance is pinned regardless of image
/// content. Rectangles never enter the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedRectangle {
    pub x_ini: usize,
    pub x_fin: usize,
    pub y_ini: usize,
    pub y_fin: usize,
    /// `true` pins relevance to 1 (full detail), `false` to 0.
    pub protection: bool,
    /// The rectangle scan stops at the first inactive entry.
    pub active: bool,
}

/// Complete encoder configuration. Validated once, before any state
/// is allocated.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    /// Quality level 0..=99 indexing the compression-factor table.
    pub quality_level: u8,
    pub down_mode: DownsampleMode,
    /// Frames between forced intra refreshes of a delta-coded block.
    pub block_gop: u8,
    /// Stride of frame dropping at encoder input; 0 keeps every frame.
    pub skip_frames: u8,
    pub flags: EncoderFlags,
    pub rectangles: Vec<ProtectedRectangle>,
    /// Frames until the whole rectangle list deactivates; 0 means no
    /// expiry.
    pub rectangles_ttl: u32,
}

impl EncoderConfig {
    pub fn new(width: usize, height: usize, pixel_format: PixelFormat) -> EncoderConfig {
        EncoderConfig {
            width,
            height,
            pixel_format,
            quality_level: 50,
            down_mode: DownsampleMode::Sps,
            block_gop: 30,
            skip_frames: 0,
            flags: EncoderFlags::empty(),
            rectangles: Vec::new(),
            rectangles_ttl: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.width > 0xFFFF || self.height > 0xFFFF {
            return Err(Error::InvalidConfiguration);
        }
        if self.quality_level > MAX_QUALITY_LEVEL {
            return Err(Error::InvalidConfiguration);
        }
        if self.block_gop == 0 || self.skip_frames > 100 {
            return Err(Error::InvalidConfiguration);
        }
        if self.rectangles.len() > MAX_RECTANGLES {
            return Err(Error::InvalidConfiguration);
        }
        for rect in &self.rectangles {
            if rect.x_fin > self.width
                || rect.y_fin > self.height
                || rect.x_ini >= rect.x_fin
                || rect.y_ini >= rect.y_fin
            {
                return Err(Error::InvalidConfiguration);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_indices_roundtrip() {
        for index in 0..9 {
            let hop = Hop::from_index(index).unwrap();
            assert_eq!(hop.index(), index);
            assert_eq!(Hop::from_rank(hop.rank()), Some(hop));
        }
        assert!(Hop::from_index(9).is_none());
    }

    #[test]
    fn small_hops_are_the_inner_three() {
        assert!(Hop::Zero.is_small());
        assert!(Hop::Pos1.is_small());
        assert!(Hop::Neg1.is_small());
        assert!(!Hop::Pos2.is_small());
        assert!(!Hop::Neg4.is_small());
    }

    #[test]
    fn config_rejects_out_of_range_quality() {
        let mut config = EncoderConfig::new(64, 64, PixelFormat::Yuv420);
        config.quality_level = 100;
        assert_eq!(config.validate(), Err(Error::InvalidConfiguration));
    }

    #[test]
    fn config_rejects_empty_rectangle() {
        let mut config = EncoderConfig::new(64, 64, PixelFormat::Yuv420);
        config.rectangles.push(ProtectedRectangle {
            x_ini: 8,
            x_fin: 8,
            y_ini: 0,
            y_fin: 8,
            protection: true,
            active: true,
        });
        assert_eq!(config.validate(), Err(Error::InvalidConfiguration));
    }
}
