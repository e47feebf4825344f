//! Pure-rust LHE/MLHE encoder and decoder
//!
//! LHE (logarithmical hopping encoding) codes each sample of a planar
//! YUV frame as one of nine pre-quantized "hops" around a spatial
//! prediction. The advanced profile prepends an elastic, perceptually
//! driven downsampling stage; the MLHE video profile adds differential
//! frames coded against a resolution-adapted previous reconstruction.

#[macro_use]
extern crate lazy_static;

mod cache;
mod constants;
mod decoder;
mod delta;
mod encoder;
mod entropy;
mod error;
mod frame;
mod geometry;
mod mesh;
pub mod parser;
mod predictor;
mod resample;
mod types;

pub use decoder::LheDecoder;
pub use encoder::LheEncoder;
pub use error::{Error, Result};
pub use frame::YuvFrame;
pub use types::{
    DownsampleMode, EncoderConfig, EncoderFlags, Hop, LheMode, PixelFormat, ProtectedRectangle,
};
