//! Algorithm constants shared by encoder and decoder

/// Lower bound of the adaptive small-hop step.
pub const MIN_HOP_1: u8 = 4;

/// Upper bound of the adaptive small-hop step.
pub const MAX_HOP_1: u8 = 10;

/// Number of valid `h1` values.
pub const H1_RANGE: usize = (MAX_HOP_1 - MIN_HOP_1 + 1) as usize;

/// Upper bound on the number of mesh columns.
pub const HORIZONTAL_BLOCKS: usize = 32;

/// Minimum side of a downsampled block, in samples.
pub const SIDE_MIN: usize = 4;

/// Global ceiling on the pixels-per-pixel density.
pub const PPP_MAX: f32 = 16.0;

/// Bound on the ratio between the largest and smallest corner PPP of
/// one block along one axis.
pub const PPP_MAX_RATIO: f32 = 3.0;

/// Share of the remaining luminance range the largest hop reaches.
pub const HOP_RANGE_FRACTION: f32 = 0.8;

/// Histogram-expansion window applied to raw perceptual relevance.
pub const PR_MIN: f32 = 0.2;
pub const PR_DIF: f32 = 0.3;

/// The five quantized perceptual-relevance levels.
pub const PR_QUANT_LEVELS: [f32; 5] = [0.0, 0.125, 0.25, 0.5, 1.0];

/// Thresholds of the luminance-difference buckets weighted into the
/// perceptual-relevance sums. A difference at or above the last
/// threshold lands in the top bucket and is always counted.
pub const QUANT_LUM: [u32; 4] = [2, 4, 6, 8];

/// Largest number of quality levels. Quality is transmitted as a full
/// byte but only 0..=99 are legal.
pub const MAX_QUALITY_LEVEL: u8 = 99;

/// Capacity of the protected-rectangle table.
pub const MAX_RECTANGLES: usize = 10;

/// Consecutive ZERO hops that switch the hop stream into the first
/// run-length state.
pub const H0_RLC_TRIGGER: u32 = 7;

/// Largest run the 4-bit first-stage length field can close.
pub const RLC1_MAX: u32 = 15;

/// Largest run the 5-bit second-stage length field can close.
pub const RLC2_MAX: u32 = 31;

/// Mesh-table length field reserved for a symbol with no occurrences.
pub const MESH_NO_OCCURRENCES: u8 = 7;

/// Residual magnitude up to which delta companding is the identity.
pub const DELTA_PASS_MAX: i32 = 52;

/// Stored-scale edge of the four-times companding region; the
/// symmetric lower edge equals `DELTA_PASS_MAX`.
pub const DELTA_X4_EDGE: i32 = 204;

/// Per-block perceptual-relevance change that forces an intra refresh
/// in delta frames.
pub const MOVEMENT_THRESHOLD: f32 = 0.26;

/// Perceptual relevance below which the adaptive upsampler blends
/// neighboring samples instead of replicating the nearest one.
pub const INTERPOLATION_PR_LIMIT: f32 = 0.251;

/// Remaining TTL at which a static block's relevance is boosted ahead
/// of its forced refresh.
pub const REFINEMENT_TTL: u8 = 1;
