//! Numeric constants that are preserved bit-for-bit, per the design
//! document's "do not replicate the off-by-one, do preserve everything
//! else" rule.

/// Size of the voice table. Must be a power of two: the handle scheme packs
/// the slot index into `log2(N)` low bits of the handle.
pub const VOICE_COUNT: u32 = 128;

/// Mask selecting the index bits of a packed handle/asset id.
pub const INDEX_MASK: u32 = VOICE_COUNT - 1;

/// Maximum frames mixed per inner chunk. Keeps per-chunk worst-case latency
/// bounded and lets the fast path assume a stable step size.
pub const STEP: usize = 256;

/// Per-sample gain-smoothing step. A gap smaller than this snaps instead of
/// ramping.
pub const GAIN_SMOOTH_STEP: f32 = 1.0 / 512.0;

/// Stop-fade multiplicative decay applied to the held gain every sample.
pub const STOP_FADE_DECAY: f32 = 0.997;

/// Magnitude of the per-sample additive trend seeded at stop time; its sign
/// is the negative of the seed gain's sign.
pub const STOP_FADE_TREND_MAGNITUDE: f32 = 1.0 / 10_000.0;

/// Default output sample rate assumed by the audio backend contract.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 48_000;

pub const PITCH_MIN: f32 = 1e-5;
pub const PITCH_MAX: f32 = 1000.0;
pub const PAN_MIN: f32 = -1.0;
pub const PAN_MAX: f32 = 1.0;
pub const VOLUME_MIN: f32 = 0.0;
pub const VOLUME_MAX: f32 = 1e5;

/// Minimum frame count an asset must have to be playable (§4.2).
pub const MIN_PLAYABLE_FRAMES: usize = 3;

/// Trailing guard frames appended to every asset's sample buffer.
pub const GUARD_FRAMES: usize = 4;
