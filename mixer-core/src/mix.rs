//! The per-callback mix routine (spec.md §4.3): resampling, panning, volume
//! ramping, fade-out on stop, looping, and deferred start for a single
//! voice's contribution to one chunk of the output buffer.

use crate::asset::{AssetArena, PcmAsset};
use crate::constants::GAIN_SMOOTH_STEP;
use crate::voice::{seed_stop_fade, VoiceSlot};

/// Steady-state per-channel gain targets for a voice (spec.md §8 "pan law"):
/// `L = master * volume * min(1+pan, 1)`, `R = master * volume * min(1-pan, 1)`.
pub(crate) fn target_gains(master_volume: f32, volume: f32, pan: f32) -> (f32, f32) {
    let l = master_volume * volume * (1.0 + pan).min(1.0);
    let r = master_volume * volume * (1.0 - pan).min(1.0);
    (l, r)
}

fn nudge(current: &mut f32, target: f32) {
    let gap = target - *current;
    if gap.abs() <= GAIN_SMOOTH_STEP {
        *current = target;
    } else if gap > 0.0 {
        *current += GAIN_SMOOTH_STEP;
    } else {
        *current -= GAIN_SMOOTH_STEP;
    }
}

/// Mixes one voice's contribution into `buf` (interleaved stereo,
/// `chunk_frames * 2` floats) and advances its state in place. `buf` is
/// assumed to already hold the other voices' contributions; this function
/// only adds.
pub(crate) fn mix_voice(
    voice: &mut VoiceSlot,
    assets: &AssetArena,
    buf: &mut [f32],
    chunk_frames: usize,
    out_frequency: u32,
    master_volume: f32,
) {
    debug_assert_eq!(buf.len(), chunk_frames * 2);

    let asset = if voice.stop_mode {
        None
    } else {
        voice.asset.and_then(|id| assets.get(id)).map(|a| a.as_ref())
    };

    if !voice.stop_mode && asset.is_none() {
        // The stop-on-delete invariant guarantees a playing voice's asset is
        // never removed out from under it; this only guards against bugs.
        voice.waiting_start = false;
        voice.stop_mode = false;
        return;
    }

    let advance = asset
        .map(|a| (a.frequency() as f64 / out_frequency as f64) * voice.pitch as f64)
        .unwrap_or(0.0);

    if voice.waiting_start {
        let chunk_duration = chunk_frames as f32 / out_frequency as f32;
        if chunk_duration < voice.time_to_start {
            voice.time_to_start -= chunk_duration;
            return;
        }
    }

    let target = target_gains(master_volume, voice.volume, voice.pan);

    if !voice.stop_mode && !voice.waiting_start {
        let asset_ref = asset.expect("playing voice must resolve its asset");
        let fast_path = voice.volume_l == target.0
            && voice.volume_r == target.1
            && voice.pos + advance * chunk_frames as f64 < voice.stop_pos;
        if fast_path {
            run_fast_path(voice, asset_ref, buf, chunk_frames, advance);
            return;
        }
    }

    run_general_path(voice, asset, buf, chunk_frames, out_frequency, advance, target);
}

/// Tight loop used when no per-sample gain smoothing or loop/terminate check
/// is needed during the chunk (spec.md §4.3 "fast path").
fn run_fast_path(voice: &mut VoiceSlot, asset: &PcmAsset, buf: &mut [f32], chunk_frames: usize, advance: f64) {
    let mut pos = voice.pos;
    for i in 0..chunk_frames {
        let (l, r) = asset.interpolate(pos);
        buf[i * 2] += l * voice.volume_l;
        buf[i * 2 + 1] += r * voice.volume_r;
        pos += advance;
    }
    voice.pos = pos;
}

/// The general per-sample path: deferred-start countdown, stop-fade decay,
/// and gain-smoothed playback with loop/terminate checks.
fn run_general_path(
    voice: &mut VoiceSlot,
    asset: Option<&PcmAsset>,
    buf: &mut [f32],
    chunk_frames: usize,
    out_frequency: u32,
    advance: f64,
    target: (f32, f32),
) {
    let dt = 1.0 / out_frequency as f32;

    for i in 0..chunk_frames {
        if voice.waiting_start {
            voice.time_to_start -= dt;
            if voice.time_to_start <= 0.0 {
                voice.waiting_start = false;
                voice.pos = voice.start_pos;
            }
            continue;
        }

        if voice.stop_mode {
            buf[i * 2] += voice.volume_l;
            buf[i * 2 + 1] += voice.volume_r;
            voice.volume_l = (voice.volume_l + voice.volume_trend_l) * crate::constants::STOP_FADE_DECAY;
            voice.volume_r = (voice.volume_r + voice.volume_trend_r) * crate::constants::STOP_FADE_DECAY;
            if voice.volume_l.abs() <= GAIN_SMOOTH_STEP && voice.volume_r.abs() <= GAIN_SMOOTH_STEP {
                voice.volume_l = 0.0;
                voice.volume_r = 0.0;
                voice.stop_mode = false;
                // Both channels unified into one path, so this always takes
                // the stereo variant's early exit (spec.md §9 open question).
                break;
            }
            continue;
        }

        let asset_ref = asset.expect("playing voice must resolve its asset");
        let (raw_l, raw_r) = asset_ref.interpolate(voice.pos);
        nudge(&mut voice.volume_l, target.0);
        nudge(&mut voice.volume_r, target.1);
        buf[i * 2] += raw_l * voice.volume_l;
        buf[i * 2 + 1] += raw_r * voice.volume_r;

        voice.pos += advance;
        if voice.pos >= voice.stop_pos {
            if voice.loop_sound {
                voice.pos = voice.start_pos;
            } else {
                voice.pos = voice.stop_pos;
                seed_stop_fade(voice, Some(asset_ref));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pan_law_hard_left() {
        let (l, r) = target_gains(1.0, 1.0, -1.0);
        assert_eq!(l, 1.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn pan_law_hard_right() {
        let (l, r) = target_gains(1.0, 1.0, 1.0);
        assert_eq!(l, 0.0);
        assert_eq!(r, 1.0);
    }

    #[test]
    fn pan_law_center() {
        let (l, r) = target_gains(0.5, 1.0, 0.0);
        assert_eq!(l, 0.5);
        assert_eq!(r, 0.5);
    }

    #[test]
    fn nudge_snaps_within_step() {
        let mut g = 0.999f32;
        nudge(&mut g, 1.0);
        assert_eq!(g, 1.0);
    }

    #[test]
    fn nudge_moves_by_at_most_one_step() {
        let mut g = 0.0f32;
        nudge(&mut g, 1.0);
        assert_eq!(g, GAIN_SMOOTH_STEP);
    }
}
