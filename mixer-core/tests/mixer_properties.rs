//! Integration tests for the §8 testable properties and concrete scenarios
//! (S1–S6) from the mixer specification.

use mixer_core::{Mixer, PlayOptions};

fn mix_frames(mixer: &Mixer, frames: usize) -> Vec<f32> {
    let mut buf = vec![0.0f32; frames * 2];
    mixer.mix(&mut buf, frames);
    buf
}

/// S1: mono asset at 48kHz of 1000 samples all 0.5. First frame is (0.5,
/// 0.5); after the asset ends the voice fades to silence within ~2100
/// frames and becomes empty (eligible for reallocation again).
#[test]
fn s1_mono_tone_plays_then_fades_to_silence() {
    let mixer = Mixer::new(48_000);
    let asset = mixer.create_from_mono(48_000, &vec![0.5f32; 1_000]);
    let handle = mixer.play(asset, PlayOptions::default());
    assert!(handle.is_valid());

    let first_chunk = mix_frames(&mixer, 4);
    assert!((first_chunk[0] - 0.5).abs() < 1e-6);
    assert!((first_chunk[1] - 0.5).abs() < 1e-6);

    // Run past the asset's end and through the fade tail.
    let tail = mix_frames(&mixer, 1_000 + 2_100);
    let last = &tail[tail.len() - 2..];
    assert_eq!(last, &[0.0, 0.0]);
    assert!(!mixer.is_playing(handle));

    // The slot must be reusable once the fade has fully settled.
    let other = mixer.play(asset, PlayOptions::default());
    assert!(other.is_valid());
}

/// S2: stereo asset (L=1.0, R=-1.0), pan=+1 → steady state (1.0, 0.0).
#[test]
fn s2_hard_pan_right_mutes_left_channel() {
    let mixer = Mixer::new(48_000);
    let frames: Vec<[f32; 2]> = (0..100).map(|_| [1.0, -1.0]).collect();
    let asset = mixer.create_from_stereo(48_000, &frames);
    let _handle = mixer.play(asset, PlayOptions::default().pan(1.0));

    let out = mix_frames(&mixer, 4);
    assert!((out[0] - 1.0).abs() < 1e-4);
    assert!((out[1] - 0.0).abs() < 1e-4);
}

/// S3: defer_seconds = 0.5 at 48kHz: first 24000 frames are silent, frame
/// 24000 begins mixing from startPos.
#[test]
fn s3_deferred_start_begins_at_expected_frame() {
    let mixer = Mixer::new(48_000);
    let asset = mixer.create_from_mono(48_000, &vec![1.0f32; 2_000]);
    let _handle = mixer.play(asset, PlayOptions::default().deferred(0.5));

    let silent = mix_frames(&mixer, 24_000);
    assert!(silent.iter().all(|&s| s == 0.0));

    let after = mix_frames(&mixer, 4);
    assert!((after[0] - 1.0).abs() < 1e-6);
}

/// S4: slot 0 reserved, 127 voices fit, the 128th play fails; after a stop,
/// a subsequent play succeeds with a new version (different handle bits).
#[test]
fn s4_voice_pool_is_127_usable_slots() {
    let mixer = Mixer::new(48_000);
    let asset = mixer.create_from_mono(48_000, &vec![0.1f32; 10_000]);

    let mut handles = Vec::new();
    for _ in 0..127 {
        let h = mixer.play(asset, PlayOptions::default().looped());
        assert!(h.is_valid());
        handles.push(h);
    }

    let overflow = mixer.play(asset, PlayOptions::default());
    assert!(!overflow.is_valid());

    mixer.stop(handles[10]);
    mix_frames(&mixer, 4096); // let the fade settle and the slot free up

    let recovered = mixer.play(asset, PlayOptions::default());
    assert!(recovered.is_valid());
}

/// S5: playing a sound then deleting its asset stops it within the fade
/// window, with no out-of-bounds read on later callbacks.
#[test]
fn s5_delete_while_playing_is_safe() {
    let mixer = Mixer::new(48_000);
    let asset = mixer.create_from_mono(48_000, &vec![0.3f32; 48_000]);
    let handle = mixer.play(asset, PlayOptions::default().looped());
    assert!(mixer.is_playing(handle));

    mix_frames(&mixer, 512);
    mixer.delete(asset);
    assert!(!mixer.is_playing(handle));

    // Subsequent callbacks only ever touch the held fade-tail gains, never
    // the freed asset buffer.
    for _ in 0..20 {
        mix_frames(&mixer, 512);
    }
}

/// S6: set_play_pos clamps to [startPos, stopPos].
#[test]
fn s6_set_play_pos_clamps_to_range() {
    let mixer = Mixer::new(48_000);
    let asset = mixer.create_from_mono(48_000, &vec![0.2f32; 48_000]);
    let handle = mixer.play(asset, PlayOptions::default());

    mixer.set_play_pos(handle, -5.0);
    assert_eq!(mixer.get_play_pos(handle), 0.0);

    mixer.set_play_pos(handle, 1e9);
    let pos = mixer.get_play_pos(handle);
    assert!((pos - 1.0).abs() < 1.0 / 48_000.0 + 1e-6);
}

/// Invariant: loop continuity — positions one full loop period apart play
/// back the same (bounded by interpolation at the wrap) samples. The
/// default play range clamps `stop_pos` to `samples.len() - 1` (spec.md
/// §8 property 6), so the loop period is `stop_pos - start_pos`, i.e.
/// `samples.len() - 1`, not `samples.len()`.
#[test]
fn loop_continuity_repeats_after_one_period() {
    let mixer = Mixer::new(48_000);
    let samples: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0).sin()).collect();
    let period = samples.len() - 1;
    let asset = mixer.create_from_mono(48_000, &samples);
    let _handle = mixer.play(asset, PlayOptions::default().looped());

    let first_period = mix_frames(&mixer, period);
    let second_period = mix_frames(&mixer, period);
    for (a, b) in first_period.iter().zip(second_period.iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

/// Invariant: handle uniqueness across a reuse of the same slot.
#[test]
fn handle_uniqueness_across_slot_reuse() {
    let mixer = Mixer::new(48_000);
    let asset = mixer.create_from_mono(48_000, &vec![0.1f32; 100]);
    let first = mixer.play(asset, PlayOptions::default());
    mixer.stop(first);
    mix_frames(&mixer, 4096);
    let second = mixer.play(asset, PlayOptions::default());
    assert_ne!(first, second);
}
