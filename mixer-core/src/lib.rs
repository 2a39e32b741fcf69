//! Real-time software audio mixer core.
//!
//! Owns a fixed pool of concurrently playing voices and, on demand from an
//! audio-device callback, produces an interleaved `f32` stereo output buffer
//! by summing, resampling, panning, and envelope-smoothing a set of PCM
//! sound assets. See `SPEC_FULL.md` at the workspace root for the full
//! design this crate implements.

pub mod constants;

mod asset;
mod mix;
mod voice;

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

pub use asset::{AssetId, PcmAsset};
pub use voice::VoiceHandle;

use asset::AssetArena;
use constants::{
    DEFAULT_OUTPUT_SAMPLE_RATE, MIN_PLAYABLE_FRAMES, PAN_MAX, PAN_MIN, PITCH_MAX, PITCH_MIN,
    STEP, VOLUME_MAX, VOLUME_MIN,
};
use voice::VoiceTable;

/// Parameters for `Mixer::play`, standing in for the original's family of
/// `play`/`play_loop`/`play_deferred` overloads (spec.md §6, §9): build one
/// with `PlayOptions::default()` and chain setters for the arguments that
/// differ from the defaults.
#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    pub volume: f32,
    pub pitch: f32,
    pub pan: f32,
    pub start_time: f64,
    /// `None` plays to the end of the asset.
    pub end_time: Option<f64>,
    pub loop_sound: bool,
    /// See spec.md §4.2: positive pre-rolls silence, negative starts as if
    /// already playing for that many seconds, zero starts immediately.
    pub defer_seconds: f64,
}

impl Default for PlayOptions {
    fn default() -> Self {
        PlayOptions {
            volume: 1.0,
            pitch: 1.0,
            pan: 0.0,
            start_time: 0.0,
            end_time: None,
            loop_sound: false,
            defer_seconds: 0.0,
        }
    }
}

impl PlayOptions {
    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn range(mut self, start_time: f64, end_time: f64) -> Self {
        self.start_time = start_time;
        self.end_time = Some(end_time);
        self
    }

    pub fn looped(mut self) -> Self {
        self.loop_sound = true;
        self
    }

    pub fn deferred(mut self, seconds: f64) -> Self {
        self.defer_seconds = seconds;
        self
    }
}

struct MixerState {
    assets: AssetArena,
    voices: VoiceTable,
    master_volume: f32,
    out_sample_rate: u32,
    total_samples_played: u64,
    total_time_played: f64,
}

/// The mixer's control surface and mix entry point. Cheaply cloneable: every
/// clone shares the same underlying state behind one mutex, matching
/// spec.md §5 ("a single mutex serializes all mixer state").
#[derive(Clone)]
pub struct Mixer {
    inner: Arc<Mutex<MixerState>>,
}

impl Mixer {
    pub fn new(out_sample_rate: u32) -> Self {
        Mixer {
            inner: Arc::new(Mutex::new(MixerState {
                assets: AssetArena::new(),
                voices: VoiceTable::new(),
                master_volume: 1.0,
                out_sample_rate,
                total_samples_played: 0,
                total_time_played: 0.0,
            })),
        }
    }

    pub fn create_from_mono(&self, frequency: u32, samples: &[f32]) -> AssetId {
        let mut state = self.inner.lock();
        state.assets.insert(PcmAsset::from_mono(frequency, samples))
    }

    pub fn create_from_stereo(&self, frequency: u32, frames: &[[f32; 2]]) -> AssetId {
        let mut state = self.inner.lock();
        state.assets.insert(PcmAsset::from_stereo(frequency, frames))
    }

    /// Allocates an asset from an already-decoded interleaved buffer (the
    /// `asset-io` decoder contract's output), or the reserved invalid id on
    /// an unsupported channel count.
    pub fn create_from_decoded(&self, frequency: u32, channels: u8, interleaved: &[f32]) -> AssetId {
        let asset = PcmAsset::from_interleaved(frequency, channels, interleaved);
        if asset.frames() == 0 {
            return AssetId::INVALID;
        }
        let mut state = self.inner.lock();
        state.assets.insert(asset)
    }

    /// Force-stops every voice referencing `id`, then frees its buffer and
    /// removes it from the registry (spec.md §4.5). A stale id is a no-op.
    pub fn delete(&self, id: AssetId) {
        if !id.is_valid() {
            return;
        }
        let mut state = self.inner.lock();
        force_stop_voices_referencing(&mut state, id);
        state.assets.remove(id);
    }

    /// Teardown path: frees every buffer still in the registry.
    pub fn free_all_allocated(&self) {
        let mut state = self.inner.lock();
        for id in state.assets.live_ids() {
            force_stop_voices_referencing(&mut state, id);
            state.assets.remove(id);
        }
    }

    pub fn play(&self, asset: AssetId, opts: PlayOptions) -> VoiceHandle {
        let mut state = self.inner.lock();
        do_play(&mut state, asset, opts)
    }

    pub fn stop(&self, handle: VoiceHandle) {
        let mut state = self.inner.lock();
        do_stop(&mut state, handle);
    }

    pub fn stop_all(&self) {
        let mut state = self.inner.lock();
        do_stop_all(&mut state);
    }

    pub fn set_pitch(&self, handle: VoiceHandle, pitch: f32) {
        let mut state = self.inner.lock();
        do_set_pitch(&mut state, handle, pitch);
    }

    pub fn set_volume(&self, handle: VoiceHandle, volume: f32) {
        let mut state = self.inner.lock();
        do_set_volume(&mut state, handle, volume);
    }

    pub fn set_pan(&self, handle: VoiceHandle, pan: f32) {
        let mut state = self.inner.lock();
        do_set_pan(&mut state, handle, pan);
    }

    pub fn set_play_pos(&self, handle: VoiceHandle, seconds: f64) {
        let mut state = self.inner.lock();
        do_set_play_pos(&mut state, handle, seconds);
    }

    /// True iff `handle` is valid and the voice is not in stop-fade. The
    /// original skips the mutex here as a deliberate optimization; doing the
    /// same safely in Rust would need a parallel atomic snapshot of every
    /// slot's (version, stop_mode) pair, which isn't worth the complexity
    /// for a query this cheap, so this still takes the lock.
    pub fn is_playing(&self, handle: VoiceHandle) -> bool {
        let state = self.inner.lock();
        match state.voices.resolve(handle) {
            Some(index) => {
                let slot = state.voices.get(index);
                !slot.stop_mode && !slot.is_empty()
            }
            None => false,
        }
    }

    /// Seconds into the asset the voice is currently positioned at. Zero if
    /// the handle is invalid, the voice is stopping, or it hasn't started
    /// yet (deferred).
    pub fn get_play_pos(&self, handle: VoiceHandle) -> f64 {
        let state = self.inner.lock();
        let Some(index) = state.voices.resolve(handle) else {
            return 0.0;
        };
        let slot = state.voices.get(index);
        if slot.stop_mode || slot.waiting_start {
            return 0.0;
        }
        let freq = slot
            .asset
            .and_then(|id| state.assets.get(id))
            .map(|a| a.frequency() as f64)
            .unwrap_or(0.0);
        if freq > 0.0 {
            slot.pos / freq
        } else {
            0.0
        }
    }

    pub fn set_master_volume(&self, volume: f32) {
        let mut state = self.inner.lock();
        state.master_volume = volume.max(0.0);
    }

    pub fn get_output_sample_rate(&self) -> u32 {
        self.inner.lock().out_sample_rate
    }

    pub fn get_total_samples_played(&self) -> u64 {
        self.inner.lock().total_samples_played
    }

    pub fn get_total_time_played(&self) -> f64 {
        self.inner.lock().total_time_played
    }

    /// Manual critical section: lets a caller batch many updates atomically
    /// against the audio callback (spec.md §4.6). Implemented as an RAII
    /// guard over the same mutex the callback uses rather than a manually
    /// paired enter/leave call — see `SPEC_FULL.md` §5 for why this is a
    /// compatibility-preserving refinement rather than a behavior change.
    /// Re-entering from the same thread while a `CriticalSection` is held
    /// blocks rather than corrupting state; callers must use the methods on
    /// `CriticalSection` itself (not `Mixer`'s) while one is held.
    pub fn enter_critical_section(&self) -> CriticalSection<'_> {
        CriticalSection { guard: self.inner.lock() }
    }

    /// Fills `out` (interleaved stereo, `frames * 2` floats) for one audio
    /// callback. Acquires the mutex for the full duration (spec.md §4.3,
    /// §5). Never fails: an uninitialized or silent mixer still produces
    /// zeros.
    pub fn mix(&self, out: &mut [f32], frames: usize) {
        assert_eq!(out.len(), frames * 2, "output buffer must be interleaved stereo");
        let mut state = self.inner.lock();
        out.fill(0.0);

        let out_sample_rate = state.out_sample_rate;
        let master_volume = state.master_volume;

        let mut offset = 0usize;
        while offset < frames {
            let chunk_frames = (frames - offset).min(STEP);
            {
                let buf = &mut out[offset * 2..(offset + chunk_frames) * 2];
                let MixerState { voices, assets, .. } = &mut *state;
                for (_, slot) in voices.iter_mut() {
                    if slot.is_empty() {
                        continue;
                    }
                    mix::mix_voice(slot, assets, buf, chunk_frames, out_sample_rate, master_volume);
                }
            }
            // Accounting uses the pre-decrement chunk size throughout, which
            // resolves spec.md §9's off-by-one open question rather than
            // reproducing it.
            state.total_samples_played += chunk_frames as u64;
            state.total_time_played += chunk_frames as f64 / out_sample_rate as f64;
            offset += chunk_frames;
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Mixer::new(DEFAULT_OUTPUT_SAMPLE_RATE)
    }
}

fn force_stop_voices_referencing(state: &mut MixerState, id: AssetId) {
    let MixerState { voices, assets, .. } = state;
    for (_, slot) in voices.iter_mut() {
        if slot.asset == Some(id) {
            let asset_ref = assets.get(id).map(|a| a.as_ref());
            voice::force_stop(slot, asset_ref);
        }
    }
}

fn do_play(state: &mut MixerState, asset_id: AssetId, opts: PlayOptions) -> VoiceHandle {
    let Some(asset) = state.assets.get(asset_id).cloned() else {
        tracing::warn!("play: unknown or stale asset id");
        return VoiceHandle::INVALID;
    };
    if asset.frames() < MIN_PLAYABLE_FRAMES {
        tracing::warn!(frames = asset.frames(), "play: asset too short to play");
        return VoiceHandle::INVALID;
    }
    let Some(index) = state.voices.allocate() else {
        tracing::warn!("play: voice pool exhausted");
        return VoiceHandle::INVALID;
    };

    let pitch = opts.pitch.clamp(PITCH_MIN, PITCH_MAX);
    let pan = opts.pan.clamp(PAN_MIN, PAN_MAX);
    let volume = opts.volume.clamp(VOLUME_MIN, VOLUME_MAX);

    let freq = asset.frequency() as f64;
    let last_frame = (asset.frames() - 1) as f64;
    let start_pos = (opts.start_time * freq).floor().clamp(0.0, last_frame);
    let raw_end = opts.end_time.unwrap_or(asset.frames() as f64 / freq);
    let mut stop_pos = (raw_end * freq).floor().clamp(0.0, last_frame);
    if stop_pos < start_pos {
        stop_pos = start_pos;
    }

    let master_volume = state.master_volume;
    let (target_l, target_r) = mix::target_gains(master_volume, volume, pan);

    let slot = state.voices.get_mut(index);
    slot.asset = Some(asset_id);
    slot.start_pos = start_pos;
    slot.stop_pos = stop_pos;
    slot.pitch = pitch;
    slot.volume = volume;
    slot.pan = pan;
    slot.channels = asset.channels();
    slot.loop_sound = opts.loop_sound;
    slot.stop_mode = false;
    slot.volume_l = target_l;
    slot.volume_r = target_r;
    slot.volume_trend_l = 0.0;
    slot.volume_trend_r = 0.0;

    if opts.defer_seconds > 0.0 {
        slot.waiting_start = true;
        slot.time_to_start = opts.defer_seconds as f32;
        slot.pos = start_pos;
    } else if opts.defer_seconds < 0.0 {
        slot.waiting_start = false;
        slot.time_to_start = 0.0;
        slot.pos = ((-opts.defer_seconds) * freq).min(stop_pos);
    } else {
        slot.waiting_start = false;
        slot.time_to_start = 0.0;
        slot.pos = start_pos;
    }

    slot.handle(index)
}

fn do_stop(state: &mut MixerState, handle: VoiceHandle) {
    let Some(index) = state.voices.resolve(handle) else {
        return;
    };
    let MixerState { voices, assets, .. } = state;
    let slot = voices.get_mut(index);
    let asset_ref = slot.asset.and_then(|id| assets.get(id)).map(|a| a.as_ref());
    voice::force_stop(slot, asset_ref);
}

fn do_stop_all(state: &mut MixerState) {
    let MixerState { voices, assets, .. } = state;
    for (_, slot) in voices.iter_mut() {
        if !slot.is_empty() {
            let asset_ref = slot.asset.and_then(|id| assets.get(id)).map(|a| a.as_ref());
            voice::force_stop(slot, asset_ref);
        }
    }
}

fn do_set_pitch(state: &mut MixerState, handle: VoiceHandle, pitch: f32) {
    if let Some(index) = state.voices.resolve(handle) {
        state.voices.get_mut(index).pitch = pitch.clamp(PITCH_MIN, PITCH_MAX);
    }
}

fn do_set_volume(state: &mut MixerState, handle: VoiceHandle, volume: f32) {
    if let Some(index) = state.voices.resolve(handle) {
        state.voices.get_mut(index).volume = volume.clamp(VOLUME_MIN, VOLUME_MAX);
    }
}

fn do_set_pan(state: &mut MixerState, handle: VoiceHandle, pan: f32) {
    if let Some(index) = state.voices.resolve(handle) {
        state.voices.get_mut(index).pan = pan.clamp(PAN_MIN, PAN_MAX);
    }
}

fn do_set_play_pos(state: &mut MixerState, handle: VoiceHandle, seconds: f64) {
    let Some(index) = state.voices.resolve(handle) else {
        return;
    };
    {
        let slot = state.voices.get(index);
        if slot.stop_mode || slot.is_empty() {
            return;
        }
    }
    let asset_id = state.voices.get(index).asset;
    let Some(freq) = asset_id.and_then(|id| state.assets.get(id)).map(|a| a.frequency() as f64) else {
        return;
    };
    let slot = state.voices.get_mut(index);
    let frame_pos = (seconds * freq).clamp(slot.start_pos, slot.stop_pos);
    slot.pos = frame_pos;
}

/// RAII handle returned by `Mixer::enter_critical_section`. Dropping it is
/// the "leave" half of the original enter/leave pair.
pub struct CriticalSection<'a> {
    guard: MutexGuard<'a, MixerState>,
}

impl CriticalSection<'_> {
    pub fn play(&mut self, asset: AssetId, opts: PlayOptions) -> VoiceHandle {
        do_play(&mut self.guard, asset, opts)
    }

    pub fn stop(&mut self, handle: VoiceHandle) {
        do_stop(&mut self.guard, handle);
    }

    pub fn stop_all(&mut self) {
        do_stop_all(&mut self.guard);
    }

    pub fn set_pitch(&mut self, handle: VoiceHandle, pitch: f32) {
        do_set_pitch(&mut self.guard, handle, pitch);
    }

    pub fn set_volume(&mut self, handle: VoiceHandle, volume: f32) {
        do_set_volume(&mut self.guard, handle, volume);
    }

    pub fn set_pan(&mut self, handle: VoiceHandle, pan: f32) {
        do_set_pan(&mut self.guard, handle, pan);
    }

    pub fn set_play_pos(&mut self, handle: VoiceHandle, seconds: f64) {
        do_set_play_pos(&mut self.guard, handle, seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence_tone(samples: usize, value: f32) -> Vec<f32> {
        vec![value; samples]
    }

    #[test]
    fn play_invalid_asset_returns_invalid_handle() {
        let mixer = Mixer::new(48_000);
        let handle = mixer.play(AssetId::INVALID, PlayOptions::default());
        assert!(!handle.is_valid());
    }

    #[test]
    fn play_too_short_asset_returns_invalid_handle() {
        let mixer = Mixer::new(48_000);
        let asset = mixer.create_from_mono(48_000, &[0.0, 0.0]);
        let handle = mixer.play(asset, PlayOptions::default());
        assert!(!handle.is_valid());
    }

    #[test]
    fn stale_handle_is_a_silent_noop() {
        let mixer = Mixer::new(48_000);
        let asset = mixer.create_from_mono(48_000, &silence_tone(1_000, 0.5));
        let handle = mixer.play(asset, PlayOptions::default());
        mixer.stop(handle);
        // setStopMode already advanced the version, so every op on `handle`
        // is now a no-op, even though the fade is still in flight.
        mixer.set_volume(handle, 0.1);
        mixer.set_pitch(handle, 2.0);
        assert!(!mixer.is_playing(handle));
    }

    #[test]
    fn voice_pool_exhaustion_then_recovery() {
        let mixer = Mixer::new(48_000);
        let asset = mixer.create_from_mono(48_000, &silence_tone(1_000, 0.1));
        let mut handles = Vec::new();
        for _ in 0..127 {
            handles.push(mixer.play(asset, PlayOptions::default().looped()));
        }
        let overflow = mixer.play(asset, PlayOptions::default());
        assert!(!overflow.is_valid());

        mixer.stop(handles[0]);
        let mut buf = vec![0.0f32; 2 * 4096];
        mixer.mix(&mut buf, 4096);

        let recovered = mixer.play(asset, PlayOptions::default());
        assert!(recovered.is_valid());
    }

    #[test]
    fn deferred_start_contributes_silence_then_plays() {
        let mixer = Mixer::new(48_000);
        let asset = mixer.create_from_mono(48_000, &silence_tone(2_000, 1.0));
        let handle = mixer.play(asset, PlayOptions::default().deferred(0.5));
        assert!(handle.is_valid());

        let mut buf = vec![0.0f32; 2 * 24_000];
        mixer.mix(&mut buf, 24_000);
        assert!(buf.iter().all(|&s| s == 0.0));

        let mut buf2 = vec![0.0f32; 2 * 256];
        mixer.mix(&mut buf2, 256);
        assert!(buf2.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn deleting_asset_stops_referencing_voices() {
        let mixer = Mixer::new(48_000);
        let asset = mixer.create_from_mono(48_000, &silence_tone(48_000, 0.5));
        let handle = mixer.play(asset, PlayOptions::default().looped());
        assert!(mixer.is_playing(handle));

        mixer.delete(asset);
        assert!(!mixer.is_playing(handle));

        let mut buf = vec![0.0f32; 2 * 4096];
        mixer.mix(&mut buf, 4096); // must not read freed memory
    }

    #[test]
    fn critical_section_batches_without_deadlock() {
        let mixer = Mixer::new(48_000);
        let asset = mixer.create_from_mono(48_000, &silence_tone(1_000, 0.5));
        let mut cs = mixer.enter_critical_section();
        let h1 = cs.play(asset, PlayOptions::default());
        let h2 = cs.play(asset, PlayOptions::default());
        cs.set_volume(h1, 0.2);
        drop(cs);
        assert!(mixer.is_playing(h1));
        assert!(mixer.is_playing(h2));
    }

    #[test]
    fn master_volume_affects_steady_state_gain() {
        let mixer = Mixer::new(48_000);
        mixer.set_master_volume(0.25);
        let asset = mixer.create_from_stereo(48_000, &[[1.0, -1.0]; 200]);
        let _handle = mixer.play(asset, PlayOptions::default());
        // gains are seeded to steady state directly: run one small chunk and
        // check we are near the expected amplitude (within the 1/512 step,
        // since the first sample is already at target).
        let mut buf = vec![0.0f32; 2 * 4];
        mixer.mix(&mut buf, 4);
        assert!((buf[0] - 0.25).abs() < 1e-4);
        assert!((buf[1] - (-0.25)).abs() < 1e-4);
    }
}
