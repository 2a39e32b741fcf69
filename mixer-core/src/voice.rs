//! The voice slot table and the versioned handle scheme that keeps stale
//! handles from addressing a different sound after slot reuse (spec.md §3,
//! §4.1).

use crate::asset::{AssetId, PcmAsset};
use crate::constants::{INDEX_MASK, STOP_FADE_TREND_MAGNITUDE, VOICE_COUNT};

/// Opaque handle to one playing instance of an asset. A zero handle is
/// always invalid (slot 0 is reserved and never allocated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceHandle(u32);

impl VoiceHandle {
    pub const INVALID: VoiceHandle = VoiceHandle(0);

    pub(crate) fn pack(index: u32, version: u32) -> Self {
        debug_assert_eq!(version & INDEX_MASK, 0, "version must not overlap the index bits");
        VoiceHandle(index | version)
    }

    pub(crate) fn index(&self) -> u32 {
        self.0 & INDEX_MASK
    }

    pub(crate) fn version(&self) -> u32 {
        self.0 & !INDEX_MASK
    }

    pub fn is_valid(&self) -> bool {
        self.index() != 0
    }
}

impl Default for VoiceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// One slot in the fixed voice table: a playing or fading-out instance of
/// an asset.
#[derive(Debug, Clone)]
pub(crate) struct VoiceSlot {
    pub asset: Option<AssetId>,
    pub pos: f64,
    pub start_pos: f64,
    pub stop_pos: f64,
    pub pitch: f32,
    pub volume: f32,
    pub pan: f32,
    pub volume_l: f32,
    pub volume_r: f32,
    pub volume_trend_l: f32,
    pub volume_trend_r: f32,
    pub time_to_start: f32,
    pub channels: u8,
    pub version: u32,
    pub loop_sound: bool,
    pub stop_mode: bool,
    pub waiting_start: bool,
}

impl VoiceSlot {
    fn empty() -> Self {
        VoiceSlot {
            asset: None,
            pos: 0.0,
            start_pos: 0.0,
            stop_pos: 0.0,
            pitch: 1.0,
            volume: 0.0,
            pan: 0.0,
            volume_l: 0.0,
            volume_r: 0.0,
            volume_trend_l: 0.0,
            volume_trend_r: 0.0,
            time_to_start: 0.0,
            channels: 1,
            version: 0,
            loop_sound: false,
            stop_mode: false,
            waiting_start: false,
        }
    }

    /// `empty ⇔ asset is null AND not in stop-fade AND not waiting to start`.
    pub fn is_empty(&self) -> bool {
        self.asset.is_none() && !self.stop_mode && !self.waiting_start
    }

    pub fn handle(&self, index: u32) -> VoiceHandle {
        VoiceHandle::pack(index, self.version)
    }
}

fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Seeds the exponential stop-fade tail by folding the current discrete
/// asset sample into the per-channel gain, then nulls the asset reference
/// so later deletion can never be read by a concurrent callback (spec.md
/// §4.4, §4.5). Shared by explicit `stop`, `stop_all`, forced stop on asset
/// deletion, and natural non-looping termination inside the mix routine.
pub(crate) fn seed_stop_fade(voice: &mut VoiceSlot, asset: Option<&PcmAsset>) {
    if let Some(asset) = asset {
        let (l, r) = asset.sample_at_floor(voice.pos);
        voice.volume_l *= l;
        voice.volume_r *= r;
    }
    voice.volume_trend_l = sign(voice.volume_l) * -STOP_FADE_TREND_MAGNITUDE;
    voice.volume_trend_r = sign(voice.volume_r) * -STOP_FADE_TREND_MAGNITUDE;
    voice.stop_mode = true;
    voice.asset = None;
}

/// The full `setStopMode` operation (spec.md §4.4): advances `version` to
/// invalidate the caller's handle, then either clears a still-deferred
/// voice silently or seeds the fade.
pub(crate) fn force_stop(voice: &mut VoiceSlot, asset_before: Option<&PcmAsset>) {
    voice.version = voice.version.wrapping_add(VOICE_COUNT);
    if voice.waiting_start {
        voice.waiting_start = false;
        voice.asset = None;
        return;
    }
    seed_stop_fade(voice, asset_before);
}

/// The fixed-size voice table: `N` slots, slot 0 reserved so a zero handle
/// is always invalid.
pub(crate) struct VoiceTable {
    slots: Vec<VoiceSlot>,
}

impl VoiceTable {
    pub fn new() -> Self {
        VoiceTable { slots: (0..VOICE_COUNT).map(|_| VoiceSlot::empty()).collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: u32) -> &VoiceSlot {
        &self.slots[index as usize]
    }

    pub fn get_mut(&mut self, index: u32) -> &mut VoiceSlot {
        &mut self.slots[index as usize]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut VoiceSlot)> {
        self.slots.iter_mut().enumerate().skip(1).map(|(i, s)| (i as u32, s))
    }

    /// Scans slots `1..N`, returns the first empty one with its `version`
    /// pre-advanced by `N`. Deterministic, not fair: starvation under
    /// overload is acceptable (spec.md §4.1).
    pub fn allocate(&mut self) -> Option<u32> {
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if slot.is_empty() {
                slot.version = slot.version.wrapping_add(VOICE_COUNT);
                return Some(index as u32);
            }
        }
        None
    }

    /// Resolves a handle to its slot index iff the packed version matches.
    pub fn resolve(&self, handle: VoiceHandle) -> Option<u32> {
        let index = handle.index();
        if index == 0 {
            return None;
        }
        let slot = self.slots.get(index as usize)?;
        if slot.version == handle.version() {
            Some(index)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_advances_version_and_skips_slot_zero() {
        let mut table = VoiceTable::new();
        let idx = table.allocate().unwrap();
        assert_ne!(idx, 0);
        assert_eq!(table.get(idx).version, VOICE_COUNT);
    }

    #[test]
    fn handle_roundtrips_through_resolve() {
        let mut table = VoiceTable::new();
        let idx = table.allocate().unwrap();
        let handle = table.get(idx).handle(idx);
        assert_eq!(table.resolve(handle), Some(idx));
    }

    #[test]
    fn stale_handle_after_reallocation_does_not_resolve() {
        let mut table = VoiceTable::new();
        let idx = table.allocate().unwrap();
        let stale = table.get(idx).handle(idx);
        // free the slot and hand it back out: version advances again.
        table.get_mut(idx).asset = None;
        table.get_mut(idx).stop_mode = false;
        table.get_mut(idx).waiting_start = false;
        table.get_mut(idx).version = table.get(idx).version.wrapping_add(VOICE_COUNT);
        assert_eq!(table.resolve(stale), None);
    }

    #[test]
    fn two_plays_of_same_slot_yield_different_handles() {
        let mut table = VoiceTable::new();
        let idx = table.allocate().unwrap();
        let first = table.get(idx).handle(idx);
        table.get_mut(idx).version = table.get(idx).version.wrapping_add(VOICE_COUNT);
        let second = table.get(idx).handle(idx);
        assert_ne!(first, second);
    }
}
