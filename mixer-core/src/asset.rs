//! PCM asset storage: an owned block of interleaved float samples with a
//! trailing guard frame, plus the generation-counted arena that stands in
//! for the "process-wide set of currently-live sample-buffer pointers" of
//! the original design (spec.md §3, §9 — "model this as an index into an
//! asset arena plus a generation counter", never an unchecked reference).

use crate::constants::GUARD_FRAMES;
use std::sync::Arc;

/// Opaque reference to a PCM asset. Index 0 is the reserved "invalid asset"
/// sentinel, mirroring the voice table's reserved slot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId {
    index: u32,
    generation: u32,
}

impl AssetId {
    pub(crate) const INVALID: AssetId = AssetId { index: 0, generation: 0 };

    pub fn is_valid(&self) -> bool {
        self.index != 0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// An owned block of interleaved float PCM with a one-frame trailing guard.
///
/// The allocation length in floats is `channels * (samples + GUARD_FRAMES)`.
/// Frame `samples` duplicates frame `0` so the interpolator can read
/// `[ip]`/`[ip+1]` for any `ip` in `0..samples` without a branch; the
/// remaining guard frames are left zeroed padding.
#[derive(Debug, Clone)]
pub struct PcmAsset {
    frequency: u32,
    channels: u8,
    samples: usize,
    buffer: Vec<f32>,
}

impl PcmAsset {
    pub fn from_mono(frequency: u32, samples: &[f32]) -> Self {
        let frame_count = samples.len();
        let mut buffer = vec![0.0f32; frame_count + GUARD_FRAMES];
        buffer[..frame_count].copy_from_slice(samples);
        if frame_count > 0 {
            buffer[frame_count] = buffer[0];
        }
        PcmAsset { frequency, channels: 1, samples: frame_count, buffer }
    }

    pub fn from_stereo(frequency: u32, frames: &[[f32; 2]]) -> Self {
        let frame_count = frames.len();
        let mut buffer = vec![0.0f32; (frame_count + GUARD_FRAMES) * 2];
        for (i, frame) in frames.iter().enumerate() {
            buffer[i * 2] = frame[0];
            buffer[i * 2 + 1] = frame[1];
        }
        if frame_count > 0 {
            buffer[frame_count * 2] = buffer[0];
            buffer[frame_count * 2 + 1] = buffer[1];
        }
        PcmAsset { frequency, channels: 2, samples: frame_count, buffer }
    }

    /// Builds an asset directly from already-interleaved PCM plus a channel
    /// count, as returned by `asset-io`'s decoder contract.
    pub fn from_interleaved(frequency: u32, channels: u8, interleaved: &[f32]) -> Self {
        match channels {
            1 => Self::from_mono(frequency, interleaved),
            2 => {
                let frames: Vec<[f32; 2]> = interleaved
                    .chunks_exact(2)
                    .map(|c| [c[0], c[1]])
                    .collect();
                Self::from_stereo(frequency, &frames)
            }
            other => {
                tracing::warn!(channels = other, "unsupported channel count, creating empty asset");
                PcmAsset { frequency, channels: 1, samples: 0, buffer: Vec::new() }
            }
        }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples
    }

    /// Linearly interpolates the sample at fractional frame position `pos`,
    /// returning `(left, right)`. For mono assets both channels carry the
    /// same value. `pos` must lie in `0.0 ..= samples as f64` (guaranteed by
    /// the mixer's clamped `stopPos`); the guard frame makes `ip + 1` valid
    /// at the upper bound.
    pub fn interpolate(&self, pos: f64) -> (f32, f32) {
        let ip = pos.floor() as usize;
        let frac = (pos - pos.floor()) as f32;
        match self.channels {
            1 => {
                let a = self.buffer[ip];
                let b = self.buffer[ip + 1];
                let v = a + (b - a) * frac;
                (v, v)
            }
            2 => {
                let al = self.buffer[ip * 2];
                let bl = self.buffer[ip * 2 + 2];
                let ar = self.buffer[ip * 2 + 1];
                let br = self.buffer[ip * 2 + 3];
                (al + (bl - al) * frac, ar + (br - ar) * frac)
            }
            _ => (0.0, 0.0),
        }
    }

    /// The un-interpolated sample at `floor(pos)`, used to seed the stop-fade
    /// tail (spec.md §4.4 reads "the current asset sample at floor(pos)", a
    /// discrete read rather than the interpolated one used during playback).
    pub fn sample_at_floor(&self, pos: f64) -> (f32, f32) {
        let ip = pos.floor() as usize;
        match self.channels {
            1 => {
                let v = self.buffer[ip];
                (v, v)
            }
            2 => (self.buffer[ip * 2], self.buffer[ip * 2 + 1]),
            _ => (0.0, 0.0),
        }
    }
}

struct AssetSlot {
    generation: u32,
    data: Option<Arc<PcmAsset>>,
}

/// Fixed-growth arena of live PCM assets, doubling as the "asset registry"
/// that supports the bulk "free everything still allocated" teardown path
/// (spec.md §3, §4.5). Not consulted during mixing — voices resolve assets
/// through the mixer's own lookup, which is this arena.
pub struct AssetArena {
    slots: Vec<AssetSlot>,
}

impl AssetArena {
    pub fn new() -> Self {
        // Slot 0 is the reserved invalid sentinel, never allocated.
        AssetArena { slots: vec![AssetSlot { generation: 0, data: None }] }
    }

    pub fn insert(&mut self, asset: PcmAsset) -> AssetId {
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if slot.data.is_none() {
                slot.generation = slot.generation.wrapping_add(1);
                slot.data = Some(Arc::new(asset));
                return AssetId { index: index as u32, generation: slot.generation };
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(AssetSlot { generation: 1, data: Some(Arc::new(asset)) });
        AssetId { index, generation: 1 }
    }

    pub fn get(&self, id: AssetId) -> Option<&Arc<PcmAsset>> {
        if id.index == 0 {
            return None;
        }
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_ref())
    }

    /// Removes and returns the asset at `id`, invalidating any `AssetId`
    /// that currently addresses this slot. Returns `None` for a stale id.
    pub fn remove(&mut self, id: AssetId) -> Option<Arc<PcmAsset>> {
        if id.index == 0 {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.take()
    }

    /// Every currently-occupied id, for `free_all_allocated`.
    pub fn live_ids(&self) -> Vec<AssetId> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, slot)| slot.data.is_some())
            .map(|(index, slot)| AssetId { index: index as u32, generation: slot.generation })
            .collect()
    }
}

impl Default for AssetArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_guard_frame_duplicates_head() {
        let asset = PcmAsset::from_mono(48_000, &[0.5; 1000]);
        let (l, r) = asset.interpolate(999.0);
        assert_eq!(l, 0.5);
        assert_eq!(r, 0.5);
    }

    #[test]
    fn stereo_guard_frame_duplicates_head() {
        let frames: Vec<[f32; 2]> = (0..100).map(|_| [1.0, -1.0]).collect();
        let asset = PcmAsset::from_stereo(48_000, &frames);
        let (l, r) = asset.interpolate(99.0);
        assert_eq!(l, 1.0);
        assert_eq!(r, -1.0);
    }

    #[test]
    fn arena_round_trips_and_invalidates_on_remove() {
        let mut arena = AssetArena::new();
        let id = arena.insert(PcmAsset::from_mono(48_000, &[0.0; 10]));
        assert!(arena.get(id).is_some());
        let removed = arena.remove(id);
        assert!(removed.is_some());
        assert!(arena.get(id).is_none());
        assert!(arena.remove(id).is_none());
    }

    #[test]
    fn arena_reuses_freed_slot_with_new_generation() {
        let mut arena = AssetArena::new();
        let id1 = arena.insert(PcmAsset::from_mono(48_000, &[0.0; 10]));
        arena.remove(id1);
        let id2 = arena.insert(PcmAsset::from_mono(48_000, &[1.0; 10]));
        assert_eq!(id1.index, id2.index);
        assert_ne!(id1.generation, id2.generation);
        assert!(arena.get(id1).is_none());
        assert!(arena.get(id2).is_some());
    }
}
