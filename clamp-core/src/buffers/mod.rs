//! Waveform slots shared by Vm recording, beat averaging, and AP-clamp playback.
//!
//! The store owns a fixed pool of [`WAVEFORM_SLOTS`] buffers addressed by
//! [`BufferIndex`] handles. Each slot reserves its full capacity when the
//! store is built, so the tick path can clear, resize, and append without
//! touching the allocator.

use alloc::vec::Vec;
use core::fmt;

/// Number of waveform slots addressable by protocol steps.
pub const WAVEFORM_SLOTS: usize = 100;

/// Samples reserved per slot when no explicit capacity is requested.
pub const DEFAULT_SLOT_CAPACITY: usize = 16_384;

/// Validated handle into the waveform pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferIndex(u8);

impl BufferIndex {
    /// Returns a handle when `index` addresses an existing slot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: u16) -> Option<Self> {
        if (index as usize) < WAVEFORM_SLOTS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// Zero-based slot number.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors reported when a slot cannot hold the requested samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    CapacityExceeded {
        index: BufferIndex,
        requested: usize,
        capacity: usize,
    },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::CapacityExceeded {
                index,
                requested,
                capacity,
            } => write!(
                f,
                "buffer {index} needs {requested} samples but holds {capacity}"
            ),
        }
    }
}

/// One waveform slot. Never grows past the capacity reserved at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformBuffer {
    samples: Vec<f64>,
    capacity: usize,
}

impl WaveformBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Recorded samples in order.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples this slot accepts.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sample at `offset`, if present.
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<f64> {
        self.samples.get(offset).copied()
    }

    fn get_mut(&mut self, offset: usize) -> Option<&mut f64> {
        self.samples.get_mut(offset)
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    fn push(&mut self, sample: f64) -> bool {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
            true
        } else {
            false
        }
    }

    fn reset_zeroed(&mut self, len: usize) -> bool {
        if len > self.capacity {
            return false;
        }
        self.samples.clear();
        self.samples.resize(len, 0.0);
        true
    }

    fn overwrite(&mut self, samples: &[f64]) -> bool {
        if samples.len() > self.capacity {
            return false;
        }
        self.samples.clear();
        self.samples.extend_from_slice(samples);
        true
    }
}

/// Fixed pool of waveform slots.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformStore {
    slots: Vec<WaveformBuffer>,
    slot_capacity: usize,
}

impl WaveformStore {
    /// Builds the pool with [`DEFAULT_SLOT_CAPACITY`] samples per slot.
    #[must_use]
    pub fn new() -> Self {
        Self::with_slot_capacity(DEFAULT_SLOT_CAPACITY)
    }

    /// Builds the pool reserving `slot_capacity` samples in every slot.
    #[must_use]
    pub fn with_slot_capacity(slot_capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(WAVEFORM_SLOTS);
        for _ in 0..WAVEFORM_SLOTS {
            slots.push(WaveformBuffer::with_capacity(slot_capacity));
        }
        Self {
            slots,
            slot_capacity,
        }
    }

    /// Samples reserved per slot.
    #[must_use]
    pub const fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Read access to a slot.
    #[must_use]
    pub fn slot(&self, index: BufferIndex) -> &WaveformBuffer {
        &self.slots[index.get()]
    }

    /// Empties a slot, keeping its reservation.
    pub fn clear(&mut self, index: BufferIndex) {
        self.slots[index.get()].clear();
    }

    /// Appends one sample. Returns `false` once the slot is full.
    pub fn record(&mut self, index: BufferIndex, sample: f64) -> bool {
        self.slots[index.get()].push(sample)
    }

    /// Clears a slot and zero-fills it to `len` samples for beat averaging.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::CapacityExceeded`] when `len` exceeds the
    /// reservation; the slot is left untouched.
    pub fn prepare_average(&mut self, index: BufferIndex, len: usize) -> Result<(), BufferError> {
        if self.slots[index.get()].reset_zeroed(len) {
            Ok(())
        } else {
            Err(self.capacity_error(index, len))
        }
    }

    /// Folds `sample` into the running sum at `offset`, or divides the final
    /// sum by `beats` when `finalize` is set.
    ///
    /// Returns `false` when `offset` lies outside the prepared length.
    pub fn accumulate(
        &mut self,
        index: BufferIndex,
        offset: usize,
        sample: f64,
        finalize: Option<u32>,
    ) -> bool {
        match self.slots[index.get()].get_mut(offset) {
            Some(slot) => {
                *slot = match finalize {
                    Some(beats) => (sample + *slot) / f64::from(beats),
                    None => *slot + sample,
                };
                true
            }
            None => false,
        }
    }

    /// Replaces a slot's contents with externally supplied samples.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::CapacityExceeded`] when `samples` does not fit.
    pub fn load(&mut self, index: BufferIndex, samples: &[f64]) -> Result<(), BufferError> {
        if self.slots[index.get()].overwrite(samples) {
            Ok(())
        } else {
            Err(self.capacity_error(index, samples.len()))
        }
    }

    fn capacity_error(&self, index: BufferIndex, requested: usize) -> BufferError {
        BufferError::CapacityExceeded {
            index,
            requested,
            capacity: self.slot_capacity,
        }
    }
}

impl Default for WaveformStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(value: u16) -> BufferIndex {
        BufferIndex::new(value).expect("index in range")
    }

    #[test]
    fn index_rejects_slots_past_the_pool() {
        assert!(BufferIndex::new(99).is_some());
        assert!(BufferIndex::new(100).is_none());
        assert!(BufferIndex::new(u16::MAX).is_none());
    }

    #[test]
    fn record_stops_at_capacity_without_reallocating() {
        let mut store = WaveformStore::with_slot_capacity(3);
        let slot = index(7);
        for value in [1.0, 2.0, 3.0] {
            assert!(store.record(slot, value));
        }
        assert!(!store.record(slot, 4.0));
        assert_eq!(store.slot(slot).as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(store.slot(index(8)).len(), 0);
    }

    #[test]
    fn prepare_average_rejects_oversized_cycles() {
        let mut store = WaveformStore::with_slot_capacity(4);
        let slot = index(2);
        store.load(slot, &[9.0, 9.0]).expect("load fits");

        match store.prepare_average(slot, 5) {
            Err(BufferError::CapacityExceeded {
                requested: 5,
                capacity: 4,
                ..
            }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.slot(slot).as_slice(), &[9.0, 9.0]);

        store.prepare_average(slot, 4).expect("fits");
        assert_eq!(store.slot(slot).as_slice(), &[0.0; 4]);
    }

    #[test]
    fn accumulate_sums_then_divides_on_final_beat() {
        let mut store = WaveformStore::with_slot_capacity(2);
        let slot = index(0);
        store.prepare_average(slot, 1).expect("fits");

        assert!(store.accumulate(slot, 0, 1.0, None));
        assert!(store.accumulate(slot, 0, 2.0, None));
        assert!(store.accumulate(slot, 0, 3.0, Some(3)));
        assert_eq!(store.slot(slot).get(0), Some(2.0));
        assert!(!store.accumulate(slot, 1, 1.0, None));
    }
}
