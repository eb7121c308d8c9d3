//! Ordered protocol model and editing operations.
//!
//! A [`Protocol`] is plain data: the control path edits it freely and ships a
//! copy to the tick side when a run starts, so a running protocol is never
//! mutated underneath the sequencer.

pub mod step;

use core::fmt;

use heapless::Vec;

pub use step::{BeatTrain, ProtocolStep, StepDescriptor, StepError, StepField, StepKind};

/// Maximum number of steps a protocol can hold.
pub const MAX_PROTOCOL_STEPS: usize = 64;

/// Errors reported by protocol edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The protocol already holds [`MAX_PROTOCOL_STEPS`] steps.
    Full,
    /// The index does not name an existing step.
    IndexOutOfRange { index: usize, len: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Full => {
                write!(f, "protocol is full ({MAX_PROTOCOL_STEPS} steps)")
            }
            ProtocolError::IndexOutOfRange { index, len } => {
                write!(f, "step {index} does not exist (protocol has {len} steps)")
            }
        }
    }
}

/// Failure while building a protocol from descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    Step { position: usize, error: StepError },
    Protocol { position: usize, error: ProtocolError },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::Step { position, error } => {
                write!(f, "step {}: {error}", position + 1)
            }
            DescriptorError::Protocol { position, error } => {
                write!(f, "step {}: {error}", position + 1)
            }
        }
    }
}

/// Ordered list of steps; insertion order is execution order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Protocol {
    steps: Vec<ProtocolStep, MAX_PROTOCOL_STEPS>,
}

impl Protocol {
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Builds a protocol from descriptors, rejecting the whole set on the
    /// first invalid entry.
    ///
    /// # Errors
    ///
    /// Returns the position and reason of the first descriptor that fails
    /// validation, or [`ProtocolError::Full`] when there are too many.
    pub fn from_descriptors<I>(descriptors: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = StepDescriptor>,
    {
        let mut protocol = Self::new();
        for (position, descriptor) in descriptors.into_iter().enumerate() {
            let step = ProtocolStep::try_from(descriptor)
                .map_err(|error| DescriptorError::Step { position, error })?;
            protocol
                .push(step)
                .map_err(|error| DescriptorError::Protocol { position, error })?;
        }
        Ok(protocol)
    }

    /// Appends a step and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Full`] at capacity.
    pub fn push(&mut self, step: ProtocolStep) -> Result<usize, ProtocolError> {
        self.steps.push(step).map_err(|_| ProtocolError::Full)?;
        Ok(self.steps.len() - 1)
    }

    /// Inserts a step at `position`, shifting later steps down.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IndexOutOfRange`] when `position` is past the
    /// end, or [`ProtocolError::Full`] at capacity.
    pub fn insert(&mut self, position: usize, step: ProtocolStep) -> Result<usize, ProtocolError> {
        if position > self.steps.len() {
            return Err(self.out_of_range(position));
        }
        self.steps
            .insert(position, step)
            .map_err(|_| ProtocolError::Full)?;
        Ok(position)
    }

    /// Inserts a step directly after the step at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IndexOutOfRange`] when `index` does not name
    /// an existing step, or [`ProtocolError::Full`] at capacity.
    pub fn insert_after(&mut self, index: usize, step: ProtocolStep) -> Result<usize, ProtocolError> {
        if index >= self.steps.len() {
            return Err(self.out_of_range(index));
        }
        self.insert(index + 1, step)
    }

    /// Removes and returns the step at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IndexOutOfRange`] when `index` does not name
    /// an existing step.
    pub fn remove(&mut self, index: usize) -> Result<ProtocolStep, ProtocolError> {
        if index >= self.steps.len() {
            return Err(self.out_of_range(index));
        }
        Ok(self.steps.remove(index))
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ProtocolStep> {
        self.steps.get(index)
    }

    #[must_use]
    pub fn steps(&self) -> &[ProtocolStep] {
        &self.steps
    }

    pub fn iter(&self) -> core::slice::Iter<'_, ProtocolStep> {
        self.steps.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Descriptors for every step, in order.
    pub fn descriptors(&self) -> impl Iterator<Item = StepDescriptor> + '_ {
        self.steps.iter().map(ProtocolStep::descriptor)
    }

    fn out_of_range(&self, index: usize) -> ProtocolError {
        ProtocolError::IndexOutOfRange {
            index,
            len: self.steps.len(),
        }
    }
}

impl<'a> IntoIterator for &'a Protocol {
    type Item = &'a ProtocolStep;
    type IntoIter = core::slice::Iter<'a, ProtocolStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
