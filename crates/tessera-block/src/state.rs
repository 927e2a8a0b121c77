//! Block state flags and the temporal phase tag.

use bitflags::bitflags;

bitflags! {
    /// The state word every block carries.
    ///
    /// The default state is inclusive, mutable, dense, unphased and
    /// unconstrained.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct DataState: u16 {
        /// Data carries a temporal phase tag.
        const PHASED = 1;
        /// Placeholder data: a hint that directs expansion, not content.
        const MISSING = 2;
        /// Compressed payload; decompression is the caller's business.
        const COMPRESSED = 4;
        /// Encrypted payload; decryption is the caller's business.
        const ENCRYPTED = 8;
        /// The container is an inclusive-or of its elements.
        const OR = 16;
        /// Future phase. Phased with the high phase bit clear means past.
        const FUTURE = 32 | 1;
        /// The buffer is borrowed: no reallocation, no capacity changes.
        const STATIC = 64;
        /// Fully read-only.
        const CONSTANT = 128;
        /// The element type is pinned and refuses changes.
        const TYPED = 256;
        /// Elements are `{ptr, entry}` pairs instead of values.
        const SPARSE = 512;
        /// The constraint bits, stripped for state comparison and cloning.
        const CONSTRAINED = 64 | 128 | 256;
        /// A mutable member view: borrowed and type-pinned.
        const MEMBER = 64 | 256;
    }
}

/// A 2-bit temporal tag, opaque to the containers and interpreted by higher
/// layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    Past,
    #[default]
    Now,
    Future,
}

impl DataState {
    /// The state with the constraint bits removed.
    #[must_use]
    pub fn unconstrained(self) -> Self {
        self - Self::CONSTRAINED
    }

    /// The phase encoded in the state word.
    #[must_use]
    pub fn phase(self) -> Phase {
        if !self.contains(Self::PHASED) {
            Phase::Now
        } else if self.contains(Self::FUTURE) {
            Phase::Future
        } else {
            Phase::Past
        }
    }

    /// Re-encode the phase bits.
    #[must_use]
    pub fn with_phase(self, phase: Phase) -> Self {
        let cleared = self - Self::FUTURE;
        match phase {
            Phase::Now => cleared,
            Phase::Past => cleared | Self::PHASED,
            Phase::Future => cleared | Self::FUTURE,
        }
    }
}

/// Iteration / insertion end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Front,
    Back,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_bits_round_trip() {
        let state = DataState::default();
        assert_eq!(state.phase(), Phase::Now);
        assert_eq!(state.with_phase(Phase::Past).phase(), Phase::Past);
        assert_eq!(state.with_phase(Phase::Future).phase(), Phase::Future);
        assert_eq!(
            state.with_phase(Phase::Future).with_phase(Phase::Now).phase(),
            Phase::Now
        );
    }

    #[test]
    fn unconstrained_strips_exactly_the_constraints() {
        let state = DataState::OR | DataState::STATIC | DataState::CONSTANT | DataState::TYPED;
        assert_eq!(state.unconstrained(), DataState::OR);
        assert_eq!((DataState::SPARSE | DataState::TYPED).unconstrained(), DataState::SPARSE);
    }
}
