use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SynthRouteState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
}

impl SynthRouteState {
    /// Transitions run strictly in order, except that a failed open falls
    /// back from `Opening` to `Closed`.
    pub fn can_transition_to(self, next: SynthRouteState) -> bool {
        use SynthRouteState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Closing)
                | (Closing, Closed)
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lock-free holder of the current state.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SynthRouteState::Closed as u8))
    }

    pub(crate) fn get(&self) -> SynthRouteState {
        SynthRouteState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from` to `to` if the route is in `from`, returning the actual
    /// state otherwise.
    pub(crate) fn transition(
        &self,
        from: SynthRouteState,
        to: SynthRouteState,
    ) -> Result<(), SynthRouteState> {
        debug_assert!(from.can_transition_to(to));
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SynthRouteState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SynthRouteState::*;

    #[test]
    fn only_linear_transitions_are_allowed() {
        let all = [Closed, Opening, Open, Closing];
        let allowed = [
            (Closed, Opening),
            (Opening, Open),
            (Opening, Closed),
            (Open, Closing),
            (Closing, Closed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn cell_rejects_wrong_source_state() {
        let cell = StateCell::new();
        assert_eq!(cell.transition(Open, Closing), Err(Closed));
        assert_eq!(cell.transition(Closed, Opening), Ok(()));
        assert_eq!(cell.transition(Closed, Opening), Err(Opening));
        assert_eq!(cell.get(), Opening);
    }
}
