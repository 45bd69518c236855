use bevy::prelude::*;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickDecision {
    /// A previous round has not completed yet.
    Pending,
    /// Not a dispatch frame.
    Throttled,
    /// The caller may look up the atlas and dispatch.
    Eligible,
}


/// Gates estimation rounds by frame cadence and the single outstanding request.
#[derive(Clone, Debug, Default, PartialEq, Reflect)]
pub struct DispatchThrottle {
    pub frame_counter: u64,
    pub pending: bool,
    pub atlas_warned: bool,
}

impl DispatchThrottle {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn tick(&mut self, frames_per_dispatch: u32) -> TickDecision {
        self.frame_counter += 1;

        let period = u64::from(frames_per_dispatch.max(1));

        if self.pending {
            TickDecision::Pending
        } else if self.frame_counter % period != 0 {
            TickDecision::Throttled
        } else {
            TickDecision::Eligible
        }
    }

    /// Returns true when this is the first miss since the atlas was last seen.
    pub fn atlas_unavailable(&mut self) -> bool {
        !std::mem::replace(&mut self.atlas_warned, true)
    }

    pub fn atlas_available(&mut self) {
        self.atlas_warned = false;
    }

    pub fn mark_dispatched(&mut self) {
        self.pending = true;
    }

    pub fn clear_pending(&mut self) {
        self.pending = false;
    }
}
