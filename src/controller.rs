//! The closed loop: throttled dispatch, asynchronous completion, hysteresis and splits.
//!
//! The controller never touches the GPU or the host renderer directly. Both are
//! reached through [`VarianceEstimator`] and [`CascadeEffects`], so the loop can be
//! driven deterministically by test doubles.

use bevy::prelude::*;

use crate::{
    cascade::{
        CascadeStates,
        CascadeUpdate,
        keyword,
    },
    error::ShadowVarianceError,
    readback::{
        ReadbackResult,
        ReadbackTicket,
        VarianceSample,
    },
    settings::ShadowVarianceSettings,
    splits::CascadeSplits,
    throttle::{
        DispatchThrottle,
        TickDecision,
    },
};


/// GPU side of the loop: atlas lookup, estimator dispatch and readback requests.
pub trait VarianceEstimator {
    type Atlas;
    type Target;

    /// `None` until the render pipeline has bound its shadow map.
    fn shadow_atlas(&self) -> Option<Self::Atlas>;

    fn dispatch(
        &mut self,
        atlas: &Self::Atlas,
        sample_count: u32,
        target: &Self::Target,
    );

    /// Must never complete on the calling tick.
    fn request_readback(&mut self, target: &Self::Target) -> ReadbackTicket;
}


/// Host rendering configuration written by the controller.
pub trait CascadeEffects {
    fn enable_feature_flag(&mut self, name: &str);
    fn disable_feature_flag(&mut self, name: &str);
    fn write_splits(&mut self, splits: CascadeSplits);
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Inactive,
    Pending,
    Throttled,
    AtlasUnavailable,
    Dispatched(ReadbackTicket),
}


#[derive(Clone, Debug, PartialEq)]
pub enum ReadbackOutcome {
    /// Stale ticket, or the controller was deactivated while the request was in flight.
    Ignored,
    TransportError,
    Empty,
    Applied(CascadeUpdate),
}


#[derive(Clone, Debug)]
pub struct ShadowVarianceController<T> {
    active: bool,
    target: Option<T>,
    throttle: DispatchThrottle,
    outstanding: Option<ReadbackTicket>,
    states: CascadeStates,
    splits: CascadeSplits,
    last_sample: VarianceSample,
}

impl<T> Default for ShadowVarianceController<T> {
    fn default() -> Self {
        Self {
            active: false,
            target: None,
            throttle: DispatchThrottle::default(),
            outstanding: None,
            states: CascadeStates::default(),
            splits: CascadeSplits::default(),
            last_sample: VarianceSample::default(),
        }
    }
}

impl<T> ShadowVarianceController<T> {
    pub fn new(target: T) -> Self {
        let mut controller = Self::default();
        controller.activate(target);
        controller
    }

    /// Takes ownership of the estimator target and starts from all-Low cascades.
    pub fn activate(&mut self, target: T) {
        self.throttle.reset();
        self.states.reset();
        self.outstanding = None;
        self.last_sample = VarianceSample::default();
        self.target = Some(target);
        self.active = true;
    }

    /// Returns the estimator target so the caller can release it. Any completion
    /// still in flight is ignored from here on.
    pub fn deactivate(&mut self) -> Option<T> {
        self.active = false;
        self.outstanding = None;
        self.throttle.clear_pending();
        self.target.take()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_pending(&self) -> bool {
        self.throttle.pending
    }

    pub fn frame_counter(&self) -> u64 {
        self.throttle.frame_counter
    }

    pub fn states(&self) -> &CascadeStates {
        &self.states
    }

    pub fn splits(&self) -> &CascadeSplits {
        &self.splits
    }

    pub fn last_sample(&self) -> &VarianceSample {
        &self.last_sample
    }

    pub fn target(&self) -> Option<&T> {
        self.target.as_ref()
    }

    pub fn outstanding(&self) -> Option<ReadbackTicket> {
        self.outstanding
    }

    pub fn tick<E>(
        &mut self,
        settings: &ShadowVarianceSettings,
        estimator: &mut E,
    ) -> TickOutcome
    where
        E: VarianceEstimator<Target = T>,
    {
        if !self.active {
            return TickOutcome::Inactive;
        }

        match self.throttle.tick(settings.frames_per_dispatch) {
            TickDecision::Pending => return TickOutcome::Pending,
            TickDecision::Throttled => return TickOutcome::Throttled,
            TickDecision::Eligible => {},
        }

        let Some(target) = self.target.as_ref() else {
            return TickOutcome::Inactive;
        };

        let Some(atlas) = estimator.shadow_atlas() else {
            if self.throttle.atlas_unavailable() && settings.debug_mode {
                warn!("{}; waiting", ShadowVarianceError::AtlasUnavailable);
            }
            return TickOutcome::AtlasUnavailable;
        };
        self.throttle.atlas_available();

        estimator.dispatch(&atlas, settings.sample_count, target);
        self.throttle.mark_dispatched();

        let ticket = estimator.request_readback(target);
        self.outstanding = Some(ticket);

        if settings.debug_mode {
            debug!(frame = self.throttle.frame_counter, ?ticket, "dispatched variance estimation");
        }

        TickOutcome::Dispatched(ticket)
    }

    pub fn complete_readback<F>(
        &mut self,
        ticket: ReadbackTicket,
        result: ReadbackResult,
        settings: &ShadowVarianceSettings,
        effects: &mut F,
    ) -> ReadbackOutcome
    where
        F: CascadeEffects + ?Sized,
    {
        if !self.active || self.outstanding != Some(ticket) {
            return ReadbackOutcome::Ignored;
        }

        // cleared before inspecting the result so a failed round never stalls the throttle
        self.outstanding = None;
        self.throttle.clear_pending();

        if result.has_error {
            if settings.debug_mode {
                warn!(?ticket, "{}", ShadowVarianceError::Transport);
            }
            return ReadbackOutcome::TransportError;
        }

        let Some(sample) = result.first_sample() else {
            if settings.debug_mode {
                let err = ShadowVarianceError::MalformedResult {
                    elements: result.element_count(),
                };
                warn!(?ticket, "{err}; skipping");
            }
            return ReadbackOutcome::Empty;
        };

        self.last_sample = sample;
        if settings.debug_mode {
            info!("variances: {}", sample);
        }

        ReadbackOutcome::Applied(self.apply_variance(&sample, settings, effects))
    }

    pub fn apply_variance<F>(
        &mut self,
        sample: &VarianceSample,
        settings: &ShadowVarianceSettings,
        effects: &mut F,
    ) -> CascadeUpdate
    where
        F: CascadeEffects + ?Sized,
    {
        let update = self.states.apply_variance(sample, &settings.thresholds());

        for transition in &update.transitions {
            let name = keyword(&settings.keyword_prefix, transition.cascade);
            if transition.to.reduces_detail() {
                effects.enable_feature_flag(&name);
            } else {
                effects.disable_feature_flag(&name);
            }

            if settings.debug_mode {
                info!("cascade[{}] {}→{}", transition.cascade, transition.from, transition.to);
            }
        }

        if update.changed() {
            self.splits = CascadeSplits::from_states(&self.states);
            effects.write_splits(self.splits);

            if settings.debug_mode {
                info!("new splits: {}", self.splits);
            }
        }

        update
    }
}
