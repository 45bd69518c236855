use std::fmt;

use bevy::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

use crate::readback::VarianceSample;


pub const CASCADE_COUNT: usize = 4;

/// Demotion thresholds are the promotion thresholds scaled by this factor.
pub const HYSTERESIS_FACTOR: f32 = 0.8;


#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Reflect,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum CascadeDetail {
    #[default]
    Low = 0,
    Mid = 1,
    High = 2,
}

impl CascadeDetail {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Single hysteresis step for one cascade.
    ///
    /// Promotions compare against the thresholds directly, demotions against the
    /// thresholds scaled by [`HYSTERESIS_FACTOR`]. There is no direct High to Low
    /// path; a High cascade demotes through Mid on a later sample.
    pub fn transition(
        self,
        variance: f32,
        thresholds: &CascadeThresholds,
    ) -> CascadeDetail {
        use CascadeDetail::*;

        if self == Low && variance > thresholds.low_to_mid {
            Mid
        } else if self == Mid && variance > thresholds.mid_to_high {
            High
        } else if self == High && variance < thresholds.mid_to_high * HYSTERESIS_FACTOR {
            Mid
        } else if self == Mid && variance < thresholds.low_to_mid * HYSTERESIS_FACTOR {
            Low
        } else {
            self
        }
    }

    /// Low detail cascades get the detail-reduction feature flag.
    pub fn reduces_detail(self) -> bool {
        self == CascadeDetail::Low
    }
}

impl fmt::Display for CascadeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ordinal())
    }
}


#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Reflect,
    Serialize,
    Deserialize,
)]
pub struct CascadeThresholds {
    pub low_to_mid: f32,
    pub mid_to_high: f32,
}

impl Default for CascadeThresholds {
    fn default() -> Self {
        Self {
            low_to_mid: 0.05,
            mid_to_high: 0.10,
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CascadeTransition {
    pub cascade: usize,
    pub from: CascadeDetail,
    pub to: CascadeDetail,
}


#[derive(Clone, Debug, Default, PartialEq)]
pub struct CascadeUpdate {
    pub transitions: Vec<CascadeTransition>,
}

impl CascadeUpdate {
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}


#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Reflect,
)]
pub struct CascadeStates(pub [CascadeDetail; CASCADE_COUNT]);

impl CascadeStates {
    pub fn reset(&mut self) {
        self.0 = [CascadeDetail::Low; CASCADE_COUNT];
    }

    pub fn get(&self, cascade: usize) -> CascadeDetail {
        self.0[cascade]
    }

    pub fn iter(&self) -> impl Iterator<Item = CascadeDetail> + '_ {
        self.0.iter().copied()
    }

    /// Runs every cascade through its transition and commits the results.
    ///
    /// Cascades are independent: the value at index `i` only ever feeds cascade `i`.
    pub fn apply_variance(
        &mut self,
        sample: &VarianceSample,
        thresholds: &CascadeThresholds,
    ) -> CascadeUpdate {
        let mut update = CascadeUpdate::default();

        for (cascade, (state, variance)) in self.0.iter_mut()
            .zip(sample.0.iter())
            .enumerate()
        {
            let from = *state;
            let to = from.transition(*variance, thresholds);

            if to != from {
                *state = to;
                update.transitions.push(CascadeTransition {
                    cascade,
                    from,
                    to,
                });
            }
        }

        update
    }
}

impl fmt::Display for CascadeStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "[{a}, {b}, {c}, {d}]")
    }
}


pub fn keyword(prefix: &str, cascade: usize) -> String {
    format!("{prefix}_{cascade}")
}
