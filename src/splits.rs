use std::fmt;

use bevy::prelude::*;
use static_assertions::const_assert_eq;

use crate::cascade::{
    CASCADE_COUNT,
    CascadeDetail,
    CascadeStates,
};


pub const BASE_SPLITS: [f32; 3] = [0.1, 0.3, 0.6];
pub const LOW_DETAIL_SCALE: f32 = 1.2;
pub const HIGH_DETAIL_SCALE: f32 = 0.9;

// 4 cascades share 3 interior boundaries
const_assert_eq!(BASE_SPLITS.len() + 1, CASCADE_COUNT);


/// Normalized cascade boundaries as fractions of the shadow distance.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Reflect,
)]
pub struct CascadeSplits(pub [f32; 3]);

impl Default for CascadeSplits {
    fn default() -> Self {
        Self(BASE_SPLITS)
    }
}

impl CascadeSplits {
    /// Only the first three cascades own a trailing boundary, so the last
    /// cascade's state never moves the splits.
    pub fn from_states(states: &CascadeStates) -> Self {
        let mut splits = BASE_SPLITS;

        for (split, state) in splits.iter_mut().zip(states.iter()) {
            *split = scale_split(*split, state);
        }

        Self(splits)
    }

    /// Far bounds for each of the four cascades; the last one is `max_distance`.
    pub fn to_cascade_bounds(&self, max_distance: f32) -> Vec<f32> {
        self.0.iter()
            .map(|fraction| fraction * max_distance)
            .chain(std::iter::once(max_distance))
            .collect()
    }
}

impl fmt::Display for CascadeSplits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a:.2}, {b:.2}, {c:.2}")
    }
}


pub fn scale_split(base: f32, state: CascadeDetail) -> f32 {
    let scale = match state {
        CascadeDetail::Low => LOW_DETAIL_SCALE,
        CascadeDetail::Mid => 1.0,
        CascadeDetail::High => HIGH_DETAIL_SCALE,
    };

    (base * scale).clamp(0.0, 1.0)
}
