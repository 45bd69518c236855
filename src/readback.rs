use std::fmt;

use bevy::prelude::*;

use crate::cascade::CASCADE_COUNT;


/// Size of one RGBA32F texel.
pub const TEXEL_SIZE: usize = 4 * std::mem::size_of::<f32>();


/// One variance value per cascade, as produced by a completed estimation round.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Reflect,
)]
pub struct VarianceSample(pub [f32; CASCADE_COUNT]);

impl fmt::Display for VarianceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z, w] = self.0;
        write!(f, "{x:.4}, {y:.4}, {z:.4}, {w:.4}")
    }
}


/// Identifies one issued readback request.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Reflect,
)]
pub struct ReadbackTicket(pub u64);


/// Payload delivered by the readback transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadbackResult {
    pub has_error: bool,
    pub data: Vec<[f32; 4]>,
}

impl ReadbackResult {
    pub fn error() -> Self {
        Self {
            has_error: true,
            data: Vec::new(),
        }
    }

    pub fn texels(data: Vec<[f32; 4]>) -> Self {
        Self {
            has_error: false,
            data,
        }
    }

    /// Decodes tightly packed RGBA32F texels; a trailing partial texel is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_texel_rows(bytes, bytes.len() / TEXEL_SIZE, bytes.len().max(1))
    }

    /// Decodes a buffer whose rows are padded to `bytes_per_row`, as produced by a
    /// texture to buffer copy.
    pub fn from_texel_rows(
        bytes: &[u8],
        texels_per_row: usize,
        bytes_per_row: usize,
    ) -> Self {
        let row_bytes = texels_per_row * TEXEL_SIZE;
        if row_bytes == 0 || bytes_per_row < row_bytes {
            return Self::texels(Vec::new());
        }

        let data = bytes
            .chunks(bytes_per_row)
            .filter(|row| row.len() >= row_bytes)
            .flat_map(|row| row[..row_bytes].chunks_exact(TEXEL_SIZE))
            .map(bytemuck::pod_read_unaligned::<[f32; 4]>)
            .collect();

        Self::texels(data)
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn first_sample(&self) -> Option<VarianceSample> {
        self.data.first().copied().map(VarianceSample)
    }
}
