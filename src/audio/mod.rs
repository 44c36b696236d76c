//! Audio input

pub mod decoder;

pub use decoder::{decode, resample, TARGET_SAMPLE_RATE};
