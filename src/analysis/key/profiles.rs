//! Krumhansl-Schmuckler key profiles
//!
//! Listener ratings of how well each scale degree fits a key, starting
//! from the tonic. Reference: Krumhansl, C.L. (1990). Cognitive Foundations
//! of Musical Pitch.

use crate::types::Mode;

pub const KS_MAJOR: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

pub const KS_MINOR: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Profile for a mode, tonic first
pub fn profile(mode: Mode) -> &'static [f64; 12] {
    match mode {
        Mode::Major => &KS_MAJOR,
        Mode::Minor => &KS_MINOR,
    }
}
