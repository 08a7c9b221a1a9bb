//! VOI functions mapping a rescaled value to a display level in `0..=255`.

use crate::config::VoiFunction;

/// Apply `function` with the given window, returning an unrounded level
/// clamped to `[0, 255]`.
pub fn apply_function(function: VoiFunction, x: f64, center: f64, width: f64) -> f64 {
    let y = match function {
        VoiFunction::LinearDicom => {
            if width <= 1.0 {
                // degenerate DICOM window: a threshold at center - 0.5
                if x <= center - 0.5 {
                    0.0
                } else {
                    255.0
                }
            } else {
                (x - (center - 0.5)) * 255.0 / (width - 1.0) + 127.5
            }
        }
        VoiFunction::LinearExact => (x - center) * 255.0 / width + 127.5,
        VoiFunction::Logistic => 255.0 / (1.0 + (-4.0 * (x - center) / width).exp()),
    };
    y.clamp(0.0, 255.0)
}

/// Round a clamped level to a byte.
#[inline]
pub(crate) fn to_level(y: f64) -> u8 {
    y.round().clamp(0.0, 255.0) as u8
}
