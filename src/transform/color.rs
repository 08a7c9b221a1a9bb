//! ITU-R BT.601 full-range conversions between RGB and YCbCr.

/// Convert one RGB pixel to full-range Y, Cb, Cr.
pub fn rgb_to_ybr(r: f64, g: f64, b: f64) -> [u8; 3] {
    let y = 0.2990 * r + 0.5870 * g + 0.1140 * b;
    let cb = -0.1687 * r - 0.3313 * g + 0.5000 * b + 128.0;
    let cr = 0.5000 * r - 0.4187 * g - 0.0813 * b + 128.0;
    [clamp_byte(y), clamp_byte(cb), clamp_byte(cr)]
}

/// Convert one full-range Y, Cb, Cr pixel to RGB.
pub fn ybr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f64;
    let cb = cb as f64 - 128.0;
    let cr = cr as f64 - 128.0;
    [
        clamp_byte(y + 1.402 * cr),
        clamp_byte(y - 0.344136 * cb - 0.714136 * cr),
        clamp_byte(y + 1.772 * cb),
    ]
}

fn clamp_byte(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_has_neutral_chroma() {
        assert_eq!(rgb_to_ybr(0.0, 0.0, 0.0), [0, 128, 128]);
        assert_eq!(rgb_to_ybr(255.0, 255.0, 255.0), [255, 128, 128]);
        assert_eq!(ybr_to_rgb(77, 128, 128), [77, 77, 77]);
    }

    #[test]
    fn test_round_trip_close() {
        let [y, cb, cr] = rgb_to_ybr(200.0, 30.0, 90.0);
        let [r, g, b] = ybr_to_rgb(y, cb, cr);
        assert!((r as i32 - 200).abs() <= 2);
        assert!((g as i32 - 30).abs() <= 2);
        assert!((b as i32 - 90).abs() <= 2);
    }
}
