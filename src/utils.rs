//! Small DSP helpers shared by the grain engine.

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// Wrap a phase value into `0.0..1.0`.
#[inline]
pub(crate) fn wrap_phase(phase: f32) -> f32 {
    if (0.0..1.0).contains(&phase) {
        phase
    } else {
        phase.rem_euclid(1.0)
    }
}

/// Wrap a fractional frame position into `0.0..frame_count`.
#[inline]
pub(crate) fn wrap_frame_position(position: f64, frame_count: usize) -> f64 {
    debug_assert!(frame_count > 0);
    let frames = frame_count as f64;
    if (0.0..frames).contains(&position) {
        position
    } else {
        let wrapped = position.rem_euclid(frames);
        // rem_euclid may round up to `frames` for tiny negative inputs
        if wrapped < frames {
            wrapped
        } else {
            0.0
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Read one channel of an interleaved buffer at a fractional frame position, using the 4-point,
/// 3rd-order Hermite x-form algorithm from "Polynomial Interpolators for High-Quality Resampling
/// of Oversampled Audio" by Olli Niemitalo, p. 43:
/// http://yehar.com/blog/wp-content/uploads/2009/08/deip.pdf
///
/// Neighboring frames wrap around the buffer edges, so looped playback stays click-free.
#[inline]
pub(crate) fn read_interpolated(
    data: &[f32],
    frame_count: usize,
    channel_count: usize,
    channel: usize,
    position: f64,
) -> f32 {
    debug_assert!(frame_count > 0 && channel_count > 0);
    debug_assert!(channel < channel_count);
    debug_assert!(data.len() >= frame_count * channel_count);
    debug_assert!((0.0..frame_count as f64).contains(&position));

    let index = position as usize;
    let fraction = (position - index as f64) as f32;

    let prev = if index > 0 { index - 1 } else { frame_count - 1 };
    let next = if index + 1 < frame_count { index + 1 } else { 0 };
    let next2 = if next + 1 < frame_count { next + 1 } else { 0 };

    let sample_at = |frame: usize| {
        let sample_index = frame * channel_count + channel;
        assume!(unsafe: sample_index < data.len(), "Frame indices are wrapped above");
        data[sample_index]
    };
    let ym1 = sample_at(prev);
    let y0 = sample_at(index);
    let y1 = sample_at(next);
    let y2 = sample_at(next2);

    let c0 = y0;
    let c1 = (y1 - ym1) * 0.5;
    let c2 = ym1 - y0 * 2.5 + y1 * 2.0 - y2 * 0.5;
    let c3 = (y2 - ym1) * 0.5 + (y0 - y1) * 1.5;
    ((c3 * fraction + c2) * fraction + c1) * fraction + c0
}

// -------------------------------------------------------------------------------------------------

/// Find the table entry closest to the given value. Returns the value unchanged for empty tables.
#[inline]
pub(crate) fn nearest_table_value(table: &[f32], value: f32) -> f32 {
    let mut nearest = value;
    let mut nearest_distance = f32::MAX;
    for entry in table {
        let distance = (entry - value).abs();
        if distance < nearest_distance {
            nearest = *entry;
            nearest_distance = distance;
        }
    }
    nearest
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_wrapping() {
        assert_eq!(wrap_phase(0.25), 0.25);
        assert_eq!(wrap_phase(1.25), 0.25);
        assert_eq!(wrap_phase(-0.25), 0.75);
        assert_eq!(wrap_phase(1.0), 0.0);
    }

    #[test]
    fn frame_position_wrapping() {
        assert_eq!(wrap_frame_position(3.5, 8), 3.5);
        assert_eq!(wrap_frame_position(8.0, 8), 0.0);
        assert_eq!(wrap_frame_position(9.5, 8), 1.5);
        assert_eq!(wrap_frame_position(-1.0, 8), 7.0);
        let tiny_negative = wrap_frame_position(-1e-12, 8);
        assert!((0.0..8.0).contains(&tiny_negative));
    }

    #[test]
    fn interpolation_at_integer_positions() {
        let data = [0.0, 1.0, 2.0, 3.0];
        for (frame, expected) in data.iter().enumerate() {
            let value = read_interpolated(&data, data.len(), 1, 0, frame as f64);
            assert!((value - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn interpolation_selects_channel() {
        // two interleaved channels with distinct content
        let data = [0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0];
        let left = read_interpolated(&data, 4, 2, 0, 2.0);
        let right = read_interpolated(&data, 4, 2, 1, 2.0);
        assert!((left - 2.0).abs() < 1e-6);
        assert!((right - 12.0).abs() < 1e-6);
    }

    #[test]
    fn interpolation_single_frame() {
        let data = [0.5];
        let value = read_interpolated(&data, 1, 1, 0, 0.0);
        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nearest_value() {
        let table = [0.5, 1.0, 2.0];
        assert_eq!(nearest_table_value(&table, 0.9), 1.0);
        assert_eq!(nearest_table_value(&table, 0.0), 0.5);
        assert_eq!(nearest_table_value(&table, 100.0), 2.0);
        assert_eq!(nearest_table_value(&[], 1.25), 1.25);
    }
}
