use ndarray::Array2;

use super::calibration::CalibrationMap;
use super::model::Frame;
use crate::error::{Result, SpectralError};

/// Full scale of a normalized frame: a pixel equal to its reference maps to 2^8.
pub const NORMALIZATION_SCALE: f64 = 256.0;

/// Divide `raw` by the reference for `wavelength`, pixel by pixel, without
/// rescaling.
///
/// A zero reference pixel is `DivideByZero`; a negative, NaN or infinite one is
/// `InvalidReference`.  Every quotient is therefore finite and non-negative.
pub fn divide(calibration: &CalibrationMap, wavelength: u32, raw: &Frame) -> Result<Array2<f64>> {
    let reference = calibration.get(wavelength)?;
    if let Some(expected) = reference.shape() {
        if expected != raw.dim() {
            return Err(SpectralError::ShapeMismatch {
                expected,
                found: raw.dim(),
            });
        }
    }

    let mut quotient = Array2::<f64>::zeros(raw.dim());
    for ((row, col), &value) in raw.indexed_iter() {
        let divisor = reference.at(row, col);
        if divisor == 0.0 {
            return Err(SpectralError::DivideByZero {
                wavelength,
                row,
                col,
            });
        }
        if !divisor.is_finite() || divisor < 0.0 {
            return Err(SpectralError::InvalidReference {
                wavelength,
                row,
                col,
                value: divisor,
            });
        }
        quotient[[row, col]] = f64::from(value) / divisor;
    }
    Ok(quotient)
}

/// Divide `raw` by the reference for `wavelength` and rescale:
/// `out = round(raw / reference * 256)`, stored as `u16`.
///
/// Values above `u16::MAX` are reported as `NormalizationOverflow` instead of
/// being clipped.
pub fn normalize(calibration: &CalibrationMap, wavelength: u32, raw: &Frame) -> Result<Frame> {
    let scaled = divide(calibration, wavelength, raw)?.mapv(|q| (q * NORMALIZATION_SCALE).round());

    // Checked before narrowing.
    let max_value = scaled.iter().copied().fold(0.0_f64, f64::max);
    if max_value > f64::from(u16::MAX) {
        return Err(SpectralError::NormalizationOverflow {
            wavelength,
            max_value,
        });
    }

    Ok(scaled.mapv(|v| v as u16))
}

/// Largest quotient across a run; zero for an empty or all-dark run.
pub fn run_peak<'a>(quotients: impl IntoIterator<Item = &'a Array2<f64>>) -> f64 {
    quotients
        .into_iter()
        .flat_map(|q| q.iter().copied())
        .fold(0.0, f64::max)
}

/// Rescale one quotient slide so that `peak` maps to 256.
pub fn rescale_to_peak(quotient: &Array2<f64>, peak: f64) -> Frame {
    if peak <= 0.0 {
        return Frame::zeros(quotient.dim());
    }
    quotient.mapv(|q| (q / peak * NORMALIZATION_SCALE).round() as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::calibration::{Reference, CALIBRATION_PAGES};
    use approx::assert_relative_eq;

    fn uniform_map(value: f32, shape: (usize, usize)) -> CalibrationMap {
        let refs = vec![Reference::Frame(Array2::from_elem(shape, value)); CALIBRATION_PAGES];
        CalibrationMap::from_references(430, refs).unwrap()
    }

    #[test]
    fn double_the_reference_maps_to_512() {
        let map = uniform_map(100.0, (4, 4));
        let raw = Frame::from_elem((4, 4), 200);
        let out = normalize(&map, 500, &raw).unwrap();
        assert!(out.iter().all(|&v| v == 512));
    }

    #[test]
    fn matches_rounded_formula_per_pixel() {
        let reference = Array2::from_shape_fn((3, 3), |(r, c)| (r * 3 + c + 1) as f32 * 7.0);
        let map = CalibrationMap::from_references(600, vec![Reference::Frame(reference.clone())])
            .unwrap();
        let raw = Frame::from_shape_fn((3, 3), |(r, c)| (r * 31 + c * 5) as u16);
        let out = normalize(&map, 600, &raw).unwrap();
        for ((r, c), &v) in out.indexed_iter() {
            let expected =
                (f64::from(raw[[r, c]]) / f64::from(reference[[r, c]]) * 256.0).round() as u16;
            assert_eq!(v, expected, "pixel ({r}, {c})");
        }
    }

    #[test]
    fn zero_reference_is_a_division_error() {
        let mut reference = Array2::from_elem((2, 2), 10.0_f32);
        reference[[1, 0]] = 0.0;
        let map = CalibrationMap::from_references(500, vec![Reference::Frame(reference)]).unwrap();
        let err = normalize(&map, 500, &Frame::from_elem((2, 2), 5)).unwrap_err();
        assert!(matches!(
            err,
            SpectralError::DivideByZero {
                wavelength: 500,
                row: 1,
                col: 0
            }
        ));
    }

    #[test]
    fn values_past_sixteen_bits_overflow() {
        let map = uniform_map(1.0, (2, 2));
        // 256 * 256 = 65536, one past u16::MAX.
        let err = normalize(&map, 430, &Frame::from_elem((2, 2), 256)).unwrap_err();
        assert!(matches!(err, SpectralError::NormalizationOverflow { wavelength: 430, .. }));

        let ok = normalize(&map, 430, &Frame::from_elem((2, 2), 255)).unwrap();
        assert_eq!(ok[[0, 0]], 65280);
    }

    #[test]
    fn missing_wavelength_is_reported() {
        let map = uniform_map(100.0, (2, 2));
        let err = normalize(&map, 731, &Frame::zeros((2, 2))).unwrap_err();
        assert!(matches!(err, SpectralError::CalibrationMissing { wavelength: 731 }));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let map = uniform_map(100.0, (2, 2));
        let err = normalize(&map, 500, &Frame::zeros((3, 2))).unwrap_err();
        assert!(matches!(err, SpectralError::ShapeMismatch { .. }));
    }

    #[test]
    fn uniform_reference_scales_every_pixel() {
        let map = CalibrationMap::from_references(550, vec![Reference::Uniform(50.0)]).unwrap();
        let out = normalize(&map, 550, &Frame::from_elem((2, 3), 25)).unwrap();
        assert!(out.iter().all(|&v| v == 128));
    }

    #[test]
    fn nan_or_negative_reference_is_rejected() {
        let mut reference = Array2::from_elem((2, 2), 10.0_f32);
        reference[[0, 1]] = f32::NAN;
        let map = CalibrationMap::from_references(500, vec![Reference::Frame(reference)]).unwrap();
        let err = normalize(&map, 500, &Frame::from_elem((2, 2), 5)).unwrap_err();
        assert!(matches!(
            err,
            SpectralError::InvalidReference {
                wavelength: 500,
                row: 0,
                col: 1,
                ..
            }
        ));
        assert!(err.is_frame_level());

        let map = CalibrationMap::from_references(500, vec![Reference::Uniform(-4.0)]).unwrap();
        assert!(matches!(
            normalize(&map, 500, &Frame::from_elem((2, 2), 5)),
            Err(SpectralError::InvalidReference { .. })
        ));

        let map =
            CalibrationMap::from_references(500, vec![Reference::Uniform(f64::INFINITY)]).unwrap();
        assert!(matches!(
            divide(&map, 500, &Frame::from_elem((1, 1), 5)),
            Err(SpectralError::InvalidReference { .. })
        ));
    }

    #[test]
    fn power_run_is_rescaled_to_its_peak() {
        // Lamp power in watts, as written by the power sweep.
        let map =
            CalibrationMap::from_references(600, vec![Reference::Uniform(2e-3), Reference::Uniform(1e-3)])
                .unwrap();
        let a = divide(&map, 600, &Frame::from_elem((2, 2), 400)).unwrap();
        let b = divide(&map, 601, &Frame::from_shape_vec((2, 2), vec![100, 200, 300, 400]).unwrap())
            .unwrap();

        let peak = run_peak([&a, &b]);
        assert_relative_eq!(peak, 400_000.0, max_relative = 1e-9);
        assert!(rescale_to_peak(&a, peak).iter().all(|&v| v == 128));
        assert_eq!(
            rescale_to_peak(&b, peak).iter().copied().collect::<Vec<_>>(),
            vec![64, 128, 192, 256]
        );
        assert!(rescale_to_peak(&a, 0.0).iter().all(|&v| v == 0));
    }
}
