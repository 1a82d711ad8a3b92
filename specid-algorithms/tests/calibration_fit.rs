#![allow(clippy::float_cmp, clippy::cast_precision_loss)]
use approx::assert_abs_diff_eq;
use specid_algorithms::{CalibrationFitter, CalibrationPropagator, Error, RecalPeak};
use specid_core::EnergyCalibration;
use std::sync::Arc;

fn linear(n: usize, offset: f64, gain: f64) -> Arc<EnergyCalibration> {
    Arc::new(EnergyCalibration::polynomial(n, vec![offset, gain], vec![]).unwrap())
}

#[test]
fn test_single_peak_gain_fit() {
    let peak = RecalPeak::new(500.0, 1.0, 500.0, 661.0);
    let fit = CalibrationFitter::polynomial()
        .fit_peaks(&[peak], &[false, true], 1024, &[], &[0.0, 1.0])
        .unwrap();

    assert_eq!(fit.coefficients[0], 0.0);
    assert_abs_diff_eq!(fit.coefficients[1] * 500.0, 661.0, epsilon = 1e-9);
    assert!(fit.chi2 < 1e-12);
}

#[test]
fn test_fit_is_deterministic() {
    let peaks = [
        RecalPeak::new(200.0, 0.5, 200.0, 239.0),
        RecalPeak::new(500.0, 0.8, 500.0, 609.3),
        RecalPeak::new(1100.0, 1.2, 1100.0, 1460.8),
    ];
    let fitter = CalibrationFitter::polynomial();
    let a = fitter
        .fit_peaks(&peaks, &[true, true, true], 2048, &[], &[])
        .unwrap();
    let b = fitter
        .fit_peaks(&peaks, &[true, true, true], 2048, &[], &[])
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_fixed_coefficients_are_unchanged() {
    let peaks = [
        RecalPeak::new(300.0, 1.0, 300.0, 662.0),
        RecalPeak::new(600.0, 1.0, 600.0, 1332.0),
    ];
    let input = [3.5, 2.0, 1.0e-5];
    let fit = CalibrationFitter::polynomial()
        .fit_peaks(&peaks, &[false, true, false], 1024, &[], &input)
        .unwrap();
    assert_eq!(fit.coefficients[0], input[0]);
    assert_eq!(fit.coefficients[2], input[2]);
    assert!(fit.uncertainties[1] > 0.0);
}

#[test]
fn test_more_free_coefficients_than_peaks() {
    let peak = RecalPeak::new(500.0, 1.0, 500.0, 661.0);
    let err = CalibrationFitter::polynomial()
        .fit_peaks(&[peak], &[true, true], 1024, &[], &[0.0, 1.0])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_full_range_fraction_channel_energies() {
    let n = 512;
    let truth = EnergyCalibration::full_range_fraction(n, vec![5.0, 3000.0, 20.0], vec![]).unwrap();
    let fit = CalibrationFitter::full_range_fraction()
        .fit_channel_energies(3, truth.channel_energies())
        .unwrap();

    assert!(fit.mean_abs_error < 1e-6);
    let refit = EnergyCalibration::full_range_fraction(n, fit.coefficients, vec![]).unwrap();
    for ch in [0.0, 100.0, 511.0] {
        assert_abs_diff_eq!(
            refit.energy_for_channel(ch),
            truth.energy_for_channel(ch),
            epsilon = 1e-6
        );
    }
}

#[test]
fn test_propagation_no_op_and_determinism() {
    let orig = linear(1024, 0.0, 3.0);
    let updated = linear(1024, 1.0, 3.05);
    let other = linear(2048, -2.0, 1.5);
    let prop = CalibrationPropagator::new();

    let same = prop.propagate(&orig, &orig, &other).unwrap();
    assert!(Arc::ptr_eq(&same, &other));

    let a = prop.propagate(&orig, &updated, &other).unwrap();
    let b = prop.propagate(&orig, &updated, &other).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.coefficients(), b.coefficients());
    assert_eq!(a.num_channels(), 2048);
}
