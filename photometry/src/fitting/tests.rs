use super::profile::{Bounds, GaussianModel, MoffatModel};
use super::*;
use crate::testing::{add_detector_noise, star_buffer, star_window, Star};

fn settings(kind: ProfileKind) -> FitSettings {
    let config = TrackingConfig {
        profile: kind,
        fit_iterations: 200,
        ..TrackingConfig::default()
    };
    FitSettings::from_tracking(&config)
}

fn guess(x: f64, y: f64) -> ProfileGuess {
    ProfileGuess {
        pos: DVec2::new(x, y),
        height: 800.0,
        fwhm: 6.0,
        beta: 5.0,
        sky: 100.0,
    }
}

fn samples_for(stars: &[Star]) -> Samples {
    let window = star_window(30, 30, 41, 41, 100.0, stars);
    Samples::from_window(&window, &DetectorNoise::default())
}

#[test]
fn test_gaussian_recovers_parameters() {
    let samples = samples_for(&[Star::gaussian(50.3, 49.6, 1000.0, 5.0)]);
    let fit = fit_profile(&samples, &guess(50.0, 50.0), &settings(ProfileKind::Gaussian)).unwrap();

    assert!((fit.pos.x - 50.3).abs() < 1e-3, "x = {}", fit.pos.x);
    assert!((fit.pos.y - 49.6).abs() < 1e-3, "y = {}", fit.pos.y);
    assert!((fit.height - 1000.0).abs() < 0.5);
    assert!((fit.fwhm() - 5.0).abs() < 1e-3);
    assert!((fit.sky - 100.0).abs() < 0.05);
    assert_eq!(fit.beta(), None);
    assert_eq!(fit.nrej, 0);
    assert_eq!(fit.npix, 41 * 41);
}

#[test]
fn test_moffat_fixed_beta() {
    let samples = samples_for(&[Star::moffat(49.2, 50.7, 2000.0, 4.0, 3.0)]);
    let kind = ProfileKind::Moffat {
        beta: 3.0,
        fit_beta: false,
    };
    let fit = fit_profile(&samples, &guess(49.0, 51.0), &settings(kind)).unwrap();

    assert!((fit.pos.x - 49.2).abs() < 1e-3);
    assert!((fit.pos.y - 50.7).abs() < 1e-3);
    assert!((fit.fwhm() - 4.0).abs() < 1e-3);
    assert_eq!(fit.beta(), Some(3.0));
}

#[test]
fn test_moffat_free_beta() {
    let samples = samples_for(&[Star::moffat(50.0, 50.0, 3000.0, 5.0, 2.5)]);
    let kind = ProfileKind::Moffat {
        beta: 5.0,
        fit_beta: true,
    };
    let fit = fit_profile(&samples, &guess(50.0, 50.0), &settings(kind)).unwrap();

    assert!((fit.fwhm() - 5.0).abs() < 1e-2, "fwhm = {}", fit.fwhm());
    let beta = fit.beta().unwrap();
    assert!((beta - 2.5).abs() < 2e-2, "beta = {beta}");
    assert!(fit.is_finite());
}

#[test]
fn test_noisy_gaussian() {
    let noise = DetectorNoise::default();
    let mut pixels = star_buffer(0, 0, 43, 43, 150.0, &[Star::gaussian(21.4, 20.8, 1500.0, 5.0)]);
    add_detector_noise(&mut pixels, &noise, 7);
    let window = crate::frame::Window::new(0, 0, 1, 1, pixels);
    let samples = Samples::from_window(&window, &noise);

    let fit = fit_profile(&samples, &guess(21.0, 21.0), &settings(ProfileKind::Gaussian)).unwrap();
    assert!(fit.pos.distance(DVec2::new(21.4, 20.8)) < 0.05);
    assert!((fit.fwhm() - 5.0).abs() < 0.15);
    // Noise model matches the injected noise, so chi2 per pixel is close to 1.
    assert!(fit.chi2 > 0.8 && fit.chi2 < 1.2, "chi2 = {}", fit.chi2);
}

#[test]
fn test_cosmic_ray_is_clipped() {
    let star = Star::gaussian(50.0, 50.0, 1000.0, 5.0);
    let mut window = star_window(30, 30, 41, 41, 100.0, &[star]);
    let mut pixels = window.data().clone();
    pixels[(25, 25)] += 5000.0;
    window = crate::frame::Window::new(30, 30, 1, 1, pixels);
    let samples = Samples::from_window(&window, &DetectorNoise::default());

    let fit = fit_profile(&samples, &guess(50.0, 50.0), &settings(ProfileKind::Gaussian)).unwrap();
    assert!(fit.nrej >= 1);
    assert!(fit.pos.distance(DVec2::new(50.0, 50.0)) < 1e-3);
    assert!((fit.sky - 100.0).abs() < 0.05);
}

#[test]
fn test_too_few_pixels() {
    let window = star_window(0, 0, 2, 2, 100.0, &[]);
    let samples = Samples::from_window(&window, &DetectorNoise::default());
    assert!(fit_profile(&samples, &guess(0.5, 0.5), &settings(ProfileKind::Gaussian)).is_none());
}

#[test]
fn test_non_finite_pixels_get_zero_weight() {
    let mut pixels = star_buffer(0, 0, 3, 3, 100.0, &[]);
    pixels[(1, 1)] = f32::NAN;
    let window = crate::frame::Window::new(0, 0, 1, 1, pixels);
    let samples = Samples::from_window(&window, &DetectorNoise::default());
    assert_eq!(samples.weight[4], 0.0);
    assert!(samples.weight[0] > 0.0);
}

#[test]
fn test_normalised_profiles_integrate_to_one() {
    for shape in [
        ProfileShape::Gaussian { fwhm: 4.0 },
        ProfileShape::Moffat {
            fwhm: 4.0,
            beta: 3.0,
        },
    ] {
        let mut total = 0.0;
        for iy in -60..=60 {
            for ix in -60..=60 {
                let r2 = (ix * ix + iy * iy) as f64;
                total += shape.normalised(r2).unwrap();
            }
        }
        assert!((total - 1.0).abs() < 1e-3, "{shape:?}: {total}");
    }
    let flat = ProfileShape::Moffat {
        fwhm: 4.0,
        beta: 1.0,
    };
    assert!(flat.normalised(0.0).is_none());
}

#[test]
fn test_half_maximum_at_half_fwhm() {
    for shape in [
        ProfileShape::Gaussian { fwhm: 6.0 },
        ProfileShape::Moffat {
            fwhm: 6.0,
            beta: 2.0,
        },
    ] {
        assert!((shape.evaluate(9.0) - 0.5).abs() < 1e-12);
    }
}

fn bounds() -> Bounds {
    Bounds {
        fwhm: (0.1, 100.0),
        beta: (0.5, 20.0),
        min_height: 0.01,
    }
}

fn assert_jacobian_matches<const N: usize, M: LMModel<N>>(model: &M, params: [f64; N]) {
    for &(x, y) in &[(50.0, 50.0), (52.5, 48.0), (47.0, 55.5)] {
        let analytic = model.jacobian_row(x, y, &params);
        for k in 0..N {
            let step = 1e-6 * params[k].abs().max(1.0);
            let mut hi = params;
            let mut lo = params;
            hi[k] += step;
            lo[k] -= step;
            let numeric = (model.evaluate(x, y, &hi) - model.evaluate(x, y, &lo)) / (2.0 * step);
            assert!(
                (analytic[k] - numeric).abs() <= 1e-5 * (1.0 + analytic[k].abs()),
                "param {k} at ({x}, {y}): analytic {} numeric {numeric}",
                analytic[k]
            );
        }
    }
}

#[test]
fn test_gaussian_jacobian() {
    let model = GaussianModel { bounds: bounds() };
    assert_jacobian_matches(&model, [50.4, 49.7, 1200.0, 4.5, 90.0]);
}

#[test]
fn test_moffat_jacobian() {
    let model = MoffatModel { bounds: bounds() };
    assert_jacobian_matches(&model, [50.4, 49.7, 1200.0, 4.5, 2.7, 90.0]);
}
