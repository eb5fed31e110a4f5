use approx::assert_abs_diff_eq;
use brokenstick::calibrate::basis::{
    KnotSet, build_aggregator_matrix, create_aggregator_basis, evaluate_piecewise,
};
use brokenstick::calibrate::ols::{self, FitError};
use brokenstick::calibrate::simulate::{BrokenStickScenario, broken_stick_design, fit_scenario};
use ndarray::{Array1, array};
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn aggregator_product_is_continuous_at_every_knot() {
    let knots = KnotSet::new(vec![-2.0, 0.0, 1.0, 4.5]).unwrap();
    let slopes_list = [
        array![1.0, -3.0, 0.5, 7.0, -2.0],
        array![0.0, 0.0, 10.0, -10.0, 1.0],
        array![-0.75, 2.25, -4.0, 0.125, 3.5],
    ];
    let eps = 1e-9;

    for slopes in &slopes_list {
        for &k in knots.as_slice() {
            let x = array![k - eps, k, k + eps];
            let values = build_aggregator_matrix(x.view(), &knots).dot(slopes);
            let max_slope = slopes.iter().fold(0.0_f64, |acc, &s| acc.max(s.abs()));
            let tolerance = 4.0 * eps * max_slope + 1e-12;
            assert!(
                (values[0] - values[1]).abs() <= tolerance,
                "jump below knot {k}: {} vs {}",
                values[0],
                values[1]
            );
            assert!(
                (values[2] - values[1]).abs() <= tolerance,
                "jump above knot {k}: {} vs {}",
                values[2],
                values[1]
            );
        }
    }
}

#[test]
fn single_knot_segment_additivity() {
    let k = 1.3;
    let x = Array1::linspace(-2.0, 5.0, 57);
    let basis = create_aggregator_basis(x.view(), &[k], 2).unwrap();
    for (i, &xi) in x.iter().enumerate() {
        if xi < k {
            assert_eq!(basis[[i, 0]], xi);
            assert_eq!(basis[[i, 1]], 0.0);
        } else {
            assert_eq!(basis[[i, 0]], k);
            assert_abs_diff_eq!(basis[[i, 1]], xi - k, epsilon = 1e-15);
        }
    }
}

#[test]
fn rows_of_the_basis_sum_to_the_predictor() {
    // With the zero-anchored first segment every row accumulates exactly x.
    let knots = KnotSet::new(vec![0.5, 1.0, 2.0]).unwrap();
    let x = Array1::linspace(-1.0, 3.0, 41);
    let basis = build_aggregator_matrix(x.view(), &knots);
    for (row, &xi) in basis.rows().into_iter().zip(x.iter()) {
        assert_abs_diff_eq!(row.sum(), xi, epsilon = 1e-12);
    }
}

#[test]
fn recovers_broken_stick_slopes() {
    let scenario = BrokenStickScenario {
        n_obs: 1000,
        knots: KnotSet::new(vec![1.0]).unwrap(),
        slopes: vec![0.5, 2.5],
        intercept: None,
        sigma: 0.4,
        predictor_range: (0.0, 3.0),
    };
    let mut rng = StdRng::seed_from_u64(0xB0B5_1ED);
    let (dataset, table) = fit_scenario(&scenario, 1.96, &mut rng).unwrap();

    assert_eq!(dataset.outcomes.len(), 1000);
    for (row, truth) in table.rows.iter().zip([0.5, 2.5]) {
        assert_eq!(row.truth, truth);
        assert!(
            (row.estimate - truth).abs() <= 3.0 * row.std_error,
            "{} estimate {} is more than 3 se ({}) from {}",
            row.name,
            row.estimate,
            row.std_error,
            truth
        );
    }
    assert!((table.residual_sd - 0.4).abs() < 0.05);
}

#[test]
fn recovers_exact_function_without_noise() {
    let knots = KnotSet::new(vec![-1.0, 2.0]).unwrap();
    let slopes = array![1.5, -0.5, 3.0];
    let x = Array1::linspace(-4.0, 5.0, 60);
    let design = broken_stick_design(x.view(), &knots, true);
    let y = x.mapv(|xi| 0.75 + evaluate_piecewise(xi, &knots, slopes.view()));

    let fit = ols::fit_default(design.view(), y.view()).unwrap();
    assert_abs_diff_eq!(fit.coefficients[0], 0.75, epsilon = 1e-9);
    for j in 0..3 {
        assert_abs_diff_eq!(fit.coefficients[j + 1], slopes[j], epsilon = 1e-9);
    }
    assert!(fit.residual_sd < 1e-9);
}

#[test]
fn knot_outside_the_data_gives_singular_design() {
    // Every predictor lies below the second knot, so its column is identically zero.
    let x = Array1::linspace(0.0, 1.0, 50);
    let design = create_aggregator_basis(x.view(), &[0.5, 2.0], 3).unwrap();
    let y = x.mapv(|v| 2.0 * v);
    assert!(matches!(
        ols::fit_default(design.view(), y.view()),
        Err(FitError::SingularDesignMatrix { .. })
    ));
}
