//! Normal-distribution special functions
//!
//! Univariate CDF, its inverse, and the bivariate CDF used by the
//! decision-risk model. All functions are pure and allocation free.

use thiserror::Error;

const SQRT_2PI: f64 = 2.506628274631;

/// Beyond this |x| the univariate CDF is exactly 0 or 1 in f64
const CDF_CUTOFF: f64 = 37.0;

/// Input outside the mathematical domain of a special function
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DomainError {
    #[error("probability {0} is outside the open interval (0, 1)")]
    Probability(f64),
}

/// Standard normal density
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

/// Standard normal CDF, Φ(x)
///
/// Rational approximation for |x| < 5√2 and a continued-fraction tail
/// beyond it. The tail value is computed once for |x| and mirrored, so
/// `norm_cdf(-x) + norm_cdf(x)` is 1 to rounding.
pub fn norm_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let ax = x.abs();
    if ax > CDF_CUTOFF {
        return if x < 0.0 { 0.0 } else { 1.0 };
    }

    let e = (-ax * ax / 2.0).exp();
    let tail = if ax < 7.071_067_811_865_47 {
        let num = horner(
            ax,
            &[
                3.526_249_659_989_11e-2,
                0.700_383_064_443_688,
                6.373_962_203_531_65,
                33.912_866_078_383,
                112.079_291_497_871,
                221.213_596_169_931,
                220.206_867_912_376,
            ],
        );
        let den = horner(
            ax,
            &[
                8.838_834_764_831_84e-2,
                1.755_667_163_182_64,
                16.064_177_579_207,
                86.780_732_202_946_1,
                296.564_248_779_674,
                637.333_633_378_831,
                793.826_512_519_948,
                440.413_735_824_752,
            ],
        );
        e * num / den
    } else {
        let mut b = ax + 0.65;
        for c in [4.0, 3.0, 2.0, 1.0] {
            b = ax + c / b;
        }
        e / b / SQRT_2PI
    };

    if x > 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Inverse standard normal CDF, Φ⁻¹(p)
pub fn norm_inv(p: f64) -> Result<f64, DomainError> {
    if !(p > 0.0 && p < 1.0) {
        return Err(DomainError::Probability(p));
    }

    const EXP_M2: f64 = 0.135_335_283_236_613;

    let mut y = p;
    let mut lower_tail = true;
    if y > 1.0 - EXP_M2 {
        y = 1.0 - y;
        lower_tail = false;
    }

    if y > EXP_M2 {
        let y = y - 0.5;
        let y2 = y * y;
        let p0 = horner(
            y2,
            &[
                -59.963_350_101_410_8,
                98.001_075_418_6,
                -56.676_285_746_907,
                13.931_260_938_728,
                -1.239_165_838_673_81,
            ],
        );
        let q0 = horner(
            y2,
            &[
                1.0,
                1.954_488_583_381_42,
                4.676_279_128_988_82,
                86.360_242_139_089_1,
                -225.462_687_854_119,
                200.260_212_380_061,
                -82.037_225_616_833_3,
                15.905_622_512_621_2,
                -1.183_316_211_213_3,
            ],
        );
        return Ok((y + y * y2 * p0 / q0) * SQRT_2PI);
    }

    let x = (-2.0 * y.ln()).sqrt();
    let x0 = x - x.ln() / x;
    let z = 1.0 / x;
    let x1 = if x < 8.0 {
        z * horner(
            z,
            &[
                4.055_448_923_059_62,
                31.525_109_459_989_4,
                57.162_819_224_642_1,
                44.080_507_389_320_1,
                14.684_956_192_885_8,
                2.186_633_068_507_9,
                -0.140_256_079_171_354,
                -0.035_042_462_682_784_8,
                -0.000_857_456_785_154_685,
            ],
        ) / horner(
            z,
            &[
                1.0,
                15.779_988_325_646_7,
                45.390_763_512_887_9,
                41.317_203_825_467_2,
                15.042_538_569_290_8,
                2.504_649_462_083_09,
                -0.142_182_922_854_788,
                -0.038_080_640_769_157_8,
                -0.000_933_259_480_895_457,
            ],
        )
    } else {
        z * horner(
            z,
            &[
                3.237_748_917_769_46,
                6.915_228_890_689_84,
                3.938_810_252_924_74,
                1.333_034_608_158_08,
                0.201_485_389_549_179,
                0.012_371_663_481_782,
                0.000_301_581_553_508_235,
                2.658_069_746_867_38e-6,
                6.239_745_391_849_83e-9,
            ],
        ) / horner(
            z,
            &[
                1.0,
                6.024_270_393_647_42,
                3.679_835_638_561_61,
                1.377_020_994_890_81,
                0.216_236_993_594_497,
                0.013_420_400_608_854_3,
                0.000_328_014_464_682_128,
                2.892_478_647_453_81e-6,
                6.790_194_080_099_81e-9,
            ],
        )
    };

    let x = x0 - x1;
    Ok(if lower_tail { -x } else { x })
}

// Five-point Gauss-Legendre abscissae on [0, 1] and weights pre-divided by 2π
const GL_X: [f64; 5] = [0.04691008, 0.23076534, 0.5, 0.76923466, 0.95308992];
const GL_W: [f64; 5] = [
    0.018854042,
    0.038088059,
    0.0452707394,
    0.038088059,
    0.018854042,
];

/// Bivariate standard normal CDF, P(X ≤ x, Y ≤ y) with correlation ρ
///
/// Returns NaN when |ρ| > 1 or any argument is NaN; callers treat NaN
/// terms as zero and attach a warning. Infinite x or y are allowed.
pub fn bivariate_norm_cdf(x: f64, y: f64, rho: f64) -> f64 {
    if x.is_nan() || y.is_nan() || rho.is_nan() || rho.abs() > 1.0 {
        return f64::NAN;
    }
    if x == f64::NEG_INFINITY || y == f64::NEG_INFINITY {
        return 0.0;
    }
    if x == f64::INFINITY {
        return norm_cdf(y);
    }
    if y == f64::INFINITY {
        return norm_cdf(x);
    }
    if rho == 0.0 {
        return norm_cdf(x) * norm_cdf(y);
    }
    if rho == 1.0 {
        return norm_cdf(x.min(y));
    }
    if rho == -1.0 {
        return (norm_cdf(x) - norm_cdf(-y)).max(0.0);
    }

    let value = if rho.abs() < 0.7 {
        product_series(x, y, rho)
    } else {
        correlated_correction(x, y, rho)
    };
    value.clamp(0.0, 1.0)
}

/// Integrates the density along ρ from the independent case.
fn product_series(h1: f64, h2: f64, rho: f64) -> f64 {
    let h12 = (h1 * h1 + h2 * h2) / 2.0;
    let h3 = h1 * h2;
    let lh: f64 = GL_X
        .iter()
        .zip(GL_W.iter())
        .map(|(xi, wi)| {
            let r1 = rho * xi;
            let one_minus = 1.0 - r1 * r1;
            wi * ((r1 * h3 - h12) / one_minus).exp() / one_minus.sqrt()
        })
        .sum();
    norm_cdf(h1) * norm_cdf(h2) + rho * lh
}

/// Corrects the perfectly correlated limit for high |ρ|.
fn correlated_correction(h1: f64, h2: f64, rho: f64) -> f64 {
    let h2 = if rho < 0.0 { -h2 } else { h2 };
    let r2 = 1.0 - rho * rho;
    let r3 = r2.sqrt();
    let h3 = h1 * h2;
    let h7 = (-h3 / 2.0).exp();

    let h6_raw = (h1 - h2).abs();
    let h5 = h6_raw * h6_raw / 2.0;
    let h6 = h6_raw / r3;
    let aa = 0.5 - h3 / 8.0;
    let ab = 3.0 - 2.0 * aa * h5;

    let mut lh = 0.132_980_76 * h6 * ab * (1.0 - norm_cdf(h6))
        - (-h5 / r2).exp() * (ab + aa * r2) * 0.053_051_647;
    for (xi, wi) in GL_X.iter().zip(GL_W.iter()) {
        let r1 = r3 * xi;
        let rr = r1 * r1;
        let r2i = (1.0 - rr).sqrt();
        lh -= wi * (-h5 / rr).exp() * ((-h3 / (1.0 + r2i)).exp() / r2i / h7 - 1.0 - aa * rr);
    }

    let value = lh * r3 * h7 + norm_cdf(h1.min(h2));
    if rho < 0.0 {
        norm_cdf(h1) - value
    } else {
        value
    }
}

/// Evaluate a polynomial with coefficients ordered highest power first
fn horner(x: f64, coefficients: &[f64]) -> f64 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_cdf_center_and_symmetry() {
        assert_eq!(norm_cdf(0.0), 0.5);
        for i in -80..=80 {
            let x = i as f64 * 0.5;
            assert!((norm_cdf(x) + norm_cdf(-x) - 1.0).abs() < 1e-9, "x = {}", x);
        }
    }

    #[test]
    fn test_cdf_known_values() {
        assert!((norm_cdf(1.959_963_984_540_054) - 0.975).abs() < 1e-12);
        assert!((norm_cdf(-1.0) - 0.158_655_253_931_457).abs() < 1e-12);
        assert_eq!(norm_cdf(40.0), 1.0);
        assert_eq!(norm_cdf(-40.0), 0.0);
        assert!(norm_cdf(f64::NAN).is_nan());
    }

    #[test]
    fn test_pdf_is_cdf_slope() {
        assert!((norm_pdf(0.0) - 1.0 / (2.0 * PI).sqrt()).abs() < 1e-9);
        let h = 1e-5;
        for x in [-2.5, -1.0, 0.3, 1.7] {
            let slope = (norm_cdf(x + h) - norm_cdf(x - h)) / (2.0 * h);
            assert!((slope - norm_pdf(x)).abs() < 1e-6, "x = {}", x);
        }
    }

    #[test]
    fn test_inverse_known_values() {
        assert!((norm_inv(0.975).unwrap() - 1.959_963_984_540_054).abs() < 1e-9);
        assert_eq!(norm_inv(0.5).unwrap(), 0.0);
        assert!((norm_inv(0.05).unwrap() + 1.644_853_626_951_472).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_rejects_out_of_domain() {
        assert!(matches!(norm_inv(0.0), Err(DomainError::Probability(_))));
        assert!(matches!(norm_inv(1.0), Err(DomainError::Probability(_))));
        assert!(norm_inv(-0.2).is_err());
        assert!(norm_inv(f64::NAN).is_err());
    }

    #[test]
    fn test_cdf_of_inverse() {
        let probabilities = [
            1e-10, 1e-8, 1e-5, 0.001, 0.01, 0.1, 0.3, 0.5, 0.7, 0.9, 0.99, 0.999, 0.999_999,
            1.0 - 1e-10,
        ];
        for p in probabilities {
            let x = norm_inv(p).unwrap();
            assert!((norm_cdf(x) - p).abs() < 1e-9, "p = {}", p);
        }
    }

    #[test]
    fn test_inverse_of_cdf() {
        for i in -60..=60 {
            let x = i as f64 / 10.0;
            let back = norm_inv(norm_cdf(x)).unwrap();
            assert!((back - x).abs() < 1e-6, "x = {}", x);
        }
    }

    #[test]
    fn test_bivariate_independence() {
        for (x, y) in [(0.3, -1.2), (2.0, 2.0), (-0.5, 0.7), (4.0, -3.0)] {
            let expected = norm_cdf(x) * norm_cdf(y);
            assert_eq!(bivariate_norm_cdf(x, y, 0.0), expected);
        }
    }

    #[test]
    fn test_bivariate_perfect_correlation() {
        for x in [-2.0, -0.3, 0.0, 1.1, 3.0] {
            assert_eq!(bivariate_norm_cdf(x, x, 1.0), norm_cdf(x));
        }
        assert_eq!(bivariate_norm_cdf(1.0, 2.0, 1.0), norm_cdf(1.0));
        // Perfectly anti-correlated: P(X <= x, X >= -y)
        assert!((bivariate_norm_cdf(1.0, 1.0, -1.0) - (2.0 * norm_cdf(1.0) - 1.0)).abs() < 1e-15);
        assert_eq!(bivariate_norm_cdf(-1.0, -1.0, -1.0), 0.0);
    }

    #[test]
    fn test_bivariate_orthant_identity() {
        // Φ₂(0, 0, ρ) = 1/4 + asin(ρ) / 2π for both evaluation regimes
        for rho in [-0.95, -0.9, -0.5, -0.1, 0.1, 0.3, 0.5, 0.69, 0.71, 0.9, 0.99] {
            let expected = 0.25 + f64::asin(rho) / (2.0 * PI);
            let got = bivariate_norm_cdf(0.0, 0.0, rho);
            assert!((got - expected).abs() < 5e-7, "rho = {}: {} vs {}", rho, got, expected);
        }
    }

    #[test]
    fn test_bivariate_domain_and_bounds() {
        assert!(bivariate_norm_cdf(0.0, 0.0, 1.5).is_nan());
        assert!(bivariate_norm_cdf(f64::NAN, 0.0, 0.5).is_nan());
        assert_eq!(bivariate_norm_cdf(f64::NEG_INFINITY, 1.0, 0.8), 0.0);
        assert_eq!(bivariate_norm_cdf(f64::INFINITY, 1.0, 0.8), norm_cdf(1.0));
        for rho in [-0.99, -0.75, 0.2, 0.75, 0.99] {
            for (x, y) in [(-6.0, -6.0), (6.0, 6.0), (-3.0, 4.0)] {
                let v = bivariate_norm_cdf(x, y, rho);
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_bivariate_bounded_by_marginals() {
        for rho in [-0.8, -0.3, 0.4, 0.85] {
            let v = bivariate_norm_cdf(0.5, -0.25, rho);
            assert!(v <= norm_cdf(0.5) + 1e-12);
            assert!(v <= norm_cdf(-0.25) + 1e-12);
        }
    }
}
