//! Young-van Vliet recursive Gaussian
//!
//! Third-order causal recursion followed by a third-order anticausal
//! recursion. The right-hand boundary uses the Triggs-Sdika initialisation,
//! which is exact for a signal held constant beyond its last sample.
//!
//! References:
//! - Young, I.T., van Vliet, L.J. (1995). "Recursive implementation of the
//!   Gaussian filter." Signal Processing, 44(2):139-151.
//! - Triggs, B., Sdika, M. (2006). "Boundary conditions for Young-van Vliet
//!   recursive filtering." IEEE TSP, 54(6):2365-2367.

use tracing::debug;

use super::{smooth_separable, LineFilter, RecursiveGaussian};
use crate::geometry::Grid;

/// Young-van Vliet recursive Gaussian
#[derive(Clone, Copy, Debug, Default)]
pub struct YvvGaussian;

impl RecursiveGaussian for YvvGaussian {
    fn name(&self) -> &'static str {
        "YVV"
    }

    fn smooth(&self, data: &[f64], grid: &Grid, sigma: [f64; 3]) -> Vec<f64> {
        smooth_separable(data, grid, sigma, YvvCoefficients::new)
    }
}

/// Recursion coefficients for one sigma
#[derive(Clone, Debug)]
pub(crate) struct YvvCoefficients {
    /// Input gain, 1 - (a1 + a2 + a3)
    gain: f64,
    /// Feedback coefficients a1, a2, a3
    a: [f64; 3],
    /// Triggs-Sdika boundary matrix
    m: [[f64; 3]; 3],
}

impl YvvCoefficients {
    /// Coefficients for sigma in voxel units
    pub(crate) fn new(sigma: f64) -> Self {
        let q = if sigma >= 2.5 {
            0.98711 * sigma - 0.96330
        } else if sigma >= 0.5 {
            3.97156 - 4.14554 * (1.0 - 0.26891 * sigma).sqrt()
        } else {
            0.1147705018520355
        };

        let q2 = q * q;
        let q3 = q2 * q;
        let b0 = 1.57825 + 2.44413 * q + 1.4281 * q2 + 0.422205 * q3;
        let b1 = 2.44413 * q + 2.85619 * q2 + 1.26661 * q3;
        let b2 = -(1.4281 * q2 + 1.26661 * q3);
        let b3 = 0.422205 * q3;

        let a1 = b1 / b0;
        let a2 = b2 / b0;
        let a3 = b3 / b0;
        let gain = 1.0 - (a1 + a2 + a3);

        let scale = 1.0 / ((1.0 + a1 - a2 + a3) * (1.0 - a1 - a2 - a3) * (1.0 + a2 + (a1 - a3) * a3));
        let m = [
            [
                -a3 * a1 + 1.0 - a3 * a3 - a2,
                (a3 + a1) * (a2 + a3 * a1),
                a3 * (a1 + a3 * a2),
            ],
            [
                a1 + a3 * a2,
                -(a2 - 1.0) * (a2 + a3 * a1),
                -(a3 * a1 + a3 * a3 + a2 - 1.0) * a3,
            ],
            [
                a3 * a1 + a2 + a1 * a1 - a2 * a2,
                a1 * a2 + a3 * a2 * a2 - a1 * a3 * a3 - a3 * a3 * a3 - a3 * a2 + a3,
                a3 * (a1 + a3 * a2),
            ],
        ]
        .map(|row| row.map(|v| v * scale));

        debug!(sigma, q, gain, a1, a2, a3, "YVV coefficients");
        Self { gain, a: [a1, a2, a3], m }
    }
}

impl LineFilter for YvvCoefficients {
    fn apply(&self, line: &mut [f64], scratch: &mut Vec<f64>) {
        let n = line.len();
        if n == 0 {
            return;
        }
        let [a1, a2, a3] = self.a;
        let b = self.gain;

        // Causal pass; scratch[0..3] hold w[-3], w[-2], w[-1]
        let x0 = line[0];
        scratch.clear();
        scratch.resize(n + 3, x0);
        for i in 0..n {
            scratch[i + 3] = b * line[i] + a1 * scratch[i + 2] + a2 * scratch[i + 1] + a3 * scratch[i];
        }

        // Anticausal initialisation from a constant right extension
        let xe = line[n - 1];
        let u = [scratch[n + 2] - xe, scratch[n + 1] - xe, scratch[n] - xe];
        let init: [f64; 3] = self
            .m
            .map(|row| b * (row[0] * u[0] + row[1] * u[1] + row[2] * u[2]) + xe);

        // y[n-1], y[n], y[n+1]
        let (mut y1, mut y2, mut y3) = (init[0], init[1], init[2]);
        line[n - 1] = y1;
        for i in (0..n - 1).rev() {
            let y = b * scratch[i + 3] + a1 * y1 + a2 * y2 + a3 * y3;
            line[i] = y;
            y3 = y2;
            y2 = y1;
            y1 = y;
        }
    }
}
