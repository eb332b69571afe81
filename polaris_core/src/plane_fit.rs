//! Least-squares plane fitting.
//!
//! Fits `z = a*x + b*y + c` through the normal equations
//! `AᵀA [a b c]ᵀ = Aᵀz` with a small diagonal regularization, solved by
//! 3×3 Gaussian elimination with partial pivoting. The result is the unit
//! normal of the plane `a*x + b*y - z + c = 0`; its sign is not
//! canonicalized.

use nalgebra::{Matrix3, Vector3};

/// Regularization added to the normal-matrix diagonal.
const NORMAL_REGULARIZATION_EPS: f64 = 1e-12;
/// Pivot magnitude below which the system is treated as singular.
const GAUSS_ELIM_PIVOT_EPS: f64 = 1e-15;

/// Fit the plane normal to `(x, y, z)` triples.
///
/// Returns the zero vector when fewer than `min_points` samples are given,
/// when the arrays disagree in length, or when the system is singular.
pub fn fit_plane_normal(x: &[f64], y: &[f64], z: &[f64], min_points: usize) -> Vector3<f64> {
    if x.len() < min_points
        || y.len() < min_points
        || z.len() < min_points
        || x.len() != y.len()
        || x.len() != z.len()
    {
        return Vector3::zeros();
    }

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut sx = 0.0;
    let mut syy = 0.0;
    let mut sy = 0.0;
    let mut sz = 0.0;
    let mut sxz = 0.0;
    let mut syz = 0.0;
    for i in 0..x.len() {
        sxx += x[i] * x[i];
        sxy += x[i] * y[i];
        sx += x[i];
        syy += y[i] * y[i];
        sy += y[i];
        sz += z[i];
        sxz += x[i] * z[i];
        syz += y[i] * z[i];
    }
    let n = x.len() as f64;

    #[rustfmt::skip]
    let normal_matrix = Matrix3::new(
        sxx + NORMAL_REGULARIZATION_EPS, sxy,                             sx,
        sxy,                             syy + NORMAL_REGULARIZATION_EPS, sy,
        sx,                              sy,                              n + NORMAL_REGULARIZATION_EPS,
    );
    let rhs = Vector3::new(sxz, syz, sz);

    let Some(solution) = solve_3x3(normal_matrix, rhs) else {
        return Vector3::zeros();
    };

    let normal = Vector3::new(solution.x, solution.y, -1.0);
    normal / normal.norm()
}

/// Gaussian elimination with partial pivoting on a 3×3 system.
fn solve_3x3(mut m: Matrix3<f64>, mut b: Vector3<f64>) -> Option<Vector3<f64>> {
    // Forward elimination
    for col in 0..3 {
        let mut pivot = col;
        let mut max_abs = m[(col, col)].abs();
        for row in (col + 1)..3 {
            let v = m[(row, col)].abs();
            if v > max_abs {
                max_abs = v;
                pivot = row;
            }
        }
        if pivot != col {
            m.swap_rows(col, pivot);
            b.swap_rows(col, pivot);
        }

        let piv = m[(col, col)];
        if piv.abs() < GAUSS_ELIM_PIVOT_EPS {
            return None;
        }
        for c in col..3 {
            m[(col, c)] /= piv;
        }
        b[col] /= piv;

        for row in (col + 1)..3 {
            let factor = m[(row, col)];
            for c in col..3 {
                m[(row, c)] -= factor * m[(col, c)];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution (unit diagonal after normalization)
    let mut x = Vector3::zeros();
    for i in (0..3).rev() {
        let mut val = b[i];
        for j in (i + 1)..3 {
            val -= m[(i, j)] * x[j];
        }
        x[i] = val / m[(i, i)];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn unit(v: Vector3<f64>) -> Vector3<f64> {
        v / v.norm()
    }

    #[test]
    fn test_minimum_points_exact() {
        let x = [0.0, 1.0, 0.0];
        let y = [0.0, 0.0, 1.0];
        let z = [0.0, 1.0, 2.0]; // z = x + 2y

        let normal = fit_plane_normal(&x, &y, &z, 3);
        let expected = unit(Vector3::new(1.0, 2.0, -1.0));
        let dot = normal.dot(&expected).abs();
        assert!(dot >= 0.99, "normal mismatch, |dot| = {dot}");
        assert!((normal.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_noisy_plane_recovery() {
        let a = 0.5;
        let b = -0.25;
        let c = 1.234;
        let mut rng = StdRng::seed_from_u64(123_456);
        let noise = Normal::new(0.0, 0.01).unwrap();

        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let mut zs = Vec::new();
        for _ in 0..100 {
            let x: f64 = rng.gen_range(-10.0..10.0);
            let y: f64 = rng.gen_range(-10.0..10.0);
            xs.push(x);
            ys.push(y);
            zs.push(a * x + b * y + c + noise.sample(&mut rng));
        }

        let normal = fit_plane_normal(&xs, &ys, &zs, 3);
        let expected = unit(Vector3::new(a, b, -1.0));
        let dot = normal.dot(&expected).abs();
        assert!(dot >= 1.0 - 1e-3, "normal mismatch, |dot| = {dot}");
    }

    #[test]
    fn test_horizontal_plane() {
        let x = [0.0, 1.0, 2.0, 0.0, 1.0];
        let y = [0.0, 0.0, 0.0, 1.0, 1.0];
        let z = [5.0; 5];

        let normal = fit_plane_normal(&x, &y, &z, 3);
        assert!(normal.x.abs() < 0.01);
        assert!(normal.y.abs() < 0.01);
        assert!(normal.z.abs() > 0.99);
    }

    #[test]
    fn test_insufficient_or_mismatched_input() {
        let normal = fit_plane_normal(&[0.0, 1.0], &[0.0, 1.0], &[0.0, 1.0], 3);
        assert_eq!(normal, Vector3::zeros());

        let normal = fit_plane_normal(&[0.0, 1.0, 2.0], &[0.0, 1.0], &[0.0, 1.0, 2.0], 3);
        assert_eq!(normal, Vector3::zeros());
    }

    #[test]
    fn test_solver_against_known_system() {
        // x + y + z = 6, 2y + 5z = -4, 2x + 5y - z = 27 -> (5, 3, -2)
        let m = Matrix3::new(1.0, 1.0, 1.0, 0.0, 2.0, 5.0, 2.0, 5.0, -1.0);
        let b = Vector3::new(6.0, -4.0, 27.0);
        let x = solve_3x3(m, b).unwrap();
        assert!((x - Vector3::new(5.0, 3.0, -2.0)).norm() < 1e-10);
    }

    #[test]
    fn test_singular_system_rejected() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 3.0, 6.0, 9.0);
        let b = Vector3::new(1.0, 2.0, 3.0);
        assert!(solve_3x3(m, b).is_none());
    }
}
