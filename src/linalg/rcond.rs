//! Numerical comparison of reciprocal condition numbers.
//!
//! Required for all factorisations of the innovation covariance HBH'+R.

use nalgebra::{Dim, RealField, Vector};
use nalgebra::storage::Storage;

/// Estimate the reciprocal condition number of a diagonal matrix for inversion.
/// `dv` holds the diagonal.
///
/// The condition number is defined from a matrix norm.
/// Choose max element of d as the norm of the original matrix.
/// Assume this norm for inverse matrix is min element d.
/// Therefore rcond = min/max
///
/// Note:
///  Defined to be 0 for semi-definite and 0 for an empty matrix
///  Defined to be 0 for max and min infinite
///  Defined to be <0 for negative matrix (d element a value < 0)
///  Defined to be <0 with any NaN element
pub fn rcond_vec<N, R, S>(dv: &Vector<N, R, S>) -> N
where
    N: RealField + Copy,
    R: Dim,
    S: Storage<N, R>,
{
    let n = dv.nrows();
    if n == 0 {
        return N::zero();
    }
    let mut mind = dv[0];
    let mut maxd = mind;

    for i in 0..n {
        let d = dv[i];
        if d != d {
            // NaN
            return -N::one();
        }
        if d < mind {
            mind = d;
        }
        if d > maxd {
            maxd = d;
        }
    }

    rcond_min_max(mind, maxd)
}

/// Estimate the reciprocal condition number of a PD matrix from the diagonal of its Cholesky factor L (LL').
///
/// The rcond of the original matrix is the square of the rcond of diagonal(L). The sign is kept so a
/// negative result still flags a negative factor.
pub fn rcond_cholesky<N, R, S>(l_diagonal: &Vector<N, R, S>) -> N
where
    N: RealField + Copy,
    R: Dim,
    S: Storage<N, R>,
{
    let rcond = rcond_vec(l_diagonal);
    if rcond < N::zero() {
        -(rcond * rcond)
    } else {
        rcond * rcond
    }
}

fn rcond_min_max<N: RealField + Copy>(mind: N, maxd: N) -> N {
    if mind < N::zero() {
        // mind < 0 but does not represent a rcond
        mind
    } else {
        // ISSUE mind may still be -0, this is propagated into rcond
        let rcond = mind / maxd;
        if rcond != rcond {
            // NaN, singular due to (mind == maxd) == (zero or infinity)
            N::zero()
        } else {
            rcond
        }
    }
}

/// Checks that a reciprocal condition number exceeds `limit`.
///
/// IEC 559 NaN values are never true.
pub fn check_rcond<N: RealField + Copy>(rcond: N, limit: N) -> Result<N, N> {
    if rcond > limit {
        Ok(rcond)
    } else {
        Err(rcond)
    }
}
