//! Small model problems for tests, benchmarks, and the demo path of the
//! CLI driver.

use crate::{CooMatrix, CsrMatrix};

/// Standard 1-D Poisson matrix: tridiagonal with 2 on the diagonal and -1
/// on the couplings.
pub fn laplace_1d(n: usize) -> CsrMatrix {
    let mut coo = CooMatrix::new((n, n));
    for i in 0..n {
        coo.add_triplet(i, i, 2.0);
        if i + 1 < n {
            coo.add_triplet(i, i + 1, -1.0);
            coo.add_triplet(i + 1, i, -1.0);
        }
    }
    coo.to_csr::<usize>()
}

/// 5-point stencil on an `nx` by `ny` grid, row-major numbering.
pub fn laplace_2d(nx: usize, ny: usize) -> CsrMatrix {
    let n = nx * ny;
    let mut coo = CooMatrix::new((n, n));
    for y in 0..ny {
        for x in 0..nx {
            let i = y * nx + x;
            coo.add_triplet(i, i, 4.0);
            if x + 1 < nx {
                coo.add_triplet(i, i + 1, -1.0);
                coo.add_triplet(i + 1, i, -1.0);
            }
            if y + 1 < ny {
                coo.add_triplet(i, i + nx, -1.0);
                coo.add_triplet(i + nx, i, -1.0);
            }
        }
    }
    coo.to_csr::<usize>()
}

/// Replicates every entry of `mat` across a `block_size` diagonal block,
/// turning a nodal matrix into one with `block_size` unknowns per node.
pub fn block_expand(mat: &CsrMatrix, block_size: usize) -> CsrMatrix {
    let mut coo = CooMatrix::new((mat.rows() * block_size, mat.cols() * block_size));
    for (i, row) in mat.outer_iterator().enumerate() {
        for (j, &val) in row.iter() {
            for k in 0..block_size {
                coo.add_triplet(i * block_size + k, j * block_size + k, val);
            }
        }
    }
    coo.to_csr::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laplace_1d_is_tridiagonal() {
        let mat = laplace_1d(6);
        assert_eq!(mat.shape(), (6, 6));
        assert_eq!(mat.nnz(), 3 * 6 - 2);
        assert_eq!(mat.get(0, 0), Some(&2.0));
        assert_eq!(mat.get(2, 3), Some(&-1.0));
        assert_eq!(mat.get(2, 4), None);
    }

    #[test]
    fn laplace_2d_has_five_point_stencil() {
        let mat = laplace_2d(3, 3);
        assert_eq!(mat.shape(), (9, 9));
        assert_eq!(mat.nnz(), 5 * 9 - 2 * 3 - 2 * 3);
        // center vertex couples to all four neighbors
        assert_eq!(mat.get(4, 1), Some(&-1.0));
        assert_eq!(mat.get(4, 3), Some(&-1.0));
        assert_eq!(mat.get(4, 5), Some(&-1.0));
        assert_eq!(mat.get(4, 7), Some(&-1.0));
    }

    #[test]
    fn block_expand_replicates_the_stencil() {
        let mat = block_expand(&laplace_1d(3), 2);
        assert_eq!(mat.shape(), (6, 6));
        assert_eq!(mat.get(2, 2), Some(&2.0));
        assert_eq!(mat.get(3, 3), Some(&2.0));
        assert_eq!(mat.get(2, 0), Some(&-1.0));
        assert_eq!(mat.get(3, 1), Some(&-1.0));
        assert_eq!(mat.get(2, 1), None);
    }
}
