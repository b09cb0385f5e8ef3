use crate::{ExecutionError, TensorData};

/// Measures how far the output of a matmul is from a trusted product.
pub trait CorrectnessCheck {
    /// Mean squared error of `out` against the product of `lhs` (`m x k`) and `rhs` (`k x n`).
    fn mean_squared_error(
        &self,
        lhs: &TensorData,
        rhs: &TensorData,
        out: &TensorData,
    ) -> Result<f64, ExecutionError>;
}

/// `(m, n, k)` of a product, checking the operand shapes agree.
pub fn product_shape(
    lhs: &TensorData,
    rhs: &TensorData,
    out: &TensorData,
) -> Result<(usize, usize, usize), ExecutionError> {
    match (lhs.shape(), rhs.shape(), out.shape()) {
        ([m, k], [k_rhs, n], [m_out, n_out]) if k == k_rhs && m == m_out && n == n_out => {
            Ok((*m, *n, *k))
        }
        (lhs, rhs, out) => Err(ExecutionError::Generic {
            reason: alloc::format!("Shapes {lhs:?} x {rhs:?} -> {out:?} don't form a product"),
        }),
    }
}
