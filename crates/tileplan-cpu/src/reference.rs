use tileplan_runtime::{CorrectnessCheck, ExecutionError, TensorData, product_shape};

/// Plain `f32` product of row-major `lhs` (`m x k`) and `rhs` (`k x n`).
pub fn matmul_cpu_reference(lhs: &[f32], rhs: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut out = vec![0.; m * n];

    for i in 0..m {
        for j in 0..n {
            for k_ in 0..k {
                out[i * n + j] += lhs[i * k + k_] * rhs[k_ * n + j];
            }
        }
    }

    out
}

/// Checks outputs against [matmul_cpu_reference] computed on the decoded inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceCheck;

impl CorrectnessCheck for ReferenceCheck {
    fn mean_squared_error(
        &self,
        lhs: &TensorData,
        rhs: &TensorData,
        out: &TensorData,
    ) -> Result<f64, ExecutionError> {
        let (m, n, k) = product_shape(lhs, rhs, out)?;
        let expected = matmul_cpu_reference(&lhs.to_f32_vec(), &rhs.to_f32_vec(), m, n, k);
        let actual = out.to_f32_vec();

        let sum: f64 = actual
            .iter()
            .zip(&expected)
            .map(|(actual, expected)| (*actual as f64 - *expected as f64).powi(2))
            .sum();

        Ok(sum / expected.len().max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileplan_ir::Elem;

    #[test]
    fn reference_product() {
        let lhs = [1., 2., 3., 4., 5., 6.];
        let rhs = [7., 8., 9., 10., 11., 12.];

        assert_eq!(
            matmul_cpu_reference(&lhs, &rhs, 2, 2, 3),
            vec![58., 64., 139., 154.]
        );
    }

    #[test]
    fn error_of_an_exact_output_is_zero() {
        let lhs = TensorData::from_f32(&[1., 2., 3., 4.], vec![2, 2], Elem::F16);
        let rhs = TensorData::from_f32(&[1., 0., 0., 1.], vec![2, 2], Elem::F16);
        let exact = TensorData::from_f32(&[1., 2., 3., 4.], vec![2, 2], Elem::F32);
        let off = TensorData::from_f32(&[1., 2., 3., 6.], vec![2, 2], Elem::F32);

        assert_eq!(ReferenceCheck.mean_squared_error(&lhs, &rhs, &exact), Ok(0.));
        assert_eq!(ReferenceCheck.mean_squared_error(&lhs, &rhs, &off), Ok(1.));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let lhs = TensorData::zeros(vec![2, 3], Elem::F32);
        let rhs = TensorData::zeros(vec![2, 3], Elem::F32);
        let out = TensorData::zeros(vec![2, 3], Elem::F32);

        assert!(ReferenceCheck.mean_squared_error(&lhs, &rhs, &out).is_err());
    }
}
