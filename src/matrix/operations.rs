//! Операции над матрицами на CPU для верификации

use super::types::{Matrix, MatrixType};
use crate::error::{PipelineError, Result};
use ndarray::ArrayView2;

/// Операнд A или B для заданного типа матриц
fn operand(matrix_type: MatrixType, is_a: bool, rows: usize, cols: usize) -> Result<Matrix> {
    match (matrix_type, is_a) {
        (MatrixType::OnesAndTwos, true) => Matrix::filled(rows, cols, 1.0),
        (MatrixType::OnesAndTwos, false) => Matrix::filled(rows, cols, 2.0),
        (MatrixType::ThreesAndFours, true) => Matrix::filled(rows, cols, 3.0),
        (MatrixType::ThreesAndFours, false) => Matrix::filled(rows, cols, 4.0),
        (MatrixType::Random, _) => Matrix::random(rows, cols),
    }
}

/// Инициализирует матрицы A (`a_rows x inner`) и B (`inner x b_cols`)
pub fn initialize_matrices(
    matrix_type: MatrixType,
    a_rows: usize,
    inner: usize,
    b_cols: usize,
) -> Result<(Matrix, Matrix)> {
    Ok((
        operand(matrix_type, true, a_rows, inner)?,
        operand(matrix_type, false, inner, b_cols)?,
    ))
}

/// Две матрицы одной формы `rows x cols` для поэлементных операций
pub fn initialize_same_shape(matrix_type: MatrixType, rows: usize, cols: usize) -> Result<(Matrix, Matrix)> {
    Ok((
        operand(matrix_type, true, rows, cols)?,
        operand(matrix_type, false, rows, cols)?,
    ))
}

fn view(m: &Matrix) -> Result<ArrayView2<'_, f32>> {
    ArrayView2::from_shape((m.rows(), m.cols()), m.as_slice())
        .map_err(|e| PipelineError::invalid_matrix(e.to_string()))
}

/// CPU реализация матричного умножения
pub fn cpu_matrix_multiply(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    a.ensure_multipliable(b)?;
    let product = view(a)?.dot(&view(b)?);
    Matrix::from_vec(a.rows(), b.cols(), product.iter().copied().collect())
}

/// CPU реализация сложения матриц
pub fn cpu_matrix_add(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    a.ensure_same_shape(b)?;
    let sum = &view(a)? + &view(b)?;
    Matrix::from_vec(a.rows(), a.cols(), sum.iter().copied().collect())
}

/// Итог сравнения результатов GPU и CPU
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Comparison {
    pub diff_count: usize,
    pub max_diff: f32,
}

impl Comparison {
    pub fn matches(&self) -> bool {
        self.diff_count == 0
    }
}

/// Сравнивает результаты GPU и CPU вычислений с относительной погрешностью
pub fn compare_results(gpu_result: &Matrix, cpu_result: &Matrix, epsilon: f32) -> Comparison {
    if gpu_result.shape() != cpu_result.shape() {
        return Comparison {
            diff_count: gpu_result.len().max(cpu_result.len()),
            max_diff: f32::INFINITY,
        };
    }

    let mut max_diff = 0.0f32;
    let mut diff_count = 0;
    for (g, c) in gpu_result.as_slice().iter().zip(cpu_result.as_slice()) {
        let diff = (g - c).abs();
        if diff > epsilon * c.abs().max(1.0) {
            diff_count += 1;
            max_diff = max_diff.max(diff);
        }
    }
    Comparison { diff_count, max_diff }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ones_and_twos_product() {
        let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 3, 5, 2).unwrap();
        let c = cpu_matrix_multiply(&a, &b).unwrap();
        assert_eq!(c.shape(), (3, 2));
        for v in c.as_slice() {
            assert_relative_eq!(*v, 10.0);
        }
    }

    #[test]
    fn same_shape_operands_use_type_values() {
        let (a, b) = initialize_same_shape(MatrixType::ThreesAndFours, 2, 7).unwrap();
        assert_eq!(a.shape(), (2, 7));
        assert_eq!(b.shape(), (2, 7));
        assert!(a.as_slice().iter().all(|v| *v == 3.0));
        assert!(b.as_slice().iter().all(|v| *v == 4.0));
    }

    #[test]
    fn rectangular_product_matches_manual_sum() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = cpu_matrix_multiply(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn add_requires_same_shape() {
        let a = Matrix::zeros(2, 3).unwrap();
        let b = Matrix::zeros(3, 2).unwrap();
        assert!(cpu_matrix_add(&a, &b).is_err());
        let c = cpu_matrix_add(&a, &a).unwrap();
        assert!(c.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn comparison_counts_differences() {
        let a = Matrix::from_vec(1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        let b = Matrix::from_vec(1, 3, vec![1.0, 2.5, 3.0]).unwrap();
        let cmp = compare_results(&a, &b, 1e-5);
        assert_eq!(cmp.diff_count, 1);
        assert_relative_eq!(cmp.max_diff, 0.5);
        assert!(compare_results(&a, &a, 1e-5).matches());
    }
}
