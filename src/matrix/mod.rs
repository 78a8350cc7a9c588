//! Модуль для работы с матрицами
//!
//! Предоставляет:
//! - Типы матриц
//! - Операции над матрицами на CPU для сверки
//! - Исходники ядер OpenCL

mod types;
pub mod operations;
pub mod kernels;

pub use types::{Matrix, MatrixType};
pub use operations::{
    compare_results, cpu_matrix_add, cpu_matrix_multiply, initialize_matrices, initialize_same_shape, Comparison,
};
pub use kernels::{ADD_MATRIX_KERNEL, COPY_MATRIX_KERNEL, MULTIPLY_MATRIX_KERNEL};
