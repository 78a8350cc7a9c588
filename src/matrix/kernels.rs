//! OpenCL ядра для матричных операций

/// Имя точки входа ядра умножения
pub const MULTIPLY_MATRIX_ENTRY: &str = "multiply_matrix";
/// Имя точки входа ядра сложения
pub const ADD_MATRIX_ENTRY: &str = "add_matrix";
/// Имя точки входа ядра копирования
pub const COPY_MATRIX_ENTRY: &str = "copy_matrix";

/// Исходный код ядра для матричного умножения
///
/// Одна рабочая единица вычисляет один элемент C; пространство индексов
/// совпадает с размерами результата `rowsA x colsB`.
pub static MULTIPLY_MATRIX_KERNEL: &str = r#"
__kernel void multiply_matrix(
    const int rowsA,
    const int colsA,
    const int colsB,
    __global const float* A,
    __global const float* B,
    __global float* C
) {
    const int row = get_global_id(0);
    const int col = get_global_id(1);

    if (row < rowsA && col < colsB) {
        float sum = 0.0f;
        for (int k = 0; k < colsA; k++) {
            sum += A[row * colsA + k] * B[k * colsB + col];
        }
        C[row * colsB + col] = sum;
    }
}
"#;

/// Исходный код ядра для поэлементного сложения
pub static ADD_MATRIX_KERNEL: &str = r#"
__kernel void add_matrix(
    __global const float* A,
    __global const float* B,
    __global float* C
) {
    const int row = get_global_id(0);
    const int col = get_global_id(1);
    const int idx = row * get_global_size(1) + col;

    C[idx] = A[idx] + B[idx];
}
"#;

/// Тождественное ядро: копирует матрицу без изменений
pub static COPY_MATRIX_KERNEL: &str = r#"
__kernel void copy_matrix(
    __global const float* src,
    __global float* dst
) {
    const int idx = get_global_id(0) * get_global_size(1) + get_global_id(1);
    dst[idx] = src[idx];
}
"#;
