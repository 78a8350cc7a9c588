//! Типы матриц и связанные структуры

use crate::error::{PipelineError, Result};
use rand::Rng;

/// Тип матриц для вычислений
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixType {
    /// Матрицы заполненные 1 и 2
    #[default]
    OnesAndTwos,
    /// Матрицы заполненные 3 и 4
    ThreesAndFours,
    /// Случайно заполненные матрицы
    Random
}

/// Плотная матрица `f32`, хранимая построчно
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Число элементов `rows x cols`; размер в байтах обязан помещаться в `isize`
    fn element_count(rows: usize, cols: usize) -> Result<usize> {
        if rows == 0 || cols == 0 {
            return Err(PipelineError::invalid_matrix(format!(
                "dimensions must be non-zero, got {}x{}",
                rows, cols
            )));
        }
        rows.checked_mul(cols)
            .filter(|len| {
                len.checked_mul(std::mem::size_of::<f32>())
                    .is_some_and(|bytes| bytes <= isize::MAX as usize)
            })
            .ok_or_else(|| PipelineError::invalid_matrix(format!("{}x{} overflows", rows, cols)))
    }

    /// Пустой буфер под `rows x cols` элементов без паники при нехватке памяти
    fn storage(rows: usize, cols: usize) -> Result<(Vec<f32>, usize)> {
        let len = Self::element_count(rows, cols)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            PipelineError::invalid_matrix(format!("cannot allocate {}x{} matrix: {}", rows, cols, e))
        })?;
        Ok((data, len))
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let expected = Self::element_count(rows, cols)?;
        if data.len() != expected {
            return Err(PipelineError::invalid_matrix(format!(
                "{}x{} matrix needs {} elements, got {}",
                rows,
                cols,
                expected,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn filled(rows: usize, cols: usize, value: f32) -> Result<Self> {
        let (mut data, len) = Self::storage(rows, cols)?;
        data.resize(len, value);
        Self::from_vec(rows, cols, data)
    }

    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        Self::filled(rows, cols, 0.0)
    }

    /// Случайные значения из [0, 1)
    pub fn random(rows: usize, cols: usize) -> Result<Self> {
        let (mut data, len) = Self::storage(rows, cols)?;
        let mut rng = rand::thread_rng();
        data.extend((0..len).map(|_| rng.gen_range(0.0..1.0)));
        Self::from_vec(rows, cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Размер в байтах на устройстве
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Проверка `cols(A) == rows(B)` перед умножением
    pub fn ensure_multipliable(&self, other: &Matrix) -> Result<()> {
        if self.cols != other.rows {
            return Err(PipelineError::DimensionMismatch {
                left: format!("{}x{}", self.rows, self.cols),
                right: format!("{}x{}", other.rows, other.cols),
            });
        }
        Ok(())
    }

    pub fn ensure_same_shape(&self, other: &Matrix) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(PipelineError::DimensionMismatch {
                left: format!("{}x{}", self.rows, self.cols),
                right: format!("{}x{}", other.rows, other.cols),
            });
        }
        Ok(())
    }

    /// Левый верхний угол матрицы для печати
    pub fn preview(&self, size: usize) -> String {
        let mut out = String::new();
        for i in 0..size.min(self.rows) {
            for j in 0..size.min(self.cols) {
                out.push_str(&format!("{:.1} ", self.data[i * self.cols + j]));
            }
            if self.cols > size {
                out.push_str("...");
            }
            out.push('\n');
        }
        if self.rows > size {
            out.push_str("...\n");
        }
        out
    }
}
