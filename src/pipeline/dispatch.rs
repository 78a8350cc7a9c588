//! Двумерное пространство индексов запуска

use crate::error::{PipelineError, Result};
use serde::Serialize;

/// Глобальный размер совпадает с размерами результата, локальный задает
/// размер рабочей группы (тайл)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchDescriptor {
    global: [usize; 2],
    local: Option<[usize; 2]>,
}

impl DispatchDescriptor {
    pub fn new(global: [usize; 2], local: Option<[usize; 2]>) -> Result<Self> {
        if global.contains(&0) {
            return Err(PipelineError::dispatch(format!(
                "global size {}x{} has a zero extent",
                global[0], global[1]
            )));
        }
        if let Some(local) = local {
            if local.contains(&0) {
                return Err(PipelineError::dispatch(format!(
                    "work-group size {}x{} has a zero extent",
                    local[0], local[1]
                )));
            }
            if global[0] % local[0] != 0 || global[1] % local[1] != 0 {
                return Err(PipelineError::dispatch(format!(
                    "work-group size {}x{} does not divide global size {}x{}",
                    local[0], local[1], global[0], global[1]
                )));
            }
        }
        Ok(Self { global, local })
    }

    /// Один рабочий элемент на элемент результата `rows x cols`
    pub fn for_output(rows: usize, cols: usize, tile: Option<(usize, usize)>) -> Result<Self> {
        Self::new([rows, cols], tile.map(|(r, c)| [r, c]))
    }

    /// Проверка размера рабочей группы против лимита устройства
    pub fn check_limits(&self, max_work_group_size: usize) -> Result<()> {
        if let Some([r, c]) = self.local {
            let size = r.saturating_mul(c);
            if size > max_work_group_size {
                return Err(PipelineError::dispatch(format!(
                    "work-group size {}x{} = {} exceeds device limit {}",
                    r, c, size, max_work_group_size
                )));
            }
        }
        Ok(())
    }

    pub fn global(&self) -> [usize; 2] {
        self.global
    }

    pub fn local(&self) -> Option<[usize; 2]> {
        self.local
    }

    /// Число рабочих групп по каждой оси; без тайла решает драйвер
    pub fn work_groups(&self) -> Option<[usize; 2]> {
        self.local
            .map(|[r, c]| [self.global[0] / r, self.global[1] / c])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_must_divide_output() {
        assert!(DispatchDescriptor::for_output(100, 100, Some((10, 10))).is_ok());
        let err = DispatchDescriptor::for_output(100, 100, Some((16, 16))).unwrap_err();
        assert!(matches!(err, PipelineError::DispatchFailed { source: None, .. }));
    }

    #[test]
    fn zero_extents_are_rejected() {
        assert!(DispatchDescriptor::new([0, 4], None).is_err());
        assert!(DispatchDescriptor::new([4, 4], Some([0, 2])).is_err());
    }

    #[test]
    fn work_group_limit() {
        let d = DispatchDescriptor::for_output(64, 64, Some((16, 16))).unwrap();
        assert!(d.check_limits(256).is_ok());
        assert!(d.check_limits(128).is_err());
        assert_eq!(d.work_groups(), Some([4, 4]));
    }

    #[test]
    fn untiled_dispatch_has_no_groups() {
        let d = DispatchDescriptor::for_output(7, 3, None).unwrap();
        assert_eq!(d.global(), [7, 3]);
        assert_eq!(d.work_groups(), None);
        assert!(d.check_limits(1).is_ok());
    }
}
