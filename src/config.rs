//! Настройки запуска конвейера

use crate::compute::DeviceClass;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub device_class: DeviceClass,
    /// Размер рабочей группы `(строки, столбцы)`; `None` отдает выбор драйверу
    pub tile: Option<(usize, usize)>,
    pub build_options: String,
    /// Очередь с профилированием; без него этап профилирования завершается ошибкой
    pub profiling: bool,
    /// Исходник ядра вместо встроенного
    pub kernel_source: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::Any,
            tile: None,
            build_options: String::new(),
            profiling: true,
            kernel_source: None,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((rows, cols)) = self.tile {
            if rows == 0 || cols == 0 {
                return Err(PipelineError::dispatch(format!(
                    "tile {}x{} has a zero extent",
                    rows, cols
                )));
            }
        }
        Ok(())
    }

    /// Исходник для запуска: переопределенный или встроенный
    pub fn source_or<'a>(&'a self, builtin: &'a str) -> &'a str {
        self.kernel_source.as_deref().unwrap_or(builtin)
    }
}

#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    pub fn device_class(mut self, class: DeviceClass) -> Self {
        self.config.device_class = class;
        self
    }

    pub fn tile(mut self, rows: usize, cols: usize) -> Self {
        self.config.tile = Some((rows, cols));
        self
    }

    pub fn build_options<S: Into<String>>(mut self, options: S) -> Self {
        self.config.build_options = options.into();
        self
    }

    pub fn profiling(mut self, enable: bool) -> Self {
        self.config.profiling = enable;
        self
    }

    pub fn kernel_source<S: Into<String>>(mut self, source: S) -> Self {
        self.config.kernel_source = Some(source.into());
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_profiling_on_any_device() {
        let config = PipelineConfig::default();
        assert_eq!(config.device_class, DeviceClass::Any);
        assert!(config.profiling);
        assert!(config.tile.is_none());
    }

    #[test]
    fn zero_tile_is_rejected() {
        let err = PipelineConfig::builder().tile(0, 4).build().unwrap_err();
        assert!(matches!(err, PipelineError::DispatchFailed { .. }));
    }

    #[test]
    fn source_override() {
        let config = PipelineConfig::builder().kernel_source("__kernel void k() {}").build().unwrap();
        assert_eq!(config.source_or("builtin"), "__kernel void k() {}");
        assert_eq!(PipelineConfig::default().source_or("builtin"), "builtin");
    }
}
