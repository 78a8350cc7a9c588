//! Поиск платформы и устройства

use crate::compute::{ComputeApi, DeviceClass, DeviceInfo, PlatformInfo};
use crate::error::{ApiResult, PipelineError, Result};
use crate::opencl::types::{CL_DEVICE_NOT_FOUND, CL_PLATFORM_NOT_FOUND_KHR};
use std::fmt;
use tracing::debug;

/// Выбранные платформа и устройство
pub struct DeviceSelection<A: ComputeApi> {
    pub platform: A::Platform,
    pub device: A::Device,
    pub class: DeviceClass,
    pub description: DeviceDescription,
}

impl<A: ComputeApi> DeviceSelection<A> {
    pub fn info(&self) -> &DeviceInfo {
        &self.description.device
    }
}

impl<A: ComputeApi> Clone for DeviceSelection<A> {
    fn clone(&self) -> Self {
        Self {
            platform: self.platform,
            device: self.device,
            class: self.class,
            description: self.description.clone(),
        }
    }
}

impl<A: ComputeApi> fmt::Debug for DeviceSelection<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSelection")
            .field("platform", &self.platform)
            .field("device", &self.device)
            .field("class", &self.class)
            .field("name", &self.description.device.name)
            .finish()
    }
}

/// Первая доступная платформа
pub fn select_platform<A: ComputeApi>(api: &A) -> Result<A::Platform> {
    let platforms = api.platforms().map_err(|e| {
        debug!("clGetPlatformIDs: {}", e);
        PipelineError::NoPlatformFound
    })?;
    platforms.first().copied().ok_or(PipelineError::NoPlatformFound)
}

/// Первое устройство класса `class` на платформе
///
/// Другой класс устройства не подставляется: если GPU нет, результат
/// `NoDeviceFound`, даже когда на платформе есть CPU.
pub fn select_device_on<A: ComputeApi>(
    api: &A,
    platform: A::Platform,
    class: DeviceClass,
) -> Result<DeviceSelection<A>> {
    let devices = api.devices(platform, class).map_err(|e| {
        if e.code != CL_DEVICE_NOT_FOUND {
            debug!("clGetDeviceIDs: {}", e);
        }
        PipelineError::NoDeviceFound { class }
    })?;
    let device = *devices.first().ok_or(PipelineError::NoDeviceFound { class })?;

    let description = describe_device(api, platform, device).map_err(|e| {
        debug!("сведения об устройстве недоступны: {}", e);
        PipelineError::NoDeviceFound { class }
    })?;
    if !class.matches(description.device.device_type) {
        return Err(PipelineError::NoDeviceFound { class });
    }

    debug!(?platform, ?device, name = %description.device.name, "устройство выбрано");
    Ok(DeviceSelection {
        platform,
        device,
        class,
        description,
    })
}

/// Находит первую платформу и первое устройство запрошенного класса
pub fn select_device<A: ComputeApi>(api: &A, class: DeviceClass) -> Result<DeviceSelection<A>> {
    let platform = select_platform(api)?;
    select_device_on(api, platform, class)
}

/// Сведения о платформе и устройстве для печати
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceDescription {
    pub platform: PlatformInfo,
    pub device: DeviceInfo,
}

/// Единый запрос сведений об устройстве для всех мест, где их печатают
pub fn describe_device<A: ComputeApi>(
    api: &A,
    platform: A::Platform,
    device: A::Device,
) -> ApiResult<DeviceDescription> {
    Ok(DeviceDescription {
        platform: api.platform_info(platform)?,
        device: api.device_info(device)?,
    })
}

/// Все устройства всех платформ
pub fn list_devices<A: ComputeApi>(api: &A) -> ApiResult<Vec<DeviceDescription>> {
    let platforms = match api.platforms() {
        Err(e) if e.code == CL_PLATFORM_NOT_FOUND_KHR => Vec::new(),
        other => other?,
    };
    let mut found = Vec::new();
    for platform in platforms {
        let devices = match api.devices(platform, DeviceClass::Any) {
            Err(e) if e.code == CL_DEVICE_NOT_FOUND => Vec::new(),
            other => other?,
        };
        for device in devices {
            found.push(describe_device(api, platform, device)?);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::HostDevice;

    #[test]
    fn gpu_request_does_not_fall_back_to_cpu() {
        let device = HostDevice::builder().cpu("only cpu").build();
        let err = select_device(&device, DeviceClass::Gpu).unwrap_err();
        assert!(matches!(err, PipelineError::NoDeviceFound { class: DeviceClass::Gpu }));
    }

    #[test]
    fn any_picks_first_device() {
        let device = HostDevice::builder().gpu("gpu0").cpu("cpu0").build();
        let selection = select_device(&device, DeviceClass::Any).unwrap();
        assert_eq!(selection.info().name, "gpu0");
    }

    #[test]
    fn no_platform_is_reported() {
        let device = HostDevice::builder().without_platform().build();
        let err = select_device(&device, DeviceClass::Any).unwrap_err();
        assert!(matches!(err, PipelineError::NoPlatformFound));
    }

    #[test]
    fn description_includes_platform() {
        let device = HostDevice::new();
        let selection = select_device(&device, DeviceClass::Cpu).unwrap();
        let description = describe_device(&device, selection.platform, selection.device).unwrap();
        assert_eq!(description.platform.name, "Host OpenCL Emulation");
        assert_eq!(description.device.name, "Host CPU");
        assert_eq!(description.device.compute_units, 4);
        assert_eq!(selection.description.platform, description.platform);
    }

    #[test]
    fn listing_and_selection_describe_devices_alike() {
        let device = HostDevice::builder().gpu("gpu0").build();
        let selection = select_device(&device, DeviceClass::Gpu).unwrap();
        let listed = list_devices(&device).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].device, *selection.info());
        assert_eq!(listed[0].platform, selection.description.platform);
    }

    #[test]
    fn listing_covers_every_device() {
        let device = HostDevice::builder().gpu("gpu0").cpu("cpu0").build();
        let names: Vec<_> = list_devices(&device)
            .unwrap()
            .into_iter()
            .map(|d| d.device.name)
            .collect();
        assert_eq!(names, vec!["gpu0", "cpu0"]);
        assert!(list_devices(&HostDevice::builder().without_platform().build()).unwrap().is_empty());
    }
}
