//! Нативный бэкенд поверх привязок к libOpenCL

use super::bindings::*;
use super::callbacks::log_context_error;
use super::types::*;
use crate::compute::{truncate_log, ComputeApi, DeviceClass, DeviceInfo, KernelArg, MemAccess, PlatformInfo, Timestamps};
use crate::error::{ApiError, ApiResult};
use crate::{cl_check, cl_create};
use std::ffi::{c_void, CString};
use std::mem::size_of;
use std::ptr;

/// Драйвер OpenCL, установленный в системе
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClApi;

impl OpenClApi {
    pub fn new() -> Self {
        Self
    }
}

fn check(code: cl_int) -> ApiResult<()> {
    if code == CL_SUCCESS {
        Ok(())
    } else {
        Err(ApiError::new(code))
    }
}

/// Строка из буфера с завершающим нулем
fn c_buffer_to_string(mut buf: Vec<u8>) -> String {
    while buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn to_c_string(value: &str) -> ApiResult<CString> {
    CString::new(value).map_err(|_| ApiError::new(CL_INVALID_VALUE))
}

fn platform_string(platform: cl_platform_id, param: cl_platform_info) -> ApiResult<String> {
    let mut size = 0usize;
    cl_check!(clGetPlatformInfo(platform, param, 0, ptr::null_mut(), &mut size))?;
    let mut buf = vec![0u8; size];
    cl_check!(clGetPlatformInfo(
        platform,
        param,
        size,
        buf.as_mut_ptr() as *mut c_void,
        ptr::null_mut()
    ))?;
    Ok(c_buffer_to_string(buf))
}

fn device_string(device: cl_device_id, param: cl_device_info) -> ApiResult<String> {
    let mut size = 0usize;
    cl_check!(clGetDeviceInfo(device, param, 0, ptr::null_mut(), &mut size))?;
    let mut buf = vec![0u8; size];
    cl_check!(clGetDeviceInfo(
        device,
        param,
        size,
        buf.as_mut_ptr() as *mut c_void,
        ptr::null_mut()
    ))?;
    Ok(c_buffer_to_string(buf))
}

fn device_scalar<T: Copy + Default>(device: cl_device_id, param: cl_device_info) -> ApiResult<T> {
    let mut value = T::default();
    cl_check!(clGetDeviceInfo(
        device,
        param,
        size_of::<T>(),
        &mut value as *mut T as *mut c_void,
        ptr::null_mut()
    ))?;
    Ok(value)
}

fn event_counter(event: cl_event, param: cl_profiling_info) -> ApiResult<cl_ulong> {
    let mut value: cl_ulong = 0;
    cl_check!(clGetEventProfilingInfo(
        event,
        param,
        size_of::<cl_ulong>(),
        &mut value as *mut cl_ulong as *mut c_void,
        ptr::null_mut()
    ))?;
    Ok(value)
}

impl ComputeApi for OpenClApi {
    type Platform = cl_platform_id;
    type Device = cl_device_id;
    type Context = cl_context;
    type Queue = cl_command_queue;
    type Mem = cl_mem;
    type Program = cl_program;
    type Kernel = cl_kernel;
    type Event = cl_event;

    fn platforms(&self) -> ApiResult<Vec<cl_platform_id>> {
        let mut count: cl_uint = 0;
        let code = unsafe { clGetPlatformIDs(0, ptr::null_mut(), &mut count) };
        // ICD-загрузчик без платформ возвращает CL_PLATFORM_NOT_FOUND_KHR
        if code == CL_PLATFORM_NOT_FOUND_KHR || (code == CL_SUCCESS && count == 0) {
            return Ok(Vec::new());
        }
        check(code)?;

        let mut ids = vec![ptr::null_mut(); count as usize];
        cl_check!(clGetPlatformIDs(count, ids.as_mut_ptr(), ptr::null_mut()))?;
        Ok(ids)
    }

    fn platform_info(&self, platform: cl_platform_id) -> ApiResult<PlatformInfo> {
        Ok(PlatformInfo {
            name: platform_string(platform, CL_PLATFORM_NAME)?,
            version: platform_string(platform, CL_PLATFORM_VERSION)?,
        })
    }

    fn devices(&self, platform: cl_platform_id, class: DeviceClass) -> ApiResult<Vec<cl_device_id>> {
        let mut count: cl_uint = 0;
        let code = unsafe { clGetDeviceIDs(platform, class.as_cl(), 0, ptr::null_mut(), &mut count) };
        if code == CL_DEVICE_NOT_FOUND || (code == CL_SUCCESS && count == 0) {
            return Ok(Vec::new());
        }
        check(code)?;

        let mut ids = vec![ptr::null_mut(); count as usize];
        cl_check!(clGetDeviceIDs(
            platform,
            class.as_cl(),
            count,
            ids.as_mut_ptr(),
            ptr::null_mut()
        ))?;
        Ok(ids)
    }

    fn device_info(&self, device: cl_device_id) -> ApiResult<DeviceInfo> {
        Ok(DeviceInfo {
            name: device_string(device, CL_DEVICE_NAME)?,
            version: device_string(device, CL_DEVICE_VERSION)?,
            device_type: device_scalar::<cl_device_type>(device, CL_DEVICE_TYPE)?,
            compute_units: device_scalar::<cl_uint>(device, CL_DEVICE_MAX_COMPUTE_UNITS)?,
            max_work_group_size: device_scalar::<usize>(device, CL_DEVICE_MAX_WORK_GROUP_SIZE)?,
            global_mem_bytes: device_scalar::<cl_ulong>(device, CL_DEVICE_GLOBAL_MEM_SIZE)?,
        })
    }

    fn create_context(&self, device: cl_device_id) -> ApiResult<cl_context> {
        cl_create!(clCreateContext(
            ptr::null(),
            1,
            &device,
            Some(log_context_error),
            ptr::null_mut()
        ))
    }

    fn create_queue(&self, context: cl_context, device: cl_device_id, profiling: bool) -> ApiResult<cl_command_queue> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        cl_create!(clCreateCommandQueue(context, device, properties))
    }

    fn create_buffer(&self, context: cl_context, access: MemAccess, bytes: usize) -> ApiResult<cl_mem> {
        cl_create!(clCreateBuffer(context, access.as_cl(), bytes, ptr::null_mut()))
    }

    fn write_buffer(&self, queue: cl_command_queue, mem: cl_mem, data: &[f32]) -> ApiResult<()> {
        cl_check!(clEnqueueWriteBuffer(
            queue,
            mem,
            CL_TRUE,
            0,
            std::mem::size_of_val(data),
            data.as_ptr() as *const c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ))
    }

    fn read_buffer(&self, queue: cl_command_queue, mem: cl_mem, out: &mut [f32]) -> ApiResult<()> {
        cl_check!(clEnqueueReadBuffer(
            queue,
            mem,
            CL_TRUE,
            0,
            std::mem::size_of_val(out),
            out.as_mut_ptr() as *mut c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ))
    }

    fn create_program(&self, context: cl_context, source: &str) -> ApiResult<cl_program> {
        let text = source.as_ptr() as *const std::ffi::c_char;
        let length = source.len();
        cl_create!(clCreateProgramWithSource(context, 1, &text, &length))
    }

    fn build_program(&self, program: cl_program, device: cl_device_id, options: &str) -> ApiResult<()> {
        let options = to_c_string(options)?;
        cl_check!(clBuildProgram(
            program,
            1,
            &device,
            options.as_ptr(),
            None,
            ptr::null_mut()
        ))
    }

    fn build_log(&self, program: cl_program, device: cl_device_id, limit: usize) -> ApiResult<String> {
        let mut size = 0usize;
        cl_check!(clGetProgramBuildInfo(
            program,
            device,
            CL_PROGRAM_BUILD_LOG,
            0,
            ptr::null_mut(),
            &mut size
        ))?;
        let mut log = vec![0u8; size];
        cl_check!(clGetProgramBuildInfo(
            program,
            device,
            CL_PROGRAM_BUILD_LOG,
            size,
            log.as_mut_ptr() as *mut c_void,
            ptr::null_mut()
        ))?;
        Ok(truncate_log(c_buffer_to_string(log), limit))
    }

    fn create_kernel(&self, program: cl_program, name: &str) -> ApiResult<cl_kernel> {
        let name = to_c_string(name).map_err(|_| ApiError::new(CL_INVALID_KERNEL_NAME))?;
        cl_create!(clCreateKernel(program, name.as_ptr()))
    }

    fn set_kernel_arg(&self, kernel: cl_kernel, index: u32, arg: KernelArg<cl_mem>) -> ApiResult<()> {
        match arg {
            KernelArg::Int(value) => cl_check!(clSetKernelArg(
                kernel,
                index,
                size_of::<cl_int>(),
                &value as *const cl_int as *const c_void
            )),
            KernelArg::Mem(mem) => cl_check!(clSetKernelArg(
                kernel,
                index,
                size_of::<cl_mem>(),
                &mem as *const cl_mem as *const c_void
            )),
            KernelArg::Local(bytes) => cl_check!(clSetKernelArg(kernel, index, bytes, ptr::null())),
        }
    }

    fn enqueue_kernel(
        &self,
        queue: cl_command_queue,
        kernel: cl_kernel,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ApiResult<cl_event> {
        let mut event: cl_event = ptr::null_mut();
        let local_ptr = local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        cl_check!(clEnqueueNDRangeKernel(
            queue,
            kernel,
            2,
            ptr::null(),
            global.as_ptr(),
            local_ptr,
            0,
            ptr::null(),
            &mut event
        ))?;
        Ok(event)
    }

    fn finish(&self, queue: cl_command_queue) -> ApiResult<()> {
        cl_check!(clFinish(queue))
    }

    fn wait_for_event(&self, event: cl_event) -> ApiResult<()> {
        cl_check!(clWaitForEvents(1, &event))
    }

    fn event_timestamps(&self, event: cl_event) -> ApiResult<Timestamps> {
        Ok(Timestamps {
            start: event_counter(event, CL_PROFILING_COMMAND_START)?,
            end: event_counter(event, CL_PROFILING_COMMAND_END)?,
        })
    }

    fn release_event(&self, event: cl_event) -> ApiResult<()> {
        cl_check!(clReleaseEvent(event))
    }

    fn release_kernel(&self, kernel: cl_kernel) -> ApiResult<()> {
        cl_check!(clReleaseKernel(kernel))
    }

    fn release_program(&self, program: cl_program) -> ApiResult<()> {
        cl_check!(clReleaseProgram(program))
    }

    fn release_mem(&self, mem: cl_mem) -> ApiResult<()> {
        cl_check!(clReleaseMemObject(mem))
    }

    fn release_queue(&self, queue: cl_command_queue) -> ApiResult<()> {
        cl_check!(clReleaseCommandQueue(queue))
    }

    fn release_context(&self, context: cl_context) -> ApiResult<()> {
        cl_check!(clReleaseContext(context))
    }
}
