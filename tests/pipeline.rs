use approx::assert_relative_eq;
use opencl_dispatch::compute::{DeviceClass, HostDevice};
use opencl_dispatch::matrix::{
    compare_results, cpu_matrix_multiply, initialize_matrices, Matrix, MatrixType, MULTIPLY_MATRIX_KERNEL,
};
use opencl_dispatch::ops::{self, Operation};
use opencl_dispatch::pipeline::PipelineState;
use opencl_dispatch::{PipelineConfig, PipelineError, Stage};

fn tiled(rows: usize, cols: usize) -> PipelineConfig {
    PipelineConfig::builder().tile(rows, cols).build().unwrap()
}

#[test]
fn multiply_matches_cpu_reference() {
    let shapes = [(1, 1, 1), (3, 5, 2), (16, 16, 16), (20, 7, 30), (64, 33, 48)];
    for (m, k, n) in shapes {
        let device = HostDevice::new();
        let (a, b) = initialize_matrices(MatrixType::Random, m, k, n).unwrap();
        let output = ops::multiply(&device, &PipelineConfig::default(), &a, &b).unwrap();
        let reference = cpu_matrix_multiply(&a, &b).unwrap();

        assert_eq!(output.result.shape(), (m, n));
        let cmp = compare_results(&output.result, &reference, 1e-4);
        assert!(cmp.matches(), "{}x{}x{}: {} elements differ", m, k, n, cmp.diff_count);
        assert!(device.ledger().is_balanced());
    }
}

#[test]
fn tiled_dispatch_equals_untiled() {
    let device = HostDevice::new();
    let (a, b) = initialize_matrices(MatrixType::Random, 32, 24, 48).unwrap();

    let untiled = ops::multiply(&device, &PipelineConfig::default(), &a, &b).unwrap();
    for (tr, tc) in [(1, 1), (8, 8), (16, 16), (4, 12), (32, 8)] {
        let output = ops::multiply(&device, &tiled(tr, tc), &a, &b).unwrap();
        assert_eq!(output.result, untiled.result, "tile {}x{}", tr, tc);
        assert_eq!(output.dispatch.local(), Some([tr, tc]));
    }
    assert!(device.ledger().is_balanced());
}

#[test]
fn ones_times_twos_is_two_hundred() {
    let device = HostDevice::new();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 100, 100, 100).unwrap();
    let output = ops::multiply(&device, &tiled(10, 10), &a, &b).unwrap();

    assert_eq!(output.result.shape(), (100, 100));
    for value in output.result.as_slice() {
        assert_relative_eq!(*value, 200.0);
    }
}

#[test]
fn threes_times_fours_scales_with_inner_dimension() {
    let device = HostDevice::new();
    let (a, b) = initialize_matrices(MatrixType::ThreesAndFours, 8, 5, 4).unwrap();
    let output = ops::multiply(&device, &PipelineConfig::default(), &a, &b).unwrap();
    assert!(output.result.as_slice().iter().all(|v| *v == 60.0));
}

#[test]
fn non_dividing_tile_fails_dispatch_without_result() {
    let device = HostDevice::new();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 100, 100, 100).unwrap();
    let err = ops::multiply(&device, &tiled(16, 16), &a, &b).unwrap_err();

    assert!(matches!(err, PipelineError::DispatchFailed { .. }));
    assert_eq!(err.stage(), Stage::Dispatch);
    assert!(device.ledger().is_balanced());
}

#[test]
fn oversized_work_group_fails_dispatch() {
    let device = HostDevice::builder().max_work_group_size(64).cpu("small").build();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 32, 32, 32).unwrap();
    let err = ops::multiply(&device, &tiled(16, 16), &a, &b).unwrap_err();
    assert!(matches!(err, PipelineError::DispatchFailed { .. }));
    assert!(device.ledger().is_balanced());
}

#[test]
fn malformed_source_returns_build_log_and_leaks_nothing() {
    let device = HostDevice::new();
    let source = "__kernel void multiply_matrix(const int rowsA, const int colsA, const int colsB,\n\
                  __global const float* A, __global const float* B, __global float* C) {\n\
                  C[0] = A[0] * B[0];\n";
    let config = PipelineConfig::builder().kernel_source(source).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();

    let log = err.build_log().expect("build failure carries a log");
    assert!(!log.trim().is_empty());
    assert!(log.contains("error"));
    assert_eq!(err.stage(), Stage::Build);

    let ledger = device.ledger();
    assert!(ledger.live().is_empty());
    assert!(ledger.invalid_releases().is_empty());
}

#[test]
fn host_device_refuses_kernels_it_cannot_execute() {
    let device = HostDevice::new();
    let zeroing = MULTIPLY_MATRIX_KERNEL.replace("C[row * colsB + col] = sum;", "C[row * colsB + col] = 0.0f;");
    let config = PipelineConfig::builder().kernel_source(zeroing).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();

    assert!(matches!(err, PipelineError::BuildFailed { .. }));
    assert!(err.build_log().unwrap().contains("host device executes only built-in kernels"));
    assert!(device.ledger().is_balanced());
}

#[test]
fn reformatted_builtin_source_still_runs() {
    let device = HostDevice::new();
    let source = format!("// local copy\n{}", MULTIPLY_MATRIX_KERNEL.replace("    ", "\t"));
    let config = PipelineConfig::builder().kernel_source(source).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let output = ops::multiply(&device, &config, &a, &b).unwrap();
    assert!(output.result.as_slice().iter().all(|v| *v == 8.0));
}

#[test]
fn missing_entry_point_is_reported() {
    let device = HostDevice::new();
    let config = PipelineConfig::builder()
        .kernel_source(opencl_dispatch::matrix::ADD_MATRIX_KERNEL)
        .build()
        .unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();
    assert!(matches!(err, PipelineError::EntryPointNotFound { ref name, .. } if name == "multiply_matrix"));
    assert!(device.ledger().is_balanced());
}

#[test]
fn identity_round_trip_returns_input() {
    let device = HostDevice::new();
    let m = Matrix::random(13, 29).unwrap();
    let output = ops::copy(&device, &PipelineConfig::default(), &m).unwrap();
    assert_eq!(output.result, m);
}

#[test]
fn add_uses_same_pipeline() {
    let device = HostDevice::new();
    let a = Matrix::filled(6, 10, 1.5).unwrap();
    let b = Matrix::filled(6, 10, 2.5).unwrap();
    let output = Operation::Add.run(&device, &tiled(3, 5), &a, &b).unwrap();
    assert!(output.result.as_slice().iter().all(|v| *v == 4.0));
}

#[test]
fn gpu_request_without_gpu_is_no_device_found() {
    let device = HostDevice::builder().cpu("only cpu").build();
    let config = PipelineConfig::builder().device_class(DeviceClass::Gpu).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();

    assert!(matches!(err, PipelineError::NoDeviceFound { class: DeviceClass::Gpu }));
    assert_eq!(err.stage(), Stage::Discovery);
    assert!(device.ledger().created().is_empty());
}

#[test]
fn gpu_is_selected_when_present() {
    let device = HostDevice::builder().cpu("cpu0").gpu("gpu0").build();
    let config = PipelineConfig::builder().device_class(DeviceClass::Gpu).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let output = ops::multiply(&device, &config, &a, &b).unwrap();
    assert_eq!(output.device.device.name, "gpu0");
    assert_eq!(output.device.platform.name, "Host OpenCL Emulation");
}

#[test]
fn no_platform_is_reported() {
    let device = HostDevice::builder().without_platform().build();
    let m = Matrix::zeros(2, 2).unwrap();
    let err = ops::copy(&device, &PipelineConfig::default(), &m).unwrap_err();
    assert!(matches!(err, PipelineError::NoPlatformFound));
}

#[test]
fn timing_is_reported_in_milliseconds() {
    let device = HostDevice::new();
    let (a, b) = initialize_matrices(MatrixType::Random, 16, 16, 16).unwrap();
    let output = ops::multiply(&device, &PipelineConfig::default(), &a, &b).unwrap();

    assert!(output.timing.end_ns >= output.timing.start_ns);
    assert_relative_eq!(
        output.elapsed_ms(),
        (output.timing.end_ns - output.timing.start_ns) as f64 / 1e6
    );
    assert_eq!(output.states.first(), Some(&PipelineState::Idle));
    assert_eq!(output.states.last(), Some(&PipelineState::Released));
}

#[test]
fn host_runs_are_flagged_as_emulated() {
    let device = HostDevice::new();
    let m = Matrix::filled(2, 2, 1.0).unwrap();
    let output = ops::copy(&device, &PipelineConfig::default(), &m).unwrap();
    assert!(output.emulated);
    assert!(output.report("copy").emulated);
}

#[test]
fn unknown_build_option_fails_build() {
    let device = HostDevice::new();
    let config = PipelineConfig::builder().build_options("-cl-fast-relaxed-math --bogus").build().unwrap();
    let m = Matrix::zeros(2, 2).unwrap();
    let err = ops::copy(&device, &config, &m).unwrap_err();
    assert!(err.build_log().unwrap().contains("--bogus"));
    assert!(device.ledger().is_balanced());
}
