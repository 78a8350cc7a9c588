use opencl_dispatch::compute::{Fault, HostDevice, Ledger, ResourceKind};
use opencl_dispatch::error::TransferDirection;
use opencl_dispatch::matrix::{initialize_matrices, MatrixType};
use opencl_dispatch::ops;
use opencl_dispatch::{PipelineConfig, PipelineError, Stage};

/// Все созданное освобождено ровно один раз и в обратном порядке
fn assert_reverse_release(ledger: &Ledger) {
    let mut expected = ledger.created().to_vec();
    expected.reverse();
    assert_eq!(ledger.released(), expected.as_slice());
    assert!(ledger.is_balanced());
}

fn run_multiply(device: &HostDevice) -> Result<(), PipelineError> {
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 8, 8, 8)?;
    ops::multiply(device, &PipelineConfig::default(), &a, &b).map(|_| ())
}

#[test]
fn successful_run_releases_in_reverse_acquisition_order() {
    let device = HostDevice::new();
    run_multiply(&device).unwrap();

    let ledger = device.ledger();
    assert_eq!(
        ledger.released_kinds(),
        vec![
            ResourceKind::Event,
            ResourceKind::Kernel,
            ResourceKind::Program,
            ResourceKind::Mem,
            ResourceKind::Mem,
            ResourceKind::Mem,
            ResourceKind::Queue,
            ResourceKind::Context,
        ]
    );
    assert_reverse_release(&ledger);
}

#[test]
fn repeated_runs_do_not_accumulate_objects() {
    let device = HostDevice::new();
    for _ in 0..5 {
        run_multiply(&device).unwrap();
    }
    let ledger = device.ledger();
    assert_eq!(ledger.count_created(ResourceKind::Context), 5);
    assert!(ledger.is_balanced());
}

#[test]
fn context_failure() {
    let device = HostDevice::builder().fault(Fault::ContextCreation).build();
    let err = run_multiply(&device).unwrap_err();
    assert!(matches!(err, PipelineError::ContextCreationFailed(_)));
    assert_eq!(err.stage(), Stage::Context);
    assert!(device.ledger().created().is_empty());
}

#[test]
fn queue_failure_releases_context() {
    let device = HostDevice::builder().fault(Fault::QueueCreation).build();
    let err = run_multiply(&device).unwrap_err();
    assert!(matches!(err, PipelineError::QueueCreationFailed(_)));

    let ledger = device.ledger();
    assert_eq!(ledger.released_kinds(), vec![ResourceKind::Context]);
    assert_reverse_release(&ledger);
}

#[test]
fn allocation_failure_on_each_buffer() {
    for (after, name) in [(0, "A"), (1, "B"), (2, "C")] {
        let device = HostDevice::builder().fault(Fault::Allocation { after }).build();
        let err = run_multiply(&device).unwrap_err();
        match &err {
            PipelineError::AllocationFailed { name: failed, bytes, .. } => {
                assert_eq!(failed, name);
                assert_eq!(*bytes, 8 * 8 * 4);
            }
            other => panic!("unexpected error: {other}"),
        }

        let ledger = device.ledger();
        assert_eq!(ledger.count_created(ResourceKind::Mem), after);
        assert_reverse_release(&ledger);
    }
}

#[test]
fn staging_write_failure() {
    let device = HostDevice::builder().fault(Fault::Write { after: 1 }).build();
    let err = run_multiply(&device).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::TransferFailed {
            direction: TransferDirection::HostToDevice,
            ref name,
            ..
        } if name == "B"
    ));
    assert_eq!(err.stage(), Stage::Staging);
    assert_reverse_release(&device.ledger());
}

#[test]
fn build_failure_releases_program_and_buffers() {
    let device = HostDevice::new();
    let config = PipelineConfig::builder()
        .kernel_source("__kernel void multiply_matrix(")
        .build()
        .unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();
    assert!(matches!(err, PipelineError::BuildFailed { .. }));

    let ledger = device.ledger();
    assert_eq!(
        ledger.released_kinds(),
        vec![
            ResourceKind::Program,
            ResourceKind::Mem,
            ResourceKind::Mem,
            ResourceKind::Mem,
            ResourceKind::Queue,
            ResourceKind::Context,
        ]
    );
    assert_reverse_release(&ledger);
}

#[test]
fn dispatch_failure_releases_kernel() {
    let device = HostDevice::new();
    let config = PipelineConfig::builder().tile(3, 3).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 8, 8, 8).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();
    assert_eq!(err.stage(), Stage::Dispatch);

    let ledger = device.ledger();
    assert_eq!(ledger.count_created(ResourceKind::Event), 0);
    assert_eq!(ledger.released_kinds().first(), Some(&ResourceKind::Kernel));
    assert_reverse_release(&ledger);
}

#[test]
fn sync_failure_releases_event() {
    let device = HostDevice::builder().fault(Fault::Finish).build();
    let err = run_multiply(&device).unwrap_err();
    assert!(matches!(err, PipelineError::SyncFailed(_)));
    assert_eq!(err.stage(), Stage::Sync);

    let ledger = device.ledger();
    assert_eq!(ledger.released_kinds().first(), Some(&ResourceKind::Event));
    assert_reverse_release(&ledger);
}

#[test]
fn profiling_disabled_fails_after_sync() {
    let device = HostDevice::new();
    let config = PipelineConfig::builder().profiling(false).build().unwrap();
    let (a, b) = initialize_matrices(MatrixType::OnesAndTwos, 4, 4, 4).unwrap();
    let err = ops::multiply(&device, &config, &a, &b).unwrap_err();
    assert!(matches!(err, PipelineError::ProfilingUnavailable(_)));
    assert_eq!(err.stage(), Stage::Profiling);
    assert_reverse_release(&device.ledger());
}

#[test]
fn read_back_failure_is_a_retrieval_error() {
    let device = HostDevice::builder().fault(Fault::Read).build();
    let err = run_multiply(&device).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::TransferFailed {
            direction: TransferDirection::DeviceToHost,
            ..
        }
    ));
    assert_eq!(err.stage(), Stage::Retrieval);
    assert_reverse_release(&device.ledger());
}

#[test]
fn device_memory_limit_is_an_allocation_failure() {
    let device = HostDevice::builder().global_mem_bytes(600).cpu("tiny").build();
    let err = run_multiply(&device).unwrap_err();
    assert!(matches!(err, PipelineError::AllocationFailed { ref name, .. } if name == "C"));
    assert_reverse_release(&device.ledger());
}
