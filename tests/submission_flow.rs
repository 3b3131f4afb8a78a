//! Submission flow integration tests
//!
//! Drives `submit-job` and `run-test` end to end against the in-process
//! scheduler, event feed and storage host.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use lava_ctl::artifact::ArtifactStore;
use lava_ctl::config::SchedulerSettings;
use lava_ctl::document::{paths, JobDocument, JobDocumentBuilder};
use lava_ctl::host::{SchedulerClient, SubmissionOutcome};
use lava_ctl::mock::{FailureConfig, MemoryRemote, MockScheduler};
use lava_ctl::monitor::{WaitOutcome, WaitPolicy};
use lava_ctl::pipeline::{run_test, submit_job, PipelineError, RunTestOptions};
use lava_ctl::timeout::TimeoutConfig;
use lava_ctl::ExitCode;
use lava_protocol::{methods, CorrelationId, JobStatus};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

const CORE_METADATA: &str = "\
device: qemux86-64
kernel: file:///data/lava-ftp/core/bzImage
rootfs: file:///data/lava-ftp/core/rootfs.ext4.gz
compressed: true
";

fn settings(job_seconds: u64) -> SchedulerSettings {
    SchedulerSettings {
        host: "lava.local".to_string(),
        port: 80,
        user: "ci".to_string(),
        token: "secret".to_string(),
        publisher_port: 5500,
        timeouts: TimeoutConfig::from_config(Some(job_seconds), Some(1)),
    }
}

fn client_with_timeout(scheduler: &MockScheduler, job_seconds: u64) -> SchedulerClient {
    SchedulerClient::with_transport(
        settings(job_seconds),
        Arc::new(scheduler.clone()),
        Arc::new(scheduler.feed()),
    )
    .unwrap()
}

fn client(scheduler: &MockScheduler) -> SchedulerClient {
    client_with_timeout(scheduler, 30)
}

fn catalog() -> MemoryRemote {
    let remote = MemoryRemote::new();
    remote.insert_file("core/img-meta.yaml", CORE_METADATA.as_bytes());
    remote
}

fn store_for(remote: &MemoryRemote) -> impl FnOnce() -> Result<ArtifactStore<MemoryRemote>, PipelineError> + '_ {
    move || {
        Ok(ArtifactStore::new(
            remote.clone(),
            "http://lava.local:80/lava-files",
            "/data/lava-ftp",
        ))
    }
}

fn write_suite(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("suite.yaml");
    fs::write(&path, text).unwrap();
    path
}

const SMOKE_SUITE: &str = "\
image: core
tests:
  - from: git
    repository: https://git.example.com/tests.git
    name: smoke.yaml
";

// =============================================================================
// run-test
// =============================================================================

#[test]
fn test_run_test_passes_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new().with_next_id(500);
    let remote = catalog();

    let options = RunTestOptions::new(write_suite(&dir, SMOKE_SUITE));
    let submission = run_test(
        &client(&scheduler),
        &JobDocumentBuilder::new(),
        &options,
        store_for(&remote),
    )
    .unwrap();

    assert!(submission.succeeded());
    assert_eq!(submission.exit_code(), ExitCode::Success);
    assert_eq!(submission.correlation_ids(), vec![CorrelationId::new(500)]);
    match &submission.outcome {
        SubmissionOutcome::Passed { summary, .. } => assert_eq!(summary.passed, 1),
        other => panic!("expected a pass, got {:?}", other),
    }

    // Validate before submit, then one results fetch per job
    let calls = scheduler.calls();
    let validate = calls.iter().position(|c| c == methods::VALIDATE).unwrap();
    let submit = calls.iter().position(|c| c == methods::SUBMIT_JOB).unwrap();
    assert!(validate < submit);
    assert_eq!(calls.iter().filter(|c| *c == methods::RESULTS_YAML).count(), 1);

    let submitted = JobDocument::parse(&scheduler.submitted()[0]).unwrap();
    assert_eq!(submitted.get(paths::DEVICE).unwrap().as_str(), Some("qemux86-64"));
    assert_eq!(
        submitted.get(paths::ROOTFS_URL).unwrap().as_str(),
        Some("file:///data/lava-ftp/core/rootfs.ext4.gz")
    );
    assert_eq!(
        submitted.get(paths::ROOTFS_COMPRESSION).unwrap().as_str(),
        Some("gz")
    );
}

#[test]
fn test_cli_image_overrides_suite() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new();
    let remote = catalog();
    remote.insert_file(
        "iot/img-meta.yaml",
        b"device: iot2000\nimage: file:///data/lava-ftp/iot/disk.wic.gz\npatch: file:///data/lava-ftp/iot/patch.sh\ncompressed: true\n",
    );

    let mut options = RunTestOptions::new(write_suite(&dir, SMOKE_SUITE));
    options.image = Some("iot".to_string());
    run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote)).unwrap();

    let submitted = JobDocument::parse(&scheduler.submitted()[0]).unwrap();
    assert_eq!(submitted.get(paths::DEVICE_TYPE).unwrap().as_str(), Some("iot2000"));
}

#[test]
fn test_inline_image_never_contacts_storage() {
    let dir = tempfile::tempdir().unwrap();
    let suite = "\
image:
  device: qemux86
  kernel: http://mirror/bzImage
  rootfs: http://mirror/rootfs.ext4
tests:
  - from: inline
    name: uname
    steps: [\"uname -a\"]
";
    let scheduler = MockScheduler::new();
    let options = RunTestOptions::new(write_suite(&dir, suite)).with_wait(false);

    let submission = run_test(
        &client(&scheduler),
        &JobDocumentBuilder::new(),
        &options,
        || -> Result<ArtifactStore<MemoryRemote>, PipelineError> {
            panic!("storage host contacted for an inline image")
        },
    )
    .unwrap();

    assert_eq!(submission.outcome, SubmissionOutcome::Accepted);
    let submitted = JobDocument::parse(&scheduler.submitted()[0]).unwrap();
    assert!(submitted.get(paths::ROOTFS_COMPRESSION).is_err());
}

#[test]
fn test_default_image_is_last_resort() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new();
    let remote = catalog();
    let suite = "tests:\n  - from: inline\n    name: uname\n    steps: [\"uname -a\"]\n";

    let mut options = RunTestOptions::new(write_suite(&dir, suite));
    let err = run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote))
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoImage));
    assert_eq!(err.exit_code(), 60);

    options.default_image = Some("core".to_string());
    let submission =
        run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote)).unwrap();
    assert!(submission.succeeded());
}

#[test]
fn test_unknown_catalog_image_is_storage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new();
    let remote = MemoryRemote::new();

    let options = RunTestOptions::new(write_suite(&dir, SMOKE_SUITE));
    let err = run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote))
        .unwrap_err();
    assert_eq!(err.exit_code(), 70);
    assert!(scheduler.submitted().is_empty());
}

#[test]
fn test_rejected_document_is_not_submitted() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new();
    scheduler.reject_documents(true);
    let remote = catalog();

    let options = RunTestOptions::new(write_suite(&dir, SMOKE_SUITE));
    let err = run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Rejected));
    assert!(scheduler.submitted().is_empty());
}

#[test]
fn test_failing_test_exits_job_failed() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new();
    scheduler.set_results(
        "- {suite: 0_smoke, name: boot, result: pass}\n- {suite: 0_smoke, name: network, result: fail}\n",
    );
    let remote = catalog();

    let options = RunTestOptions::new(write_suite(&dir, SMOKE_SUITE));
    let submission =
        run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote)).unwrap();

    match &submission.outcome {
        SubmissionOutcome::TestsFailed { summary, .. } => {
            assert_eq!(summary.passed, 1);
            assert_eq!(summary.failed, 1);
        }
        other => panic!("expected failed tests, got {:?}", other),
    }
    assert_eq!(submission.exit_code(), ExitCode::JobFailed);
}

// =============================================================================
// Multi-node
// =============================================================================

const MULTINODE_SUITE: &str = "\
image: core
tests:
  - from: inline
    name: serve
    steps: [\"iperf3 -s -D\"]
    roles: server
  - from: inline
    name: measure
    steps: [\"iperf3 -c server\"]
    roles: [client]
";

#[test]
fn test_multinode_waits_for_every_sub_job() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new().with_next_id(70);
    scheduler.set_job_results(71, "- {suite: 1_measure, name: bandwidth, result: pass}\n");
    let remote = catalog();

    let options = RunTestOptions::new(write_suite(&dir, MULTINODE_SUITE));
    let submission =
        run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote)).unwrap();

    assert_eq!(submission.ids.len(), 2);
    assert_eq!(submission.ids[0].as_str(), "70.0");
    assert_eq!(
        submission.correlation_ids(),
        vec![CorrelationId::new(70), CorrelationId::new(71)]
    );
    match &submission.outcome {
        SubmissionOutcome::Passed { results, .. } => {
            assert_eq!(results.len(), 2);
            assert!(results.iter().any(|r| r.name == "bandwidth"));
        }
        other => panic!("expected a pass, got {:?}", other),
    }
}

#[test]
fn test_multinode_sub_job_failure_fails_submission() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new().with_next_id(70);
    scheduler.set_sub_job_script(1, vec![JobStatus::Running, JobStatus::Incomplete]);
    let remote = catalog();

    let options = RunTestOptions::new(write_suite(&dir, MULTINODE_SUITE));
    let submission =
        run_test(&client(&scheduler), &JobDocumentBuilder::new(), &options, store_for(&remote)).unwrap();

    match &submission.outcome {
        SubmissionOutcome::JobsFailed(WaitOutcome::JobFailed { failed, pending }) => {
            assert_eq!(failed, &vec![(CorrelationId::new(71), JobStatus::Incomplete)]);
            assert!(pending.is_empty());
        }
        other => panic!("expected a failed job, got {:?}", other),
    }
    assert_eq!(submission.exit_code(), ExitCode::JobFailed);
    assert!(!scheduler.calls().iter().any(|c| c == methods::RESULTS_YAML));
}

// =============================================================================
// submit-job
// =============================================================================

#[test]
fn test_submit_job_file_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.yaml");
    fs::write(
        &path,
        "device_type: qemu\njob_name: hand written\nactions:\n  - deploy: {to: tmpfs}\n",
    )
    .unwrap();

    let scheduler = MockScheduler::new().with_next_id(9);
    let submission = submit_job(&client(&scheduler), &path, true).unwrap();
    assert!(submission.succeeded());

    let sent = JobDocument::parse(&scheduler.submitted()[0]).unwrap();
    assert_eq!(sent.get(paths::JOB_NAME).unwrap().as_str(), Some("hand written"));
}

#[test]
fn test_submit_job_missing_file() {
    let scheduler = MockScheduler::new();
    let err = submit_job(&client(&scheduler), std::path::Path::new("/nonexistent/job.yaml"), true)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Read { .. }));
    assert!(scheduler.submitted().is_empty());
}

#[test]
fn test_job_that_never_finishes_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.yaml");
    fs::write(&path, "device_type: qemu\n").unwrap();

    let scheduler = MockScheduler::new().with_next_id(3);
    scheduler.set_script(vec![JobStatus::Submitted, JobStatus::Running]);

    let submission = submit_job(&client_with_timeout(&scheduler, 1), &path, true).unwrap();
    match &submission.outcome {
        SubmissionOutcome::TimedOut(WaitOutcome::TimedOut { pending }) => {
            assert_eq!(pending, &vec![CorrelationId::new(3)]);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert_eq!(submission.exit_code(), ExitCode::Timeout);
}

#[test]
fn test_submission_fault_is_submission_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.yaml");
    fs::write(&path, "device_type: qemu\n").unwrap();

    let scheduler = MockScheduler::new();
    scheduler.fail(methods::SUBMIT_JOB, FailureConfig::fault(-32000, "no devices available"));
    let err = submit_job(&client(&scheduler), &path, true).unwrap_err();
    assert_eq!(err.exit_code(), 30);
}

#[test]
fn test_fail_fast_policy_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = MockScheduler::new().with_next_id(70);
    scheduler.set_sub_job_script(0, vec![JobStatus::Canceled]);
    scheduler.set_sub_job_script(1, vec![JobStatus::Running]);
    let remote = catalog();

    let client = client(&scheduler).with_policy(WaitPolicy::FailFast);
    let options = RunTestOptions::new(write_suite(&dir, MULTINODE_SUITE));
    let submission = run_test(&client, &JobDocumentBuilder::new(), &options, store_for(&remote)).unwrap();

    match &submission.outcome {
        SubmissionOutcome::JobsFailed(WaitOutcome::JobFailed { failed, pending }) => {
            assert_eq!(failed, &vec![(CorrelationId::new(70), JobStatus::Canceled)]);
            assert_eq!(pending, &vec![CorrelationId::new(71)]);
        }
        other => panic!("expected a failed job, got {:?}", other),
    }
}
