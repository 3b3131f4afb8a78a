//! In-memory scheduler
//!
//! Answers the XML-RPC methods the client uses and, for every accepted job,
//! publishes a scripted sequence of status events on a [`MockFeed`]. A job
//! document declaring multi-node roles is split into one sub-job per role
//! and answered with dotted ids, the way the real scheduler does.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use lava_protocol::{methods, Fault, JobStatus, MethodResponse, Value};

use super::failure::{FailureConfig, FailureInjector, FailureMode};
use super::feed::MockFeed;
use crate::document::{paths, JobDocument};
use crate::host::{RpcTransport, TransportError};

const DEFAULT_RESULTS: &str = "- {suite: lava, name: job, result: pass}\n";

#[derive(Debug)]
struct SchedulerState {
    version: String,
    next_id: u64,
    statuses: BTreeMap<u64, JobStatus>,
    script: Vec<JobStatus>,
    sub_job_scripts: BTreeMap<usize, Vec<JobStatus>>,
    results: BTreeMap<u64, String>,
    default_results: String,
    reject_documents: bool,
    return_no_id: bool,
    submitted: Vec<String>,
    calls: Vec<String>,
    failures: FailureInjector<String>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            version: "2024.01".to_string(),
            next_id: 1000,
            statuses: BTreeMap::new(),
            script: vec![JobStatus::Submitted, JobStatus::Running, JobStatus::Complete],
            sub_job_scripts: BTreeMap::new(),
            results: BTreeMap::new(),
            default_results: DEFAULT_RESULTS.to_string(),
            reject_documents: false,
            return_no_id: false,
            submitted: Vec::new(),
            calls: Vec::new(),
            failures: FailureInjector::new(),
        }
    }
}

/// Scheduler fake; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockScheduler {
    state: Arc<Mutex<SchedulerState>>,
    feed: MockFeed,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the scheduler publishes job events on
    pub fn feed(&self) -> MockFeed {
        self.feed.clone()
    }

    /// Id the next accepted job gets
    pub fn with_next_id(self, id: u64) -> Self {
        self.state.lock().unwrap().next_id = id;
        self
    }

    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.state.lock().unwrap().version = version.into();
        self
    }

    /// Statuses published for every sub-job after submission
    pub fn set_script(&self, statuses: Vec<JobStatus>) {
        self.state.lock().unwrap().script = statuses;
    }

    /// Statuses for the sub-job at `index` (role order) only
    pub fn set_sub_job_script(&self, index: usize, statuses: Vec<JobStatus>) {
        self.state.lock().unwrap().sub_job_scripts.insert(index, statuses);
    }

    /// Results report returned for every job without its own
    pub fn set_results(&self, yaml: impl Into<String>) {
        self.state.lock().unwrap().default_results = yaml.into();
    }

    pub fn set_job_results(&self, job: u64, yaml: impl Into<String>) {
        self.state.lock().unwrap().results.insert(job, yaml.into());
    }

    pub fn set_status(&self, job: u64, status: JobStatus) {
        self.state.lock().unwrap().statuses.insert(job, status);
    }

    /// Answer validation with a fault
    pub fn reject_documents(&self, reject: bool) {
        self.state.lock().unwrap().reject_documents = reject;
    }

    /// Accept submissions without returning an id
    pub fn return_no_id(&self, empty: bool) {
        self.state.lock().unwrap().return_no_id = empty;
    }

    /// Inject a failure for a method name
    pub fn fail(&self, method: &str, config: FailureConfig) {
        self.state.lock().unwrap().failures.inject(method.to_string(), config);
    }

    /// Method names called so far
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Documents passed to submit
    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    fn submit(&self, state: &mut SchedulerState, text: &str) -> Result<Value, Fault> {
        state.submitted.push(text.to_string());
        if state.return_no_id {
            return Ok(Value::Int(0));
        }

        let document = JobDocument::parse(text).map_err(|e| fault(-32602, e.to_string()))?;
        let roles = document
            .get(paths::MULTINODE_ROLES)
            .ok()
            .and_then(|roles| roles.as_mapping())
            .map(|roles| roles.len())
            .unwrap_or(0);

        let base = state.next_id;
        let response = if roles == 0 {
            state.next_id += 1;
            Value::Int(base as i64)
        } else {
            state.next_id += roles as u64;
            Value::Array(
                (0..roles)
                    .map(|k| Value::String(format!("{}.{}", base, k)))
                    .collect(),
            )
        };

        for index in 0..roles.max(1) {
            let job = base + index as u64;
            let script = state
                .sub_job_scripts
                .get(&index)
                .unwrap_or(&state.script)
                .clone();
            if let Some(last) = script.last() {
                state.statuses.insert(job, *last);
            } else {
                state.statuses.insert(job, JobStatus::Submitted);
            }
            for status in script {
                self.feed.publish_event(job, status);
            }
        }
        Ok(response)
    }

    fn dispatch(&self, method: &str, params: &[Value]) -> Result<Value, Fault> {
        let mut state = self.state.lock().unwrap();
        match method {
            methods::SYSTEM_VERSION => Ok(Value::String(state.version.clone())),
            methods::VALIDATE => {
                let text = string_param(params)?;
                if state.reject_documents || JobDocument::parse(text).is_err() {
                    Err(fault(-32602, "job definition is invalid"))
                } else {
                    Ok(Value::Struct(BTreeMap::new()))
                }
            }
            methods::SUBMIT_JOB => {
                let text = string_param(params)?;
                self.submit(&mut state, text)
            }
            methods::JOB_STATUS => {
                let job = job_param(params)?;
                let status = state
                    .statuses
                    .get(&job)
                    .ok_or_else(|| fault(404, format!("Job '{}' was not found.", job)))?;
                let mut reply = BTreeMap::new();
                reply.insert("job_status".to_string(), Value::String(status.as_str().to_string()));
                Ok(Value::Struct(reply))
            }
            methods::RESULTS_YAML => {
                let job = job_param(params)?;
                if !state.statuses.contains_key(&job) {
                    return Err(fault(404, format!("Job '{}' was not found.", job)));
                }
                let report = state
                    .results
                    .get(&job)
                    .unwrap_or(&state.default_results)
                    .clone();
                Ok(Value::String(report))
            }
            other => Err(fault(-32601, format!("method \"{}\" is not supported", other))),
        }
    }
}

impl RpcTransport for MockScheduler {
    fn call(&self, method: &str, params: &[Value]) -> Result<MethodResponse, TransportError> {
        let injected = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(method.to_string());
            state.failures.check(&method.to_string())
        };
        match injected {
            Some(FailureMode::Disconnect(message)) => {
                return Err(TransportError::Connection {
                    url: "mock://scheduler/RPC2".to_string(),
                    message,
                })
            }
            Some(FailureMode::Fault { code, message }) => {
                return Ok(MethodResponse::Fault(Fault { code, message }))
            }
            None => {}
        }

        Ok(match self.dispatch(method, params) {
            Ok(value) => MethodResponse::Success(value),
            Err(f) => MethodResponse::Fault(f),
        })
    }
}

fn fault(code: i64, message: impl Into<String>) -> Fault {
    Fault {
        code,
        message: message.into(),
    }
}

fn string_param(params: &[Value]) -> Result<&str, Fault> {
    params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| fault(-32602, "expected a string parameter"))
}

fn job_param(params: &[Value]) -> Result<u64, Fault> {
    match params.first() {
        Some(Value::Int(id)) if *id > 0 => Ok(*id as u64),
        Some(Value::String(id)) => id
            .parse::<lava_protocol::CorrelationId>()
            .map(|id| id.get())
            .map_err(|e| fault(-32602, e.to_string())),
        _ => Err(fault(-32602, "expected a job id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(scheduler: &MockScheduler, method: &str, params: Vec<Value>) -> MethodResponse {
        scheduler.call(method, &params).unwrap()
    }

    #[test]
    fn test_single_submit_publishes_script() {
        let scheduler = MockScheduler::new().with_next_id(42);
        let feed = scheduler.feed();
        let mut sub = crate::monitor::FeedConnector::subscribe(&feed, "e").unwrap();

        let reply = call(&scheduler, methods::SUBMIT_JOB, vec!["device_type: qemu\n".into()]);
        assert_eq!(reply, MethodResponse::Success(Value::Int(42)));

        let mut seen = 0;
        while sub.next_message(std::time::Duration::ZERO).unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_multinode_submit_returns_dotted_ids() {
        let scheduler = MockScheduler::new().with_next_id(10);
        let doc = "protocols:\n  lava-multinode:\n    roles:\n      client: {count: 1}\n      server: {count: 1}\n";
        let reply = call(&scheduler, methods::SUBMIT_JOB, vec![doc.into()]);
        assert_eq!(
            reply,
            MethodResponse::Success(Value::Array(vec!["10.0".into(), "10.1".into()]))
        );

        let status = call(&scheduler, methods::JOB_STATUS, vec!["11".into()]);
        match status {
            MethodResponse::Success(v) => assert_eq!(v.get("job_status").and_then(Value::as_str), Some("Complete")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_job_is_fault() {
        let scheduler = MockScheduler::new();
        assert!(matches!(
            call(&scheduler, methods::RESULTS_YAML, vec!["77".into()]),
            MethodResponse::Fault(Fault { code: 404, .. })
        ));
    }

    #[test]
    fn test_injected_disconnect() {
        let scheduler = MockScheduler::new();
        scheduler.fail(methods::SYSTEM_VERSION, FailureConfig::disconnect("refused"));
        assert!(scheduler.call(methods::SYSTEM_VERSION, &[]).is_err());
        assert_eq!(scheduler.calls(), vec![methods::SYSTEM_VERSION.to_string()]);
    }
}
