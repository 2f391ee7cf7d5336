//! Executor test double.
//!
//! Counts every call the engine makes and can be told to keep producing output
//! for one request, to run finite scripted generations, or to fail. Adds and
//! stops can be made to suspend, and scripted work can be pinned to one stage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::executor::{EngineRequest, ExecutorAdapter, StepOutput};

#[derive(Default)]
pub(crate) struct MockExecutor {
    pub step_calls: AtomicUsize,
    pub add_request_calls: AtomicUsize,
    pub abort_request_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    steps_by_stage: Mutex<HashMap<usize, usize>>,
    /// Request that gets one non-terminal output per step
    generating: Mutex<Option<String>>,
    /// Chunks each newly added request produces before finishing; 0 disables
    script_len: usize,
    scripted: Mutex<BTreeMap<String, usize>>,
    next_step_failure: Mutex<Option<ExecutorError>>,
    panic_next_step: AtomicBool,
    failing_adds: Mutex<HashSet<String>>,
    add_delay: Duration,
    stop_delay: Duration,
    /// Stage that runs scripted requests; any stage when unset
    placement: Option<usize>,
    aborted: Mutex<Vec<String>>,
    model_config: String,
    tokenizer: String,
    decoding_config: String,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            model_config: "mock-model".to_string(),
            tokenizer: "mock-tokenizer".to_string(),
            decoding_config: "greedy".to_string(),
            ..Default::default()
        }
    }

    /// Every added request emits `len` chunks, the last one terminal.
    pub fn scripted(len: usize) -> Self {
        Self {
            script_len: len,
            ..Self::new()
        }
    }

    /// `add_request` sleeps this long before admitting the request.
    pub fn with_add_delay(self, add_delay: Duration) -> Self {
        Self { add_delay, ..self }
    }

    pub fn with_stop_delay(self, stop_delay: Duration) -> Self {
        Self { stop_delay, ..self }
    }

    /// Only `virtual_engine` reports and steps scripted requests.
    pub fn placed_on(self, virtual_engine: usize) -> Self {
        Self {
            placement: Some(virtual_engine),
            ..self
        }
    }

    fn owns(&self, virtual_engine: usize) -> bool {
        self.placement.is_none_or(|stage| stage == virtual_engine)
    }

    pub fn generate(&self, request_id: &str) {
        *self.generating.lock().unwrap() = Some(request_id.to_string());
    }

    pub fn stop_generating(&self) {
        *self.generating.lock().unwrap() = None;
    }

    pub fn fail_next_step(&self, error: ExecutorError) {
        *self.next_step_failure.lock().unwrap() = Some(error);
    }

    pub fn panic_next_step(&self) {
        self.panic_next_step.store(true, Ordering::SeqCst);
    }

    pub fn fail_add(&self, request_id: &str) {
        self.failing_adds.lock().unwrap().insert(request_id.to_string());
    }

    pub fn steps(&self) -> usize {
        self.step_calls.load(Ordering::SeqCst)
    }

    pub fn adds(&self) -> usize {
        self.add_request_calls.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.abort_request_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn steps_for_stage(&self, virtual_engine: usize) -> usize {
        self.steps_by_stage
            .lock()
            .unwrap()
            .get(&virtual_engine)
            .copied()
            .unwrap_or(0)
    }

    pub fn aborted_ids(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutorAdapter for MockExecutor {
    type Prompt = String;
    type Params = ();
    type Chunk = usize;
    type ModelConfig = String;
    type Tokenizer = String;
    type DecodingConfig = String;

    fn has_unfinished_requests(&self, virtual_engine: usize) -> bool {
        self.generating.lock().unwrap().is_some()
            || (self.owns(virtual_engine) && !self.scripted.lock().unwrap().is_empty())
    }

    async fn step(&self, virtual_engine: usize) -> Result<Vec<StepOutput<usize>>, ExecutorError> {
        let step = self.step_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .steps_by_stage
            .lock()
            .unwrap()
            .entry(virtual_engine)
            .or_default() += 1;

        if self.panic_next_step.swap(false, Ordering::SeqCst) {
            panic!("mock step panicked");
        }
        if let Some(error) = self.next_step_failure.lock().unwrap().take() {
            return Err(error);
        }

        let mut outputs = vec![];
        if let Some(request_id) = self.generating.lock().unwrap().clone() {
            outputs.push(StepOutput::new(request_id, step, false));
        }

        if !self.owns(virtual_engine) {
            return Ok(outputs);
        }
        let mut scripted = self.scripted.lock().unwrap();
        for (request_id, remaining) in scripted.iter_mut() {
            *remaining -= 1;
            outputs.push(StepOutput::new(request_id.clone(), *remaining, *remaining == 0));
        }
        scripted.retain(|_, remaining| *remaining > 0);

        Ok(outputs)
    }

    async fn add_request(&self, request: EngineRequest<String, ()>) -> Result<(), ExecutorError> {
        self.add_request_calls.fetch_add(1, Ordering::SeqCst);
        if !self.add_delay.is_zero() {
            tokio::time::sleep(self.add_delay).await;
        }
        if self.failing_adds.lock().unwrap().contains(&request.request_id) {
            return Err(ExecutorError::new("rejected").for_requests([request.request_id]));
        }
        if self.script_len > 0 {
            self.scripted
                .lock()
                .unwrap()
                .insert(request.request_id, self.script_len);
        }
        Ok(())
    }

    fn abort_request(&self, request_id: &str) {
        self.abort_request_calls.fetch_add(1, Ordering::SeqCst);
        self.aborted.lock().unwrap().push(request_id.to_string());
        let mut generating = self.generating.lock().unwrap();
        if generating.as_deref() == Some(request_id) {
            *generating = None;
        }
        self.scripted.lock().unwrap().remove(request_id);
    }

    async fn stop_remote_execution(&self, _virtual_engine: usize) -> Result<(), ExecutorError> {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn model_config(&self) -> &String {
        &self.model_config
    }

    fn tokenizer(&self) -> &String {
        &self.tokenizer
    }

    fn decoding_config(&self) -> &String {
        &self.decoding_config
    }
}
