//! Drives an `AsyncEngine` with a toy executor that echoes each prompt back
//! one word per step.
//!
//! ```text
//! GRIDDLE_LOG=debug GRIDDLE_PIPELINE_PARALLEL_SIZE=2 cargo run -p echo-engine
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use griddle::{AsyncEngine, EngineConfig, EngineRequest, ExecutorAdapter, ExecutorError, StepOutput};
use uuid::Uuid;

/// Sampling parameters understood by the echo executor.
#[derive(Debug, Clone)]
struct EchoParams {
    /// Stop after this many words
    max_tokens: usize,
}

struct Sequence {
    request_id: String,
    words: VecDeque<String>,
}

/// Echoes prompts word by word. Each stage owns the sequences assigned to it.
struct EchoExecutor {
    stages: Vec<Mutex<Vec<Sequence>>>,
    step_delay: Duration,
    model_name: String,
}

impl EchoExecutor {
    fn new(stages: usize, step_delay: Duration) -> Self {
        Self {
            stages: (0..stages).map(|_| Mutex::new(vec![])).collect(),
            step_delay,
            model_name: "echo".to_string(),
        }
    }

    fn stage(&self, virtual_engine: usize) -> Result<&Mutex<Vec<Sequence>>, ExecutorError> {
        self.stages
            .get(virtual_engine)
            .ok_or_else(|| ExecutorError::new(format!("no stage {}", virtual_engine)))
    }
}

#[async_trait]
impl ExecutorAdapter for EchoExecutor {
    type Prompt = String;
    type Params = EchoParams;
    type Chunk = String;
    type ModelConfig = String;
    type Tokenizer = ();
    type DecodingConfig = ();

    fn has_unfinished_requests(&self, virtual_engine: usize) -> bool {
        self.stage(virtual_engine)
            .map(|s| !s.lock().unwrap().is_empty())
            .unwrap_or(false)
    }

    async fn step(&self, virtual_engine: usize) -> Result<Vec<StepOutput<String>>, ExecutorError> {
        tokio::time::sleep(self.step_delay).await;

        let mut sequences = self.stage(virtual_engine)?.lock().unwrap();
        let mut outputs = vec![];
        for sequence in sequences.iter_mut() {
            if let Some(word) = sequence.words.pop_front() {
                outputs.push(StepOutput::new(
                    sequence.request_id.clone(),
                    word,
                    sequence.words.is_empty(),
                ));
            }
        }
        sequences.retain(|s| !s.words.is_empty());
        Ok(outputs)
    }

    async fn add_request(&self, request: EngineRequest<String, EchoParams>) -> Result<(), ExecutorError> {
        let words: VecDeque<String> = request
            .prompt
            .split_whitespace()
            .take(request.params.max_tokens)
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return Err(ExecutorError::new("empty prompt").for_requests([request.request_id]));
        }

        // Least-loaded stage takes the request
        let stage = self
            .stages
            .iter()
            .min_by_key(|s| s.lock().unwrap().len())
            .ok_or_else(|| ExecutorError::new("no stages configured"))?;
        stage.lock().unwrap().push(Sequence {
            request_id: request.request_id,
            words,
        });
        Ok(())
    }

    fn abort_request(&self, request_id: &str) {
        for stage in &self.stages {
            stage.lock().unwrap().retain(|s| s.request_id != request_id);
        }
    }

    async fn stop_remote_execution(&self, virtual_engine: usize) -> Result<(), ExecutorError> {
        tracing::info!(virtual_engine, "echo stage stopped");
        Ok(())
    }

    fn model_config(&self) -> &String {
        &self.model_name
    }

    fn tokenizer(&self) -> &() {
        &()
    }

    fn decoding_config(&self) -> &() {
        &()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    griddle::logging::init();

    let config = EngineConfig::from_settings()?;
    let executor = EchoExecutor::new(config.pipeline_parallel_size, Duration::from_millis(20));
    let engine = AsyncEngine::new(executor, config);
    engine.start_background_loop()?;
    tracing::info!(model = %engine.model_config(), "engine started");

    let prompts = [
        "the quick brown fox jumps over the lazy dog",
        "batching keeps the accelerator busy",
        "",
        "this one gets cancelled after three words of output",
    ];

    let runs = prompts.iter().enumerate().map(|(i, prompt)| {
        let engine = &engine;
        async move {
            let request_id = Uuid::new_v4().to_string();
            let mut stream = engine.generate(prompt.to_string(), EchoParams { max_tokens: 16 }, request_id.clone())?;
            let mut text = vec![];
            while let Some(output) = stream.next().await {
                match output {
                    Ok(output) => text.push(output.output),
                    Err(err) => {
                        tracing::warn!(request_id = %request_id, error = %err, "request failed");
                        break;
                    }
                }
                // Dropping the stream early aborts the request
                if i == 3 && text.len() == 3 {
                    break;
                }
            }
            Ok::<_, griddle::EngineError>((request_id, text.join(" ")))
        }
    });

    for result in futures::future::join_all(runs).await {
        let (request_id, text) = result?;
        println!("{}: {:?}", request_id, text);
    }

    engine.stop().await;
    Ok(())
}
