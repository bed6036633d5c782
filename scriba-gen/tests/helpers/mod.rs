//! Test helpers: scripted model and session fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use scriba_common::config::{Operation, SizeMetricKind};
use scriba_common::ScribaConfig;
use scriba_gen::model::{GenerativeModel, ModelError, ModelRequest};
use scriba_gen::{RawSource, Session, TranscriptSegment};
use std::sync::{Arc, Mutex};

type Handler = dyn Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync;

/// In-memory model answering through a closure and recording every request
pub struct ScriptedModel {
    handler: Box<Handler>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(
        handler: impl Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Writer answers `\section{Part i}`, editor and tutor echo fixed text
    pub fn well_behaved() -> Arc<Self> {
        Self::new(|request| match request.operation {
            Operation::Writer => Ok(format!("\\section{{Part {}}}\nBody.", part_number(request))),
            Operation::Editor => Ok("\\section{Edited}\nBetter body.".to_string()),
            Operation::Tutor => Ok("Because of the theorem.".to_string()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 1-based part number from a writer request's "=== PART i of N ===" header
pub fn part_number(request: &ModelRequest) -> usize {
    let text = request.text();
    text.split("=== PART ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Fast configuration: no real waiting, two evidence items per unit
pub fn test_config() -> ScribaConfig {
    let mut config = ScribaConfig::default();
    config.llm.rpm = 60_000;
    config.llm.max_attempts = 3;
    config.llm.initial_backoff_ms = 1;
    config.llm.max_backoff_ms = 2;
    config.planner.size_metric = SizeMetricKind::Items;
    config.planner.unit_budget = 2;
    config.planner.max_unit_duration_sec = None;
    config
}

pub fn session(model: Arc<ScriptedModel>) -> Session {
    Session::new(test_config(), model)
}

/// Transcript with `n` ten-second segments
pub fn lecture(n: usize) -> Vec<RawSource> {
    let segments = (0..n)
        .map(|i| {
            let start = i as f64 * 10.0;
            TranscriptSegment::new(start, start + 9.0, format!("sentence number {}", i))
        })
        .collect();
    vec![RawSource::transcript("audio", segments)]
}
