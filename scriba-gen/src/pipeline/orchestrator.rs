// Generation Orchestrator
//
// Concept: Generate the document unit by unit with failure isolation
// Synchronization: Reads plan and evidence from the session cache, appends one
// GeneratedSegment per unit, emits PipelineEvents
//
// Per-unit state machine: Pending → Requested → {Validated, Failed}
//
// Units run strictly in unit_index order: each request carries the tail of
// the text generated so far. A unit that still fails after the retry ceiling
// becomes a placeholder segment and the run moves on to the next unit.
// Cancellation is observed between units.

use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventBus, PipelineEvent};
use crate::model::{ModelInvoker, ModelRequest};
use crate::pipeline::prompts::{self, PromptSet};
use crate::pipeline::session_cache::SessionCache;
use crate::pipeline::types::{EvidenceItem, GeneratedSegment, UnitState};
use crate::pipeline::validator::{self, StructureValidator};
use scriba_common::config::{ModelProfile, Operation};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Outcome of a completed generation run
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub total_units: usize,
    /// Units that were replaced by placeholders
    pub failed_units: Vec<usize>,
    pub duration_ms: u64,
}

/// Generation orchestrator
pub struct GenerationOrchestrator {
    invoker: ModelInvoker,
    prompts: Arc<PromptSet>,
    profile: ModelProfile,
    context_tail_chars: usize,
    validator: StructureValidator,
    events: EventBus,
}

impl GenerationOrchestrator {
    pub fn new(
        invoker: ModelInvoker,
        prompts: Arc<PromptSet>,
        profile: ModelProfile,
        context_tail_chars: usize,
        events: EventBus,
    ) -> Self {
        Self {
            invoker,
            prompts,
            profile,
            context_tail_chars,
            validator: StructureValidator,
            events,
        }
    }

    /// Generate every planned unit into the cache
    ///
    /// # Errors
    /// `Cancelled` if the token fires between units; segments generated so
    /// far stay in the cache. Individual unit failures are not errors.
    pub async fn run(
        &self,
        cache: &RwLock<SessionCache>,
        cancel: &CancellationToken,
    ) -> PipelineResult<GenerationSummary> {
        let start_time = Instant::now();

        let (session_id, total_units, system_instruction) = {
            let cache = cache.read().await;
            let instruction =
                prompts::with_style(self.prompts.writer(cache.input_mode()), cache.style());
            (cache.session_id(), cache.units().len(), instruction)
        };

        let mut failed_units = Vec::new();

        for unit_index in 0..total_units {
            if cancel.is_cancelled() {
                tracing::warn!(
                    session_id = %session_id,
                    completed_units = unit_index,
                    total_units,
                    "Generation cancelled"
                );
                return Err(PipelineError::Cancelled {
                    completed_units: unit_index,
                    total_units,
                });
            }

            self.events.emit(PipelineEvent::UnitStarted {
                session_id,
                unit_index,
                total_units,
            });

            // Snapshot request inputs, then release the lock for the model call
            let (request, evidence) = {
                let mut cache = cache.write().await;
                let unit = cache
                    .unit(unit_index)
                    .cloned()
                    .ok_or_else(|| PipelineError::Internal(format!("unit {} missing", unit_index)))?;
                let evidence = cache.unit_evidence(unit_index).unwrap_or(&[]).to_vec();
                let tail = cache.document().tail(self.context_tail_chars);
                cache.set_state(unit_index, UnitState::Requested);

                let request = ModelRequest {
                    operation: Operation::Writer,
                    system_instruction: system_instruction.clone(),
                    parts: prompts::writer_parts(&unit, total_units, &evidence, &tail),
                    profile: self.profile.clone(),
                };
                (request, evidence)
            };

            let outcome = self
                .invoker
                .invoke(
                    &request,
                    Some(unit_index),
                    |raw| self.accept(raw),
                    |attempt, reason| {
                        self.events.emit(PipelineEvent::UnitRetrying {
                            session_id,
                            unit_index,
                            attempt,
                            reason: reason.to_string(),
                        });
                    },
                )
                .await;

            let mut cache = cache.write().await;
            match outcome {
                Ok(invocation) => {
                    cache.record_segment(GeneratedSegment {
                        unit_index,
                        text: invocation.value,
                        validated: true,
                        attempts: invocation.attempts,
                    })?;
                    tracing::info!(
                        session_id = %session_id,
                        unit_index,
                        total_units,
                        attempts = invocation.attempts,
                        "Unit generated"
                    );
                    self.events.emit(PipelineEvent::UnitValidated {
                        session_id,
                        unit_index,
                        attempts: invocation.attempts,
                    });
                }
                Err(err) => {
                    let reason = err.to_string();
                    let attempts = match &err {
                        PipelineError::RetryExhausted { attempts, .. } => *attempts,
                        _ => 1,
                    };
                    tracing::warn!(
                        session_id = %session_id,
                        unit_index,
                        error = %reason,
                        "Unit failed, emitting placeholder and continuing"
                    );
                    cache.set_state(
                        unit_index,
                        UnitState::Failed {
                            reason: reason.clone(),
                        },
                    );
                    cache.record_segment(GeneratedSegment {
                        unit_index,
                        text: placeholder(unit_index, total_units, &evidence, &reason),
                        validated: false,
                        attempts,
                    })?;
                    self.events.emit(PipelineEvent::UnitFailed {
                        session_id,
                        unit_index,
                        error: reason,
                    });
                    failed_units.push(unit_index);
                }
            }
        }

        let summary = GenerationSummary {
            total_units,
            failed_units,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };
        tracing::info!(
            session_id = %session_id,
            total_units,
            failed_units = summary.failed_units.len(),
            duration_ms = summary.duration_ms,
            "Generation complete"
        );
        Ok(summary)
    }

    /// Clean and structurally validate one response
    fn accept(&self, raw: &str) -> Result<String, String> {
        let cleaned = validator::clean_response(raw);
        self.validator
            .validate(&cleaned)
            .map(|_| cleaned)
            .map_err(|issues| validator::describe(&issues))
    }
}

/// Structurally valid stand-in for a unit that could not be generated
pub fn placeholder(
    unit_index: usize,
    total_units: usize,
    evidence: &[EvidenceItem],
    reason: &str,
) -> String {
    let coverage = match (evidence.first(), evidence.last()) {
        (Some(first), Some(last)) if first.is_timed() && last.is_timed() => format!(
            "recording {:.0}s to {:.0}s",
            first.ordering_key,
            last.end_key.unwrap_or(last.ordering_key)
        ),
        (Some(first), Some(last)) => format!("evidence {} to {}", first.id, last.id),
        _ => "no evidence".to_string(),
    };
    let reason: String = reason
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    format!(
        "% scriba: part {part} of {total} could not be generated: {reason}\n\
         \\begin{{center}}\n\
         \\fbox{{\\textbf{{Part {part} of {total} is missing ({coverage}).}}}}\n\
         \\end{{center}}",
        part = unit_index + 1,
        total = total_units,
        reason = reason,
        coverage = coverage,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerativeModel, ModelError, RequestGate, RetryPolicy};
    use crate::pipeline::types::{
        AlignedTimeline, EvidenceId, EvidenceKind, EvidencePayload, GenerationUnit, InputMode,
        StyleProfile,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// Records the cache's unit states as seen from inside each model call
    struct StateObserver {
        cache: Arc<RwLock<SessionCache>>,
        seen: Mutex<Vec<Vec<UnitState>>>,
    }

    #[async_trait]
    impl GenerativeModel for StateObserver {
        async fn generate(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            let cache = self.cache.read().await;
            let states = (0..cache.units().len())
                .filter_map(|i| cache.state(i).cloned())
                .collect();
            self.seen.lock().unwrap().push(states);
            Ok("\\section{Part}".to_string())
        }

        fn name(&self) -> &str {
            "observer"
        }
    }

    fn planned_cache(units: usize) -> SessionCache {
        let items = (0..units)
            .map(|i| EvidenceItem {
                id: EvidenceId(i),
                kind: EvidenceKind::Speech,
                ordering_key: i as f64 * 10.0,
                end_key: Some(i as f64 * 10.0 + 9.0),
                payload: EvidencePayload::Text(format!("sentence {}", i)),
                source_id: "audio".into(),
                page_range: None,
                doc_type: None,
            })
            .collect();
        let units = (0..units)
            .map(|i| GenerationUnit {
                unit_index: i,
                span: i..i + 1,
                estimated_size: 2,
                anchor_refs: vec![],
            })
            .collect();
        let mut cache = SessionCache::new(Uuid::new_v4());
        cache.reset(
            InputMode::Video,
            AlignedTimeline::from_sorted(items),
            StyleProfile::default(),
            units,
        );
        cache
    }

    #[tokio::test]
    async fn test_unit_is_requested_while_in_flight() {
        let cache = Arc::new(RwLock::new(planned_cache(2)));
        let model = Arc::new(StateObserver {
            cache: cache.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let invoker = ModelInvoker::new(
            model.clone(),
            Arc::new(RequestGate::per_minute(60_000)),
            RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        );
        let orchestrator = GenerationOrchestrator::new(
            invoker,
            Arc::new(PromptSet::default()),
            scriba_common::config::LlmConfig::default().profile(Operation::Writer),
            200,
            EventBus::default(),
        );

        let summary = orchestrator
            .run(&cache, &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.failed_units.is_empty());
        let seen = model.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                vec![UnitState::Requested, UnitState::Pending],
                vec![UnitState::Validated, UnitState::Requested],
            ]
        );
        let cache = cache.read().await;
        assert_eq!(cache.state(1), Some(&UnitState::Validated));
    }

    #[test]
    fn test_placeholder_is_structurally_valid() {
        let evidence = vec![EvidenceItem {
            id: EvidenceId(7),
            kind: EvidenceKind::Speech,
            ordering_key: 900.0,
            end_key: Some(960.0),
            payload: EvidencePayload::Text("x".into()),
            source_id: "audio".into(),
            page_range: None,
            doc_type: None,
        }];
        let text = placeholder(1, 3, &evidence, "writer request gave up\nafter 3 attempts {");

        assert!(StructureValidator.validate(&text).is_ok());
        assert!(text.contains("Part 2 of 3 is missing (recording 900s to 960s)"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_placeholder_without_evidence() {
        let text = placeholder(0, 1, &[], "boom");
        assert!(text.contains("no evidence"));
        assert!(StructureValidator.validate(&text).is_ok());
    }
}
