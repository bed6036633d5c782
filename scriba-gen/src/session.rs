// Session
//
// Concept: One working session over a set of lecture materials
// Exposes: build (normalize → align → plan → generate), edit, ask
//
// The session owns the cache, the shared request gate (through its invoker)
// and the event bus. Normalization and style extraction are independent and
// run concurrently on the blocking pool; both complete before alignment.
// Dropping the session discards everything it built.

use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventBus, PipelineEvent};
use crate::model::{GeminiClient, GenerativeModel, ModelInvoker, RequestGate, RetryPolicy};
use crate::pipeline::aligner::TimelineAligner;
use crate::pipeline::chunk_planner::ChunkPlanner;
use crate::pipeline::editor::Editor;
use crate::pipeline::normalizer::EvidenceNormalizer;
use crate::pipeline::orchestrator::{GenerationOrchestrator, GenerationSummary};
use crate::pipeline::prompts::PromptSet;
use crate::pipeline::session_cache::SessionCache;
use crate::pipeline::style_extractor::StyleExtractor;
use crate::pipeline::tutor::Tutor;
use crate::pipeline::types::{Document, EditTarget, InputMode, RawSource};
use scriba_common::config::Operation;
use scriba_common::ScribaConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Session {
    session_id: Uuid,
    config: ScribaConfig,
    cache: Arc<RwLock<SessionCache>>,
    events: EventBus,
    orchestrator: GenerationOrchestrator,
    editor: Editor,
    tutor: Tutor,
}

impl Session {
    /// Session over any generative model backend
    pub fn new(config: ScribaConfig, model: Arc<dyn GenerativeModel>) -> Self {
        let session_id = Uuid::new_v4();
        let events = EventBus::default();
        let prompts = Arc::new(PromptSet::load(config.paths.prompts_dir.as_deref()));
        let gate = Arc::new(RequestGate::per_minute(config.llm.rpm));
        let invoker = ModelInvoker::new(model, gate, RetryPolicy::from_config(&config.llm));

        let orchestrator = GenerationOrchestrator::new(
            invoker.clone(),
            prompts.clone(),
            config.llm.profile(Operation::Writer),
            config.generation.context_tail_chars,
            events.clone(),
        );
        let editor = Editor::new(invoker.clone(), prompts.clone(), config.llm.profile(Operation::Editor));
        let tutor = Tutor::new(
            invoker,
            prompts,
            config.llm.profile(Operation::Tutor),
            config.tutor.context_budget,
        );

        tracing::info!(session_id = %session_id, rpm = config.llm.rpm, "Session created");

        Self {
            session_id,
            cache: Arc::new(RwLock::new(SessionCache::new(session_id))),
            config,
            events,
            orchestrator,
            editor,
            tutor,
        }
    }

    /// Session backed by the Gemini API
    ///
    /// # Errors
    /// Configuration error if no API key is available.
    pub fn with_gemini(config: ScribaConfig) -> PipelineResult<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            scriba_common::Error::Config(format!(
                "no API key: set {} or llm.api_key",
                scriba_common::config::API_KEY_ENV_VAR
            ))
        })?;
        let client = GeminiClient::from_config(&config.llm, api_key)
            .map_err(|e| PipelineError::ModelUnavailable(e.to_string()))?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Read access to the cache
    pub async fn cache(&self) -> RwLockReadGuard<'_, SessionCache> {
        self.cache.read().await
    }

    /// Current document
    pub async fn document(&self) -> Document {
        self.cache.read().await.document().clone()
    }

    /// Build the document from `sources` (declaration order matters for ties)
    pub async fn build(
        &self,
        sources: Vec<RawSource>,
        prior_document: Option<String>,
    ) -> PipelineResult<Document> {
        self.build_with_cancel(sources, prior_document, CancellationToken::new())
            .await
    }

    /// Build, observing `cancel` between generation units
    pub async fn build_with_cancel(
        &self,
        sources: Vec<RawSource>,
        prior_document: Option<String>,
        cancel: CancellationToken,
    ) -> PipelineResult<Document> {
        match self.run_build(sources, prior_document, &cancel).await {
            Ok(summary) => {
                self.events.emit(PipelineEvent::BuildCompleted {
                    session_id: self.session_id,
                    total_units: summary.total_units,
                    failed_units: summary.failed_units.len(),
                    duration_ms: summary.duration_ms,
                });
                Ok(self.document().await)
            }
            Err(err) => {
                tracing::error!(session_id = %self.session_id, error = %err, "Build failed");
                self.events.emit(PipelineEvent::BuildFailed {
                    session_id: self.session_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_build(
        &self,
        sources: Vec<RawSource>,
        prior_document: Option<String>,
        cancel: &CancellationToken,
    ) -> PipelineResult<GenerationSummary> {
        let start_time = Instant::now();
        let input_mode = InputMode::detect(&sources);

        tracing::info!(
            session_id = %self.session_id,
            sources = sources.len(),
            input_mode = ?input_mode,
            prior_document = prior_document.is_some(),
            "Starting build"
        );
        self.events.emit(PipelineEvent::BuildStarted {
            session_id: self.session_id,
            sources: sources.len(),
            input_mode: format!("{:?}", input_mode),
        });

        // Independent stages: run side by side
        let normalize = tokio::task::spawn_blocking(move || {
            EvidenceNormalizer::default().normalize(&sources)
        });
        let extract = tokio::task::spawn_blocking(move || {
            StyleExtractor::default().extract(prior_document.as_deref())
        });
        let (normalized, style) = tokio::join!(normalize, extract);
        let normalized = normalized
            .map_err(|e| PipelineError::Internal(format!("normalization task failed: {}", e)))?;
        let style = style
            .map_err(|e| PipelineError::Internal(format!("style extraction task failed: {}", e)))?;
        if style.is_none() {
            tracing::info!(session_id = %self.session_id, "No prior document, using empty style profile");
        }

        let dropped = normalized.dropped.len();
        for record in normalized.dropped {
            let (source_id, index) = (record.source_id.clone(), record.index);
            self.events.emit(PipelineEvent::EvidenceDropped {
                session_id: self.session_id,
                source_id,
                record: index,
                error: PipelineError::from(record).to_string(),
            });
        }
        let timeline = TimelineAligner.align(normalized.sources)?;
        self.events.emit(PipelineEvent::TimelineAligned {
            session_id: self.session_id,
            items: timeline.len(),
            dropped,
        });

        let units = ChunkPlanner::from_config(&self.config.planner).plan(&timeline)?;
        self.events.emit(PipelineEvent::UnitsPlanned {
            session_id: self.session_id,
            total_units: units.len(),
        });

        self.cache
            .write()
            .await
            .reset(input_mode, timeline, style.unwrap_or_default(), units);

        let summary = self.orchestrator.run(&self.cache, cancel).await?;

        tracing::info!(
            session_id = %self.session_id,
            total_units = summary.total_units,
            failed_units = ?summary.failed_units,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Build complete"
        );
        Ok(summary)
    }

    /// Rewrite one region of the document
    pub async fn edit(&self, target: EditTarget, instruction: &str) -> PipelineResult<Document> {
        match self.editor.edit(&self.cache, &target, instruction).await {
            Ok(document) => {
                let unit_index = self
                    .cache
                    .read()
                    .await
                    .edit_log()
                    .last()
                    .map(|r| r.unit_index)
                    .unwrap_or_default();
                self.events.emit(PipelineEvent::EditApplied {
                    session_id: self.session_id,
                    unit_index,
                });
                Ok(document)
            }
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, error = %err, "Edit not applied");
                self.events.emit(PipelineEvent::EditRejected {
                    session_id: self.session_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Answer a question about the document; never modifies it
    pub async fn ask(&self, question: &str) -> PipelineResult<String> {
        self.tutor.ask(&self.cache, question).await
    }

    /// End the session, discarding the cache
    pub fn close(self) {
        tracing::info!(session_id = %self.session_id, "Session closed, cache discarded");
    }
}
