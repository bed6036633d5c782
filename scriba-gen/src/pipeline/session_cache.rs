// Session Cache
//
// Concept: In-memory store of every artifact of one working session
// Synchronization: Owned by the session behind a tokio RwLock; the
// orchestrator appends segments, the editor replaces one region under a single
// write lock, the tutor only reads
//
// Nothing here is persisted. The cache is reset at the start of every build
// and dropped with the session.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{
    AlignedTimeline, Document, EditRecord, EvidenceItem, GeneratedSegment, GenerationUnit,
    InputMode, StyleProfile, UnitState,
};
use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionCache {
    session_id: Uuid,
    input_mode: InputMode,
    timeline: AlignedTimeline,
    style: StyleProfile,
    units: Vec<GenerationUnit>,
    states: Vec<UnitState>,
    segments: Vec<GeneratedSegment>,
    document: Document,
    edit_log: Vec<EditRecord>,
}

impl SessionCache {
    /// Empty cache for a session that has not built anything yet
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            input_mode: InputMode::Video,
            timeline: AlignedTimeline::default(),
            style: StyleProfile::default(),
            units: Vec::new(),
            states: Vec::new(),
            segments: Vec::new(),
            document: Document::default(),
            edit_log: Vec::new(),
        }
    }

    /// Install the products of alignment and planning, discarding any
    /// previous build
    pub fn reset(
        &mut self,
        input_mode: InputMode,
        timeline: AlignedTimeline,
        style: StyleProfile,
        units: Vec<GenerationUnit>,
    ) {
        self.input_mode = input_mode;
        self.timeline = timeline;
        self.style = style;
        self.states = vec![UnitState::Pending; units.len()];
        self.units = units;
        self.segments.clear();
        self.document = Document::default();
        self.edit_log.clear();
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn timeline(&self) -> &AlignedTimeline {
        &self.timeline
    }

    pub fn style(&self) -> &StyleProfile {
        &self.style
    }

    pub fn units(&self) -> &[GenerationUnit] {
        &self.units
    }

    pub fn unit(&self, unit_index: usize) -> Option<&GenerationUnit> {
        self.units.get(unit_index)
    }

    /// Evidence items of one unit, in timeline order
    pub fn unit_evidence(&self, unit_index: usize) -> Option<&[EvidenceItem]> {
        self.units
            .get(unit_index)
            .map(|unit| self.timeline.slice(unit.span.clone()))
    }

    pub fn state(&self, unit_index: usize) -> Option<&UnitState> {
        self.states.get(unit_index)
    }

    pub fn segments(&self) -> &[GeneratedSegment] {
        &self.segments
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn edit_log(&self) -> &[EditRecord] {
        &self.edit_log
    }

    /// True once every planned unit has a segment
    pub fn is_built(&self) -> bool {
        !self.units.is_empty() && self.segments.len() == self.units.len()
    }

    /// Units that ended with a placeholder
    pub fn failed_units(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| !s.validated)
            .map(|s| s.unit_index)
            .collect()
    }

    pub(crate) fn set_state(&mut self, unit_index: usize, state: UnitState) {
        if let Some(slot) = self.states.get_mut(unit_index) {
            *slot = state;
        }
    }

    /// Append the next unit's segment to the cache and the document
    ///
    /// # Errors
    /// `Internal` if the segment is not the next one in unit order.
    pub(crate) fn record_segment(&mut self, segment: GeneratedSegment) -> PipelineResult<()> {
        if segment.unit_index != self.segments.len() || segment.unit_index >= self.units.len() {
            return Err(PipelineError::Internal(format!(
                "segment for unit {} recorded out of order (next expected {})",
                segment.unit_index,
                self.segments.len()
            )));
        }

        let state = if segment.validated {
            UnitState::Validated
        } else {
            UnitState::Failed {
                reason: "placeholder emitted".to_string(),
            }
        };
        if !matches!(self.states.get(segment.unit_index), Some(UnitState::Failed { .. })) {
            self.set_state(segment.unit_index, state);
        }

        self.document.push_segment(segment.text.clone());
        self.segments.push(segment);
        Ok(())
    }

    /// Replace one region's text with an already validated rewrite and log the edit
    ///
    /// Document and segment change together under the caller's write lock. A
    /// placeholder that is edited into valid text counts as validated.
    pub(crate) fn apply_edit(&mut self, unit_index: usize, text: String, instruction: &str) -> bool {
        let Some(segment) = self.segments.get_mut(unit_index) else {
            return false;
        };
        if !self.document.replace_segment(unit_index, text.clone()) {
            return false;
        }
        segment.text = text;
        segment.validated = true;
        self.set_state(unit_index, UnitState::Validated);

        self.edit_log.push(EditRecord {
            unit_index,
            instruction: instruction.to_string(),
            applied_at: Utc::now(),
        });
        true
    }
}
