// Shared Types and Data Contracts
//
// The types below are the contracts between pipeline stages: raw adapter
// records flow into the normalizer, evidence items flow through alignment and
// planning, and generated segments land in the session cache.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

// ============================================================================
// Adapter Records (external producers)
// ============================================================================

/// One transcript segment from the speech engine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptSegment {
    #[serde(alias = "start")]
    pub start_sec: Option<f64>,
    #[serde(alias = "end")]
    pub end_sec: Option<f64>,
    pub text: Option<String>,
}

impl TranscriptSegment {
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>) -> Self {
        Self {
            start_sec: Some(start_sec),
            end_sec: Some(end_sec),
            text: Some(text.into()),
        }
    }
}

/// One keyframe from the vision engine, emitted on significant visual change
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Keyframe {
    #[serde(alias = "timestamp")]
    pub timestamp_sec: Option<f64>,
    #[serde(alias = "path")]
    pub image_ref: Option<PathBuf>,
}

impl Keyframe {
    pub fn new(timestamp_sec: f64, image_ref: impl Into<PathBuf>) -> Self {
        Self {
            timestamp_sec: Some(timestamp_sec),
            image_ref: Some(image_ref.into()),
        }
    }
}

/// Inclusive 1-based page range of a document chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(u32, u32)")]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl From<(u32, u32)> for PageRange {
    fn from((first, last): (u32, u32)) -> Self {
        Self { first, last }
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.first == self.last {
            write!(f, "page {}", self.first)
        } else {
            write!(f, "pages {}-{}", self.first, self.last)
        }
    }
}

/// One text chunk from PDF extraction
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentChunk {
    pub page_range: Option<PageRange>,
    pub text: Option<String>,
}

impl DocumentChunk {
    pub fn new(first_page: u32, last_page: u32, text: impl Into<String>) -> Self {
        Self {
            page_range: Some(PageRange {
                first: first_page,
                last: last_page,
            }),
            text: Some(text.into()),
        }
    }
}

/// Role of a PDF source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Course slide deck: expanded into full notes
    Slides,
    /// Another student's notes: transcribed faithfully
    Notes,
}

/// Records produced by one adapter for one input file
#[derive(Debug, Clone)]
pub enum SourceContent {
    Transcript(Vec<TranscriptSegment>),
    Keyframes(Vec<Keyframe>),
    Document {
        doc_type: DocumentType,
        chunks: Vec<DocumentChunk>,
    },
}

/// One input source, in configuration (declaration) order
#[derive(Debug, Clone)]
pub struct RawSource {
    pub source_id: String,
    pub content: SourceContent,
}

impl RawSource {
    pub fn transcript(source_id: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            source_id: source_id.into(),
            content: SourceContent::Transcript(segments),
        }
    }

    pub fn keyframes(source_id: impl Into<String>, keyframes: Vec<Keyframe>) -> Self {
        Self {
            source_id: source_id.into(),
            content: SourceContent::Keyframes(keyframes),
        }
    }

    pub fn document(
        source_id: impl Into<String>,
        doc_type: DocumentType,
        chunks: Vec<DocumentChunk>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            content: SourceContent::Document { doc_type, chunks },
        }
    }

    /// True for adapters whose records carry real recording time
    pub fn is_time_based(&self) -> bool {
        !matches!(self.content, SourceContent::Document { .. })
    }
}

/// Writer prompt family, derived from which sources are present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Recorded lecture (with or without documents)
    Video,
    /// Slide decks only: expand into notes
    OnlySlides,
    /// Student notes only: faithful transcription
    OnlyNotes,
    /// Slides and notes without a recording
    MixedDocuments,
}

impl InputMode {
    pub fn detect(sources: &[RawSource]) -> Self {
        let mut slides = false;
        let mut notes = false;
        for source in sources {
            match &source.content {
                SourceContent::Transcript(_) | SourceContent::Keyframes(_) => return Self::Video,
                SourceContent::Document { doc_type, .. } => match doc_type {
                    DocumentType::Slides => slides = true,
                    DocumentType::Notes => notes = true,
                },
            }
        }
        match (slides, notes) {
            (false, true) => Self::OnlyNotes,
            (true, false) => Self::OnlySlides,
            (true, true) => Self::MixedDocuments,
            (false, false) => Self::Video,
        }
    }
}

// ============================================================================
// Evidence
// ============================================================================

/// Session-unique evidence identifier, assigned by the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvidenceId(pub usize);

impl std::fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceKind {
    Keyframe,
    Speech,
    DocumentText,
}

impl EvidenceKind {
    /// Rank used when ordering keys tie: a slide change explains the
    /// sentence that follows it, so keyframes sort first.
    pub fn tie_rank(self) -> u8 {
        match self {
            Self::Keyframe => 0,
            Self::Speech => 1,
            Self::DocumentText => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvidencePayload {
    Text(String),
    Image(PathBuf),
}

/// One atomic piece of source material with a position in the merged sequence
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceItem {
    pub id: EvidenceId,
    pub kind: EvidenceKind,
    /// Seconds for recorded material, synthetic index for documents
    pub ordering_key: f64,
    /// End of a speech segment
    pub end_key: Option<f64>,
    pub payload: EvidencePayload,
    pub source_id: String,
    pub page_range: Option<PageRange>,
    pub doc_type: Option<DocumentType>,
}

impl EvidenceItem {
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            EvidencePayload::Text(t) => Some(t),
            EvidencePayload::Image(_) => None,
        }
    }

    pub fn image(&self) -> Option<&Path> {
        match &self.payload {
            EvidencePayload::Image(p) => Some(p),
            EvidencePayload::Text(_) => None,
        }
    }

    /// Recorded (as opposed to synthetic) position
    pub fn is_timed(&self) -> bool {
        self.kind != EvidenceKind::DocumentText
    }

    pub fn word_count(&self) -> usize {
        self.text().map(|t| t.split_whitespace().count()).unwrap_or(0)
    }

    /// Single-line rendering used in model requests
    pub fn render_line(&self) -> String {
        match (&self.kind, &self.payload) {
            (EvidenceKind::Speech, EvidencePayload::Text(text)) => format!(
                "[{:.1}s - {:.1}s]: {}",
                self.ordering_key,
                self.end_key.unwrap_or(self.ordering_key),
                text
            ),
            (EvidenceKind::DocumentText, EvidencePayload::Text(text)) => {
                let origin = self
                    .page_range
                    .map(|r| format!("{} ({})", self.source_id, r))
                    .unwrap_or_else(|| self.source_id.clone());
                format!("DOCUMENT {}:\n{}", origin, text)
            }
            (_, EvidencePayload::Image(path)) => format!(
                "[{:.1}s] slide image {} ({})",
                self.ordering_key,
                self.id,
                path.display()
            ),
            (EvidenceKind::Keyframe, EvidencePayload::Text(text)) => text.clone(),
        }
    }
}

/// Normalized evidence of one source, in adapter order
#[derive(Debug, Clone)]
pub struct SourceEvidence {
    pub source_id: String,
    /// Declaration order of the source (lower wins ties)
    pub rank: usize,
    pub items: Vec<EvidenceItem>,
}

/// Globally ordered evidence sequence, read-only once built
#[derive(Debug, Clone, Default)]
pub struct AlignedTimeline {
    items: Vec<EvidenceItem>,
}

impl AlignedTimeline {
    pub(crate) fn from_sorted(items: Vec<EvidenceItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn slice(&self, span: Range<usize>) -> &[EvidenceItem] {
        self.items.get(span).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Style Profile
// ============================================================================

/// One macro inherited from the prior document
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    /// Defining command, e.g. `newcommand` or `DeclareMathOperator`
    pub command: String,
    pub arity: Option<u8>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionLevel {
    Part,
    Chapter,
    Section,
    Subsection,
    Subsubsection,
}

impl SectionLevel {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "part" => Some(Self::Part),
            "chapter" => Some(Self::Chapter),
            "section" => Some(Self::Section),
            "subsection" => Some(Self::Subsection),
            "subsubsection" => Some(Self::Subsubsection),
            _ => None,
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Self::Part => "part",
            Self::Chapter => "chapter",
            Self::Section => "section",
            Self::Subsection => "subsection",
            Self::Subsubsection => "subsubsection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionEntry {
    pub level: SectionLevel,
    pub title: String,
}

/// Structural and stylistic context inherited from a prior document
///
/// Never mutated after extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleProfile {
    pub macros: BTreeMap<String, MacroDefinition>,
    pub sections: Vec<SectionEntry>,
    pub terminology: Vec<String>,
    pub descriptor: String,
}

impl StyleProfile {
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
            && self.sections.is_empty()
            && self.terminology.is_empty()
            && self.descriptor.is_empty()
    }

    /// Compact text block for system instructions
    pub fn render(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("INHERITED CONTEXT FROM PREVIOUS LESSONS\n");
        if !self.descriptor.is_empty() {
            out.push_str(&format!("Style: {}\n", self.descriptor));
        }
        if !self.macros.is_empty() {
            out.push_str("Reuse these macros instead of redefining them:\n");
            for (name, def) in &self.macros {
                match def.arity {
                    Some(n) => out.push_str(&format!("  \\{}[{}] = {}\n", name, n, def.body)),
                    None => out.push_str(&format!("  \\{} = {}\n", name, def.body)),
                }
            }
        }
        if !self.sections.is_empty() {
            out.push_str("Existing section outline (continue it, do not restart numbering):\n");
            for entry in &self.sections {
                let indent = match entry.level {
                    SectionLevel::Part | SectionLevel::Chapter => "",
                    SectionLevel::Section => "  ",
                    SectionLevel::Subsection => "    ",
                    SectionLevel::Subsubsection => "      ",
                };
                out.push_str(&format!("{}- {}\n", indent, entry.title));
            }
        }
        if !self.terminology.is_empty() {
            out.push_str(&format!(
                "Established terminology: {}\n",
                self.terminology.join(", ")
            ));
        }
        out
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Contiguous bounded slice of the timeline sent as one request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationUnit {
    pub unit_index: usize,
    /// Index range into the aligned timeline
    pub span: Range<usize>,
    pub estimated_size: usize,
    /// Items the generated text must be able to cite (keyframe images)
    pub anchor_refs: Vec<EvidenceId>,
}

impl GenerationUnit {
    pub fn len(&self) -> usize {
        self.span.len()
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }
}

/// Per-unit generation state: `Pending → Requested → {Validated, Failed}`
#[derive(Debug, Clone, PartialEq)]
pub enum UnitState {
    Pending,
    Requested,
    Validated,
    Failed { reason: String },
}

/// Model output for one generation unit
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSegment {
    pub unit_index: usize,
    pub text: String,
    /// False for placeholders emitted after retry exhaustion
    pub validated: bool,
    pub attempts: u32,
}

/// Generated document: one region per generation unit, in unit order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    segments: Vec<String>,
}

impl Document {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment(&self, unit_index: usize) -> Option<&str> {
        self.segments.get(unit_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Full document text
    pub fn render(&self) -> String {
        self.segments.join("\n\n")
    }

    pub(crate) fn push_segment(&mut self, text: String) {
        self.segments.push(text);
    }

    /// Last `max_chars` characters, starting at a line boundary when possible
    ///
    /// `max_chars == 0` disables the tail.
    pub fn tail(&self, max_chars: usize) -> String {
        if max_chars == 0 {
            return String::new();
        }
        let full = self.render();
        let total = full.chars().count();
        if total <= max_chars {
            return full;
        }
        let start = full
            .char_indices()
            .nth(total - max_chars)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let tail = &full[start..];
        match tail.find('\n') {
            Some(nl) => {
                let rest = tail[nl + 1..].trim_start_matches('\n');
                if rest.is_empty() {
                    tail.to_string()
                } else {
                    rest.to_string()
                }
            }
            None => tail.to_string(),
        }
    }

    /// Replace one region's content in place
    pub(crate) fn replace_segment(&mut self, unit_index: usize, text: String) -> bool {
        match self.segments.get_mut(unit_index) {
            Some(slot) => {
                *slot = text;
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Editing
// ============================================================================

/// Document region an edit applies to
#[derive(Debug, Clone, PartialEq)]
pub enum EditTarget {
    /// Whole region generated for one unit
    Unit(usize),
    /// Byte range inside one unit's region
    Span { unit_index: usize, range: Range<usize> },
    /// First region containing this exact text
    Excerpt(String),
}

/// Successful edit, kept for the session
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub unit_index: usize,
    pub instruction: String,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(segments: &[&str]) -> Document {
        let mut d = Document::default();
        for s in segments {
            d.push_segment(s.to_string());
        }
        d
    }

    #[test]
    fn test_input_mode_detection() {
        let video = RawSource::transcript("audio", vec![]);
        let slides = RawSource::document("deck", DocumentType::Slides, vec![]);
        let notes = RawSource::document("notes", DocumentType::Notes, vec![]);

        assert_eq!(InputMode::detect(&[slides.clone(), video]), InputMode::Video);
        assert_eq!(InputMode::detect(&[slides.clone()]), InputMode::OnlySlides);
        assert_eq!(InputMode::detect(&[notes.clone()]), InputMode::OnlyNotes);
        assert_eq!(InputMode::detect(&[slides, notes]), InputMode::MixedDocuments);
    }

    #[test]
    fn test_document_tail_starts_on_line_boundary() {
        let d = doc(&["first line\nsecond line", "third line"]);
        let tail = d.tail(15);
        assert_eq!(tail, "third line");
        assert_eq!(d.tail(10_000), d.render());
    }

    #[test]
    fn test_zero_tail_is_empty() {
        let d = doc(&["first line\nsecond line", "third"]);
        assert!(d.tail(0).is_empty());
        assert!(Document::default().tail(0).is_empty());
    }

    #[test]
    fn test_replace_segment_out_of_range() {
        let mut d = doc(&["a", "b"]);
        assert!(!d.replace_segment(2, "c".to_string()));
        assert!(d.replace_segment(1, "c".to_string()));
        assert_eq!(d.segments(), &["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_page_range_deserializes_from_pair() {
        let chunk: DocumentChunk =
            serde_json::from_str(r#"{"page_range": [3, 5], "text": "x"}"#).unwrap();
        assert_eq!(chunk.page_range, Some(PageRange { first: 3, last: 5 }));
    }

    #[test]
    fn test_transcript_aliases() {
        let seg: TranscriptSegment =
            serde_json::from_str(r#"{"start": 1.5, "end": 2.0, "text": "hi"}"#).unwrap();
        assert_eq!(seg.start_sec, Some(1.5));
        assert_eq!(seg.end_sec, Some(2.0));
    }
}
