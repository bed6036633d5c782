// Evidence Normalizer
//
// Concept: Convert heterogeneous adapter records into evidence items
// Synchronization: Accepts &[RawSource] in declaration order, outputs one
// SourceEvidence per source plus the list of dropped records
//
// Transcript and keyframe records keep their recording timestamps. Document
// chunks have no position on the recording timeline, so they receive synthetic
// keys that continue after the latest recorded timestamp of the session. That
// keeps document-only sessions deterministic and never interleaves documents
// ahead of recorded content.

use crate::error::{MalformedEvidenceError, MissingField};
use crate::pipeline::types::{
    DocumentChunk, EvidenceId, EvidenceItem, EvidenceKind, EvidencePayload, Keyframe, RawSource,
    SourceContent, SourceEvidence, TranscriptSegment,
};

/// Normalizer output
#[derive(Debug, Clone, Default)]
pub struct NormalizedEvidence {
    /// One entry per input source, in declaration order
    pub sources: Vec<SourceEvidence>,
    /// Records that could not be used (logged, not fatal)
    pub dropped: Vec<MalformedEvidenceError>,
}

impl NormalizedEvidence {
    pub fn item_count(&self) -> usize {
        self.sources.iter().map(|s| s.items.len()).sum()
    }
}

/// Evidence normalizer
pub struct EvidenceNormalizer {
    /// Synthetic key distance between consecutive document chunks
    document_key_step: f64,
}

impl Default for EvidenceNormalizer {
    fn default() -> Self {
        Self {
            document_key_step: 1.0,
        }
    }
}

impl EvidenceNormalizer {
    /// Normalize all sources
    ///
    /// Document chunks across all document sources are numbered in declaration
    /// order, so a deck declared before a set of notes sorts entirely before it.
    pub fn normalize(&self, sources: &[RawSource]) -> NormalizedEvidence {
        let mut next_id = 0usize;
        let mut output = NormalizedEvidence::default();

        for (rank, source) in sources.iter().enumerate() {
            let items = match &source.content {
                SourceContent::Transcript(segments) => {
                    self.normalize_transcript(source, segments, &mut next_id, &mut output.dropped)
                }
                SourceContent::Keyframes(keyframes) => {
                    self.normalize_keyframes(source, keyframes, &mut next_id, &mut output.dropped)
                }
                SourceContent::Document { doc_type, chunks } => {
                    let mut items =
                        self.normalize_document(source, chunks, &mut next_id, &mut output.dropped);
                    for item in &mut items {
                        item.doc_type = Some(*doc_type);
                    }
                    items
                }
            };

            output.sources.push(SourceEvidence {
                source_id: source.source_id.clone(),
                rank,
                items,
            });
        }

        self.assign_document_keys(&mut output.sources);

        tracing::info!(
            sources = output.sources.len(),
            items = output.item_count(),
            dropped = output.dropped.len(),
            "Evidence normalization complete"
        );

        output
    }

    fn normalize_transcript(
        &self,
        source: &RawSource,
        segments: &[TranscriptSegment],
        next_id: &mut usize,
        dropped: &mut Vec<MalformedEvidenceError>,
    ) -> Vec<EvidenceItem> {
        let mut items = Vec::with_capacity(segments.len());

        for (index, segment) in segments.iter().enumerate() {
            let start = match valid_timestamp(segment.start_sec) {
                Some(t) => t,
                None => {
                    record_drop(dropped, source, index, MissingField::Timestamp);
                    continue;
                }
            };
            let text = match non_blank(segment.text.as_deref()) {
                Some(t) => t,
                None => {
                    record_drop(dropped, source, index, MissingField::Text);
                    continue;
                }
            };
            let end = valid_timestamp(segment.end_sec).filter(|end| *end >= start);

            items.push(EvidenceItem {
                id: take_id(next_id),
                kind: EvidenceKind::Speech,
                ordering_key: start,
                end_key: end,
                payload: EvidencePayload::Text(text),
                source_id: source.source_id.clone(),
                page_range: None,
                doc_type: None,
            });
        }

        items
    }

    fn normalize_keyframes(
        &self,
        source: &RawSource,
        keyframes: &[Keyframe],
        next_id: &mut usize,
        dropped: &mut Vec<MalformedEvidenceError>,
    ) -> Vec<EvidenceItem> {
        let mut items = Vec::with_capacity(keyframes.len());

        for (index, keyframe) in keyframes.iter().enumerate() {
            let timestamp = match valid_timestamp(keyframe.timestamp_sec) {
                Some(t) => t,
                None => {
                    record_drop(dropped, source, index, MissingField::Timestamp);
                    continue;
                }
            };
            let image = match &keyframe.image_ref {
                Some(path) if !path.as_os_str().is_empty() => path.clone(),
                _ => {
                    record_drop(dropped, source, index, MissingField::ImageRef);
                    continue;
                }
            };

            items.push(EvidenceItem {
                id: take_id(next_id),
                kind: EvidenceKind::Keyframe,
                ordering_key: timestamp,
                end_key: None,
                payload: EvidencePayload::Image(image),
                source_id: source.source_id.clone(),
                page_range: None,
                doc_type: None,
            });
        }

        items
    }

    fn normalize_document(
        &self,
        source: &RawSource,
        chunks: &[DocumentChunk],
        next_id: &mut usize,
        dropped: &mut Vec<MalformedEvidenceError>,
    ) -> Vec<EvidenceItem> {
        let mut items = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let text = match non_blank(chunk.text.as_deref()) {
                Some(t) => t,
                None => {
                    record_drop(dropped, source, index, MissingField::Text);
                    continue;
                }
            };

            items.push(EvidenceItem {
                id: take_id(next_id),
                kind: EvidenceKind::DocumentText,
                // Placeholder until every recorded timestamp is known
                ordering_key: 0.0,
                end_key: None,
                payload: EvidencePayload::Text(text),
                source_id: source.source_id.clone(),
                page_range: chunk.page_range,
                doc_type: None,
            });
        }

        items
    }

    /// Give document items keys after the latest recorded timestamp
    fn assign_document_keys(&self, sources: &mut [SourceEvidence]) {
        let base = sources
            .iter()
            .flat_map(|s| s.items.iter())
            .filter(|item| item.is_timed())
            .map(|item| item.end_key.unwrap_or(item.ordering_key).max(item.ordering_key))
            .fold(0.0_f64, f64::max);

        let mut sequence = 0u32;
        for item in sources
            .iter_mut()
            .flat_map(|s| s.items.iter_mut())
            .filter(|item| item.kind == EvidenceKind::DocumentText)
        {
            sequence += 1;
            item.ordering_key = base + self.document_key_step * f64::from(sequence);
        }

        if sequence > 0 {
            tracing::debug!(
                base_key = base,
                document_items = sequence,
                "Assigned synthetic ordering keys to document evidence"
            );
        }
    }
}

fn take_id(next_id: &mut usize) -> EvidenceId {
    let id = EvidenceId(*next_id);
    *next_id += 1;
    id
}

fn valid_timestamp(value: Option<f64>) -> Option<f64> {
    value.filter(|t| t.is_finite() && *t >= 0.0)
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn record_drop(
    dropped: &mut Vec<MalformedEvidenceError>,
    source: &RawSource,
    index: usize,
    field: MissingField,
) {
    let error = MalformedEvidenceError {
        source_id: source.source_id.clone(),
        index,
        field,
    };
    tracing::warn!(
        source_id = %source.source_id,
        record = index,
        "{}",
        error
    );
    dropped.push(error);
}
