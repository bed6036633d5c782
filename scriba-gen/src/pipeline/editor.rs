// Editor
//
// Concept: Rewrite one document region on request, grounded on that region's
// cached evidence
// Synchronization: Snapshot under a read lock, model call without any lock,
// splice under one write lock
//
// Edits are all-or-nothing: the new region is validated before it is
// installed, and a failed edit leaves the document byte-for-byte unchanged.

use crate::error::{PipelineError, PipelineResult};
use crate::model::{ModelInvoker, ModelRequest};
use crate::pipeline::prompts::{self, PromptSet};
use crate::pipeline::session_cache::SessionCache;
use crate::pipeline::types::{Document, EditTarget};
use crate::pipeline::validator::{self, StructureValidator};
use scriba_common::config::{ModelProfile, Operation};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resolved edit region
#[derive(Debug, Clone, PartialEq)]
struct Region {
    unit_index: usize,
    /// Byte range inside the unit's segment
    range: Range<usize>,
}

pub struct Editor {
    invoker: ModelInvoker,
    prompts: Arc<PromptSet>,
    profile: ModelProfile,
    validator: StructureValidator,
}

impl Editor {
    pub fn new(invoker: ModelInvoker, prompts: Arc<PromptSet>, profile: ModelProfile) -> Self {
        Self {
            invoker,
            prompts,
            profile,
            validator: StructureValidator,
        }
    }

    /// Apply `instruction` to `target` and return the updated document
    ///
    /// # Errors
    /// - `NotBuilt` before any document exists
    /// - `EditTargetNotFound` if the target does not resolve
    /// - `EditValidation` if the rewritten region is not well-formed
    /// - `RetryExhausted` / `ModelUnavailable` if the model never answered
    pub async fn edit(
        &self,
        cache: &RwLock<SessionCache>,
        target: &EditTarget,
        instruction: &str,
    ) -> PipelineResult<Document> {
        let (region, original, request) = {
            let cache = cache.read().await;
            if !cache.is_built() {
                return Err(PipelineError::NotBuilt);
            }
            let region = resolve(&cache, target)?;
            let original = cache
                .document()
                .segment(region.unit_index)
                .unwrap_or_default()
                .to_string();
            let grounding = cache.unit_evidence(region.unit_index).unwrap_or(&[]);

            let request = ModelRequest {
                operation: Operation::Editor,
                system_instruction: prompts::with_style(&self.prompts.editor, cache.style()),
                parts: prompts::editor_parts(&original[region.range.clone()], instruction, grounding),
                profile: self.profile.clone(),
            };
            (region, original, request)
        };

        tracing::info!(
            unit_index = region.unit_index,
            start = region.range.start,
            end = region.range.end,
            "Requesting region rewrite"
        );

        let rewrite = self
            .invoker
            .invoke(
                &request,
                Some(region.unit_index),
                |raw| {
                    let cleaned = validator::clean_response(raw);
                    if cleaned.is_empty() {
                        Err("empty rewrite".to_string())
                    } else {
                        Ok(cleaned)
                    }
                },
                |_, _| {},
            )
            .await?
            .value;

        let mut updated = String::with_capacity(original.len() + rewrite.len());
        updated.push_str(&original[..region.range.start]);
        updated.push_str(&rewrite);
        updated.push_str(&original[region.range.end..]);

        if let Err(issues) = self.validator.validate(&updated) {
            let reason = validator::describe(&issues);
            tracing::warn!(
                unit_index = region.unit_index,
                reason = %reason,
                "Rewrite rejected, document unchanged"
            );
            return Err(PipelineError::EditValidation {
                unit_index: region.unit_index,
                reason,
            });
        }

        let mut cache = cache.write().await;
        if cache.document().segment(region.unit_index) != Some(original.as_str()) {
            return Err(PipelineError::EditTargetNotFound(format!(
                "unit {} changed while the edit was in flight",
                region.unit_index
            )));
        }
        if !cache.apply_edit(region.unit_index, updated, instruction) {
            return Err(PipelineError::EditTargetNotFound(format!(
                "unit {}",
                region.unit_index
            )));
        }

        tracing::info!(unit_index = region.unit_index, "Edit applied");
        Ok(cache.document().clone())
    }
}

fn resolve(cache: &SessionCache, target: &EditTarget) -> PipelineResult<Region> {
    let document = cache.document();
    match target {
        EditTarget::Unit(unit_index) => document
            .segment(*unit_index)
            .map(|text| Region {
                unit_index: *unit_index,
                range: 0..text.len(),
            })
            .ok_or_else(|| {
                PipelineError::EditTargetNotFound(format!(
                    "unit {} (document has {} units)",
                    unit_index,
                    document.len()
                ))
            }),
        EditTarget::Span { unit_index, range } => {
            let text = document.segment(*unit_index).ok_or_else(|| {
                PipelineError::EditTargetNotFound(format!("unit {}", unit_index))
            })?;
            let valid = range.start < range.end
                && range.end <= text.len()
                && text.is_char_boundary(range.start)
                && text.is_char_boundary(range.end);
            if !valid {
                return Err(PipelineError::EditTargetNotFound(format!(
                    "span {}..{} in unit {} ({} bytes)",
                    range.start,
                    range.end,
                    unit_index,
                    text.len()
                )));
            }
            Ok(Region {
                unit_index: *unit_index,
                range: range.clone(),
            })
        }
        EditTarget::Excerpt(excerpt) => {
            if excerpt.trim().is_empty() {
                return Err(PipelineError::EditTargetNotFound("empty excerpt".to_string()));
            }
            document
                .segments()
                .iter()
                .enumerate()
                .find_map(|(unit_index, text)| {
                    text.find(excerpt.as_str()).map(|start| Region {
                        unit_index,
                        range: start..start + excerpt.len(),
                    })
                })
                .ok_or_else(|| {
                    let shown: String = excerpt.chars().take(40).collect();
                    PipelineError::EditTargetNotFound(format!("excerpt \"{}\"", shown))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{
        AlignedTimeline, GeneratedSegment, GenerationUnit, InputMode, StyleProfile,
    };
    use uuid::Uuid;

    fn built_cache(segments: &[&str]) -> SessionCache {
        let mut cache = SessionCache::new(Uuid::new_v4());
        let units = (0..segments.len())
            .map(|i| GenerationUnit {
                unit_index: i,
                span: 0..0,
                estimated_size: 0,
                anchor_refs: vec![],
            })
            .collect();
        cache.reset(InputMode::Video, AlignedTimeline::default(), StyleProfile::default(), units);
        for (i, text) in segments.iter().enumerate() {
            cache
                .record_segment(GeneratedSegment {
                    unit_index: i,
                    text: text.to_string(),
                    validated: true,
                    attempts: 1,
                })
                .unwrap();
        }
        cache
    }

    #[test]
    fn test_resolve_unit_and_span() {
        let cache = built_cache(&["alpha", "beta gamma"]);
        assert_eq!(
            resolve(&cache, &EditTarget::Unit(1)).unwrap(),
            Region { unit_index: 1, range: 0..10 }
        );
        assert_eq!(
            resolve(&cache, &EditTarget::Span { unit_index: 1, range: 5..10 }).unwrap().range,
            5..10
        );
        assert!(matches!(
            resolve(&cache, &EditTarget::Unit(2)),
            Err(PipelineError::EditTargetNotFound(_))
        ));
        assert!(matches!(
            resolve(&cache, &EditTarget::Span { unit_index: 0, range: 3..9 }),
            Err(PipelineError::EditTargetNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_excerpt_finds_first_region() {
        let cache = built_cache(&["intro", "the theorem", "another theorem"]);
        let region = resolve(&cache, &EditTarget::Excerpt("theorem".into())).unwrap();
        assert_eq!(region, Region { unit_index: 1, range: 4..11 });
        assert!(resolve(&cache, &EditTarget::Excerpt("lemma".into())).is_err());
        assert!(resolve(&cache, &EditTarget::Excerpt("  ".into())).is_err());
    }
}
