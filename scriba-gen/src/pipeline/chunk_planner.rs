// Chunk Planner
//
// Concept: Partition the aligned timeline into bounded generation units
// Synchronization: Accepts &AlignedTimeline, outputs Vec<GenerationUnit>
//
// Greedy streaming partition: walk the timeline in order and close the
// current unit when the next item would push it past the size budget (or
// past the time-span cap for recorded items). An item is never split and
// never reordered; a single item larger than the budget becomes its own unit.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{AlignedTimeline, EvidenceItem, EvidenceKind, GenerationUnit};
use scriba_common::config::{PlannerConfig, SizeMetricKind};

/// How an evidence item is charged against the unit budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMetric {
    /// Words of text, plus a fixed cost per image
    Words { image_cost: usize },
    /// One per item
    Items,
}

impl SizeMetric {
    pub fn size_of(&self, item: &EvidenceItem) -> usize {
        match self {
            Self::Items => 1,
            Self::Words { image_cost } => match item.image() {
                Some(_) => *image_cost,
                None => item.word_count().max(1),
            },
        }
    }
}

/// Chunk planner
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    metric: SizeMetric,
    budget: usize,
    max_duration_sec: Option<f64>,
}

impl ChunkPlanner {
    pub fn new(metric: SizeMetric, budget: usize) -> Self {
        Self {
            metric,
            budget: budget.max(1),
            max_duration_sec: None,
        }
    }

    /// Also close units whose recorded time span reaches `seconds`
    pub fn with_max_duration(mut self, seconds: f64) -> Self {
        self.max_duration_sec = Some(seconds).filter(|s| *s > 0.0);
        self
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        let metric = match config.size_metric {
            SizeMetricKind::Words => SizeMetric::Words {
                image_cost: config.image_cost,
            },
            SizeMetricKind::Items => SizeMetric::Items,
        };
        let planner = Self::new(metric, config.unit_budget);
        match config.max_unit_duration_sec {
            Some(seconds) => planner.with_max_duration(seconds),
            None => planner,
        }
    }

    pub fn metric(&self) -> SizeMetric {
        self.metric
    }

    /// Partition the timeline into generation units
    ///
    /// # Errors
    /// `EmptyInput` if the timeline has no items.
    pub fn plan(&self, timeline: &AlignedTimeline) -> PipelineResult<Vec<GenerationUnit>> {
        if timeline.is_empty() {
            tracing::error!("Aligned timeline is empty, nothing to generate");
            return Err(PipelineError::EmptyInput(
                "no usable evidence after normalization".to_string(),
            ));
        }

        let mut units = Vec::new();
        let mut open = OpenUnit::default();

        for (index, item) in timeline.items().iter().enumerate() {
            let size = self.metric.size_of(item);

            if !open.is_empty(index) && self.should_close(&open, item, size) {
                units.push(open.close(units.len(), index, timeline));
                open = OpenUnit::starting_at(index);
            }

            open.size += size;
            if item.is_timed() && open.first_time.is_none() {
                open.first_time = Some(item.ordering_key);
            }
        }
        units.push(open.close(units.len(), timeline.len(), timeline));

        let oversized = units.iter().filter(|u| u.estimated_size > self.budget).count();
        tracing::info!(
            units = units.len(),
            items = timeline.len(),
            budget = self.budget,
            oversized,
            "Generation units planned"
        );

        Ok(units)
    }

    fn should_close(&self, open: &OpenUnit, item: &EvidenceItem, size: usize) -> bool {
        if open.size + size > self.budget {
            return true;
        }
        match (self.max_duration_sec, open.first_time) {
            (Some(limit), Some(first)) if item.is_timed() => item.ordering_key - first >= limit,
            _ => false,
        }
    }
}

/// Unit being accumulated
#[derive(Default)]
struct OpenUnit {
    start: usize,
    size: usize,
    first_time: Option<f64>,
}

impl OpenUnit {
    fn starting_at(start: usize) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    fn is_empty(&self, next: usize) -> bool {
        next == self.start
    }

    fn close(&self, unit_index: usize, end: usize, timeline: &AlignedTimeline) -> GenerationUnit {
        let span = self.start..end;
        let anchor_refs = timeline
            .slice(span.clone())
            .iter()
            .filter(|item| item.kind == EvidenceKind::Keyframe)
            .map(|item| item.id)
            .collect();

        GenerationUnit {
            unit_index,
            span,
            estimated_size: self.size,
            anchor_refs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{EvidenceId, EvidencePayload};

    fn speech(id: usize, at: f64, text: &str) -> EvidenceItem {
        EvidenceItem {
            id: EvidenceId(id),
            kind: EvidenceKind::Speech,
            ordering_key: at,
            end_key: Some(at + 1.0),
            payload: EvidencePayload::Text(text.to_string()),
            source_id: "audio".to_string(),
            page_range: None,
            doc_type: None,
        }
    }

    fn keyframe(id: usize, at: f64) -> EvidenceItem {
        EvidenceItem {
            id: EvidenceId(id),
            kind: EvidenceKind::Keyframe,
            ordering_key: at,
            end_key: None,
            payload: EvidencePayload::Image(format!("k{}.jpg", id).into()),
            source_id: "video".to_string(),
            page_range: None,
            doc_type: None,
        }
    }

    fn timeline(items: Vec<EvidenceItem>) -> AlignedTimeline {
        AlignedTimeline::from_sorted(items)
    }

    #[test]
    fn test_two_items_per_unit_over_five_items() {
        let t = timeline((0..5).map(|i| speech(i, i as f64, "word")).collect());
        let units = ChunkPlanner::new(SizeMetric::Items, 2).plan(&t).unwrap();

        let sizes: Vec<usize> = units.iter().map(|u| u.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(units[2].unit_index, 2);
        assert_eq!(units[2].span, 4..5);
    }

    #[test]
    fn test_partition_is_complete_and_within_budget() {
        let mut items = Vec::new();
        for i in 0..40 {
            if i % 5 == 0 {
                items.push(keyframe(i, i as f64));
            } else {
                items.push(speech(i, i as f64, &"w ".repeat(i % 7 + 1)));
            }
        }
        let t = timeline(items);
        let planner = ChunkPlanner::new(SizeMetric::Words { image_cost: 4 }, 12);
        let units = planner.plan(&t).unwrap();

        let mut next = 0;
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.unit_index, i);
            assert_eq!(unit.span.start, next);
            assert!(!unit.is_empty());
            assert!(unit.estimated_size <= 12 || unit.len() == 1);
            next = unit.span.end;
        }
        assert_eq!(next, t.len());
    }

    #[test]
    fn test_oversized_item_is_its_own_unit() {
        let long = "word ".repeat(50);
        let t = timeline(vec![
            speech(0, 0.0, "short"),
            speech(1, 1.0, &long),
            speech(2, 2.0, "short"),
        ]);
        let units = ChunkPlanner::new(SizeMetric::Words { image_cost: 1 }, 10)
            .plan(&t)
            .unwrap();

        let spans: Vec<_> = units.iter().map(|u| u.span.clone()).collect();
        assert_eq!(spans, vec![0..1, 1..2, 2..3]);
        assert_eq!(units[1].estimated_size, 50);
    }

    #[test]
    fn test_duration_cap_closes_unit() {
        let t = timeline(vec![
            speech(0, 0.0, "a"),
            speech(1, 400.0, "b"),
            speech(2, 900.0, "c"),
            speech(3, 1000.0, "d"),
        ]);
        let units = ChunkPlanner::new(SizeMetric::Items, 100)
            .with_max_duration(900.0)
            .plan(&t)
            .unwrap();

        let spans: Vec<_> = units.iter().map(|u| u.span.clone()).collect();
        assert_eq!(spans, vec![0..2, 2..4]);
    }

    #[test]
    fn test_anchor_refs_are_unit_keyframes() {
        let t = timeline(vec![keyframe(0, 0.0), speech(1, 1.0, "x"), keyframe(2, 2.0)]);
        let units = ChunkPlanner::new(SizeMetric::Items, 2).plan(&t).unwrap();
        assert_eq!(units[0].anchor_refs, vec![EvidenceId(0)]);
        assert_eq!(units[1].anchor_refs, vec![EvidenceId(2)]);
    }

    #[test]
    fn test_empty_timeline_is_empty_input() {
        let result = ChunkPlanner::new(SizeMetric::Items, 2).plan(&AlignedTimeline::default());
        assert!(matches!(result, Err(PipelineError::EmptyInput(_))));
    }

    #[test]
    fn test_from_config_defaults() {
        let planner = ChunkPlanner::from_config(&PlannerConfig::default());
        assert_eq!(planner.metric(), SizeMetric::Words { image_cost: 250 });
        assert_eq!(planner.max_duration_sec, Some(900.0));
    }
}
