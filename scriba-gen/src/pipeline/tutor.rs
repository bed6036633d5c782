// Tutor
//
// Concept: Answer free-form questions from cached evidence and notes
// Synchronization: Read lock only; never mutates the cache
//
// Context selection: when every unit fits the context budget all of them are
// sent. Otherwise units are ranked by keyword hits of the question (exact or
// fuzzy) and the best ones are taken until the budget is used, then presented
// in document order.

use crate::error::{PipelineError, PipelineResult};
use crate::model::{ModelInvoker, ModelRequest};
use crate::pipeline::prompts::{self, PromptSet, TutorContext};
use crate::pipeline::session_cache::SessionCache;
use scriba_common::config::{ModelProfile, Operation};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Similarity above which two words count as the same keyword
const FUZZY_THRESHOLD: f64 = 0.85;
/// Shorter question words are ignored
const MIN_KEYWORD_CHARS: usize = 3;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "why", "how", "when", "where", "which", "who",
    "does", "did", "this", "that", "with", "from", "about", "can", "you", "explain", "mean",
    "means", "between", "into", "there", "their", "its", "not", "but", "have", "has",
];

pub struct Tutor {
    invoker: ModelInvoker,
    prompts: Arc<PromptSet>,
    profile: ModelProfile,
    context_budget: usize,
}

impl Tutor {
    pub fn new(
        invoker: ModelInvoker,
        prompts: Arc<PromptSet>,
        profile: ModelProfile,
        context_budget: usize,
    ) -> Self {
        Self {
            invoker,
            prompts,
            profile,
            context_budget,
        }
    }

    /// Answer a question about the built document
    ///
    /// # Errors
    /// - `NotBuilt` before any document exists
    /// - `RetryExhausted` / `ModelUnavailable` if the model never answered
    pub async fn ask(&self, cache: &RwLock<SessionCache>, question: &str) -> PipelineResult<String> {
        if question.trim().is_empty() {
            return Err(PipelineError::Common(scriba_common::Error::InvalidInput(
                "empty question".to_string(),
            )));
        }

        let request = {
            let cache = cache.read().await;
            if !cache.is_built() {
                return Err(PipelineError::NotBuilt);
            }

            let selected = select_units(&cache, question, self.context_budget);
            tracing::info!(
                selected = selected.len(),
                total_units = cache.units().len(),
                "Tutor context selected"
            );

            let context: Vec<TutorContext<'_>> = selected
                .iter()
                .map(|&unit_index| TutorContext {
                    unit_index,
                    evidence: cache.unit_evidence(unit_index).unwrap_or(&[]),
                    notes: cache.document().segment(unit_index).unwrap_or_default(),
                })
                .collect();

            ModelRequest {
                operation: Operation::Tutor,
                system_instruction: self.prompts.tutor.clone(),
                parts: prompts::tutor_parts(question, &context),
                profile: self.profile.clone(),
            }
        };

        let answer = self
            .invoker
            .invoke(
                &request,
                None,
                |raw| {
                    let answer = raw.trim();
                    if answer.is_empty() {
                        Err("empty answer".to_string())
                    } else {
                        Ok(answer.to_string())
                    }
                },
                |_, _| {},
            )
            .await?;

        Ok(answer.value)
    }
}

/// Units whose evidence and notes are handed to the model, in unit order
pub fn select_units(cache: &SessionCache, question: &str, budget: usize) -> Vec<usize> {
    let costs: Vec<usize> = (0..cache.units().len())
        .map(|i| unit_cost(cache, i))
        .collect();

    if costs.iter().sum::<usize>() <= budget {
        return (0..costs.len()).collect();
    }

    let keywords = keywords(question);
    let mut scored: Vec<(usize, usize)> = (0..costs.len())
        .map(|i| (i, score_unit(cache, i, &keywords)))
        .filter(|(_, score)| *score > 0)
        .collect();

    let mut selected = Vec::new();
    let mut used = 0usize;

    if scored.is_empty() {
        // No keyword hits: leading units until the budget is used
        for (i, cost) in costs.iter().enumerate() {
            if !selected.is_empty() && used + cost > budget {
                break;
            }
            selected.push(i);
            used += cost;
        }
        return selected;
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (i, _) in scored {
        if !selected.is_empty() && used + costs[i] > budget {
            continue;
        }
        selected.push(i);
        used += costs[i];
    }
    selected.sort_unstable();
    selected
}

fn unit_cost(cache: &SessionCache, unit_index: usize) -> usize {
    let evidence = cache.unit(unit_index).map(|u| u.estimated_size).unwrap_or(0);
    let notes = cache
        .document()
        .segment(unit_index)
        .map(|t| t.split_whitespace().count())
        .unwrap_or(0);
    (evidence + notes).max(1)
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(question)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn score_unit(cache: &SessionCache, unit_index: usize, keywords: &[String]) -> usize {
    if keywords.is_empty() {
        return 0;
    }

    let evidence_text = cache
        .unit_evidence(unit_index)
        .unwrap_or(&[])
        .iter()
        .filter_map(|item| item.text());
    let notes = cache.document().segment(unit_index).into_iter();

    evidence_text
        .chain(notes)
        .flat_map(tokenize)
        .map(|word| keywords.iter().filter(|kw| matches_keyword(&word, kw)).count())
        .sum()
}

fn matches_keyword(word: &str, keyword: &str) -> bool {
    word == keyword
        || (word.len().abs_diff(keyword.len()) <= 2
            && strsim::normalized_levenshtein(word, keyword) >= FUZZY_THRESHOLD)
}
