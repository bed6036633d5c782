// Prompt Set and Request Assembly
//
// Concept: System instructions per operation and the content parts of every
// model request the pipeline issues
// Synchronization: Pure functions over evidence slices, style profile and
// document text; no I/O except loading prompt override files once
//
// Built-in prompts can be replaced by files in the configured prompts
// directory. A missing or unreadable override falls back to the built-in
// text with a warning.

use crate::model::ModelPart;
use crate::pipeline::types::{EvidenceItem, GenerationUnit, InputMode, StyleProfile};
use std::path::Path;

pub const WRITER_PROMPT_FILE: &str = "writer_system_prompt.txt";
pub const WRITER_NOTES_PROMPT_FILE: &str = "writer_system_prompt_notes.txt";
pub const WRITER_DOCUMENTS_PROMPT_FILE: &str = "writer_system_prompt_pdf.txt";
pub const EDITOR_PROMPT_FILE: &str = "reviewer_editor_prompt.txt";
pub const TUTOR_PROMPT_FILE: &str = "professor_qa_prompt.txt";

const DEFAULT_WRITER_PROMPT: &str = "\
You are an expert university note taker. From the lecture material you receive \
(timestamped transcript lines, slide images and document excerpts) write complete, \
rigorous lecture notes in LaTeX. Output only the LaTeX body for this part: no preamble, \
no \\documentclass, no \\begin{document}. Use \\section and \\subsection for structure, \
theorem-like environments for definitions and results, and inline or display math for \
formulas. When a slide image carries information, integrate it and cite it by its \
evidence id (for example E12). Continue seamlessly from the previously generated text \
without repeating it.";

const DEFAULT_WRITER_NOTES_PROMPT: &str = "\
You transcribe a student's handwritten or typed notes into clean LaTeX. Reproduce the \
content faithfully: keep the author's structure, notation and order, fix only obvious \
typos, and do not add material that is not in the notes. Output only the LaTeX body \
for this part with no preamble. Continue seamlessly from the previously generated text.";

const DEFAULT_WRITER_DOCUMENTS_PROMPT: &str = "\
You expand course documents (slide decks, possibly combined with student notes) into \
detailed lecture notes in LaTeX. Slides are terse: explain every bullet, state \
definitions and results precisely, and add the intermediate reasoning a lecturer would \
give. Where student notes cover the same topic, merge them instead of duplicating. \
Output only the LaTeX body for this part with no preamble. Continue seamlessly from the \
previously generated text.";

const DEFAULT_EDITOR_PROMPT: &str = "\
You are a meticulous LaTeX editor. Rewrite the LaTeX fragment you receive according to \
the student's request, using the lecture material only to check facts. Return only the \
rewritten fragment: no explanations, no markdown fences, no preamble. Keep every \
environment you open closed and every brace balanced.";

const DEFAULT_TUTOR_PROMPT: &str = "\
You are a patient professor answering a student's question about a lecture. Base your \
answer on the lecture material and notes provided; if they do not cover the question, \
say so. Answer in plain text without LaTeX markup, clearly and encouragingly.";

/// System instructions for every operation
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub writer_video: String,
    pub writer_notes: String,
    pub writer_documents: String,
    pub editor: String,
    pub tutor: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            writer_video: DEFAULT_WRITER_PROMPT.to_string(),
            writer_notes: DEFAULT_WRITER_NOTES_PROMPT.to_string(),
            writer_documents: DEFAULT_WRITER_DOCUMENTS_PROMPT.to_string(),
            editor: DEFAULT_EDITOR_PROMPT.to_string(),
            tutor: DEFAULT_TUTOR_PROMPT.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in prompts, overridden by files found in `dir`
    pub fn load(dir: Option<&Path>) -> Self {
        let mut prompts = Self::default();
        let Some(dir) = dir else {
            return prompts;
        };

        let slots: [(&str, &mut String); 5] = [
            (WRITER_PROMPT_FILE, &mut prompts.writer_video),
            (WRITER_NOTES_PROMPT_FILE, &mut prompts.writer_notes),
            (WRITER_DOCUMENTS_PROMPT_FILE, &mut prompts.writer_documents),
            (EDITOR_PROMPT_FILE, &mut prompts.editor),
            (TUTOR_PROMPT_FILE, &mut prompts.tutor),
        ];
        for (file, slot) in slots {
            let path = dir.join(file);
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::debug!(prompt = %path.display(), "Loaded prompt override");
                    *slot = text.trim().to_string();
                }
                Ok(_) => tracing::warn!(prompt = %path.display(), "Prompt override is empty, using built-in prompt"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(prompt = %path.display(), "No prompt override, using built-in prompt")
                }
                Err(e) => tracing::warn!(
                    prompt = %path.display(),
                    error = %e,
                    "Prompt override not readable, using built-in prompt"
                ),
            }
        }
        prompts
    }

    /// Writer instruction family for the input mode
    pub fn writer(&self, mode: InputMode) -> &str {
        match mode {
            InputMode::Video => &self.writer_video,
            InputMode::OnlyNotes => &self.writer_notes,
            InputMode::OnlySlides | InputMode::MixedDocuments => &self.writer_documents,
        }
    }
}

/// Append the inherited style block to a system instruction
pub fn with_style(instruction: &str, style: &StyleProfile) -> String {
    let block = style.render();
    if block.is_empty() {
        instruction.to_string()
    } else {
        format!("{}\n\n{}", instruction, block)
    }
}

/// Content parts for one generation unit
///
/// Text lines are grouped into text parts; each keyframe becomes a marker
/// line followed by the image itself, keeping images anchored at their
/// position among the spoken lines.
pub fn writer_parts(
    unit: &GenerationUnit,
    total_units: usize,
    evidence: &[EvidenceItem],
    previous_tail: &str,
) -> Vec<ModelPart> {
    let mut parts = Vec::new();
    let mut text = format!("=== PART {} of {} ===\n", unit.unit_index + 1, total_units);

    if !previous_tail.trim().is_empty() {
        text.push_str("PREVIOUSLY GENERATED TEXT (continue after it, do not repeat it):\n");
        text.push_str(previous_tail);
        text.push_str("\n\n");
    }
    if !unit.anchor_refs.is_empty() {
        let ids: Vec<String> = unit.anchor_refs.iter().map(ToString::to_string).collect();
        text.push_str(&format!("Slide images in this part: {}\n", ids.join(", ")));
    }
    text.push_str("MATERIAL:\n");

    push_evidence(&mut parts, &mut text, evidence);
    parts.push(ModelPart::Text(text));
    parts
}

/// Content parts for rewriting one region
pub fn editor_parts(target: &str, instruction: &str, grounding: &[EvidenceItem]) -> Vec<ModelPart> {
    let mut parts = Vec::new();
    let mut text = String::from("LECTURE MATERIAL FOR THIS REGION:\n");
    push_evidence(&mut parts, &mut text, grounding);
    text.push_str(&format!(
        "\nLATEX TO REWRITE:\n{}\n\nSTUDENT REQUEST:\n{}\n\nReturn only the rewritten LaTeX.",
        target, instruction
    ));
    parts.push(ModelPart::Text(text));
    parts
}

/// Text-only context block of one unit for the tutor
pub struct TutorContext<'a> {
    pub unit_index: usize,
    pub evidence: &'a [EvidenceItem],
    pub notes: &'a str,
}

/// Content parts for answering a question
pub fn tutor_parts(question: &str, context: &[TutorContext<'_>]) -> Vec<ModelPart> {
    let mut text = String::from("LECTURE MATERIAL:\n");
    for block in context {
        text.push_str(&format!("--- Part {} ---\n", block.unit_index + 1));
        for item in block.evidence.iter().filter(|i| i.text().is_some()) {
            text.push_str(&item.render_line());
            text.push('\n');
        }
        if !block.notes.trim().is_empty() {
            text.push_str("Notes:\n");
            text.push_str(block.notes);
            text.push('\n');
        }
    }
    text.push_str(&format!("\nSTUDENT QUESTION:\n{}", question));
    vec![ModelPart::Text(text)]
}

fn push_evidence(parts: &mut Vec<ModelPart>, text: &mut String, evidence: &[EvidenceItem]) {
    for item in evidence {
        text.push_str(&item.render_line());
        text.push('\n');
        if let Some(image) = item.image() {
            parts.push(ModelPart::Text(std::mem::take(text)));
            parts.push(ModelPart::Image(image.to_path_buf()));
        }
    }
}
