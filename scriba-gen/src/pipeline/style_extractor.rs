// Context Inheritance Extractor
//
// Concept: Derive a compact style profile from the previous lesson's LaTeX
// Synchronization: Accepts Option<&str>, outputs Option<StyleProfile>
//
// Parsing is best-effort. Command heads are located with regular expressions
// and their arguments are read with a brace-balancing scanner; a fragment
// whose arguments do not balance is skipped with a warning and extraction
// continues with the rest of the document.

use crate::pipeline::types::{MacroDefinition, SectionEntry, SectionLevel, StyleProfile};
use regex::Regex;
use std::collections::HashSet;

/// Upper bound on inherited terminology entries
const MAX_TERMS: usize = 40;
/// Longest bold/emphasised phrase still treated as a term
const MAX_TERM_CHARS: usize = 60;

/// Style profile extractor
pub struct StyleExtractor {
    newcommand: Regex,
    math_operator: Regex,
    def: Regex,
    section: Regex,
    term: Regex,
    documentclass: Regex,
    usepackage: Regex,
    newtheorem: Regex,
}

impl Default for StyleExtractor {
    fn default() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("static pattern is valid");
        Self {
            newcommand: compile(r"\\(newcommand|renewcommand|providecommand)\*?"),
            math_operator: compile(r"\\DeclareMathOperator\*?"),
            def: compile(r"\\def\s*\\([A-Za-z@]+)"),
            section: compile(r"\\(part|chapter|section|subsection|subsubsection)\*?\s*(\[[^\]]*\])?\s*\{"),
            term: compile(r"\\(textbf|emph)\{"),
            documentclass: compile(r"\\documentclass\s*(\[[^\]]*\])?\s*\{([^}]*)\}"),
            usepackage: compile(r"\\usepackage\s*(\[[^\]]*\])?\s*\{([^}]*)\}"),
            newtheorem: compile(r"\\newtheorem\*?\s*\{([^}]*)\}"),
        }
    }
}

impl StyleExtractor {
    /// Extract a profile from the prior document, if one was supplied
    ///
    /// Blank input counts as "no prior document".
    pub fn extract(&self, prior: Option<&str>) -> Option<StyleProfile> {
        let prior = prior.filter(|p| !p.trim().is_empty())?;
        let text = strip_comments(prior);

        let mut profile = StyleProfile::default();
        self.collect_macros(&text, &mut profile);
        self.collect_sections(&text, &mut profile);
        self.collect_terms(&text, &mut profile);
        profile.descriptor = self.describe(&text, &profile);

        tracing::info!(
            macros = profile.macros.len(),
            sections = profile.sections.len(),
            terms = profile.terminology.len(),
            "Style profile extracted from prior document"
        );

        Some(profile)
    }

    fn collect_macros(&self, text: &str, profile: &mut StyleProfile) {
        for caps in self.newcommand.captures_iter(text) {
            let (Some(head), Some(command)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            match parse_newcommand(text, head.end()) {
                Some((name, arity, body)) => {
                    profile.macros.insert(
                        name,
                        MacroDefinition {
                            command: command.as_str().to_string(),
                            arity,
                            body,
                        },
                    );
                }
                None => warn_skipped("macro definition", text, head.start()),
            }
        }

        for head in self.math_operator.find_iter(text) {
            let parsed = read_group(text, head.end()).and_then(|(name, after_name)| {
                let name = name.trim().strip_prefix('\\')?.to_string();
                let (body, _) = read_group(text, after_name)?;
                Some((name, body))
            });
            match parsed {
                Some((name, body)) => {
                    profile.macros.insert(
                        name,
                        MacroDefinition {
                            command: "DeclareMathOperator".to_string(),
                            arity: None,
                            body,
                        },
                    );
                }
                None => warn_skipped("math operator", text, head.start()),
            }
        }

        for caps in self.def.captures_iter(text) {
            let (Some(head), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let rest = &text[head.end()..];
            let params: String = rest
                .chars()
                .take_while(|c| *c == '#' || c.is_ascii_digit() || c.is_whitespace())
                .collect();
            let arity = params.matches('#').count();
            match read_group(text, head.end() + params.len()) {
                Some((body, _)) => {
                    profile.macros.insert(
                        name.as_str().to_string(),
                        MacroDefinition {
                            command: "def".to_string(),
                            arity: (arity > 0).then(|| u8::try_from(arity).unwrap_or(u8::MAX)),
                            body,
                        },
                    );
                }
                None => warn_skipped("\\def", text, head.start()),
            }
        }
    }

    fn collect_sections(&self, text: &str, profile: &mut StyleProfile) {
        let mut seen = HashSet::new();
        for caps in self.section.captures_iter(text) {
            let (Some(head), Some(command)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(level) = SectionLevel::from_command(command.as_str()) else {
                continue;
            };
            // The head match ends just after the opening brace
            match read_group(text, head.end() - 1) {
                Some((title, _)) => {
                    let title = collapse_whitespace(&title);
                    if !title.is_empty() && seen.insert((level, title.clone())) {
                        profile.sections.push(SectionEntry { level, title });
                    }
                }
                None => warn_skipped("section title", text, head.start()),
            }
        }
    }

    fn collect_terms(&self, text: &str, profile: &mut StyleProfile) {
        let mut seen = HashSet::new();
        for head in self.term.find_iter(text) {
            if profile.terminology.len() >= MAX_TERMS {
                break;
            }
            let Some((term, _)) = read_group(text, head.end() - 1) else {
                continue;
            };
            let term = collapse_whitespace(&term);
            if term.is_empty() || term.contains('\\') || term.chars().count() > MAX_TERM_CHARS {
                continue;
            }
            if seen.insert(term.to_lowercase()) {
                profile.terminology.push(term);
            }
        }
    }

    fn describe(&self, text: &str, profile: &StyleProfile) -> String {
        let mut parts = Vec::new();

        if let Some(class) = self
            .documentclass
            .captures(text)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().trim().to_string())
        {
            parts.push(format!("document class {}", class));
        }

        let packages: Vec<String> = self
            .usepackage
            .captures_iter(text)
            .filter_map(|c| c.get(2))
            .flat_map(|m| m.as_str().split(','))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if !packages.is_empty() {
            parts.push(format!("packages {}", packages.join(", ")));
        }

        let theorems: Vec<String> = self
            .newtheorem
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect();
        if !theorems.is_empty() {
            parts.push(format!("theorem environments {}", theorems.join(", ")));
        }

        if let Some(deepest) = profile.sections.iter().map(|s| s.level).max() {
            parts.push(format!("sectioning down to \\{}", deepest.command()));
        }

        parts.join("; ")
    }
}

/// Parse the tail of `\newcommand`: `{\name}[n][default]{body}` or `\name...`
fn parse_newcommand(text: &str, start: usize) -> Option<(String, Option<u8>, String)> {
    let mut pos = skip_whitespace(text, start);
    let name = match text[pos..].chars().next()? {
        '{' => {
            let (inner, after) = read_group(text, pos)?;
            pos = after;
            inner.trim().strip_prefix('\\')?.to_string()
        }
        '\\' => {
            let name: String = text[pos + 1..]
                .chars()
                .take_while(|c| c.is_ascii_alphabetic() || *c == '@')
                .collect();
            if name.is_empty() {
                return None;
            }
            pos += 1 + name.len();
            name
        }
        _ => return None,
    };

    pos = skip_whitespace(text, pos);
    let mut arity = None;
    if text[pos..].starts_with('[') {
        let (count, after) = read_bracket(text, pos)?;
        arity = Some(count.trim().parse::<u8>().ok()?);
        pos = skip_whitespace(text, after);
        // Optional default value of the first argument
        if text[pos..].starts_with('[') {
            let (_, after_default) = read_bracket(text, pos)?;
            pos = skip_whitespace(text, after_default);
        }
    }

    let (body, _) = read_group(text, pos)?;
    Some((name, arity, body))
}

/// Read a brace-balanced group starting at `open` (which must be `{`)
///
/// Returns the inner text and the byte offset just past the closing brace.
/// Escaped braces (`\{`, `\}`) do not count.
fn read_group(text: &str, open: usize) -> Option<(String, usize)> {
    let open = skip_whitespace(text, open);
    let mut chars = text.get(open..)?.char_indices();
    if chars.next()?.1 != '{' {
        return None;
    }

    let mut depth = 1usize;
    let mut escaped = false;
    for (offset, c) in chars {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let inner = &text[open + 1..open + offset];
                    return Some((inner.to_string(), open + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Read `[...]` starting at `open`; returns inner text and offset after `]`
fn read_bracket(text: &str, open: usize) -> Option<(String, usize)> {
    let rest = text.get(open..)?;
    if !rest.starts_with('[') {
        return None;
    }
    let close = rest.find(']')?;
    Some((rest[1..close].to_string(), open + close + 1))
}

fn skip_whitespace(text: &str, pos: usize) -> usize {
    let rest = text.get(pos..).unwrap_or("");
    pos + (rest.len() - rest.trim_start().len())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop `%` comments, keeping escaped `\%`
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut escaped = false;
        let mut cut = line.len();
        for (i, c) in line.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '%' => {
                    cut = i;
                    break;
                }
                _ => {}
            }
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

fn warn_skipped(what: &str, text: &str, at: usize) {
    let excerpt: String = text[at..].chars().take(60).collect();
    tracing::warn!(
        offset = at,
        "Skipping malformed {} in prior document: {}",
        what,
        excerpt.replace('\n', " ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIOR: &str = r#"
\documentclass[11pt]{article}
\usepackage{amsmath, amssymb}
\newtheorem{theorem}{Theorem}
\newcommand{\R}{\mathbb{R}}
\newcommand{\norm}[1]{\left\lVert #1 \right\rVert}
\renewcommand*\vec[1]{\mathbf{#1}}
\DeclareMathOperator{\rank}{rank}
\def\eps{\varepsilon}
% \newcommand{\ignored}{commented out}
\begin{document}
\section{Vector spaces}
A \textbf{vector space} over $\R$ is ...
\subsection{Bases}
Every \emph{basis} has the same size.
\section{Vector spaces}
\section{Linear maps}
\end{document}
"#;

    #[test]
    fn test_no_prior_document_yields_none() {
        let extractor = StyleExtractor::default();
        assert!(extractor.extract(None).is_none());
        assert!(extractor.extract(Some("   \n")).is_none());
    }

    #[test]
    fn test_macros_extracted() {
        let profile = StyleExtractor::default().extract(Some(PRIOR)).unwrap();

        assert_eq!(profile.macros["R"].body, "\\mathbb{R}");
        assert_eq!(profile.macros["norm"].arity, Some(1));
        assert_eq!(profile.macros["vec"].command, "renewcommand");
        assert_eq!(profile.macros["rank"].command, "DeclareMathOperator");
        assert_eq!(profile.macros["eps"].body, "\\varepsilon");
        assert!(!profile.macros.contains_key("ignored"));
    }

    #[test]
    fn test_sections_in_first_appearance_order() {
        let profile = StyleExtractor::default().extract(Some(PRIOR)).unwrap();
        let titles: Vec<&str> = profile.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Vector spaces", "Bases", "Linear maps"]);
        assert_eq!(profile.sections[1].level, SectionLevel::Subsection);
    }

    #[test]
    fn test_terms_and_descriptor() {
        let profile = StyleExtractor::default().extract(Some(PRIOR)).unwrap();
        assert_eq!(profile.terminology, vec!["vector space", "basis"]);
        assert!(profile.descriptor.contains("document class article"));
        assert!(profile.descriptor.contains("amsmath, amssymb"));
        assert!(profile.descriptor.contains("theorem environments theorem"));
    }

    #[test]
    fn test_malformed_fragment_skipped_rest_kept() {
        let prior = "\\newcommand{\\broken}{unterminated\n\\section{Still here}\n";
        let profile = StyleExtractor::default().extract(Some(prior)).unwrap();
        assert!(profile.macros.is_empty());
        assert_eq!(profile.sections.len(), 1);
        assert_eq!(profile.sections[0].title, "Still here");
    }

    #[test]
    fn test_read_group_ignores_escaped_braces() {
        let (inner, end) = read_group(r"{a\{b\}c}rest", 0).unwrap();
        assert_eq!(inner, r"a\{b\}c");
        assert_eq!(end, 9);
    }
}
