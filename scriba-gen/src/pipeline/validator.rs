// Structural Validator
//
// Concept: Decide whether a generated LaTeX fragment is well-formed enough to
// enter the document
// Synchronization: Accepts &str, outputs the list of structural issues
//
// A fragment passes when it is non-empty, its braces balance, every
// \begin{env} is closed by a matching \end{env} in LIFO order and inline `$`
// delimiters pair up. Escaped characters and `%` comments are ignored.

/// One structural problem found in a fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Empty,
    UnexpectedCloseBrace { offset: usize },
    UnclosedBraces(usize),
    UnclosedEnvironment(String),
    MismatchedEnvironment { expected: String, found: String },
    UnexpectedEnd(String),
    UnbalancedMath,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty output"),
            Self::UnexpectedCloseBrace { offset } => {
                write!(f, "closing brace without opening brace at byte {}", offset)
            }
            Self::UnclosedBraces(n) => write!(f, "{} unclosed brace(s)", n),
            Self::UnclosedEnvironment(env) => write!(f, "environment '{}' never closed", env),
            Self::MismatchedEnvironment { expected, found } => {
                write!(f, "\\end{{{}}} closes environment '{}'", found, expected)
            }
            Self::UnexpectedEnd(env) => write!(f, "\\end{{{}}} without matching \\begin", env),
            Self::UnbalancedMath => write!(f, "unbalanced $ math delimiters"),
        }
    }
}

/// Join issues into one human readable reason
pub fn describe(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// LaTeX fragment validator
#[derive(Debug, Default, Clone, Copy)]
pub struct StructureValidator;

impl StructureValidator {
    /// Check a fragment; `Ok` when no issues were found
    pub fn validate(&self, text: &str) -> Result<(), Vec<ValidationIssue>> {
        let body = strip_comments(text);
        if body.trim().is_empty() {
            return Err(vec![ValidationIssue::Empty]);
        }

        let mut issues = Vec::new();
        let mut depth = 0usize;
        let mut dollars = 0usize;
        let mut environments: Vec<String> = Vec::new();
        let bytes = body.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\\' => {
                    let rest = &body[i + 1..];
                    if let Some(env) = environment_name(rest, "begin") {
                        environments.push(env);
                    } else if let Some(env) = environment_name(rest, "end") {
                        match environments.pop() {
                            Some(open) if open == env => {}
                            Some(open) => issues.push(ValidationIssue::MismatchedEnvironment {
                                expected: open,
                                found: env,
                            }),
                            None => issues.push(ValidationIssue::UnexpectedEnd(env)),
                        }
                    }
                    // Escaped special character: skip it
                    let escapes = matches!(
                        bytes.get(i + 1),
                        Some(b'{' | b'}' | b'$' | b'%' | b'\\' | b'&' | b'#' | b'_')
                    );
                    i += if escapes { 2 } else { 1 };
                    continue;
                }
                b'{' => depth += 1,
                b'}' => match depth.checked_sub(1) {
                    Some(d) => depth = d,
                    None => issues.push(ValidationIssue::UnexpectedCloseBrace { offset: i }),
                },
                b'$' => dollars += 1,
                _ => {}
            }
            i += 1;
        }

        if depth > 0 {
            issues.push(ValidationIssue::UnclosedBraces(depth));
        }
        if dollars % 2 != 0 {
            issues.push(ValidationIssue::UnbalancedMath);
        }
        issues.extend(environments.into_iter().map(ValidationIssue::UnclosedEnvironment));

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// `begin{name}` / `end{name}` at the start of `rest`
fn environment_name(rest: &str, keyword: &str) -> Option<String> {
    let after = rest.strip_prefix(keyword)?.strip_prefix('{')?;
    let close = after.find('}')?;
    Some(after[..close].trim().to_string())
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let bytes = line.as_bytes();
        let mut cut = line.len();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 1,
                b'%' => {
                    cut = i;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

/// Strip markdown code fences the model sometimes wraps around LaTeX
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(nl) => &text[nl + 1..],
            None => "",
        };
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str) -> Result<(), Vec<ValidationIssue>> {
        StructureValidator.validate(text)
    }

    #[test]
    fn test_well_formed_fragment() {
        let text = r"\section{Limits}
Let $x \in \R$ and \{a, b\} a set. % comment with { brace
\begin{theorem}
\begin{equation}
f(x) = \frac{1}{x}
\end{equation}
\end{theorem}";
        assert_eq!(check(text), Ok(()));
    }

    #[test]
    fn test_empty_and_comment_only_rejected() {
        assert_eq!(check("  \n"), Err(vec![ValidationIssue::Empty]));
        assert_eq!(check("% only a comment"), Err(vec![ValidationIssue::Empty]));
    }

    #[test]
    fn test_brace_problems() {
        assert_eq!(check(r"\textbf{open"), Err(vec![ValidationIssue::UnclosedBraces(1)]));
        assert!(matches!(
            check("close}").unwrap_err()[0],
            ValidationIssue::UnexpectedCloseBrace { offset: 5 }
        ));
    }

    #[test]
    fn test_environment_nesting() {
        let issues = check(r"\begin{a}\begin{b}\end{a}\end{b}").unwrap_err();
        assert_eq!(
            issues[0],
            ValidationIssue::MismatchedEnvironment {
                expected: "b".to_string(),
                found: "a".to_string()
            }
        );

        assert_eq!(
            check(r"\begin{proof} done"),
            Err(vec![ValidationIssue::UnclosedEnvironment("proof".to_string())])
        );
        assert_eq!(
            check(r"text \end{proof}"),
            Err(vec![ValidationIssue::UnexpectedEnd("proof".to_string())])
        );
    }

    #[test]
    fn test_math_delimiters() {
        assert_eq!(check(r"$a$ and $$b$$ cost \$5"), Ok(()));
        assert_eq!(check("$a"), Err(vec![ValidationIssue::UnbalancedMath]));
    }

    #[test]
    fn test_clean_response_strips_fences() {
        assert_eq!(clean_response("```latex\n\\section{A}\n```"), "\\section{A}");
        assert_eq!(clean_response("```\nplain\n```\n"), "plain");
        assert_eq!(clean_response("  no fences "), "no fences");
    }
}
