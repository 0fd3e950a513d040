//! Command templates with positional placeholders.
//!
//! A template is parsed once per dispatch pass and rendered per row, so the
//! arity check runs against each row's own field count.
//!
//! Syntax:
//! - `{N}` inserts field `N` of the row (zero based)
//! - `{}` inserts the next field in order: the first `{}` is field 0,
//!   the second field 1, and so on
//! - `{{` and `}}` produce literal braces
//!
//! Numbered and automatic placeholders cannot be mixed in one template.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::batch::{ParameterRow, RowId};

/// Errors related to command templates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("row {row} has {arity} field(s) but the template references {{{index}}}")]
    ArityMismatch {
        row: RowId,
        index: usize,
        arity: usize,
    },

    #[error("malformed template at byte {position}: {reason}")]
    Malformed { position: usize, reason: String },

    #[error("unsupported placeholder {{{name}}}: only positional indices are allowed")]
    UnsupportedPlaceholder { name: String },
}

/// Coarse class of a [`TemplateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateErrorKind {
    ArityMismatch,
    Malformed,
    UnsupportedPlaceholder,
}

impl TemplateError {
    pub fn kind(&self) -> TemplateErrorKind {
        match self {
            Self::ArityMismatch { .. } => TemplateErrorKind::ArityMismatch,
            Self::Malformed { .. } => TemplateErrorKind::Malformed,
            Self::UnsupportedPlaceholder { .. } => TemplateErrorKind::UnsupportedPlaceholder,
        }
    }

    fn malformed(position: usize, reason: &str) -> Self {
        Self::Malformed {
            position,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Numbering {
    Unknown,
    Manual,
    Automatic,
}

/// A parsed command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut numbering = Numbering::Unknown;
        let mut next_auto = 0usize;
        let mut chars = source.char_indices().peekable();

        while let Some((position, ch)) = chars.next() {
            match ch {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }

                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(TemplateError::malformed(position, "nested '{' inside placeholder")),
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(TemplateError::malformed(position, "unterminated placeholder"));
                    }

                    let index = if name.is_empty() {
                        if numbering == Numbering::Manual {
                            return Err(TemplateError::malformed(
                                position,
                                "cannot switch from numbered to automatic placeholders",
                            ));
                        }
                        numbering = Numbering::Automatic;
                        next_auto += 1;
                        next_auto - 1
                    } else if name.bytes().all(|b| b.is_ascii_digit()) {
                        if numbering == Numbering::Automatic {
                            return Err(TemplateError::malformed(
                                position,
                                "cannot switch from automatic to numbered placeholders",
                            ));
                        }
                        numbering = Numbering::Manual;
                        name.parse::<usize>()
                            .map_err(|_| TemplateError::UnsupportedPlaceholder { name: name.clone() })?
                    } else {
                        return Err(TemplateError::UnsupportedPlaceholder { name });
                    };

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(index));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(TemplateError::malformed(position, "single '}' outside placeholder"));
                    }
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Substitute a row's values into the placeholders
    pub fn render(&self, row: &ParameterRow) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(index) => {
                    let value = row.values.get(*index).ok_or(TemplateError::ArityMismatch {
                        row: row.id,
                        index: *index,
                        arity: row.arity(),
                    })?;
                    rendered.push_str(value);
                }
            }
        }
        Ok(rendered)
    }

    /// Highest field index referenced, if any
    pub fn max_index(&self) -> Option<usize> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Field(index) => Some(*index),
                Segment::Literal(_) => None,
            })
            .max()
    }

    /// Minimum number of fields a row needs for this template
    pub fn required_arity(&self) -> usize {
        self.max_index().map_or(0, |index| index + 1)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for CommandTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse `template` and render it against `row` in one step
pub fn render(template: &str, row: &ParameterRow) -> Result<String, TemplateError> {
    CommandTemplate::parse(template)?.render(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> ParameterRow {
        ParameterRow::new(1, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_positional_substitution() {
        let rendered = render("cp {0} {1}/{0}", &row(&["a.txt", "out"])).unwrap();
        assert_eq!(rendered, "cp a.txt out/a.txt");
    }

    #[test]
    fn test_automatic_placeholders() {
        let rendered = render("{}-{}", &row(&["x", "y"])).unwrap();
        assert_eq!(rendered, "x-y");
    }

    #[test]
    fn test_escaped_braces() {
        let rendered = render("awk '{{print $1}}' {0}", &row(&["f"])).unwrap();
        assert_eq!(rendered, "awk '{print $1}' f");
    }

    #[test]
    fn test_arity_mismatch() {
        let err = render("{0}-{1}-{2}", &row(&["a", "b"])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::ArityMismatch {
                row: 1,
                index: 2,
                arity: 2
            }
        );
        assert_eq!(err.kind(), TemplateErrorKind::ArityMismatch);
    }

    #[test]
    fn test_malformed_templates() {
        for source in ["echo {0", "echo }", "echo {0{1}}", "{0} {}", "{} {0}"] {
            let err = CommandTemplate::parse(source).unwrap_err();
            assert_eq!(err.kind(), TemplateErrorKind::Malformed, "{source}");
        }
    }

    #[test]
    fn test_named_placeholder_rejected() {
        let err = CommandTemplate::parse("echo {name}").unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnsupportedPlaceholder {
                name: "name".to_string()
            }
        );
    }

    #[test]
    fn test_required_arity() {
        assert_eq!(CommandTemplate::parse("ls").unwrap().required_arity(), 0);
        assert_eq!(CommandTemplate::parse("{3} {1}").unwrap().required_arity(), 4);
        assert_eq!(CommandTemplate::parse("{} {} {}").unwrap().max_index(), Some(2));
    }

    #[test]
    fn test_template_is_reusable_across_arity() {
        let template = CommandTemplate::parse("echo {0}").unwrap();
        assert_eq!(template.render(&row(&["a"])).unwrap(), "echo a");
        assert_eq!(template.render(&row(&["b", "c"])).unwrap(), "echo b");
        assert!(template.render(&row(&[])).is_err());
    }
}
