//! LCD message templates
//!
//! A template is literal text with `{value}` placeholders. `{value:.N}` (or
//! `{value:.Nf}`) prints numeric readings with `N` decimals; text readings are
//! inserted as they are.

use super::mapping::MappingError;
use crate::simulator::VariableValue;
use std::fmt::Write;

const PLACEHOLDER: &str = "{value";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Value { precision: Option<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTemplate {
    segments: Vec<Segment>,
}

impl DisplayTemplate {
    pub fn parse(template: &str) -> Result<Self, MappingError> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find(PLACEHOLDER) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + PLACEHOLDER.len()..];
            let end = after.find('}').ok_or_else(|| {
                MappingError::Config(format!("unterminated placeholder in {:?}", template))
            })?;
            segments.push(Segment::Value {
                precision: parse_format(&after[..end], template)?,
            });
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, value: &VariableValue) -> String {
        let mut text = String::new();
        for segment in &self.segments {
            match (segment, value) {
                (Segment::Literal(literal), _) => text.push_str(literal),
                (Segment::Value { precision: Some(digits) }, VariableValue::Number(number)) => {
                    let _ = write!(text, "{:.*}", *digits, number);
                }
                (Segment::Value { .. }, value) => {
                    let _ = write!(text, "{}", value);
                }
            }
        }
        text
    }
}

/// `""`, `":.N"` or `":.Nf"`
fn parse_format(options: &str, template: &str) -> Result<Option<usize>, MappingError> {
    if options.is_empty() {
        return Ok(None);
    }
    let digits = options
        .strip_prefix(":.")
        .map(|digits| digits.strip_suffix('f').unwrap_or(digits))
        .ok_or_else(|| {
            MappingError::Config(format!("unsupported format {:?} in {:?}", options, template))
        })?;
    digits.parse().map(Some).map_err(|_| {
        MappingError::Config(format!("invalid precision {:?} in {:?}", digits, template))
    })
}
