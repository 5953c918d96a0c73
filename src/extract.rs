//! Structured-output extraction from free-form model text
//!
//! Three outcomes, in preference order: a fenced ```json block that parses,
//! a bare JSON object that parses, or the unparsed text itself.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A fenced block parsed successfully.
    Fenced { raw: String, value: Value },
    /// The text (or a balanced `{ ... }` group inside it) parsed without a fence.
    Raw { raw: String, value: Value },
    /// Nothing parsed; carries the original text.
    Unparsed { text: String },
}

impl Extraction {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Extraction::Fenced { value, .. } | Extraction::Raw { value, .. } => Some(value),
            Extraction::Unparsed { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Extraction::Fenced { value, .. } | Extraction::Raw { value, .. } => Some(value),
            Extraction::Unparsed { .. } => None,
        }
    }

    /// The text carried forward as the candidate's answer.
    pub fn text(&self) -> &str {
        match self {
            Extraction::Fenced { raw, .. } | Extraction::Raw { raw, .. } => raw,
            Extraction::Unparsed { text } => text,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Extraction::Fenced { .. } => "fenced",
            Extraction::Raw { .. } => "raw",
            Extraction::Unparsed { .. } => "unparsed",
        }
    }
}

pub fn extract_structured(text: &str) -> Extraction {
    let blocks = fenced_blocks(text);
    let json_first = blocks
        .iter()
        .filter(|b| b.is_json)
        .chain(blocks.iter().filter(|b| !b.is_json));
    for block in json_first {
        if let Some(value) = parse_object(block.body) {
            return Extraction::Fenced {
                raw: block.body.to_string(),
                value,
            };
        }
    }

    let trimmed = text.trim();
    if let Some(value) = parse_object(trimmed) {
        return Extraction::Raw {
            raw: trimmed.to_string(),
            value,
        };
    }

    // JSON wrapped in prose: first balanced { ... } group that parses
    let mut rest = trimmed;
    while let Some((offset, fragment)) = balanced_object(rest) {
        if let Some(value) = parse_object(fragment) {
            return Extraction::Raw {
                raw: fragment.to_string(),
                value,
            };
        }
        rest = &rest[offset + 1..];
    }

    Extraction::Unparsed {
        text: text.to_string(),
    }
}

struct FencedBlock<'a> {
    is_json: bool,
    body: &'a str,
}

/// Every closed ``` fence in order, with its language tag checked.
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(close) = after.find("```") else {
            break;
        };
        let inner = &after[..close];
        rest = &after[close + 3..];

        let (tag, body) = match inner.find('\n') {
            Some(i) => (inner[..i].trim(), &inner[i + 1..]),
            None => ("", inner),
        };
        if tag.starts_with('{') {
            // Content on the fence line itself
            blocks.push(FencedBlock {
                is_json: false,
                body: inner.trim(),
            });
            continue;
        }
        blocks.push(FencedBlock {
            is_json: tag.eq_ignore_ascii_case("json"),
            body: body.trim(),
        });
    }

    blocks
}

/// First balanced `{ ... }` group in `text`, ignoring braces inside strings.
/// Returns the byte offset of its opening brace alongside the fragment.
fn balanced_object(text: &str) -> Option<(usize, &str)> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start_idx = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = start_idx {
                        return Some((start, &text[start..=i]));
                    }
                }
            }
            _ => {}
        }
    }

    None
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_is_preferred() {
        let text = "Here is the result:\n```json\n{\"status\": \"APPROVED\"}\n```\nAlso {\"status\": \"REVISE\"}";
        let out = extract_structured(text);
        assert_eq!(out.kind(), "fenced");
        assert_eq!(out.value().unwrap()["status"], "APPROVED");
        assert_eq!(out.text(), "{\"status\": \"APPROVED\"}");
    }

    #[test]
    fn test_untagged_fence() {
        let out = extract_structured("```\n{\"a\": 1}\n```");
        assert_eq!(out.kind(), "fenced");
        assert_eq!(out.value().unwrap()["a"], 1);
    }

    #[test]
    fn test_raw_json() {
        let out = extract_structured("  {\"environmental_score\": 42}  ");
        assert_eq!(out.kind(), "raw");
        assert_eq!(out.value().unwrap()["environmental_score"], 42);
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let out = extract_structured("Final answer: {\"ticker\": \"XOM\"} -- end");
        assert_eq!(out.kind(), "raw");
        assert_eq!(out.text(), "{\"ticker\": \"XOM\"}");
    }

    #[test]
    fn test_broken_fence_is_unparsed() {
        let text = "```json\n{\"ticker\": \"XOM\",}\n```";
        let out = extract_structured(text);
        assert_eq!(out.kind(), "unparsed");
        assert_eq!(out.text(), text);
    }

    #[test]
    fn test_unparsed_keeps_text() {
        let out = extract_structured("I could not complete the assessment.");
        assert_eq!(out.kind(), "unparsed");
        assert!(out.value().is_none());
        assert_eq!(out.text(), "I could not complete the assessment.");
    }

    #[test]
    fn test_json_fence_found_after_other_fence() {
        let text = "Lookup:\n```python\nd = {}\n```\nFinal:\n```json\n{\"environmental_score\": 20}\n```";
        let out = extract_structured(text);
        assert_eq!(out.kind(), "fenced");
        assert_eq!(out.value().unwrap()["environmental_score"], 20);
    }

    #[test]
    fn test_json_fence_wins_over_earlier_untagged_fence() {
        let text = "```\n{\"draft\": true}\n```\n```json\n{\"draft\": false}\n```";
        let out = extract_structured(text);
        assert_eq!(out.value().unwrap()["draft"], false);
    }

    #[test]
    fn test_prose_with_several_brace_groups() {
        let text = "Draft {score: 10} superseded by {\"environmental_score\": 20} and {\"environmental_score\": 30}";
        let out = extract_structured(text);
        assert_eq!(out.kind(), "raw");
        assert_eq!(out.text(), "{\"environmental_score\": 20}");
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let out = extract_structured("Result: {\"summary\": \"uses } and { freely\", \"n\": 1} done");
        assert_eq!(out.kind(), "raw");
        assert_eq!(out.value().unwrap()["n"], 1);
    }

    #[test]
    fn test_non_object_json_is_unparsed() {
        assert_eq!(extract_structured("[1, 2, 3]").kind(), "unparsed");
    }
}
