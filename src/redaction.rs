use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(
            r#"(?i)(api[_-]?key|access[_-]?token|refresh[_-]?token|id[_-]?token|token|client[_-]?secret|secret|password)["']?\s*[:=]\s*["']?([A-Za-z0-9_\-\./]{6,})["']?"#,
        )
        .expect("valid regex"),
        Regex::new(r"(?i)\b(bearer)\s+([A-Za-z0-9_\-\./]{8,})").expect("valid regex"),
        Regex::new(r"\b(ya29\.[A-Za-z0-9_\-\.]{8,})").expect("valid regex"),
        Regex::new(r"(1//[A-Za-z0-9_\-]{8,})").expect("valid regex"),
    ]
});

const MAX_REDACTED_LENGTH: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Redactor {
    aggressive: bool,
}

impl Redactor {
    pub fn new(aggressive: bool) -> Self {
        Self { aggressive }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        if self.aggressive {
            let normalized = result
                .split_whitespace()
                .map(|token| {
                    if token.len() > 48 && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                        redaction_count += 1;
                        "[REDACTED_LONG_TOKEN]".to_string()
                    } else {
                        token.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            result = normalized;
        }

        for pattern in SECRET_PATTERNS.iter() {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }

            redaction_count += matches;
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    if caps.len() < 3 {
                        return "[REDACTED]".to_string();
                    }
                    let key = caps
                        .get(1)
                        .map(|m| m.as_str())
                        .unwrap_or("secret")
                        .to_ascii_lowercase();
                    format!("{}=[REDACTED]", key)
                })
                .to_string();
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }

    /// Redacts and bounds provider-supplied text before it reaches logs or
    /// error messages returned to callers.
    pub fn scrub(&self, input: &str) -> String {
        let content = self.redact(input.trim()).content;
        if content.len() <= MAX_REDACTED_LENGTH {
            return content;
        }
        let mut end = MAX_REDACTED_LENGTH;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &content[..end])
    }
}
