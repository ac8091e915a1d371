//! Heuristics over captured agent scrollback.
//!
//! The agent prints no machine-readable status, so everything here keys off
//! its terminal rendering: a spinner glyph on the live status line and a
//! parenthesized metadata block like `(esc to interrupt · 54s · ↓ 2.7k tokens)`.
//! All functions are total; text that does not match yields empty strings.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

pub const PREVIEW_LINES: usize = 3;
pub const ACTION_MAX_CHARS: usize = 60;

/// Animation frames of the agent's spinner. `·` is also a frame but doubles as
/// the metadata separator, so it is left out.
pub const SPINNER_GLYPHS: &[char] = &['✻', '✽', '✶', '✳', '✢'];

const INTERRUPT_HINT: &str = "to interrupt";
const FIELD_SEPARATOR: char = '·';
const TOKENS_WORD: &str = "tokens";
const DURATION_UNITS: &[char] = &['s', 'm', 'h'];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaneSnapshot {
    pub preview: String,
    pub current_action: String,
    pub duration: String,
    pub tokens: String,
}

pub fn scrape_pane(text: &str) -> PaneSnapshot {
    let (duration, tokens) = extract_duration_and_tokens(text);
    PaneSnapshot {
        preview: trim_preview(text),
        current_action: extract_current_action(text),
        duration,
        tokens,
    }
}

/// Last three non-blank lines, in order.
pub fn trim_preview(text: &str) -> String {
    let lines: Vec<&str> = text
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(PREVIEW_LINES);
    lines[start..].join("\n")
}

/// Text after the spinner on the most recent spinner line.
pub fn extract_current_action(text: &str) -> String {
    let action = text.lines().rev().find_map(|line| {
        let index = line.find(SPINNER_GLYPHS)?;
        let glyph = line[index..].chars().next()?;
        Some(line[index + glyph.len_utf8()..].trim())
    });
    match action {
        Some(action) => ellipsize(action, ACTION_MAX_CHARS),
        None => String::new(),
    }
}

/// `(duration, tokens)` from the most recent live status line.
pub fn extract_duration_and_tokens(text: &str) -> (String, String) {
    let mut duration = String::new();
    let mut tokens = String::new();
    let Some(line) = text
        .lines()
        .rev()
        .find(|line| line.contains(INTERRUPT_HINT) && line.contains(FIELD_SEPARATOR))
    else {
        return (duration, tokens);
    };
    let Some(metadata) = metadata_segment(line) else {
        return (duration, tokens);
    };

    for part in metadata
        .split(FIELD_SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
    {
        if part.contains(TOKENS_WORD) {
            // Only the `<count> tokens` shape is a token count.
            if let Some(count) = part.strip_suffix(TOKENS_WORD) {
                if tokens.is_empty() && count.ends_with(char::is_whitespace) {
                    tokens = count.trim_end().to_string();
                }
            }
            continue;
        }
        if part.contains(INTERRUPT_HINT) || thinking_aside().is_match(part) {
            continue;
        }
        if duration.is_empty() && looks_like_duration(part) {
            duration = part.to_string();
        }
    }
    (duration, tokens)
}

/// The parenthesized group holding the interrupt hint. The action text before
/// it may carry parentheses of its own.
fn metadata_segment(line: &str) -> Option<&str> {
    let hint = line.find(INTERRUPT_HINT)?;
    let open = line[..hint].rfind('(')?;
    // Narrow panes can cut the closing paren off.
    Some(match line[hint..].find(')') {
        Some(offset) => &line[open + 1..hint + offset],
        None => &line[open + 1..],
    })
}

fn looks_like_duration(part: &str) -> bool {
    part.chars().any(|ch| ch.is_ascii_digit()) && part.contains(DURATION_UNITS)
}

fn thinking_aside() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^thought for \d").expect("valid regex"))
}

pub fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}
