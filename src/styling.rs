//! Consolidated styling module for terminal output.
//!
//! Uses the anstyle ecosystem:
//! - anstream for auto-detecting color support
//! - anstyle for composable styling
//! - semantic style constants for domain-specific use
//!
//! ## stdout vs stderr
//!
//! - **stdout**: all gimera output (messages, errors, warnings, data)
//! - **stderr**: all child process output (git, patch, pre-commit)

use anstyle::{AnsiColor, Color, Style};
use unicode_width::UnicodeWidthStr;

pub use anstream::{eprint, eprintln, print, println, stderr, stdout};
pub use anstyle::Style as AnstyleStyle;

/// Error style (red) - use as `{ERROR}text{ERROR:#}`
pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));

/// Error style, bold - for the offending path/name inside an error message.
pub const ERROR_BOLD: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Red)))
    .bold();

/// Warning style (yellow) - use as `{WARNING}text{WARNING:#}`
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

/// Hint style (dimmed) - use as `{HINT}text{HINT:#}`
pub const HINT: Style = Style::new().dimmed();

/// Addition style for diffs (green)
pub const ADDITION: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

/// Deletion style for diffs (red)
pub const DELETION: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));

/// Cyan style - use as `{CYAN}text{CYAN:#}`
pub const CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

/// Green style, bold - used for success headlines.
pub const GREEN_BOLD: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Green)))
    .bold();

pub const PROGRESS_EMOJI: &str = "\u{1f504}";
pub const SUCCESS_EMOJI: &str = "\u{2705}";
pub const ERROR_EMOJI: &str = "\u{274c}";
pub const WARNING_EMOJI: &str = "\u{1f7e1}";
pub const HINT_EMOJI: &str = "\u{1f4a1}";

const DEFAULT_TERMINAL_WIDTH: usize = 80;

/// Checks `COLUMNS` first (scripts, tests), falls back to 80.
fn get_terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|cols| cols.parse::<usize>().ok())
        .unwrap_or(DEFAULT_TERMINAL_WIDTH)
}

fn wrap_text_at_width(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![text.to_string()];
    }

    if text.width() <= max_width {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_width = 0;

    for word in text.split_whitespace() {
        let word_width = word.width();
        if current_line.is_empty() {
            current_line = word.to_string();
            current_width = word_width;
        } else {
            let new_width = current_width + 1 + word_width;
            if new_width <= max_width {
                current_line.push(' ');
                current_line.push_str(word);
                current_width = new_width;
            } else {
                lines.push(current_line);
                current_line = word.to_string();
                current_width = word_width;
            }
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

/// Formats text with a gutter (background-colored single space) on each line.
///
/// Used to set off quoted content such as patch hunks or manifest snippets
/// in error and diagnostic output. Wraps at word boundaries to terminal
/// width (or `max_width`, mainly for tests).
pub fn format_with_gutter(content: &str, left_margin: &str, max_width: Option<usize>) -> String {
    let gutter = Style::new().bg_color(Some(Color::Ansi(AnsiColor::Black)));
    let mut output = String::new();

    let term_width = max_width.unwrap_or_else(get_terminal_width);
    let left_margin_width = left_margin.width();
    let available_width = term_width.saturating_sub(3 + left_margin_width);

    for line in content.lines() {
        for wrapped_line in wrap_text_at_width(line, available_width) {
            output.push_str(&format!("{left_margin}{gutter} {gutter:#}  {wrapped_line}\n"));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_text_no_wrapping_needed() {
        assert_eq!(wrap_text_at_width("short line", 50), vec!["short line"]);
    }

    #[test]
    fn wrap_text_at_word_boundary() {
        let text = "This is a very long line that needs to be wrapped at word boundaries";
        let result = wrap_text_at_width(text, 30);
        assert!(result.len() > 1);
        for line in &result {
            assert!(line.width() <= 30 || !line.contains(' '));
        }
        let rejoined = result.join(" ");
        assert_eq!(
            rejoined.split_whitespace().collect::<Vec<_>>(),
            text.split_whitespace().collect::<Vec<_>>()
        );
    }

    #[test]
    fn wrap_text_single_long_word() {
        let result = wrap_text_at_width("verylongwordthatcannotbewrapped", 10);
        assert_eq!(result, vec!["verylongwordthatcannotbewrapped"]);
    }

    #[test]
    fn format_with_gutter_wraps_and_preserves_lines() {
        let multi_line = "Line 1\nLine 2\nLine 3";
        let result = format_with_gutter(multi_line, "", None);
        assert!(result.contains("Line 1"));
        assert!(result.contains("Line 2"));
        assert!(result.contains("Line 3"));
        for line in result.lines() {
            assert!(line.contains("\x1b[40m"));
        }
    }

    #[test]
    fn format_with_gutter_wraps_long_text_at_fixed_width() {
        let long_text = "This is a very long commit message that would normally overflow the terminal width and break the gutter formatting, but now it should wrap nicely at word boundaries.";
        let result = format_with_gutter(long_text, "", Some(80));
        assert!(result.lines().count() > 1);
    }
}
