//! Log formatting and output with ANSI colors and text wrapping
//!
//! Handles:
//! - Colorized console output with tag and level formatting
//! - Text wrapping at word boundaries
//! - Broken pipe handling for piped commands

use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LOG_TYPE_WIDTH: usize = 8;
const BRACKET_SPACE_WIDTH: usize = 3;
const TOTAL_PREFIX_WIDTH: usize = TAG_WIDTH + LOG_TYPE_WIDTH + BRACKET_SPACE_WIDTH * 2;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, log_type: &str, message: &str) {
    let time = Local::now().format("%H:%M:%S").to_string();
    let prefix = format!("{} ", time);

    let base_line = format!(
        "{}[{}] [{}] ",
        prefix.dimmed(),
        format_tag(&tag),
        format_log_type(log_type)
    );

    let base_length = (prefix.len() + TOTAL_PREFIX_WIDTH).max(strip_ansi_codes(&base_line).len());
    let available_space = if MAX_LINE_LENGTH > base_length {
        MAX_LINE_LENGTH - base_length
    } else {
        50
    };

    let message_chunks = wrap_text(message, available_space);

    print_stdout_safe(&format!("{}{}", base_line, message_chunks[0]));

    if message_chunks.len() > 1 {
        let continuation_prefix = " ".repeat(base_length);
        for chunk in &message_chunks[1..] {
            print_stdout_safe(&format!("{}{}", continuation_prefix, chunk));
        }
    }
}

/// Format a tag with appropriate color
fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::Realtime => label.bright_cyan().bold(),
        LogTag::Transport => label.bright_blue().bold(),
        LogTag::Queue => label.bright_magenta().bold(),
        LogTag::Router => label.bright_green().bold(),
        LogTag::Registry => label.bright_white().bold(),
        LogTag::Config => label.white().bold(),
        LogTag::System => label.bright_yellow().bold(),
    }
}

/// Format the level column with appropriate color
fn format_log_type(log_type: &str) -> ColoredString {
    let label = format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH);
    match log_type {
        "ERROR" => label.bright_red().bold(),
        "WARNING" => label.bright_yellow().bold(),
        "INFO" => label.bright_green(),
        "DEBUG" => label.bright_blue(),
        "VERBOSE" => label.dimmed(),
        _ => label.normal(),
    }
}

/// Wrap text at word boundaries, hard-splitting words longer than a line
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();

        if current_len > 0 && current_len + 1 + word_len > max_width {
            lines.push(std::mem::take(&mut current));
        }

        if word_len > max_width {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_width) {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                current = piece.iter().collect();
            }
            continue;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }

    lines
}

/// Remove ANSI escape sequences so widths can be measured
fn strip_ansi_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Print a line, exiting quietly when stdout is a closed pipe
fn print_stdout_safe(line: &str) {
    let mut handle = stdout().lock();
    if let Err(e) = writeln!(handle, "{}", line) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
}
