//! Display formatting for answers that are replayed line by line.

use std::sync::LazyLock;

use regex_lite::Regex;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("paragraph pattern is valid"));

const FENCE: &str = "```";

/// Normalize an answer for line-by-line display.
///
/// Paragraphs are separated by exactly one blank line. Inside a paragraph
/// holding a code fence, each fenced block is moved onto its own lines;
/// elsewhere every sentence break (`". "`) becomes a line break.
pub fn format_response(text: &str) -> String {
    PARAGRAPH_BREAK
        .split(text)
        .map(format_paragraph)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_paragraph(paragraph: &str) -> String {
    let formatted = if paragraph.contains(FENCE) {
        paragraph
            .split(FENCE)
            .enumerate()
            .map(|(i, part)| {
                if i % 2 == 1 {
                    format!("\n{FENCE}\n{}\n{FENCE}\n", part.trim())
                } else {
                    part.to_string()
                }
            })
            .collect::<String>()
    } else {
        paragraph.replace(". ", ".\n")
    };
    formatted.trim().to_string()
}

/// Split formatted text into display lines, keeping each line's newline so
/// the lines concatenate back to the original text.
pub fn display_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}
