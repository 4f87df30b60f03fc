//! Markdown Emitter: render ordered lines, then join pages.

use crate::pipeline::classify::BULLET;
use crate::pipeline::layout::LineGroup;

/// Placed between consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n---\n";

/// Render one page's lines.
///
/// Every emitted line ends with `\n`. Image-text lines become blockquotes
/// and are set off from neighbouring lines by one blank line.
pub fn emit(lines: &[LineGroup]) -> String {
    let mut out = String::new();

    for (i, line) in lines.iter().enumerate() {
        let after_quote = i > 0 && lines[i - 1].is_ocr;
        if i > 0 && (line.is_ocr || after_quote) {
            out.push('\n');
        }

        if line.is_ocr {
            for physical in line.text.lines() {
                out.push_str("> ");
                out.push_str(physical.trim_end());
                out.push('\n');
            }
            continue;
        }

        out.push_str(&render_text_line(line));
        out.push('\n');
    }

    out
}

fn render_text_line(line: &LineGroup) -> String {
    let mut text = if line.is_bullet {
        BULLET.replace(&line.text, "").trim_start().to_string()
    } else {
        line.text.clone()
    };

    if line.is_italic {
        text = format!("*{}*", text);
    }

    if line.header_level > 0 {
        format!("{} {}", "#".repeat(line.header_level as usize), text)
    } else if line.is_bullet {
        format!("- {}", text)
    } else {
        text
    }
}

/// Join page contributions in page order and trim the result.
pub fn assemble<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
        .trim()
        .to_string()
}
