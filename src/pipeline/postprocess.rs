//! Post-processing: deterministic cleanup of model-generated LaTeX.
//!
//! Even well-prompted models wrap output in code fences, emit a full
//! preamble when asked for a body, or add chatter before the `=== LATEX ===`
//! tag. These cheap rules fix such quirks without touching content, so the
//! prompts can stay focused on *what to write*. Each rule is independently
//! testable.
//!
//! ## Rule Order
//!
//! The tagged section is cut out first, fences are stripped before the
//! document unwrap can see `\begin{document}`, and the final-newline pass runs
//! last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Tag that precedes the LaTeX body in every model answer.
pub const LATEX_TAG: &str = "=== LATEX ===";

/// Tag that precedes the optional glossary section of the synthesis answer.
pub const GLOSSARY_TAG: &str = "=== GLOSSARY ===";

/// Apply all post-processing rules to a raw model answer.
///
/// Rules (applied in order):
/// 1. Keep only the section after `=== LATEX ===` (up to `=== GLOSSARY ===`)
/// 2. Strip outer ```` ```latex ```` / ```` ```tex ```` fences
/// 3. Normalise line endings (CRLF → LF)
/// 4. Unwrap a full document down to its body
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 1
/// 7. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 8. Ensure the text ends with exactly one newline
pub fn clean_latex(input: &str) -> String {
    let s = latex_section(input);
    let s = strip_code_fences(s);
    let s = normalise_line_endings(&s);
    let s = unwrap_document(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Tagged section ───────────────────────────────────────────────────

/// The part of `answer` between `=== LATEX ===` and `=== GLOSSARY ===`.
///
/// Answers without the tag are taken whole.
pub fn latex_section(answer: &str) -> &str {
    let body = match answer.find(LATEX_TAG) {
        Some(pos) => &answer[pos + LATEX_TAG.len()..],
        None => answer,
    };
    match body.find(GLOSSARY_TAG) {
        Some(pos) => &body[..pos],
        None => body,
    }
}

/// The part of `answer` after `=== GLOSSARY ===`, if present.
pub fn glossary_section(answer: &str) -> Option<&str> {
    answer
        .find(GLOSSARY_TAG)
        .map(|pos| &answer[pos + GLOSSARY_TAG.len()..])
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:latex|tex|json)?[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap()
});

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.trim().to_string()
    }
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Unwrap full documents ────────────────────────────────────────────

fn unwrap_document(input: &str) -> String {
    const BEGIN: &str = "\\begin{document}";
    const END: &str = "\\end{document}";
    let Some(start) = input.find(BEGIN) else {
        return input.to_string();
    };
    let body = &input[start + BEGIN.len()..];
    let body = match body.rfind(END) {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 8: Ensure text ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Helpers used by later stages ─────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\((?:sub){0,2})section\*?\{([^}]*)\}").unwrap());

/// `\section`, `\subsection` and `\subsubsection` titles in document order,
/// indented two spaces per nesting level.
pub fn extract_headings(tex: &str) -> Vec<String> {
    RE_HEADING
        .captures_iter(tex)
        .map(|c| {
            let depth = c[1].len() / 3;
            format!("{}{}", "  ".repeat(depth), c[2].trim())
        })
        .collect()
}

static RE_GRAPHICS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{((?:img|slides_png)/[^}]+)\}").unwrap());

/// Rewrite `{img/...}` and `{slides_png/...}` to `{<prefix>/<lecture>/...}`.
///
/// Paths that already carry a directory prefix are left alone.
pub fn rewrite_graphics_paths(tex: &str, lecture: &str, prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    RE_GRAPHICS_PATH
        .replace_all(tex, |caps: &regex::Captures<'_>| {
            format!("{{{}/{}/{}}}", prefix, lecture, &caps[1])
        })
        .to_string()
}

/// The outermost JSON object in a model answer, with fences removed.
pub fn extract_json_block(answer: &str) -> Option<&str> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    (end > start).then(|| &answer[start..=end])
}

// ── Tests ────────────────────────────────────────────────────────────────────
