//! Slide model: splitting extracted Markdown into per-slide blocks.
//!
//! `slides.md` is whatever the converter produced. Each heading at the
//! chosen split level starts a slide; level 2 is preferred because pptx2md
//! emits the deck title as `#` and slide titles as `##`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One slide as persisted in `slides.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideBlock {
    /// 1-based position in the deck.
    pub slide_index: usize,
    pub title: String,
    pub body_md: String,
    /// Render path relative to the lecture directory (`slides_png/slideNN.png`).
    pub slide_png: String,
    /// `img/...` paths referenced from the body.
    pub extracted_images: Vec<String>,
}

static RE_SLIDE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,3})\s+(.*?)\s*$").unwrap());

static RE_MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap());

/// Split Markdown into `(title, body)` sections.
///
/// Splits on `##` headings when any exist, else on `#`, else on the
/// shallowest level present. Text without headings is one `"Lecture"`
/// section. Text before the first split heading is dropped.
pub fn parse_slides_md(md: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = md.lines().collect();
    let headings: Vec<(usize, usize, String)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            RE_SLIDE_HEADER
                .captures(line)
                .map(|c| (i, c[1].len(), c[2].trim().to_string()))
        })
        .collect();

    if headings.is_empty() {
        return vec![("Lecture".to_string(), md.trim().to_string())];
    }

    let split_level = if headings.iter().any(|(_, l, _)| *l == 2) {
        2
    } else if headings.iter().any(|(_, l, _)| *l == 1) {
        1
    } else {
        headings.iter().map(|(_, l, _)| *l).min().unwrap_or(1)
    };

    let splits: Vec<&(usize, usize, String)> = headings
        .iter()
        .filter(|(_, l, _)| *l == split_level)
        .collect();

    splits
        .iter()
        .enumerate()
        .map(|(j, (start, _, title))| {
            let end = splits.get(j + 1).map(|s| s.0).unwrap_or(lines.len());
            let body = strip_separators(&lines[start + 1..end].join("\n"));
            (title.clone(), body)
        })
        .collect()
}

/// Trim the body and drop trailing `---` slide separators.
fn strip_separators(body: &str) -> String {
    let mut lines: Vec<&str> = body.trim().lines().collect();
    while lines.last().is_some_and(|l| l.trim() == "---" || l.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// `img/...` paths referenced by Markdown image syntax in `body`.
pub fn find_extracted_images(body: &str) -> Vec<String> {
    RE_MD_IMAGE
        .captures_iter(body)
        .map(|c| c[1].trim().replace("./", ""))
        .filter(|p| p.starts_with("img/"))
        .collect()
}

/// Render path for a 1-based slide index.
pub fn slide_png_rel(index: usize) -> String {
    format!("{}/slide{:02}.png", crate::lecture::SLIDES_PNG_DIR, index)
}

/// Build blocks from parsed sections.
pub fn build_blocks(sections: Vec<(String, String)>) -> Vec<SlideBlock> {
    sections
        .into_iter()
        .enumerate()
        .map(|(i, (title, body_md))| SlideBlock {
            slide_index: i + 1,
            slide_png: slide_png_rel(i + 1),
            extracted_images: find_extracted_images(&body_md),
            title,
            body_md,
        })
        .collect()
}

/// Serialise blocks back to `slides.md`: one `# Title` per slide, `---` between.
pub fn render_slides_md(blocks: &[SlideBlock]) -> String {
    blocks
        .iter()
        .map(|b| {
            if b.body_md.is_empty() {
                format!("# {}\n", b.title)
            } else {
                format!("# {}\n\n{}\n", b.title, b.body_md)
            }
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

/// Sections from `pdftotext` output: one per form-feed separated page.
///
/// The first non-empty line is the title (`Slide N` when the page is blank);
/// the remaining non-empty lines are the body.
pub fn sections_from_pdf_text(text: &str) -> Vec<(String, String)> {
    let mut pages: Vec<&str> = text.split('\u{000C}').collect();
    // pdftotext ends the last page with a form feed too
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }

    pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let mut lines = page.lines().map(str::trim).filter(|l| !l.is_empty());
            let title = lines
                .next()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Slide {}", i + 1));
            let body = lines.collect::<Vec<_>>().join("\n");
            (title, body)
        })
        .collect()
}
