//! Course synthesis: every lecture's notes → one LaTeX document.
//!
//! Notes are concatenated in structure order and rewritten by the text model
//! into a single deduplicated document. Formulas and figure inclusions must
//! survive that rewrite byte-for-byte, so they are swapped for `@@SPANn@@`
//! tokens before the call and put back afterwards.
//!
//! The glossary is built deterministically: `description` items from the
//! notes first (in reading order), then the model's `term :: definition`
//! lines, unique by normalised term with the first definition kept.

use crate::config::CourseConfig;
use crate::error::CourseError;
use crate::lecture::{write_atomic, LectureNote};
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, ModelSet, RetryPolicy};
use crate::pipeline::postprocess::{clean_latex, glossary_section, rewrite_graphics_paths};
use crate::pipeline::summarize::truncate_chars;
use crate::prompts::{synthesis_prompt, SYNTHESIS_SYSTEM_PROMPT};
use crate::structure::CourseStructure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{info, warn};

pub const COURSE_TEX: &str = "course_notes.tex";
pub const GLOSSARY_JSON: &str = "glossary.json";

/// Graphics paths are rewritten relative to `synthesized/`.
const DEFAULT_GRAPHICS_PREFIX: &str = "..";

// ── Opaque spans ─────────────────────────────────────────────────────────

// Line breaks (`\\`, `\\[2pt]`) and the escaped dollar are matched first and
// passed through, so neither opens a math span.
static RE_OPAQUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?s)\\\\(?:\[[^\]\n]*\])?",
        r"|\\\$",
        r"|\\begin\{(?:equation|align|gather|multline|eqnarray)\*?\}.*?\\end\{(?:equation|align|gather|multline|eqnarray)\*?\}",
        r"|\$\$.+?\$\$",
        r"|\\\[.+?\\\]",
        r"|\\\(.+?\\\)",
        r"|\$[^$\n]+?\$",
        r"|\\includegraphics(?:\[[^\]]*\])?\{[^}]*\}",
    ))
    .unwrap()
});

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"@@SPAN(\d+)@@").unwrap());

/// Spans taken out of the text, indexed by placeholder number.
#[derive(Debug, Default, Clone)]
pub struct SpanMask {
    spans: Vec<String>,
}

impl SpanMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Replace every opaque span in `tex` with a fresh placeholder.
    pub fn mask(&mut self, tex: &str) -> String {
        RE_OPAQUE
            .replace_all(tex, |caps: &regex::Captures<'_>| {
                let span = &caps[0];
                if span == r"\$" || span.starts_with(r"\\") {
                    return span.to_string();
                }
                let token = format!("@@SPAN{}@@", self.spans.len());
                self.spans.push(span.to_string());
                token
            })
            .into_owned()
    }

    /// Put the spans back. Returns the text and how many spans had no
    /// placeholder left in it. Unknown placeholders stay as they are.
    pub fn restore(&self, text: &str) -> (String, usize) {
        let mut found = HashSet::new();
        let restored = RE_PLACEHOLDER
            .replace_all(text, |caps: &regex::Captures<'_>| {
                match caps[1].parse::<usize>().ok().and_then(|i| self.spans.get(i).map(|s| (i, s))) {
                    Some((i, span)) => {
                        found.insert(i);
                        span.clone()
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned();
        (restored, self.spans.len() - found.len())
    }
}

/// Placeholder numbers present in `text`.
fn placeholder_ids(text: &str) -> HashSet<usize> {
    RE_PLACEHOLDER
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

// ── Glossary ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub term: String,
    pub definition: String,
}

static RE_LATEX_COMMAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[A-Za-z]+\*?").unwrap());
static RE_NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());
static RE_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\\begin\{description\}(.*?)\\end\{description\}").unwrap()
});

/// Key used to decide whether two glossary terms are the same.
///
/// Lowercased, LaTeX commands and braces removed, runs of anything that is
/// not a letter or digit collapsed to one space.
pub fn normalize_term(term: &str) -> String {
    let s = RE_LATEX_COMMAND.replace_all(term, " ");
    let s = s.to_lowercase();
    RE_NON_ALNUM.replace_all(&s, " ").trim().to_string()
}

/// `\item[term] definition` entries from every `description` environment.
pub fn harvest_glossary(tex: &str) -> Vec<GlossaryEntry> {
    let mut out = Vec::new();
    for block in RE_DESCRIPTION.captures_iter(tex) {
        for item in block[1].split(r"\item[").skip(1) {
            let Some(close) = closing_bracket(item) else {
                continue;
            };
            let term = item[..close].trim();
            let definition = item[close + 1..]
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if !term.is_empty() && !definition.is_empty() {
                out.push(GlossaryEntry {
                    term: term.to_string(),
                    definition,
                });
            }
        }
    }
    out
}

/// Index of the `]` closing an optional argument, skipping nested brackets
/// and braces.
fn closing_bracket(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        match ch {
            '[' | '{' => depth += 1,
            '}' => depth -= 1,
            ']' if depth == 0 => return Some(i),
            ']' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// `term :: definition` lines from the model's glossary section.
pub fn parse_glossary_section(text: &str) -> Vec<GlossaryEntry> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            let (term, definition) = line.split_once("::")?;
            let (term, definition) = (term.trim(), definition.trim());
            (!term.is_empty() && !definition.is_empty()).then(|| GlossaryEntry {
                term: term.to_string(),
                definition: definition.to_string(),
            })
        })
        .collect()
}

/// Deduplicate by normalised term, keeping the first definition.
///
/// Entries with unbalanced braces are dropped and bare `%`, `&` and `#` are
/// escaped, so every kept entry typesets inside `\item[{term}]`.
pub fn merge_glossary(entries: impl IntoIterator<Item = GlossaryEntry>) -> Vec<GlossaryEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(typesettable)
        .filter(|e| {
            let key = normalize_term(&e.term);
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

fn typesettable(entry: GlossaryEntry) -> Option<GlossaryEntry> {
    if !braces_balanced(&entry.term) || !braces_balanced(&entry.definition) {
        warn!("Dropping glossary entry with unbalanced braces: {}", entry.term);
        return None;
    }
    Some(GlossaryEntry {
        term: escape_specials(&entry.term),
        definition: escape_specials(&entry.definition),
    })
}

/// Unescaped braces nest properly and the text does not end in a lone `\`.
fn braces_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    let mut escaped = false;
    for ch in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && !escaped
}

fn escape_specials(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for ch in s.chars() {
        if matches!(ch, '%' | '&' | '#') && !escaped {
            out.push('\\');
        }
        escaped = ch == '\\' && !escaped;
        out.push(ch);
    }
    out
}

// ── Document ─────────────────────────────────────────────────────────────

/// Notes in structure order, each tagged with its source and with graphics
/// paths made relative to `synthesized/`.
pub fn assemble_corpus(
    structure: &CourseStructure,
    notes: &[LectureNote],
    graphics_prefix: &str,
) -> String {
    let by_name: HashMap<&str, &LectureNote> =
        notes.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut chunks = Vec::new();
    for chapter in &structure.chapters {
        chunks.push(format!("% CHAPTER: {}", chapter.title));
        for part in &chapter.parts {
            chunks.push(format!("% PART: {}", part.title));
            for name in &part.files {
                let Some(note) = by_name.get(name.as_str()) else {
                    continue;
                };
                let latex = rewrite_graphics_paths(&note.latex, name, graphics_prefix);
                chunks.push(format!("% SOURCE: {}\n{}", name, latex.trim_end()));
            }
        }
    }
    chunks.join("\n\n")
}

fn escape_term(term: &str) -> String {
    format!("{{{}}}", term)
}

/// A standalone document: preamble, glossary section, body.
pub fn render_document(body: &str, glossary: &[GlossaryEntry]) -> String {
    let mut doc = String::from(
        "\\documentclass[11pt]{article}\n\
         \\usepackage[utf8]{inputenc}\n\
         \\usepackage[T1]{fontenc}\n\
         \\usepackage{amsmath}\n\
         \\usepackage{amssymb}\n\
         \\usepackage{graphicx}\n\
         \\usepackage{booktabs}\n\
         \\usepackage{hyperref}\n\
         \n\
         \\title{Course Notes}\n\
         \\date{}\n\
         \n\
         \\begin{document}\n\
         \\maketitle\n\
         \\tableofcontents\n\
         \n\
         \\section*{Global Glossary}\n",
    );
    if glossary.is_empty() {
        doc.push_str("No glossary terms were collected.\n");
    } else {
        doc.push_str("\\begin{description}\n");
        for e in glossary {
            doc.push_str(&format!("  \\item[{}] {}\n", escape_term(&e.term), e.definition));
        }
        doc.push_str("\\end{description}\n");
    }
    doc.push('\n');
    doc.push_str(body.trim());
    doc.push_str("\n\n\\end{document}\n");
    doc
}

/// Result of a synthesis run.
#[derive(Debug, Clone)]
pub struct SynthesizedCourse {
    /// The complete `course_notes.tex`.
    pub latex: String,
    pub glossary: Vec<GlossaryEntry>,
    /// Lectures included, in order.
    pub lectures: Vec<String>,
    /// Lectures left out because the corpus was cut before them.
    pub omitted: Vec<String>,
    /// The corpus hit `max_corpus_chars`.
    pub truncated: bool,
    /// Opaque spans sent to the model whose placeholder it dropped.
    pub lost_spans: usize,
    pub tex_path: PathBuf,
}

/// Merge `notes` in `structure` order into `synthesized/course_notes.tex`.
///
/// On failure nothing is written; notes and `structure.json` stay as they
/// are.
pub async fn synthesize_course(
    models: &ModelSet,
    config: &CourseConfig,
    structure: &CourseStructure,
    notes: &[LectureNote],
) -> Result<SynthesizedCourse, CourseError> {
    let prefix = config
        .graphics_prefix
        .as_deref()
        .unwrap_or(DEFAULT_GRAPHICS_PREFIX);
    let lectures: Vec<String> = structure
        .ordered_lectures()
        .into_iter()
        .filter(|name| notes.iter().any(|n| n.name == *name))
        .map(str::to_string)
        .collect();
    if lectures.is_empty() {
        return Err(CourseError::SynthesisFailed {
            detail: "no lecture notes to synthesize".to_string(),
        });
    }

    let corpus = assemble_corpus(structure, notes, prefix);
    let mut mask = SpanMask::new();
    let masked = mask.mask(&corpus);
    let capped = truncate_chars(&masked, config.max_corpus_chars);
    let truncated = capped.len() < masked.len();

    // Only lectures whose source header survived the cut reach the model.
    let (lectures, omitted): (Vec<String>, Vec<String>) = lectures
        .into_iter()
        .partition(|name| capped.contains(&format!("% SOURCE: {name}\n")));
    if truncated {
        warn!(
            "Corpus truncated to {} chars; omitted lectures: {}",
            config.max_corpus_chars,
            if omitted.is_empty() {
                "none (last lecture cut short)".to_string()
            } else {
                omitted.join(", ")
            }
        );
    }
    if lectures.is_empty() {
        return Err(CourseError::SynthesisFailed {
            detail: format!(
                "no lecture fits in max_corpus_chars ({})",
                config.max_corpus_chars
            ),
        });
    }
    let sent = placeholder_ids(capped);
    info!(
        "Synthesizing {} lectures ({} chars, {} protected spans)",
        lectures.len(),
        capped.len(),
        sent.len()
    );

    let structure_json = serde_json::to_string_pretty(structure)
        .map_err(|e| CourseError::Internal(format!("structure serialisation: {e}")))?;
    let request = CompletionRequest::new(
        SYNTHESIS_SYSTEM_PROMPT,
        synthesis_prompt(&structure_json, capped),
    )
    .with_temperature(config.temperature)
    .with_max_tokens(config.synthesis_max_tokens);

    let answer = complete_with_retry(
        models.text.as_ref(),
        &request,
        RetryPolicy::from_config(config),
        "synthesis",
    )
    .await
    .map_err(|e| CourseError::SynthesisFailed {
        detail: e.to_string(),
    })?;

    let body_masked = clean_latex(&answer.content);
    if body_masked.trim().is_empty() {
        return Err(CourseError::SynthesisFailed {
            detail: "model returned an empty document".to_string(),
        });
    }
    let (body, _) = mask.restore(&body_masked);
    let model_glossary = glossary_section(&answer.content)
        .map(|g| parse_glossary_section(&mask.restore(g).0))
        .unwrap_or_default();

    // A span counts as lost only if it was sent and appears in neither section.
    let returned = placeholder_ids(&answer.content);
    let lost_spans = sent.difference(&returned).count();
    if lost_spans > 0 {
        warn!("{} protected spans were dropped by the model", lost_spans);
    }

    let mut harvested = Vec::new();
    for name in &lectures {
        if let Some(note) = notes.iter().find(|n| &n.name == name) {
            harvested.extend(harvest_glossary(&note.latex));
        }
    }
    let glossary = merge_glossary(harvested.into_iter().chain(model_glossary));

    let latex = render_document(&body, &glossary);
    let dir = config.synthesized_dir();
    let tex_path = dir.join(COURSE_TEX);
    write_atomic(&tex_path, latex.as_bytes())
        .await
        .map_err(|e| CourseError::OutputWriteFailed {
            path: tex_path.clone(),
            source: e,
        })?;

    let glossary_path = dir.join(GLOSSARY_JSON);
    let glossary_json = serde_json::to_string_pretty(&glossary)
        .map_err(|e| CourseError::Internal(format!("glossary serialisation: {e}")))?;
    write_atomic(&glossary_path, glossary_json.as_bytes())
        .await
        .map_err(|e| CourseError::OutputWriteFailed {
            path: glossary_path.clone(),
            source: e,
        })?;

    info!(
        "Wrote {} ({} chars, {} glossary terms)",
        tex_path.display(),
        latex.len(),
        glossary.len()
    );

    Ok(SynthesizedCourse {
        latex,
        glossary,
        lectures,
        omitted,
        truncated,
        lost_spans,
        tex_path,
    })
}
