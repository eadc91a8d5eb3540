//! Course structure: chapters → parts → lectures.
//!
//! The outline is proposed by the text model from every lecture's headings,
//! then validated so that each processed lecture appears exactly once. A
//! structure that still matches the lecture set is reused on later runs,
//! keeping the chapter order stable.
//!
//! When the model is unreachable or answers something that is not JSON, a
//! deterministic outline is derived from "Chapter N" references in slide
//! titles instead.

use crate::config::CourseConfig;
use crate::error::CourseError;
use crate::lecture::{compare_lecture_names, write_atomic, LectureNote, SLIDES_MD};
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, ModelSet, RetryPolicy};
use crate::pipeline::postprocess::extract_json_block;
use crate::prompts::{structure_prompt, STRUCTURE_SYSTEM_PROMPT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const STRUCTURE_FILE: &str = "structure.json";

const STRUCTURE_MAX_TOKENS: usize = 4096;

/// Ordered chapters of the course.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseStructure {
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A run of lectures covered together; `files` are lecture names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl CourseStructure {
    /// Lecture names in reading order.
    pub fn ordered_lectures(&self) -> Vec<&str> {
        self.chapters
            .iter()
            .flat_map(|c| c.parts.iter())
            .flat_map(|p| p.files.iter())
            .map(String::as_str)
            .collect()
    }

    /// Check that every name in `known` appears exactly once, and nothing else.
    pub fn validate(&self, known: &[String]) -> Result<(), CourseError> {
        let known_set: HashSet<&str> = known.iter().map(String::as_str).collect();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for name in self.ordered_lectures() {
            *counts.entry(name).or_default() += 1;
        }

        let missing: Vec<String> = known
            .iter()
            .filter(|n| !counts.contains_key(n.as_str()))
            .cloned()
            .collect();
        let mut unknown: Vec<String> = counts
            .keys()
            .filter(|n| !known_set.contains(*n))
            .map(|n| n.to_string())
            .collect();
        let mut duplicated: Vec<String> = counts
            .iter()
            .filter(|(_, c)| **c > 1)
            .map(|(n, _)| n.to_string())
            .collect();
        unknown.sort();
        duplicated.sort();

        if missing.is_empty() && unknown.is_empty() && duplicated.is_empty() {
            Ok(())
        } else {
            Err(CourseError::StructureMismatch {
                missing,
                unknown,
                duplicated,
            })
        }
    }
}

/// Where a structure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureSource {
    /// A still-valid `structure.json` from an earlier run.
    Reused,
    /// Proposed by the text model.
    Inferred,
    /// Built from chapter references in slide titles.
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct StructureOutcome {
    pub structure: CourseStructure,
    pub source: StructureSource,
    pub path: PathBuf,
}

// ── Model answer ─────────────────────────────────────────────────────────

/// Parse a model answer, tolerating code fences and surrounding prose.
pub fn parse_structure(answer: &str) -> Option<CourseStructure> {
    let json = extract_json_block(answer)?;
    serde_json::from_str(json).ok()
}

/// Per-lecture heading listing for the structure prompt.
pub fn build_listing(notes: &[LectureNote], heading_sample: usize) -> String {
    let mut out = String::new();
    for note in notes {
        out.push_str(&format!("- {}\n", note.name));
        if note.headings.is_empty() {
            out.push_str("    (no headings)\n");
        }
        for h in note.headings.iter().take(heading_sample) {
            out.push_str(&format!("    {}\n", h));
        }
    }
    out
}

/// Read an existing `structure.json`.
pub async fn load_structure(path: &Path) -> Result<CourseStructure, CourseError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CourseError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    serde_json::from_str(&text).map_err(|e| CourseError::MalformedStructure {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

// ── Heuristic ────────────────────────────────────────────────────────────

static RE_CHAPTER: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\bchapter\s*(\d+)\b").unwrap(),
        Regex::new(r"(?i)\bch\.?\s*(\d+)\b").unwrap(),
        Regex::new(r"(?i)\bch(\d+)\b").unwrap(),
    ]
});

static RE_NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Topics of adjacent lectures sharing this many leading chars form one part.
const TOPIC_PREFIX: usize = 30;

/// Chapter number referenced in a title ("Chapter 5", "Ch. 5", "ch5").
pub fn extract_chapter(title: &str) -> Option<u32> {
    RE_CHAPTER
        .iter()
        .find_map(|re| re.captures(title))
        .and_then(|c| c[1].parse().ok())
}

/// Lowercased title without chapter references or punctuation.
pub fn norm_title(title: &str) -> String {
    let mut s = title.to_lowercase();
    for re in RE_CHAPTER.iter() {
        s = re.replace_all(&s, "").into_owned();
    }
    let s = RE_NON_ALNUM.replace_all(&s, " ");
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    s.chars().take(140).collect()
}

/// Most frequent item; ties go to the earliest.
fn most_common<T: Eq + std::hash::Hash + Clone>(items: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order: Vec<T> = Vec::new();
    for item in items {
        let c = counts.entry(item.clone()).or_default();
        if *c == 0 {
            order.push(item);
        }
        *c += 1;
    }
    let best = order.iter().map(|i| counts[i]).max()?;
    order.into_iter().find(|i| counts[i] == best)
}

/// Outline from slide titles, one `(lecture name, titles)` pair per lecture.
///
/// Lectures are grouped by their dominant chapter number (lectures without
/// one go last); within a chapter, adjacent lectures whose topics share a
/// prefix are paired into one part.
pub fn heuristic_structure(lectures: &[(String, Vec<String>)]) -> CourseStructure {
    struct Info<'a> {
        name: &'a str,
        topic: String,
    }

    let mut by_chapter: BTreeMap<Option<u32>, Vec<Info<'_>>> = BTreeMap::new();
    for (name, titles) in lectures {
        let chapter = most_common(titles.iter().filter_map(|t| extract_chapter(t)));
        let topic = most_common(
            titles
                .iter()
                .map(|t| norm_title(t))
                .filter(|t| !t.is_empty()),
        )
        .unwrap_or_default();
        by_chapter.entry(chapter).or_default().push(Info { name, topic });
    }

    let all_unknown = by_chapter.keys().all(Option::is_none);
    // BTreeMap puts None first; unknown chapter goes last.
    let mut ordered: Vec<(Option<u32>, Vec<Info<'_>>)> = by_chapter.into_iter().collect();
    ordered.sort_by_key(|(ch, _)| ch.map_or(u64::MAX, u64::from));

    let chapters = ordered
        .into_iter()
        .map(|(chapter, mut infos)| {
            infos.sort_by(|a, b| compare_lecture_names(a.name, b.name));
            let mut parts = Vec::new();
            let mut i = 0;
            while i < infos.len() {
                let mut files = vec![infos[i].name.to_string()];
                if let Some(next) = infos.get(i + 1) {
                    let a = &infos[i].topic;
                    let b = &next.topic;
                    if !a.is_empty() && !b.is_empty() && prefix(a) == prefix(b) {
                        files.push(next.name.to_string());
                        i += 1;
                    }
                }
                i += 1;
                parts.push(Part {
                    title: files.join(" + "),
                    files,
                });
            }
            let title = match chapter {
                Some(n) => format!("Chapter {n}"),
                None if all_unknown => "Lectures".to_string(),
                None => "Other Topics".to_string(),
            };
            Chapter { title, parts }
        })
        .collect();

    CourseStructure { chapters }
}

fn prefix(s: &str) -> String {
    s.chars().take(TOPIC_PREFIX).collect()
}

/// Slide titles for the heuristic: `slides.md` headings, else note headings.
async fn lecture_titles(note: &LectureNote) -> Vec<String> {
    if let Ok(md) = tokio::fs::read_to_string(note.dir.join(SLIDES_MD)).await {
        let titles: Vec<String> = md
            .lines()
            .filter(|l| l.starts_with('#'))
            .map(|l| l.trim_start_matches('#').trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !titles.is_empty() {
            return titles;
        }
    }
    note.headings.iter().map(|h| h.trim().to_string()).collect()
}

// ── Orchestration ────────────────────────────────────────────────────────

/// Produce and persist the structure for `notes`.
///
/// Reuses `structure.json` when it still covers exactly these lectures
/// (unless `config.reinfer_structure`). A model answer that parses but
/// does not cover them is a [`CourseError::StructureMismatch`], and nothing
/// is written.
pub async fn infer_structure(
    models: &ModelSet,
    config: &CourseConfig,
    notes: &[LectureNote],
) -> Result<StructureOutcome, CourseError> {
    let path = config.synthesized_dir().join(STRUCTURE_FILE);
    let names: Vec<String> = notes.iter().map(|n| n.name.clone()).collect();

    if !config.reinfer_structure && path.is_file() {
        match load_structure(&path).await {
            Ok(existing) if existing.validate(&names).is_ok() => {
                info!("Reusing {} ({} lectures)", path.display(), names.len());
                return Ok(StructureOutcome {
                    structure: existing,
                    source: StructureSource::Reused,
                    path,
                });
            }
            Ok(_) => info!("Lecture set changed; inferring a new structure"),
            Err(e) => warn!("{}; inferring a new structure", e),
        }
    }

    let (structure, source) = if names.is_empty() {
        (CourseStructure::default(), StructureSource::Heuristic)
    } else {
        let request = CompletionRequest::new(
            STRUCTURE_SYSTEM_PROMPT,
            structure_prompt(&build_listing(notes, config.heading_sample)),
        )
        .with_temperature(0.0)
        .with_max_tokens(STRUCTURE_MAX_TOKENS);

        let answer = complete_with_retry(
            models.text.as_ref(),
            &request,
            RetryPolicy::from_config(config),
            "structure",
        )
        .await;

        match answer.map(|c| parse_structure(&c.content)) {
            Ok(Some(structure)) => {
                structure.validate(&names)?;
                (structure, StructureSource::Inferred)
            }
            Ok(None) => {
                warn!("Structure answer is not valid JSON; using chapter heuristic");
                (heuristic_for(notes).await, StructureSource::Heuristic)
            }
            Err(e) => {
                warn!("{}; using chapter heuristic", e);
                (heuristic_for(notes).await, StructureSource::Heuristic)
            }
        }
    };

    let json = serde_json::to_string_pretty(&structure)
        .map_err(|e| CourseError::Internal(format!("structure serialisation: {e}")))?;
    write_atomic(&path, json.as_bytes())
        .await
        .map_err(|e| CourseError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    info!(
        "Wrote {} ({} chapters, {:?})",
        path.display(),
        structure.chapters.len(),
        source
    );

    Ok(StructureOutcome {
        structure,
        source,
        path,
    })
}

async fn heuristic_for(notes: &[LectureNote]) -> CourseStructure {
    let mut lectures = Vec::with_capacity(notes.len());
    for note in notes {
        lectures.push((note.name.clone(), lecture_titles(note).await));
    }
    heuristic_structure(&lectures)
}
