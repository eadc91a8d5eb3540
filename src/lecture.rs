//! On-disk lecture state: discovery, per-lecture layout, the notes marker.
//!
//! The presence of `<out_root>/<name>/lecture_notes.tex` is the only record
//! that a lecture has been processed. There is no manifest: deleting a
//! lecture's notes file is enough to have `refresh` redo it.
//!
//! ```text
//! <out_root>/
//!   <name>/
//!     slides.md  slides.json  captions.json  lecture_notes.tex
//!     slides_png/slideNN.png  img/…
//!   synthesized/
//!     structure.json  course_notes.tex  glossary.json  course_notes.pdf
//! ```

use crate::config::CourseConfig;
use crate::error::{ConversionError, CourseError};
use crate::pipeline::postprocess::extract_headings;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const NOTES_FILE: &str = "lecture_notes.tex";
pub const SLIDES_MD: &str = "slides.md";
pub const SLIDES_JSON: &str = "slides.json";
pub const CAPTIONS_JSON: &str = "captions.json";
pub const SLIDES_PNG_DIR: &str = "slides_png";
pub const IMG_DIR: &str = "img";
pub const SYNTHESIZED_DIR: &str = "synthesized";

/// Source formats the extractors understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LectureFormat {
    Pptx,
    Pdf,
}

impl LectureFormat {
    /// Format from a file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()?
            .to_str()?
            .to_ascii_lowercase()
            .as_str()
        {
            "pptx" => Some(Self::Pptx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// One input lecture and where its artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lecture {
    /// File stem of the source; stable across runs.
    pub name: String,
    pub source: PathBuf,
    pub format: LectureFormat,
    pub out_dir: PathBuf,
}

impl Lecture {
    pub fn new(source: PathBuf, out_root: impl AsRef<Path>) -> Result<Self, ConversionError> {
        let format = LectureFormat::from_path(&source)
            .ok_or_else(|| ConversionError::UnsupportedFormat {
                path: source.clone(),
            })?;
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConversionError::UnsupportedFormat {
                path: source.clone(),
            })?;
        let out_dir = out_root.as_ref().join(&name);
        Ok(Self {
            name,
            source,
            format,
            out_dir,
        })
    }

    pub fn notes_path(&self) -> PathBuf {
        self.out_dir.join(NOTES_FILE)
    }

    pub fn slides_md_path(&self) -> PathBuf {
        self.out_dir.join(SLIDES_MD)
    }

    pub fn slides_json_path(&self) -> PathBuf {
        self.out_dir.join(SLIDES_JSON)
    }

    pub fn captions_path(&self) -> PathBuf {
        self.out_dir.join(CAPTIONS_JSON)
    }

    pub fn slides_png_dir(&self) -> PathBuf {
        self.out_dir.join(SLIDES_PNG_DIR)
    }

    pub fn img_dir(&self) -> PathBuf {
        self.out_dir.join(IMG_DIR)
    }

    /// True iff the notes marker exists.
    pub fn is_processed(&self) -> bool {
        self.notes_path().is_file()
    }
}

// ── Ordering ─────────────────────────────────────────────────────────────

static RE_LECTURE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)lecture[\s_-]*(\d+)").unwrap());

/// The number following "lecture" in a name (`Lecture10_W5` → 10).
pub fn lecture_number(name: &str) -> Option<u64> {
    RE_LECTURE_NUMBER
        .captures(name)
        .and_then(|c| c[1].parse().ok())
}

/// Numbered lectures first, by number, then by name.
pub fn compare_lecture_names(a: &str, b: &str) -> Ordering {
    let key = |n: &str| (lecture_number(n).unwrap_or(u64::MAX), n.to_string());
    key(a).cmp(&key(b))
}

// ── Discovery ────────────────────────────────────────────────────────────

/// List the `.pptx` / `.pdf` lectures in `config.lectures_dir`, ordered and
/// cut to `config.limit`.
///
/// When a `.pptx` and a `.pdf` share a stem, the deck wins.
pub async fn discover_lectures(config: &CourseConfig) -> Result<Vec<Lecture>, CourseError> {
    let dir = &config.lectures_dir;
    if !dir.is_dir() {
        return Err(CourseError::LecturesDirNotFound { path: dir.clone() });
    }

    let read_err = |e: std::io::Error| CourseError::ReadFailed {
        path: dir.clone(),
        source: e,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut lectures: Vec<Lecture> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match Lecture::new(path, &config.out_root) {
            Ok(lecture) => lectures.push(lecture),
            Err(_) => debug!("Ignoring non-lecture file {}", file_name),
        }
    }

    lectures.sort_by(|a, b| {
        compare_lecture_names(&a.name, &b.name).then_with(|| {
            let rank = |f: LectureFormat| matches!(f, LectureFormat::Pdf);
            rank(a.format).cmp(&rank(b.format))
        })
    });
    lectures.dedup_by(|later, kept| {
        let dup = later.name == kept.name;
        if dup {
            warn!(
                "{}: ignoring {} in favour of {}",
                kept.name,
                later.source.display(),
                kept.source.display()
            );
        }
        dup
    });

    if let Some(limit) = config.limit {
        lectures.truncate(limit);
    }
    Ok(lectures)
}

// ── Notes ────────────────────────────────────────────────────────────────

/// A processed lecture's notes, as read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LectureNote {
    pub name: String,
    pub dir: PathBuf,
    pub latex: String,
    pub headings: Vec<String>,
}

/// Read every lecture notes file under `out_root`, in lecture order.
///
/// Driven by the marker alone, so notes whose source file has since been
/// removed are still included. A missing `out_root` yields no notes.
pub async fn load_notes(out_root: &Path) -> Result<Vec<LectureNote>, CourseError> {
    if !out_root.is_dir() {
        return Ok(Vec::new());
    }
    let read_err = |path: &Path, e: std::io::Error| CourseError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let mut entries = tokio::fs::read_dir(out_root)
        .await
        .map_err(|e| read_err(out_root, e))?;
    let mut notes = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| read_err(out_root, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();
        if name == SYNTHESIZED_DIR || name.starts_with('.') || !dir.is_dir() {
            continue;
        }
        let path = dir.join(NOTES_FILE);
        if !path.is_file() {
            continue;
        }
        let latex = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| read_err(&path, e))?;
        let headings = extract_headings(&latex);
        notes.push(LectureNote {
            name,
            dir,
            latex,
            headings,
        });
    }

    notes.sort_by(|a, b| compare_lecture_names(&a.name, &b.name));
    Ok(notes)
}

/// Write via a sibling temp file and rename, so readers never see a
/// truncated file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}
