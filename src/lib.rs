//! # edgequake-coursenotes
//!
//! Turn a directory of lecture slide decks into LaTeX course notes.
//!
//! Each `.pptx` or `.pdf` lecture is converted to per-slide text and
//! renders, repaired and captioned with language models, and summarized into
//! a `lecture_notes.tex`. The notes of all lectures are then ordered into a
//! chapter/part outline and merged into one `course_notes.tex` with a global
//! glossary.
//!
//! ## Pipeline Overview
//!
//! ```text
//! lectures/*.pptx|*.pdf
//!  │
//!  ├─ 1. Extract    soffice / pdftoppm / pdftotext / pptx2md
//!  ├─ 2. Slides     split Markdown into slide blocks
//!  ├─ 3. Repair     glitch fix (vision / text), formula rewrite
//!  ├─ 4. Caption    one caption per slide render and extracted figure
//!  ├─ 5. Summarize  lecture_notes.tex per lecture   ← incremental marker
//!  ├─ 6. Structure  synthesized/structure.json
//!  ├─ 7. Synthesize synthesized/course_notes.tex + glossary.json
//!  └─ 8. Compile    optional PDF via latexmk / pdflatex
//! ```
//!
//! Steps 1–5 run per lecture with up to `max_workers` lectures in flight;
//! 6–8 always run over every notes file on disk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_coursenotes::{refresh, CourseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENROUTER_API_KEY / OPENAI_API_KEY / …
//!     let config = CourseConfig::builder()
//!         .lectures_dir("lectures")
//!         .out_root("out")
//!         .build()?;
//!     let report = refresh(&config).await?.into_result()?;
//!     eprintln!(
//!         "{} processed, {} skipped",
//!         report.succeeded(),
//!         report.skipped.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `coursenotes` binary (clap + anyhow + tracing-subscriber) |
//!
//! ## External Tools
//!
//! | Tool | Needed for |
//! |------|------------|
//! | `soffice` | `.pptx` → PDF |
//! | `pdftoppm`, `pdftotext` | slide renders, PDF text |
//! | `pptx2md` | `.pptx` text and figures |
//! | `latexmk` or `pdflatex` | `--compile_pdf` only |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compile;
pub mod config;
pub mod course;
pub mod error;
pub mod lecture;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod structure;
pub mod synthesize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CourseConfig, CourseConfigBuilder};
pub use course::{
    clean, process, refresh, run, synthesize, LectureOutcome, RunMode, RunReport, SynthesisReport,
};
pub use error::{
    CompilationError, ConversionError, CourseError, EnhancementError, LectureError, ModelError,
    ToolError,
};
pub use lecture::{discover_lectures, load_notes, Lecture, LectureFormat, LectureNote};
pub use pipeline::extract::{Extraction, Extractor, ToolExtractor};
pub use pipeline::llm::{Completion, CompletionRequest, LanguageModel, ModelSet};
pub use progress::{CourseProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use structure::{Chapter, CourseStructure, Part, StructureSource};
pub use synthesize::GlossaryEntry;
