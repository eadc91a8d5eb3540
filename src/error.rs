//! Error types for the edgequake-coursenotes library.
//!
//! Failures are split by blast radius:
//!
//! * [`CourseError`]: **Fatal** for a run or a global stage (lectures
//!   directory missing, provider not configured, inferred structure does not
//!   cover the lectures). Returned as `Err(CourseError)` from the
//!   [`crate::course`] entry points.
//!
//! * [`LectureError`]: **Isolated**: one lecture failed to convert or
//!   summarize. Stored inside [`crate::course::LectureOutcome`] so the other
//!   lectures and the global stages still run.
//!
//! * [`ConversionError`], [`EnhancementError`], [`CompilationError`] and
//!   [`ToolError`] are stage-level errors. Conversion errors end the lecture,
//!   enhancement errors degrade to the unenhanced content, compilation errors
//!   only cost the PDF.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the course entry points.
#[derive(Debug, Error)]
pub enum CourseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The lectures directory does not exist.
    #[error("Lectures directory not found: '{path}'\nPass --lectures_dir or create the directory.")]
    LecturesDirNotFound { path: PathBuf },

    /// A file or directory could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Run outcome ───────────────────────────────────────────────────────
    /// Every lecture selected for processing failed.
    ///
    /// Returned by [`crate::course::RunReport::into_result`].
    #[error("All {total} lectures failed.\nFirst error: {first_error}")]
    AllLecturesFailed { total: usize, first_error: String },

    // ── Global stage errors ───────────────────────────────────────────────
    /// The inferred structure does not reference every processed lecture
    /// exactly once.
    #[error(
        "Course structure does not match the processed lectures \
         (missing: {missing:?}, unknown: {unknown:?}, duplicated: {duplicated:?})"
    )]
    StructureMismatch {
        missing: Vec<String>,
        unknown: Vec<String>,
        duplicated: Vec<String>,
    },

    /// An existing `structure.json` could not be parsed.
    #[error("Malformed structure file '{path}': {detail}")]
    MalformedStructure { path: PathBuf, detail: String },

    /// The synthesis model call failed after all retries.
    #[error("Course synthesis failed: {detail}")]
    SynthesisFailed { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not remove the output root.
    #[error("Failed to remove '{path}': {source}")]
    CleanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of an external process run through [`crate::pipeline::tools`].
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary is not on `PATH`.
    #[error("Missing external tool '{tool}'. Install it and ensure it is on PATH.")]
    Missing { tool: String },

    /// The binary could not be started or waited on.
    #[error("Failed to run '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully.
    #[error("'{tool}' exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The process exceeded its time budget and was killed.
    #[error("'{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
}

/// Extraction failure for one lecture (fatal for that lecture only).
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The source file is neither `.pptx` nor `.pdf`.
    #[error("Unsupported lecture format: '{path}'")]
    UnsupportedFormat { path: PathBuf },

    /// An external converter failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A converter exited cleanly but left nothing behind.
    #[error("{tool} produced no output in '{dir}'")]
    NoOutput { tool: String, dir: PathBuf },

    /// File-system error while staging converter output.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single model call failure, before retries are applied.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The provider returned an error.
    #[error("LLM API error: {0}")]
    Api(String),

    /// The call did not finish within the per-call timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Degraded enhancement: callers fall back to the unenhanced content.
#[derive(Debug, Error)]
pub enum EnhancementError {
    /// Every attempt failed.
    #[error("{stage}: model call failed after {retries} retries: {detail}")]
    Failed {
        stage: String,
        retries: u32,
        detail: String,
    },

    /// The model answered, but with nothing usable.
    #[error("{stage}: model returned an empty answer")]
    Empty { stage: String },

    /// An image could not be loaded for a vision call.
    #[error("Failed to read image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// PDF compilation failure. Never fatal; the `.tex` sources are kept.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// There is nothing to compile.
    #[error("LaTeX source not found: '{path}'")]
    SourceMissing { path: PathBuf },

    /// latexmk / pdflatex failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The compiler exited cleanly but no PDF appeared.
    #[error("Compiler produced no PDF at '{path}'")]
    NoPdf { path: PathBuf },
}

/// A non-fatal error for a single lecture.
///
/// Stored in [`crate::course::LectureOutcome`]. The run continues unless
/// every lecture fails.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum LectureError {
    /// Extraction failed (bad input, missing converter).
    #[error("{lecture}: conversion failed: {detail}")]
    Conversion { lecture: String, detail: String },

    /// The notes could not be produced.
    #[error("{lecture}: summarization failed: {detail}")]
    Summarization { lecture: String, detail: String },

    /// Reading or writing the lecture's artifacts failed.
    #[error("{lecture}: I/O error: {detail}")]
    Io { lecture: String, detail: String },
}

impl LectureError {
    /// Name of the lecture this error belongs to.
    pub fn lecture(&self) -> &str {
        match self {
            LectureError::Conversion { lecture, .. }
            | LectureError::Summarization { lecture, .. }
            | LectureError::Io { lecture, .. } => lecture,
        }
    }
}
