//! Orchestration: `process`, `refresh`, `synthesize` and `clean`.
//!
//! ## Incremental state
//!
//! A lecture is processed iff `<out_root>/<name>/lecture_notes.tex` exists
//! ([`Lecture::is_processed`]). `refresh` only works on lectures without it;
//! `process` redoes everything. Either way the global stages (structure,
//! synthesis, optional PDF) then run over every notes file on disk.
//!
//! ## Failure isolation
//!
//! A lecture that fails is recorded in its [`LectureOutcome`] and the run
//! continues. Global-stage failures are recorded in the [`RunReport`] for
//! `process`/`refresh` and returned as errors from `synthesize`; they never
//! remove lecture notes.

use crate::compile::compile_pdf;
use crate::config::CourseConfig;
use crate::error::{CourseError, LectureError};
use crate::lecture::{discover_lectures, load_notes, write_atomic, Lecture};
use crate::pipeline::enhance::{CaptionStats, Enhancer, RepairStats};
use crate::pipeline::extract::{Extractor, ToolExtractor};
use crate::pipeline::llm::{resolve_models, ModelSet};
use crate::pipeline::slides::{build_blocks, render_slides_md};
use crate::pipeline::summarize::summarize_lecture;
use crate::progress::Stage;
use crate::structure::{infer_structure, StructureSource};
use crate::synthesize::synthesize_course;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The four commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Reprocess every lecture, then synthesize.
    Process,
    /// Process lectures without notes, then synthesize.
    Refresh,
    /// Rebuild structure and synthesis from existing notes.
    Synthesize,
    /// Delete the output root.
    Clean,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Process => "process",
            RunMode::Refresh => "refresh",
            RunMode::Synthesize => "synthesize",
            RunMode::Clean => "clean",
        };
        f.write_str(s)
    }
}

/// What happened to one lecture.
#[derive(Debug, Clone, Serialize)]
pub struct LectureOutcome {
    pub name: String,
    pub slides: usize,
    pub repairs: RepairStats,
    pub captions: CaptionStats,
    /// Length of the notes written, in bytes.
    pub notes_len: usize,
    pub duration_ms: u64,
    pub error: Option<LectureError>,
}

impl LectureOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of the global stages.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisReport {
    /// Lectures included, in reading order.
    pub lectures: Vec<String>,
    /// Lectures cut from the corpus by `max_corpus_chars`.
    pub omitted: Vec<String>,
    pub truncated: bool,
    pub chapters: usize,
    pub structure_source: StructureSource,
    /// The `structure.json` the course was ordered by.
    pub structure_path: PathBuf,
    pub glossary_terms: usize,
    /// Protected spans the model dropped.
    pub lost_spans: usize,
    pub output: PathBuf,
    pub pdf: Option<PathBuf>,
    /// Compilation is never fatal; its failure is recorded here.
    pub compile_error: Option<String>,
}

/// Summary of one command.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    /// Lectures found in the lectures directory (after `limit`).
    pub discovered: usize,
    /// Lectures left alone because their notes already existed.
    pub skipped: Vec<String>,
    /// Lectures worked on, in lecture order.
    pub lectures: Vec<LectureOutcome>,
    /// `None` when there were no notes to synthesize or the stage failed.
    pub synthesis: Option<SynthesisReport>,
    pub synthesis_error: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    fn new(mode: RunMode) -> Self {
        Self {
            mode,
            discovered: 0,
            skipped: Vec::new(),
            lectures: Vec::new(),
            synthesis: None,
            synthesis_error: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.lectures.iter().filter(|l| l.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.lectures.len() - self.succeeded()
    }

    /// Turn a report into an error when the run should exit non-zero:
    /// lectures were pending and none succeeded, or a global stage failed.
    pub fn into_result(self) -> Result<RunReport, CourseError> {
        if !self.lectures.is_empty() && self.succeeded() == 0 {
            let first_error = self
                .lectures
                .iter()
                .find_map(|l| l.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(CourseError::AllLecturesFailed {
                total: self.lectures.len(),
                first_error,
            });
        }
        if let Some(detail) = self.synthesis_error {
            return Err(CourseError::SynthesisFailed { detail });
        }
        Ok(self)
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Process every discovered lecture, overwriting existing notes, then
/// rebuild structure and synthesis.
pub async fn process(config: &CourseConfig) -> Result<RunReport, CourseError> {
    run_lectures(RunMode::Process, config).await
}

/// Process only lectures without notes, then rebuild structure and
/// synthesis over all notes.
pub async fn refresh(config: &CourseConfig) -> Result<RunReport, CourseError> {
    run_lectures(RunMode::Refresh, config).await
}

/// Rebuild structure and synthesis from the notes already on disk.
pub async fn synthesize(config: &CourseConfig) -> Result<RunReport, CourseError> {
    let start = Instant::now();
    let models = resolve_models(config)?;
    let mut report = RunReport::new(RunMode::Synthesize);
    report.synthesis = run_global(&models, config).await?;
    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

/// Delete the whole output root. A missing root is not an error.
pub async fn clean(config: &CourseConfig) -> Result<RunReport, CourseError> {
    let start = Instant::now();
    let root = &config.out_root;
    if root.exists() {
        tokio::fs::remove_dir_all(root)
            .await
            .map_err(|e| CourseError::CleanFailed {
                path: root.clone(),
                source: e,
            })?;
        info!("Removed {}", root.display());
    } else {
        info!("{} does not exist; nothing to clean", root.display());
    }
    let mut report = RunReport::new(RunMode::Clean);
    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

/// Dispatch on `mode`.
pub async fn run(mode: RunMode, config: &CourseConfig) -> Result<RunReport, CourseError> {
    match mode {
        RunMode::Process => process(config).await,
        RunMode::Refresh => refresh(config).await,
        RunMode::Synthesize => synthesize(config).await,
        RunMode::Clean => clean(config).await,
    }
}

// ── Lecture stage ────────────────────────────────────────────────────────

async fn run_lectures(mode: RunMode, config: &CourseConfig) -> Result<RunReport, CourseError> {
    let start = Instant::now();
    let lectures = discover_lectures(config).await?;
    if lectures.is_empty() {
        warn!(
            "No .pptx or .pdf lectures found in {}",
            config.lectures_dir.display()
        );
    }
    let models = resolve_models(config)?;
    let extractor: Arc<dyn Extractor> = config
        .extractor
        .clone()
        .unwrap_or_else(|| Arc::new(ToolExtractor));

    let mut report = RunReport::new(mode);
    report.discovered = lectures.len();

    let (pending, done): (Vec<Lecture>, Vec<Lecture>) = lectures
        .iter()
        .cloned()
        .partition(|l| mode == RunMode::Process || !l.is_processed());
    report.skipped = done.into_iter().map(|l| l.name).collect();

    info!(
        "{}: {} lectures to process, {} already done",
        mode,
        pending.len(),
        report.skipped.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(pending.len(), report.skipped.len());
        for name in &report.skipped {
            cb.on_lecture_skipped(name);
        }
    }

    let order: Vec<String> = pending.iter().map(|l| l.name.clone()).collect();
    let mut outcomes: Vec<LectureOutcome> = stream::iter(pending)
        .map(|lecture| {
            let models = &models;
            let extractor = Arc::clone(&extractor);
            async move { process_lecture(lecture, models, extractor.as_ref(), config).await }
        })
        .buffer_unordered(config.max_workers.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|o| order.iter().position(|n| *n == o.name));
    report.lectures = outcomes;

    match run_global(&models, config).await {
        Ok(synthesis) => report.synthesis = synthesis,
        Err(e) => {
            error!("Global stage failed: {}", e);
            report.synthesis_error = Some(e.to_string());
        }
    }

    if config.clean_intermediate {
        remove_intermediate(&lectures).await;
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(report.succeeded(), report.failed());
    }
    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "{}: {} succeeded, {} failed, {} skipped in {}ms",
        mode,
        report.succeeded(),
        report.failed(),
        report.skipped.len(),
        report.duration_ms
    );
    Ok(report)
}

async fn process_lecture(
    lecture: Lecture,
    models: &ModelSet,
    extractor: &dyn Extractor,
    config: &CourseConfig,
) -> LectureOutcome {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_lecture_start(&lecture.name);
    }
    info!("{}: processing {}", lecture.name, lecture.source.display());

    let mut outcome = LectureOutcome {
        name: lecture.name.clone(),
        slides: 0,
        repairs: RepairStats::default(),
        captions: CaptionStats::default(),
        notes_len: 0,
        duration_ms: 0,
        error: None,
    };

    if let Err(e) = run_lecture(&lecture, models, extractor, config, &mut outcome).await {
        warn!("{}", e);
        if let Some(ref cb) = config.progress_callback {
            cb.on_lecture_error(&lecture.name, &e.to_string());
        }
        outcome.error = Some(e);
    } else {
        info!(
            "{}: notes written ({} slides, {} captions)",
            lecture.name, outcome.slides, outcome.captions.written
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_lecture_complete(&lecture.name, outcome.notes_len);
        }
    }
    outcome.duration_ms = start.elapsed().as_millis() as u64;
    outcome
}

/// Extraction → slide blocks → repair → captions → notes. The notes file is
/// written last, so its presence means every earlier step finished.
async fn run_lecture(
    lecture: &Lecture,
    models: &ModelSet,
    extractor: &dyn Extractor,
    config: &CourseConfig,
    outcome: &mut LectureOutcome,
) -> Result<(), LectureError> {
    let io = |e: std::io::Error| LectureError::Io {
        lecture: lecture.name.clone(),
        detail: e.to_string(),
    };

    tokio::fs::create_dir_all(&lecture.out_dir).await.map_err(io)?;
    let marker = lecture.notes_path();
    if marker.exists() {
        tokio::fs::remove_file(&marker).await.map_err(io)?;
    }

    let extraction = extractor
        .extract(lecture, config)
        .await
        .map_err(|e| LectureError::Conversion {
            lecture: lecture.name.clone(),
            detail: e.to_string(),
        })?;
    tokio::fs::write(lecture.slides_md_path(), &extraction.slides_md)
        .await
        .map_err(io)?;

    let blocks = build_blocks(extraction.sections());
    outcome.slides = blocks.len();
    if !extraction.rendered.is_empty() && blocks.len() != extraction.rendered.len() {
        warn!(
            "{}: {} slide sections but {} renders; slide images may be misaligned",
            lecture.name,
            blocks.len(),
            extraction.rendered.len()
        );
    }

    let enhancer = Enhancer::new(models, config);
    let (blocks, repairs) = enhancer.repair_slides(&lecture.out_dir, blocks).await;
    outcome.repairs = repairs;

    tokio::fs::write(lecture.slides_md_path(), render_slides_md(&blocks))
        .await
        .map_err(io)?;
    let slides_json = serde_json::to_string_pretty(&blocks).map_err(|e| LectureError::Io {
        lecture: lecture.name.clone(),
        detail: e.to_string(),
    })?;
    tokio::fs::write(lecture.slides_json_path(), &slides_json)
        .await
        .map_err(io)?;

    let existing = read_captions(lecture).await;
    let (captions, caption_stats) = enhancer
        .caption_lecture(&lecture.out_dir, &blocks, existing)
        .await;
    outcome.captions = caption_stats;
    let captions_json = serde_json::to_string_pretty(&captions).map_err(|e| LectureError::Io {
        lecture: lecture.name.clone(),
        detail: e.to_string(),
    })?;
    tokio::fs::write(lecture.captions_path(), &captions_json)
        .await
        .map_err(io)?;

    let notes = summarize_lecture(models, config, &lecture.name, &slides_json, &captions_json)
        .await
        .map_err(|e| LectureError::Summarization {
            lecture: lecture.name.clone(),
            detail: e.to_string(),
        })?;
    write_atomic(&marker, notes.as_bytes()).await.map_err(io)?;
    outcome.notes_len = notes.len();
    Ok(())
}

/// Captions from an earlier run; unreadable files start from empty.
async fn read_captions(lecture: &Lecture) -> BTreeMap<String, String> {
    let path = lecture.captions_path();
    let Ok(text) = tokio::fs::read_to_string(&path).await else {
        return BTreeMap::new();
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!("{}: ignoring unreadable {}: {}", lecture.name, path.display(), e);
        BTreeMap::new()
    })
}

async fn remove_intermediate(lectures: &[Lecture]) {
    for lecture in lectures {
        let dir = lecture.slides_png_dir();
        if dir.is_dir() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!("{}: removed {}", lecture.name, dir.display()),
                Err(e) => warn!("{}: could not remove {}: {}", lecture.name, dir.display(), e),
            }
        }
    }
}

// ── Global stages ────────────────────────────────────────────────────────

/// Structure → synthesis → optional PDF over every notes file on disk.
async fn run_global(
    models: &ModelSet,
    config: &CourseConfig,
) -> Result<Option<SynthesisReport>, CourseError> {
    let notes = load_notes(&config.out_root).await?;
    if notes.is_empty() {
        warn!("No lecture notes under {}; skipping synthesis", config.out_root.display());
        return Ok(None);
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(Stage::Structure);
    }
    let structure = infer_structure(models, config, &notes).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(Stage::Synthesis);
    }
    let course = synthesize_course(models, config, &structure.structure, &notes).await?;

    let mut report = SynthesisReport {
        lectures: course.lectures,
        omitted: course.omitted,
        truncated: course.truncated,
        chapters: structure.structure.chapters.len(),
        structure_source: structure.source,
        structure_path: structure.path,
        glossary_terms: course.glossary.len(),
        lost_spans: course.lost_spans,
        output: course.tex_path.clone(),
        pdf: None,
        compile_error: None,
    };

    if config.compile_pdf {
        if let Some(ref cb) = config.progress_callback {
            cb.on_stage(Stage::Compile);
        }
        match compile_pdf(&course.tex_path, config.tool_timeout_secs).await {
            Ok(pdf) => {
                info!("Compiled {}", pdf.display());
                report.pdf = Some(pdf);
            }
            Err(e) => {
                warn!("PDF compilation failed: {}", e);
                report.compile_error = Some(e.to_string());
            }
        }
    }

    Ok(Some(report))
}
