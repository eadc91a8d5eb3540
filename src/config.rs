//! Configuration types for course-note generation.
//!
//! Every knob lives in [`CourseConfig`], built via [`CourseConfigBuilder`].
//! The config is passed explicitly into every stage; API keys and model
//! names are never read from ambient globals once the config is built.

use crate::error::CourseError;
use crate::pipeline::extract::Extractor;
use crate::pipeline::llm::ModelSet;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration for a course run.
///
/// Built via [`CourseConfig::builder()`] or using [`CourseConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_coursenotes::CourseConfig;
///
/// let config = CourseConfig::builder()
///     .lectures_dir("lectures")
///     .out_root("out")
///     .max_workers(2)
///     .text_model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CourseConfig {
    /// Directory holding the `.pptx` / `.pdf` lecture files. Default: `lectures`.
    pub lectures_dir: PathBuf,

    /// Root of all generated output. Default: `out`.
    pub out_root: PathBuf,

    /// Lectures processed concurrently. Default: 4.
    ///
    /// Each lecture is independent and owns its own output directory, so the
    /// only contention is on the LLM API. Lower this on 429s.
    pub max_workers: usize,

    /// Process at most this many lectures (after ordering). Default: all.
    pub limit: Option<usize>,

    /// Slide render resolution passed to `pdftoppm`. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Model for rewriting, summarization, structure and synthesis.
    pub text_model: Option<String>,

    /// Model for captions and PNG-assisted glitch fixing.
    pub vision_model: Option<String>,

    /// Small model for the cheap per-slide proofreading pass.
    pub mini_model: Option<String>,

    /// LLM provider name (e.g. "openrouter", "openai", "anthropic").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Base URL override for OpenAI-compatible endpoints.
    pub base_url: Option<String>,

    /// Pre-constructed models. Take precedence over every name above.
    pub models: Option<ModelSet>,

    /// Pre-constructed extractor. Default: external tools on `PATH`.
    pub extractor: Option<Arc<dyn Extractor>>,

    /// Sampling temperature for notes and synthesis. Default: 0.1.
    pub temperature: f32,

    /// Retries per model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 180.
    ///
    /// Summaries and the final synthesis are long generations; the default is
    /// deliberately generous.
    pub api_timeout_secs: u64,

    /// Per-external-tool timeout in seconds. Default: 300.
    pub tool_timeout_secs: u64,

    /// Custom system prompt for per-lecture summarization.
    pub system_prompt: Option<String>,

    /// Caption images found in the slides. Default: true.
    pub caption_images: bool,

    /// Also caption the full slide renders. Default: true.
    pub caption_slide_pngs: bool,

    /// Re-caption images that already have a caption. Default: false.
    pub force_captions: bool,

    /// Concurrent caption / repair calls within one lecture. Default: 8.
    pub caption_concurrency: usize,

    /// Proofread every slide body with the mini model. Default: true.
    pub glitch_fix: bool,

    /// Use slide renders to recover text lost in extraction. Default: true.
    pub glitch_fix_with_png: bool,

    /// Slides per PNG-assisted fixing call. Default: 5.
    pub glitch_fix_batch_size: usize,

    /// Repair broken formulas and placeholders with the text model. Default: true.
    pub rewrite: bool,

    /// Output-token cap for the per-slide rewrite. Default: 1200.
    pub rewrite_max_tokens: usize,

    /// Output-token cap for one lecture's notes. Default: 8192.
    pub summary_max_tokens: usize,

    /// Output-token cap for the course synthesis. Default: 32768.
    pub synthesis_max_tokens: usize,

    /// Character cap on the synthesis corpus. Default: 400 000.
    pub max_corpus_chars: usize,

    /// Headings per lecture shown to the structure model. Default: 40.
    pub heading_sample: usize,

    /// Ignore a still-valid `structure.json` and infer again. Default: false.
    pub reinfer_structure: bool,

    /// Prefix for rewritten `\includegraphics` paths. Default: `..`
    /// (relative to the `synthesized` directory).
    pub graphics_prefix: Option<String>,

    /// Compile `course_notes.tex` to PDF after synthesis. Default: false.
    pub compile_pdf: bool,

    /// Remove `slides_png/` directories after the run. Default: false.
    pub clean_intermediate: bool,

    /// Optional per-lecture progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            lectures_dir: PathBuf::from("lectures"),
            out_root: PathBuf::from("out"),
            max_workers: 4,
            limit: None,
            dpi: 200,
            text_model: None,
            vision_model: None,
            mini_model: None,
            provider_name: None,
            base_url: None,
            models: None,
            extractor: None,
            temperature: 0.1,
            max_retries: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 180,
            tool_timeout_secs: 300,
            system_prompt: None,
            caption_images: true,
            caption_slide_pngs: true,
            force_captions: false,
            caption_concurrency: 8,
            glitch_fix: true,
            glitch_fix_with_png: true,
            glitch_fix_batch_size: 5,
            rewrite: true,
            rewrite_max_tokens: 1200,
            summary_max_tokens: 8192,
            synthesis_max_tokens: 32768,
            max_corpus_chars: 400_000,
            heading_sample: 40,
            reinfer_structure: false,
            graphics_prefix: None,
            compile_pdf: false,
            clean_intermediate: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CourseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CourseConfig")
            .field("lectures_dir", &self.lectures_dir)
            .field("out_root", &self.out_root)
            .field("max_workers", &self.max_workers)
            .field("limit", &self.limit)
            .field("dpi", &self.dpi)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("mini_model", &self.mini_model)
            .field("provider_name", &self.provider_name)
            .field("base_url", &self.base_url)
            .field("models", &self.models.as_ref().map(|_| "<ModelSet>"))
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn Extractor>"))
            .field("max_retries", &self.max_retries)
            .field("caption_images", &self.caption_images)
            .field("caption_slide_pngs", &self.caption_slide_pngs)
            .field("glitch_fix", &self.glitch_fix)
            .field("glitch_fix_with_png", &self.glitch_fix_with_png)
            .field("rewrite", &self.rewrite)
            .field("reinfer_structure", &self.reinfer_structure)
            .field("compile_pdf", &self.compile_pdf)
            .field("clean_intermediate", &self.clean_intermediate)
            .finish()
    }
}

impl CourseConfig {
    /// Create a new builder for `CourseConfig`.
    pub fn builder() -> CourseConfigBuilder {
        CourseConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding `structure.json`, `course_notes.tex` and friends.
    pub fn synthesized_dir(&self) -> PathBuf {
        self.out_root.join(crate::lecture::SYNTHESIZED_DIR)
    }
}

/// Builder for [`CourseConfig`].
#[derive(Debug)]
pub struct CourseConfigBuilder {
    config: CourseConfig,
}

impl CourseConfigBuilder {
    pub fn lectures_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.lectures_dir = dir.into();
        self
    }

    pub fn out_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_root = dir.into();
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self
    }

    pub fn limit(mut self, n: Option<usize>) -> Self {
        self.config.limit = n;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = Some(model.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn mini_model(mut self, model: impl Into<String>) -> Self {
        self.config.mini_model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn models(mut self, models: ModelSet) -> Self {
        self.config.models = Some(models);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn caption_images(mut self, v: bool) -> Self {
        self.config.caption_images = v;
        self
    }

    pub fn caption_slide_pngs(mut self, v: bool) -> Self {
        self.config.caption_slide_pngs = v;
        self
    }

    pub fn force_captions(mut self, v: bool) -> Self {
        self.config.force_captions = v;
        self
    }

    pub fn caption_concurrency(mut self, n: usize) -> Self {
        self.config.caption_concurrency = n.max(1);
        self
    }

    pub fn glitch_fix(mut self, v: bool) -> Self {
        self.config.glitch_fix = v;
        self
    }

    pub fn glitch_fix_with_png(mut self, v: bool) -> Self {
        self.config.glitch_fix_with_png = v;
        self
    }

    pub fn glitch_fix_batch_size(mut self, n: usize) -> Self {
        self.config.glitch_fix_batch_size = n.max(1);
        self
    }

    pub fn rewrite(mut self, v: bool) -> Self {
        self.config.rewrite = v;
        self
    }

    pub fn rewrite_max_tokens(mut self, n: usize) -> Self {
        self.config.rewrite_max_tokens = n;
        self
    }

    pub fn summary_max_tokens(mut self, n: usize) -> Self {
        self.config.summary_max_tokens = n;
        self
    }

    pub fn synthesis_max_tokens(mut self, n: usize) -> Self {
        self.config.synthesis_max_tokens = n;
        self
    }

    pub fn max_corpus_chars(mut self, n: usize) -> Self {
        self.config.max_corpus_chars = n;
        self
    }

    pub fn heading_sample(mut self, n: usize) -> Self {
        self.config.heading_sample = n;
        self
    }

    pub fn reinfer_structure(mut self, v: bool) -> Self {
        self.config.reinfer_structure = v;
        self
    }

    pub fn graphics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.graphics_prefix = Some(prefix.into());
        self
    }

    pub fn compile_pdf(mut self, v: bool) -> Self {
        self.config.compile_pdf = v;
        self
    }

    pub fn clean_intermediate(mut self, v: bool) -> Self {
        self.config.clean_intermediate = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CourseConfig, CourseError> {
        let c = &self.config;
        if c.out_root.as_os_str().is_empty() {
            return Err(CourseError::InvalidConfig(
                "Output root must not be empty".into(),
            ));
        }
        if c.lectures_dir == c.out_root
            || resolved(&c.lectures_dir).starts_with(resolved(&c.out_root))
        {
            return Err(CourseError::InvalidConfig(format!(
                "Output root '{}' must not contain the lectures directory ('{}'); \
                 `clean` deletes the output root",
                c.out_root.display(),
                c.lectures_dir.display()
            )));
        }
        if c.max_workers == 0 {
            return Err(CourseError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.limit == Some(0) {
            return Err(CourseError::InvalidConfig("Limit must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.tool_timeout_secs == 0 {
            return Err(CourseError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Absolute form of `path` with symlinks resolved as far as the path exists.
fn resolved(path: &Path) -> PathBuf {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut tail = Vec::new();
    let mut cur = abs.as_path();
    loop {
        if let Ok(real) = std::fs::canonicalize(cur) {
            return tail.iter().rev().fold(real, |acc, name| acc.join(name));
        }
        match (cur.parent(), cur.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                cur = parent;
            }
            _ => return abs,
        }
    }
}
