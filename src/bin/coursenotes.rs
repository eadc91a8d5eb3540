//! CLI binary for edgequake-coursenotes.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CourseConfig`, runs one command and prints the run summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_coursenotes::{
    run, CourseConfig, CourseProgressCallback, ProgressCallback, RunMode, RunReport, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Lecture bar plus one log line per finished lecture. Lectures finish out
/// of order when `--max_workers` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning lectures…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, name: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(name))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl CourseProgressCallback for CliProgressCallback {
    fn on_run_start(&self, pending: usize, skipped: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} lectures  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(pending as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Lectures");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{pending} lectures to process, {skipped} up to date"))
        ));
    }

    fn on_lecture_skipped(&self, name: &str) {
        self.bar
            .println(format!("  {} {}  {}", dim("•"), name, dim("notes exist")));
    }

    fn on_lecture_start(&self, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(name.to_string(), Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_lecture_complete(&self, name: &str, notes_len: usize) {
        let secs = self.elapsed_secs(name);
        self.bar.println(format!(
            "  {} {:<32}  {:<14}  {}",
            green("✓"),
            name,
            dim(&format!("{notes_len:>6} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_lecture_error(&self, name: &str, error: &str) {
        let secs = self.elapsed_secs(name);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_stage(&self, stage: Stage) {
        self.bar.set_prefix("Course");
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        let total = succeeded + failed;
        if failed == 0 {
            eprintln!(
                "{} {} lectures processed",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} lectures processed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process only new lectures, then rebuild the course notes
  coursenotes refresh

  # Reprocess everything from another directory and compile a PDF
  coursenotes --lectures_dir slides --out_root build --compile-pdf process

  # Re-run structure and synthesis only, asking the model for a new outline
  coursenotes --reinfer synthesize

  # Cheap run: no captions, no vision repair, two lectures
  coursenotes --no-caption --no-glitch-fix --limit 2 process

  # Machine-readable run report
  coursenotes --json refresh > report.json

  # Remove everything under the output root
  coursenotes clean

OUTPUT LAYOUT:
  <out_root>/<lecture>/slides.md          extracted slide text
  <out_root>/<lecture>/slides.json        repaired slide blocks
  <out_root>/<lecture>/captions.json      image → caption
  <out_root>/<lecture>/slides_png/        slide renders
  <out_root>/<lecture>/img/               extracted figures
  <out_root>/<lecture>/lecture_notes.tex  notes (marks the lecture as done)
  <out_root>/synthesized/structure.json   chapter/part outline
  <out_root>/synthesized/course_notes.tex merged course notes
  <out_root>/synthesized/glossary.json    global glossary

EXTERNAL TOOLS:
  soffice              .pptx → PDF (LibreOffice)
  pdftoppm, pdftotext  slide renders and PDF text (poppler)
  pptx2md              .pptx text and figures
  latexmk | pdflatex   --compile-pdf only

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY      OpenRouter API key (preferred)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openrouter, openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override the text model ID
  OPENAI_BASE_URL         OpenAI-compatible endpoint (same as --base-url)
  COURSENOTES_*           Any option below, e.g. COURSENOTES_MAX_WORKERS=8
  RUST_LOG                Log filter, overrides -v / -q

  A .env file in the working directory is loaded at start-up.
"#;

/// Turn lecture slide decks into synthesized LaTeX course notes.
#[derive(Parser, Debug)]
#[command(
    name = "coursenotes",
    version,
    about = "Turn lecture slide decks into synthesized LaTeX course notes",
    long_about = "Convert every .pptx / .pdf lecture in a directory into LaTeX notes with \
language models, then order them into chapters and merge them into one course document \
with a global glossary. Lectures whose notes already exist are skipped by `refresh`.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the lecture .pptx / .pdf files.
    #[arg(long = "lectures_dir", alias = "lectures-dir", env = "COURSENOTES_LECTURES_DIR",
          default_value = "lectures", global = true)]
    lectures_dir: PathBuf,

    /// Root directory for every generated artifact.
    #[arg(long = "out_root", alias = "out-root", env = "COURSENOTES_OUT_ROOT",
          default_value = "out", global = true)]
    out_root: PathBuf,

    /// Compile course_notes.tex to PDF with latexmk or pdflatex.
    #[arg(long, env = "COURSENOTES_COMPILE_PDF", global = true)]
    compile_pdf: bool,

    /// Delete slide renders after the run.
    #[arg(long, env = "COURSENOTES_CLEAN_INTERMEDIATE", global = true)]
    clean_intermediate: bool,

    /// Only consider the first N lectures in order.
    #[arg(long, env = "COURSENOTES_LIMIT", global = true,
          value_parser = clap::value_parser!(u64).range(1..))]
    limit: Option<u64>,

    /// Lectures processed concurrently.
    #[arg(long = "max_workers", alias = "max-workers", env = "COURSENOTES_MAX_WORKERS",
          default_value_t = 4, global = true)]
    max_workers: usize,

    /// Summary system prompt, inline or as a path to a text file.
    #[arg(long = "system_prompt", alias = "system-prompt", env = "COURSENOTES_SYSTEM_PROMPT",
          global = true)]
    system_prompt: Option<String>,

    /// Caption slide renders and extracted figures (default).
    #[arg(long, overrides_with = "no_caption", global = true)]
    caption: bool,

    /// Skip captioning.
    #[arg(long = "no-caption", env = "COURSENOTES_NO_CAPTION", overrides_with = "caption",
          global = true)]
    no_caption: bool,

    /// Also caption whole-slide renders, not only extracted figures (default).
    #[arg(long = "caption-slide-pngs", overrides_with = "no_caption_slide_pngs", global = true)]
    caption_slide_pngs: bool,

    /// Caption extracted figures only.
    #[arg(long = "no-caption-slide-pngs", env = "COURSENOTES_NO_CAPTION_SLIDE_PNGS",
          overrides_with = "caption_slide_pngs", global = true)]
    no_caption_slide_pngs: bool,

    /// Re-caption images that already have a caption.
    #[arg(long, env = "COURSENOTES_FORCE_CAPTIONS", global = true)]
    force_captions: bool,

    /// Proofread extracted slide text (default).
    #[arg(long = "glitch-fix", overrides_with = "no_glitch_fix", global = true)]
    glitch_fix: bool,

    /// Skip proofreading.
    #[arg(long = "no-glitch-fix", env = "COURSENOTES_NO_GLITCH_FIX",
          overrides_with = "glitch_fix", global = true)]
    no_glitch_fix: bool,

    /// Proofread against the slide render with the vision model (default).
    #[arg(long = "glitch-fix-with-png", overrides_with = "no_glitch_fix_with_png", global = true)]
    glitch_fix_with_png: bool,

    /// Proofread text only, without the slide render.
    #[arg(long = "no-glitch-fix-with-png", env = "COURSENOTES_NO_GLITCH_FIX_WITH_PNG",
          overrides_with = "glitch_fix_with_png", global = true)]
    no_glitch_fix_with_png: bool,

    /// Rewrite formulas into LaTeX math (default).
    #[arg(long, overrides_with = "no_rewrite", global = true)]
    rewrite: bool,

    /// Skip the formula rewrite.
    #[arg(long = "no-rewrite", env = "COURSENOTES_NO_REWRITE", overrides_with = "rewrite",
          global = true)]
    no_rewrite: bool,

    /// Ask the model for a new structure even if structure.json is valid.
    #[arg(long, env = "COURSENOTES_REINFER", global = true)]
    reinfer: bool,

    /// Slide render DPI (72–600).
    #[arg(long, env = "COURSENOTES_DPI", default_value_t = 200, global = true,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Text model ID (summaries, structure, synthesis).
    #[arg(long, env = "EDGEQUAKE_MODEL", global = true)]
    model: Option<String>,

    /// Vision model ID (captions, render-assisted repair). Default: --model.
    #[arg(long = "vision-model", env = "COURSENOTES_VISION_MODEL", global = true)]
    vision_model: Option<String>,

    /// Small model ID for proofreading.
    #[arg(long = "mini-model", env = "COURSENOTES_MINI_MODEL", global = true)]
    mini_model: Option<String>,

    /// LLM provider: openrouter, openai, anthropic, gemini, ollama.
    #[arg(
        long,
        env = "COURSENOTES_PROVIDER",
        global = true,
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          OPENROUTER_API_KEY is preferred, then OPENAI_API_KEY, then any provider \
          edgequake-llm can detect."
    )]
    provider: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long = "base-url", env = "COURSENOTES_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Retries per model call.
    #[arg(long = "max-retries", env = "COURSENOTES_MAX_RETRIES", default_value_t = 3,
          global = true)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long = "api-timeout", env = "COURSENOTES_API_TIMEOUT", default_value_t = 180,
          global = true)]
    api_timeout: u64,

    /// Per-invocation external tool timeout in seconds.
    #[arg(long = "tool-timeout", env = "COURSENOTES_TOOL_TIMEOUT", default_value_t = 300,
          global = true)]
    tool_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "COURSENOTES_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "COURSENOTES_QUIET", global = true)]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, env = "COURSENOTES_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "COURSENOTES_JSON", global = true)]
    json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Reprocess every lecture, then rebuild structure and synthesis.
    Process,
    /// Process lectures without notes, then rebuild structure and synthesis.
    Refresh,
    /// Rebuild structure and synthesis from existing notes.
    Synthesize,
    /// Delete the output root.
    Clean,
}

impl From<Command> for RunMode {
    fn from(c: Command) -> Self {
        match c {
            Command::Process => RunMode::Process,
            Command::Refresh => RunMode::Refresh,
            Command::Synthesize => RunMode::Synthesize,
            Command::Clean => RunMode::Clean,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let mode = RunMode::from(cli.command);

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar gives the per-lecture feedback; keep library logs quiet
    // underneath it unless asked for.
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && mode != RunMode::Clean;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn CourseProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    let report = run(mode, &config)
        .await
        .with_context(|| format!("{mode} failed"))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise run report")?
        );
    } else if !cli.quiet {
        print_summary(&report);
    }

    report
        .into_result()
        .with_context(|| format!("{mode} finished with errors"))?;
    Ok(())
}

fn print_summary(report: &RunReport) {
    if report.mode == RunMode::Clean {
        eprintln!("{} output removed", green("✔"));
        return;
    }
    for lecture in report.lectures.iter().filter(|l| !l.succeeded()) {
        if let Some(ref e) = lecture.error {
            eprintln!("  {} {}", red("✗"), e);
        }
    }
    if let Some(ref s) = report.synthesis {
        eprintln!(
            "{}  {} lectures  {} chapters ({})  {} glossary terms  →  {}",
            green("✔"),
            s.lectures.len(),
            s.chapters,
            dim(&format!("{:?}", s.structure_source).to_lowercase()),
            s.glossary_terms,
            bold(&s.output.display().to_string()),
        );
        if s.truncated {
            eprintln!(
                "   {} corpus truncated; omitted: {}",
                cyan("⚠"),
                if s.omitted.is_empty() {
                    "none".to_string()
                } else {
                    s.omitted.join(", ")
                }
            );
        }
        if s.lost_spans > 0 {
            eprintln!(
                "   {} {} protected spans were dropped by the model",
                cyan("⚠"),
                s.lost_spans
            );
        }
        if let Some(ref pdf) = s.pdf {
            eprintln!("   PDF  →  {}", bold(&pdf.display().to_string()));
        }
        if let Some(ref e) = s.compile_error {
            eprintln!("   {} PDF not built: {}", cyan("⚠"), e);
        }
    }
    if let Some(ref e) = report.synthesis_error {
        eprintln!("{} synthesis failed: {}", red("✘"), e);
    }
    eprintln!("   {}", dim(&format!("{}ms total", report.duration_ms)));
}

/// Map CLI args to `CourseConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<CourseConfig> {
    let system_prompt = match cli.system_prompt {
        Some(ref value) => Some(read_prompt(value).await?),
        None => None,
    };

    let mut builder = CourseConfig::builder()
        .lectures_dir(&cli.lectures_dir)
        .out_root(&cli.out_root)
        .max_workers(cli.max_workers)
        .limit(cli.limit.map(|n| n as usize))
        .dpi(cli.dpi)
        .caption_images(cli.caption || !cli.no_caption)
        .caption_slide_pngs(cli.caption_slide_pngs || !cli.no_caption_slide_pngs)
        .force_captions(cli.force_captions)
        .glitch_fix(cli.glitch_fix || !cli.no_glitch_fix)
        .glitch_fix_with_png(cli.glitch_fix_with_png || !cli.no_glitch_fix_with_png)
        .rewrite(cli.rewrite || !cli.no_rewrite)
        .reinfer_structure(cli.reinfer)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .tool_timeout_secs(cli.tool_timeout)
        .compile_pdf(cli.compile_pdf)
        .clean_intermediate(cli.clean_intermediate);

    if let Some(ref m) = cli.model {
        builder = builder.text_model(m);
    }
    if let Some(ref m) = cli.vision_model {
        builder = builder.vision_model(m);
    }
    if let Some(ref m) = cli.mini_model {
        builder = builder.mini_model(m);
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `--system_prompt` names a file when one exists at that path.
async fn read_prompt(value: &str) -> Result<String> {
    let path = Path::new(value);
    if path.is_file() {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("coursenotes").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn bare_flags_do_not_swallow_the_subcommand() {
        let cli = parse(&["--caption-slide-pngs", "--glitch-fix-with-png", "process"]);
        assert!(matches!(cli.command, Command::Process));
        assert!(cli.caption_slide_pngs);
        assert!(cli.glitch_fix_with_png);
    }

    #[test]
    fn last_of_a_flag_pair_wins() {
        let cli = parse(&["refresh", "--caption-slide-pngs", "--no-caption-slide-pngs"]);
        assert!(!cli.caption_slide_pngs);
        assert!(cli.no_caption_slide_pngs);

        let cli = parse(&["--no-glitch-fix-with-png", "--glitch-fix-with-png", "refresh"]);
        assert!(cli.glitch_fix_with_png);
        assert!(!cli.no_glitch_fix_with_png);
    }

    #[tokio::test]
    async fn render_options_default_on() {
        let config = build_config(&parse(&["synthesize"]), None).await.unwrap();
        assert!(config.caption_slide_pngs);
        assert!(config.glitch_fix_with_png);

        let cli = parse(&["synthesize", "--no-caption-slide-pngs", "--no-glitch-fix-with-png"]);
        let config = build_config(&cli, None).await.unwrap();
        assert!(!config.caption_slide_pngs);
        assert!(!config.glitch_fix_with_png);
    }
}
