//! Extraction adapters: lecture file → slide text + slide renders.
//!
//! Extraction itself is done by external programs reached through
//! [`crate::pipeline::tools::run_tool`]:
//!
//! ```text
//! .pptx ──soffice──▶ .pdf ──pdftoppm──▶ slides_png/slideNN.png
//!   └────pptx2md──▶ slides.md + img/
//! .pdf  ──pdftoppm──▶ slides_png/slideNN.png
//!   └────pdftotext──▶ one section per page
//! ```
//!
//! The [`Extractor`] trait is the seam; tests inject an in-process fake.

use crate::config::CourseConfig;
use crate::error::ConversionError;
use crate::lecture::{Lecture, LectureFormat, IMG_DIR, SLIDES_MD, SLIDES_PNG_DIR};
use crate::pipeline::slides;
use crate::pipeline::tools::run_tool;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a converter leaves behind for one lecture.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Markdown slide text, headed per slide.
    pub slides_md: String,
    /// Slide renders written under `slides_png/`, in slide order.
    pub rendered: Vec<PathBuf>,
    /// `(title, body)` per slide when the converter already knows the slide
    /// boundaries. `None` means `slides_md` is parsed instead.
    pub sections: Option<Vec<(String, String)>>,
}

impl Extraction {
    /// Slide sections in deck order.
    ///
    /// Page text of a PDF can contain lines starting with `#`, so sections
    /// known at extraction time win over re-parsing `slides_md`.
    pub fn sections(&self) -> Vec<(String, String)> {
        match self.sections {
            Some(ref sections) => sections.clone(),
            None => slides::parse_slides_md(&self.slides_md),
        }
    }
}

/// Converts one lecture source into text and renders.
///
/// Implementations write renders into `lecture.slides_png_dir()` and any
/// exported figures into `lecture.img_dir()`.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        lecture: &Lecture,
        config: &CourseConfig,
    ) -> Result<Extraction, ConversionError>;
}

/// Production extractor backed by LibreOffice, poppler and pptx2md.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolExtractor;

#[async_trait::async_trait]
impl Extractor for ToolExtractor {
    async fn extract(
        &self,
        lecture: &Lecture,
        config: &CourseConfig,
    ) -> Result<Extraction, ConversionError> {
        let source = tokio::fs::canonicalize(&lecture.source)
            .await
            .map_err(|e| io_err(&lecture.source, e))?;
        let timeout = config.tool_timeout_secs;

        match lecture.format {
            LectureFormat::Pptx => {
                let scratch = tempfile::tempdir().map_err(|e| io_err(&lecture.out_dir, e))?;
                let pdf = pptx_to_pdf(&source, scratch.path(), timeout).await?;
                let rendered =
                    render_pngs(&pdf, &lecture.slides_png_dir(), config.dpi, timeout).await?;

                tokio::fs::create_dir_all(lecture.img_dir())
                    .await
                    .map_err(|e| io_err(&lecture.img_dir(), e))?;
                let source_arg = source.to_string_lossy().into_owned();
                run_tool(
                    "pptx2md",
                    &[source_arg.as_str(), "-o", SLIDES_MD, "-i", IMG_DIR],
                    Some(&lecture.out_dir),
                    timeout,
                )
                .await?;

                let md_path = lecture.out_dir.join(SLIDES_MD);
                let slides_md = tokio::fs::read_to_string(&md_path).await.map_err(|_| {
                    ConversionError::NoOutput {
                        tool: "pptx2md".to_string(),
                        dir: lecture.out_dir.clone(),
                    }
                })?;
                Ok(Extraction {
                    slides_md,
                    rendered,
                    sections: None,
                })
            }
            LectureFormat::Pdf => {
                let rendered =
                    render_pngs(&source, &lecture.slides_png_dir(), config.dpi, timeout).await?;
                let source_arg = source.to_string_lossy().into_owned();
                let out = run_tool(
                    "pdftotext",
                    &["-layout", source_arg.as_str(), "-"],
                    None,
                    timeout,
                )
                .await?;
                if !out.stderr.trim().is_empty() {
                    debug!("pdftotext: {}", out.stderr.trim());
                }
                let sections = slides::sections_from_pdf_text(&out.stdout);
                let blocks = slides::build_blocks(sections.clone());
                Ok(Extraction {
                    slides_md: slides::render_slides_md(&blocks),
                    rendered,
                    sections: Some(sections),
                })
            }
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> ConversionError {
    ConversionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Convert a deck to PDF inside `scratch` and return the PDF path.
async fn pptx_to_pdf(
    source: &Path,
    scratch: &Path,
    timeout: u64,
) -> Result<PathBuf, ConversionError> {
    let scratch_arg = scratch.to_string_lossy().into_owned();
    let source_arg = source.to_string_lossy().into_owned();
    run_tool(
        "soffice",
        &[
            "--headless",
            "--convert-to",
            "pdf",
            "--outdir",
            scratch_arg.as_str(),
            source_arg.as_str(),
        ],
        None,
        timeout,
    )
    .await?;

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let produced = scratch.join(format!("{stem}.pdf"));
    if !produced.exists() {
        return Err(ConversionError::NoOutput {
            tool: "soffice".to_string(),
            dir: scratch.to_path_buf(),
        });
    }
    debug!("soffice produced {}", produced.display());
    Ok(produced)
}

/// Render every PDF page into `out_dir/slideNN.png`, replacing older renders.
async fn render_pngs(
    pdf: &Path,
    out_dir: &Path,
    dpi: u32,
    timeout: u64,
) -> Result<Vec<PathBuf>, ConversionError> {
    if out_dir.exists() {
        tokio::fs::remove_dir_all(out_dir)
            .await
            .map_err(|e| io_err(out_dir, e))?;
    }
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| io_err(out_dir, e))?;

    let pdf_arg = pdf.to_string_lossy().into_owned();
    let prefix = out_dir.join("slide").to_string_lossy().into_owned();
    let dpi_arg = dpi.to_string();
    run_tool(
        "pdftoppm",
        &["-png", "-r", dpi_arg.as_str(), pdf_arg.as_str(), prefix.as_str()],
        None,
        timeout,
    )
    .await?;

    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .map_err(|e| io_err(out_dir, e))?;
    let mut produced: Vec<(usize, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(out_dir, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(index) = render_index(&name) {
            produced.push((index, entry.path()));
        }
    }
    if produced.is_empty() {
        return Err(ConversionError::NoOutput {
            tool: "pdftoppm".to_string(),
            dir: out_dir.to_path_buf(),
        });
    }
    produced.sort_by_key(|(i, _)| *i);

    let mut rendered = Vec::with_capacity(produced.len());
    for (index, path) in produced {
        let target = out_dir.join(normalised_render_name(index));
        tokio::fs::rename(&path, &target)
            .await
            .map_err(|e| io_err(&path, e))?;
        rendered.push(target);
    }
    info!("Rendered {} slides into {}/", rendered.len(), SLIDES_PNG_DIR);
    Ok(rendered)
}

/// Page number from a `pdftoppm` output name (`slide-7.png`, `slide-07.png`).
fn render_index(name: &str) -> Option<usize> {
    name.strip_prefix("slide-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

fn normalised_render_name(index: usize) -> String {
    format!("slide{index:02}.png")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_index_parses_padded_and_plain() {
        assert_eq!(render_index("slide-7.png"), Some(7));
        assert_eq!(render_index("slide-012.png"), Some(12));
        assert_eq!(render_index("slide07.png"), None);
        assert_eq!(render_index("slide-x.png"), None);
    }

    #[test]
    fn normalised_names_are_two_digit() {
        assert_eq!(normalised_render_name(3), "slide03.png");
        assert_eq!(normalised_render_name(120), "slide120.png");
    }

    #[test]
    fn pdf_sections_survive_hash_lines() {
        let text = "Capital structure\n# of shares 100\nprice 5\n\x0cNext slide\nbody\n\x0c";
        let sections = slides::sections_from_pdf_text(text);
        let blocks = slides::build_blocks(sections.clone());
        let extraction = Extraction {
            slides_md: slides::render_slides_md(&blocks),
            rendered: Vec::new(),
            sections: Some(sections),
        };

        let blocks = slides::build_blocks(extraction.sections());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].title, "Next slide");
        assert_eq!(blocks[1].slide_png, "slides_png/slide02.png");
        assert!(blocks[0].body_md.contains("# of shares 100"));
    }

    #[test]
    fn markdown_is_parsed_without_sections() {
        let extraction = Extraction {
            slides_md: "# One\n\nbody\n\n---\n\n# Two\n".into(),
            ..Default::default()
        };
        let titles: Vec<String> = extraction.sections().into_iter().map(|(t, _)| t).collect();
        assert_eq!(titles, vec!["One", "Two"]);
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let lecture = Lecture::new(dir.path().join("Lecture1.pdf"), dir.path().join("out"))
            .expect("pdf is supported");
        let err = ToolExtractor
            .extract(&lecture, &CourseConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Io { .. }), "got {err:?}");
    }
}
