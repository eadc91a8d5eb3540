//! PDF compilation of the synthesized notes.
//!
//! `latexmk` is preferred; plain `pdflatex` runs twice so the table of
//! contents resolves. The compiler runs inside the `.tex` file's directory
//! so the `../<lecture>/img/...` graphics paths resolve. Failures never
//! touch the sources.

use crate::error::CompilationError;
use crate::pipeline::tools::{find_on_path, run_tool};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Auxiliary outputs removed after a successful build.
pub const AUX_EXTENSIONS: &[&str] = &["aux", "log", "out", "toc", "fls", "fdb_latexmk"];

/// Compile `tex` to a PDF next to it and return the PDF path.
pub async fn compile_pdf(tex: &Path, timeout_secs: u64) -> Result<PathBuf, CompilationError> {
    if !tex.is_file() {
        return Err(CompilationError::SourceMissing {
            path: tex.to_path_buf(),
        });
    }
    let dir = match tex.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = tex
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pdf = tex.with_extension("pdf");

    if find_on_path("latexmk").is_some() {
        info!("Compiling {} with latexmk", file_name);
        run_tool(
            "latexmk",
            &["-pdf", "-interaction=nonstopmode", "-output-directory=.", file_name.as_str()],
            Some(&dir),
            timeout_secs,
        )
        .await?;
    } else {
        info!("Compiling {} with pdflatex", file_name);
        for pass in 1..=2 {
            debug!("pdflatex pass {}", pass);
            run_tool(
                "pdflatex",
                &["-interaction=nonstopmode", "-output-directory=.", file_name.as_str()],
                Some(&dir),
                timeout_secs,
            )
            .await?;
        }
    }

    if !pdf.is_file() {
        return Err(CompilationError::NoPdf { path: pdf });
    }
    remove_aux_files(tex).await;
    Ok(pdf)
}

/// Auxiliary file paths for `tex`.
pub fn aux_files(tex: &Path) -> Vec<PathBuf> {
    AUX_EXTENSIONS
        .iter()
        .map(|ext| tex.with_extension(ext))
        .collect()
}

async fn remove_aux_files(tex: &Path) {
    for path in aux_files(tex) {
        if tokio::fs::remove_file(&path).await.is_ok() {
            debug!("Removed {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aux_files_share_the_stem() {
        let files = aux_files(Path::new("out/synthesized/course_notes.tex"));
        assert_eq!(files.len(), AUX_EXTENSIONS.len());
        assert!(files.contains(&PathBuf::from("out/synthesized/course_notes.aux")));
        assert!(files.contains(&PathBuf::from("out/synthesized/course_notes.fdb_latexmk")));
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let err = compile_pdf(Path::new("/nonexistent/course_notes.tex"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CompilationError::SourceMissing { .. }));
    }
}
