//! Orchestrator tests with an in-process model and extractor.
//!
//! The fake model answers by system prompt; requests carrying images fail,
//! so every run also exercises the "vision unavailable" degradation path.

use edgequake_coursenotes::prompts::{
    CORPUS_MARKER, DEFAULT_SUMMARY_SYSTEM_PROMPT, STRUCTURE_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT,
};
use edgequake_coursenotes::structure::STRUCTURE_FILE;
use edgequake_coursenotes::{
    clean, process, refresh, synthesize, Completion, CompletionRequest, ConversionError,
    CourseConfig, CourseError, CourseStructure, Extraction, Extractor, LanguageModel, Lecture,
    ModelError, ModelSet, StructureSource,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeModel {
    /// Add a lecture that does not exist to every inferred structure.
    ghost: bool,
    systems: Mutex<Vec<String>>,
}

impl FakeModel {
    fn ghost() -> Self {
        Self {
            ghost: true,
            ..Default::default()
        }
    }

    fn calls_to(&self, system: &str) -> usize {
        self.systems
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == system)
            .count()
    }
}

#[async_trait::async_trait]
impl LanguageModel for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError> {
        self.systems.lock().unwrap().push(request.system.clone());
        if !request.images.is_empty() {
            return Err(ModelError::Api("vision unavailable".into()));
        }

        let content = if request.system == STRUCTURE_SYSTEM_PROMPT {
            let mut files: Vec<String> = request
                .user
                .lines()
                .filter_map(|l| l.strip_prefix("- "))
                .map(str::to_string)
                .collect();
            if self.ghost {
                files.push("Ghost".into());
            }
            serde_json::json!({
                "chapters": [{"title": "Course", "parts": [{"title": "All", "files": files}]}]
            })
            .to_string()
        } else if request.system == SYNTHESIS_SYSTEM_PROMPT {
            let corpus = request
                .user
                .split_once(CORPUS_MARKER)
                .map(|(_, c)| c)
                .unwrap_or_default();
            format!("=== LATEX ===\n{corpus}\n=== GLOSSARY ===\nCourse :: the whole thing\n")
        } else if request.system == DEFAULT_SUMMARY_SYSTEM_PROMPT {
            "=== LATEX ===\n\\section{Notes}\n\\begin{description}\n\
             \\item[Gradient] direction of steepest ascent\n\\end{description}\n"
                .to_string()
        } else {
            "proofread slide text".to_string()
        };
        Ok(Completion {
            content,
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct FakeExtractor {
    calls: Mutex<Vec<String>>,
    fail: Vec<String>,
}

impl FakeExtractor {
    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait::async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        lecture: &Lecture,
        _config: &CourseConfig,
    ) -> Result<Extraction, ConversionError> {
        self.calls.lock().unwrap().push(lecture.name.clone());
        if self.fail.contains(&lecture.name) {
            return Err(ConversionError::UnsupportedFormat {
                path: lecture.source.clone(),
            });
        }
        let png_dir = lecture.slides_png_dir();
        std::fs::create_dir_all(&png_dir).unwrap();
        let png = png_dir.join("slide01.png");
        std::fs::write(&png, b"\x89PNG\r\n\x1a\nfake").unwrap();
        Ok(Extraction {
            slides_md: "## Intro\nSome text\n\n## Gradient\nMore text\n".to_string(),
            rendered: vec![png],
            sections: None,
        })
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────

struct Fixture {
    _tmp: TempDir,
    lectures: PathBuf,
    out: PathBuf,
}

impl Fixture {
    fn new(lectures: &[&str]) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("lectures");
        std::fs::create_dir_all(&dir).unwrap();
        for name in lectures {
            std::fs::write(dir.join(format!("{name}.pdf")), b"%PDF-1.4").unwrap();
        }
        Self {
            lectures: dir,
            out: tmp.path().join("out"),
            _tmp: tmp,
        }
    }

    fn config(&self, model: &Arc<FakeModel>, extractor: &Arc<FakeExtractor>) -> CourseConfig {
        CourseConfig::builder()
            .lectures_dir(&self.lectures)
            .out_root(&self.out)
            .models(ModelSet::uniform(model.clone()))
            .extractor(extractor.clone())
            .max_retries(0)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn notes_path(&self, name: &str) -> PathBuf {
        self.out.join(name).join("lecture_notes.tex")
    }

    fn write_notes(&self, name: &str, latex: &str) {
        let path = self.notes_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, latex).unwrap();
    }

    fn course_tex(&self) -> String {
        std::fs::read_to_string(self.out.join("synthesized").join("course_notes.tex")).unwrap()
    }

    fn structure(&self) -> CourseStructure {
        let text =
            std::fs::read_to_string(self.out.join("synthesized").join("structure.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

fn sorted(names: Vec<&str>) -> Vec<String> {
    let mut v: Vec<String> = names.into_iter().map(str::to_string).collect();
    v.sort();
    v
}

fn exists(p: &Path) -> bool {
    p.exists()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_refresh_processes_nothing() {
    let fx = Fixture::new(&["Lecture1", "Lecture2"]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());
    let config = fx.config(&model, &extractor);

    let first = refresh(&config).await.unwrap().into_result().unwrap();
    assert_eq!(first.succeeded(), 2);
    assert!(first.skipped.is_empty());
    assert!(exists(&fx.notes_path("Lecture1")));
    assert!(exists(&fx.notes_path("Lecture2")));

    let second = refresh(&config).await.unwrap().into_result().unwrap();
    assert!(second.lectures.is_empty());
    assert_eq!(second.skipped, vec!["Lecture1", "Lecture2"]);
    assert_eq!(extractor.calls(), vec!["Lecture1", "Lecture2"]);

    let synthesis = second.synthesis.expect("synthesis reruns");
    assert_eq!(synthesis.lectures, vec!["Lecture1", "Lecture2"]);
    assert_eq!(synthesis.structure_source, StructureSource::Reused);
}

#[tokio::test]
async fn refresh_only_processes_unmarked_lectures() {
    let fx = Fixture::new(&["Lecture1", "Lecture2"]);
    fx.write_notes("Lecture1", "\\section{Handwritten}\nKept as is.\n");
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());

    let report = refresh(&fx.config(&model, &extractor)).await.unwrap();
    assert_eq!(extractor.calls(), vec!["Lecture2"]);
    assert_eq!(report.skipped, vec!["Lecture1"]);
    assert_eq!(report.lectures.len(), 1);
    assert_eq!(report.lectures[0].name, "Lecture2");

    assert_eq!(
        std::fs::read_to_string(fx.notes_path("Lecture1")).unwrap(),
        "\\section{Handwritten}\nKept as is.\n"
    );
    let synthesis = report.synthesis.unwrap();
    assert_eq!(synthesis.lectures, vec!["Lecture1", "Lecture2"]);
    assert!(!synthesis.truncated);
    assert!(synthesis.omitted.is_empty());
    assert_eq!(
        synthesis.structure_path,
        fx.out.join("synthesized").join(STRUCTURE_FILE)
    );
    assert!(synthesis.structure_path.is_file());
    let tex = fx.course_tex();
    assert!(tex.contains("Handwritten"));
    assert!(tex.contains("\\section{Notes}"));
}

#[tokio::test]
async fn process_redoes_marked_lectures() {
    let fx = Fixture::new(&["Lecture1"]);
    fx.write_notes("Lecture1", "\\section{Old}\n");
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());

    let report = process(&fx.config(&model, &extractor)).await.unwrap();
    assert_eq!(report.succeeded(), 1);
    assert!(report.skipped.is_empty());
    let notes = std::fs::read_to_string(fx.notes_path("Lecture1")).unwrap();
    assert!(!notes.contains("Old"));
    assert!(notes.contains("\\section{Notes}"));
}

#[tokio::test]
async fn clean_then_process_leaves_no_stale_markers() {
    let fx = Fixture::new(&["Lecture1", "Lecture2"]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());
    let config = fx.config(&model, &extractor);

    refresh(&config).await.unwrap();
    fx.write_notes("Removed", "\\section{Gone}\n");

    clean(&config).await.unwrap();
    assert!(!exists(&fx.out));

    let report = process(&config).await.unwrap().into_result().unwrap();
    assert_eq!(report.succeeded(), 2);
    assert!(!exists(&fx.out.join("Removed")));
    assert_eq!(
        report.synthesis.unwrap().lectures,
        vec!["Lecture1", "Lecture2"]
    );
}

#[tokio::test]
async fn unknown_lecture_in_structure_is_a_mismatch() {
    let fx = Fixture::new(&[]);
    fx.write_notes("Lecture1", "\\section{A}\n");
    fx.write_notes("Lecture2", "\\section{B}\n");
    let model = Arc::new(FakeModel::ghost());
    let extractor = Arc::new(FakeExtractor::default());

    let err = synthesize(&fx.config(&model, &extractor))
        .await
        .unwrap_err();
    match err {
        CourseError::StructureMismatch { unknown, .. } => assert_eq!(unknown, vec!["Ghost"]),
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(
        std::fs::read_to_string(fx.notes_path("Lecture1")).unwrap(),
        "\\section{A}\n"
    );
    assert!(!exists(&fx.out.join("synthesized").join("structure.json")));
    assert!(!exists(&fx.out.join("synthesized").join("course_notes.tex")));
    assert_eq!(model.calls_to(SYNTHESIS_SYSTEM_PROMPT), 0);
}

#[tokio::test]
async fn structure_mismatch_fails_refresh_but_keeps_notes() {
    let fx = Fixture::new(&["Lecture1"]);
    let model = Arc::new(FakeModel::ghost());
    let extractor = Arc::new(FakeExtractor::default());

    let report = refresh(&fx.config(&model, &extractor)).await.unwrap();
    assert_eq!(report.succeeded(), 1);
    assert!(report.synthesis.is_none());
    assert!(report.synthesis_error.is_some());
    assert!(exists(&fx.notes_path("Lecture1")));
    assert!(matches!(
        report.into_result(),
        Err(CourseError::SynthesisFailed { .. })
    ));
}

#[tokio::test]
async fn notes_are_written_without_vision() {
    let fx = Fixture::new(&["Lecture1"]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());

    let report = refresh(&fx.config(&model, &extractor)).await.unwrap();
    let lecture = &report.lectures[0];
    assert!(lecture.succeeded());
    assert_eq!(lecture.slides, 2);
    assert_eq!(lecture.captions.written, 0);
    assert!(lecture.captions.failed >= 1);
    assert!(lecture.repairs.degraded >= 1);

    let dir = fx.out.join("Lecture1");
    let captions: BTreeMap<String, String> =
        serde_json::from_str(&std::fs::read_to_string(dir.join("captions.json")).unwrap())
            .unwrap();
    assert!(captions.is_empty());
    assert!(exists(&dir.join("slides.json")));
    assert!(exists(&dir.join("slides.md")));
    assert!(exists(&fx.notes_path("Lecture1")));
}

#[tokio::test]
async fn synthesize_twice_covers_every_lecture_once() {
    let fx = Fixture::new(&[]);
    for (name, title) in [("Lecture1", "A"), ("Lecture2", "B"), ("Lecture3", "C")] {
        fx.write_notes(name, &format!("\\section{{{title}}}\n$x_{title}$\n"));
    }
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());
    let config = fx.config(&model, &extractor);

    let first = synthesize(&config).await.unwrap();
    assert_eq!(
        first.synthesis.as_ref().unwrap().structure_source,
        StructureSource::Inferred
    );
    let second = synthesize(&config).await.unwrap();
    assert_eq!(
        second.synthesis.as_ref().unwrap().structure_source,
        StructureSource::Reused
    );

    let structure = fx.structure();
    assert_eq!(
        sorted(structure.ordered_lectures()),
        vec!["Lecture1", "Lecture2", "Lecture3"]
    );
    assert_eq!(model.calls_to(STRUCTURE_SYSTEM_PROMPT), 1);

    let synthesis = second.synthesis.unwrap();
    assert_eq!(synthesis.lost_spans, 0);
    let tex = fx.course_tex();
    assert!(tex.contains("$x_A$"));
    assert!(tex.contains("Global Glossary"));
    assert!(extractor.calls().is_empty());
}

#[tokio::test]
async fn one_failing_lecture_does_not_stop_the_others() {
    let fx = Fixture::new(&["Lecture1", "Lecture2"]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor {
        fail: vec!["Lecture1".into()],
        ..Default::default()
    });

    let report = refresh(&fx.config(&model, &extractor))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(!exists(&fx.notes_path("Lecture1")));
    assert_eq!(report.synthesis.unwrap().lectures, vec!["Lecture2"]);
}

#[tokio::test]
async fn all_lectures_failing_is_an_error() {
    let fx = Fixture::new(&["Lecture1"]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor {
        fail: vec!["Lecture1".into()],
        ..Default::default()
    });

    let report = refresh(&fx.config(&model, &extractor)).await.unwrap();
    assert!(report.synthesis.is_none());
    assert!(matches!(
        report.into_result(),
        Err(CourseError::AllLecturesFailed { total: 1, .. })
    ));
}

#[tokio::test]
async fn missing_lectures_dir_is_fatal() {
    let fx = Fixture::new(&[]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());
    let config = CourseConfig::builder()
        .lectures_dir(fx.lectures.join("nope"))
        .out_root(&fx.out)
        .models(ModelSet::uniform(model))
        .extractor(extractor)
        .build()
        .unwrap();

    let err = refresh(&config).await.unwrap_err();
    assert!(matches!(err, CourseError::LecturesDirNotFound { .. }));
}

#[tokio::test]
async fn limit_takes_the_first_lectures_in_order() {
    let fx = Fixture::new(&["Lecture10", "Lecture2", "Lecture1"]);
    let model = Arc::new(FakeModel::default());
    let extractor = Arc::new(FakeExtractor::default());
    let config = CourseConfig::builder()
        .lectures_dir(&fx.lectures)
        .out_root(&fx.out)
        .models(ModelSet::uniform(model))
        .extractor(extractor.clone())
        .limit(Some(2))
        .max_retries(0)
        .build()
        .unwrap();

    let report = refresh(&config).await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(extractor.calls(), vec!["Lecture1", "Lecture2"]);
}
