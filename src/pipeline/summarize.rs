//! Per-lecture notes: slides + captions → LaTeX body.

use crate::config::CourseConfig;
use crate::error::EnhancementError;
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, ModelSet, RetryPolicy};
use crate::pipeline::postprocess::clean_latex;
use crate::prompts::{summary_prompt, DEFAULT_SUMMARY_SYSTEM_PROMPT};
use tracing::{debug, warn};

/// `slides.json` is cut to this many chars in the prompt.
pub const SLIDES_JSON_CAP: usize = 180_000;

/// `captions.json` is cut to this many chars in the prompt.
pub const CAPTIONS_JSON_CAP: usize = 60_000;

/// Ask the text model for a lecture's notes and clean the answer.
///
/// An answer that is empty after cleaning is an error: the caller must not
/// write a notes file for it.
pub async fn summarize_lecture(
    models: &ModelSet,
    config: &CourseConfig,
    lecture: &str,
    slides_json: &str,
    captions_json: &str,
) -> Result<String, EnhancementError> {
    let system = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SUMMARY_SYSTEM_PROMPT);
    let slides = truncate_chars(slides_json, SLIDES_JSON_CAP);
    let captions = truncate_chars(captions_json, CAPTIONS_JSON_CAP);
    if slides.len() < slides_json.len() {
        warn!("{}: slides.json truncated for the summary prompt", lecture);
    }

    let request = CompletionRequest::new(system, summary_prompt(slides, captions))
        .with_temperature(config.temperature)
        .with_max_tokens(config.summary_max_tokens);

    let completion = complete_with_retry(
        models.text.as_ref(),
        &request,
        RetryPolicy::from_config(config),
        "summary",
    )
    .await?;

    let latex = clean_latex(&completion.content);
    if latex.trim().is_empty() {
        return Err(EnhancementError::Empty {
            stage: "summary".to_string(),
        });
    }
    debug!(
        "{}: notes {} chars ({} output tokens)",
        lecture,
        latex.len(),
        completion.output_tokens
    );
    Ok(latex)
}

/// At most `max` chars of `s`.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::llm::{Completion, LanguageModel};
    use std::sync::{Arc, Mutex};

    struct Echo {
        answer: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait::async_trait]
    impl LanguageModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(Completion {
                content: self.answer.clone(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn notes_are_cleaned_and_prompt_overridable() {
        let echo = Arc::new(Echo {
            answer: "ok\n=== LATEX ===\n```latex\n\\section{Intro}\n```".into(),
            seen: Mutex::new(Vec::new()),
        });
        let models = ModelSet::uniform(echo.clone());
        let config = CourseConfig::builder()
            .system_prompt("Be brief.")
            .build()
            .unwrap();

        let notes = summarize_lecture(&models, &config, "L1", "[]", "{}")
            .await
            .unwrap();
        assert_eq!(notes, "\\section{Intro}\n");
        let seen = echo.seen.lock().unwrap();
        assert_eq!(seen[0].system, "Be brief.");
        assert!(seen[0].user.contains("Input slides.json:\n[]"));
    }

    #[tokio::test]
    async fn blank_notes_are_an_error() {
        let echo = Arc::new(Echo {
            answer: "=== LATEX ===\n```latex\n```".into(),
            seen: Mutex::new(Vec::new()),
        });
        let models = ModelSet::uniform(echo);
        let config = CourseConfig::builder().max_retries(0).build().unwrap();
        let err = summarize_lecture(&models, &config, "L1", "[]", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, EnhancementError::Empty { .. }));
    }
}
