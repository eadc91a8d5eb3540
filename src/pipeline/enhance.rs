//! Enhancement: model-assisted slide repair and image captioning.
//!
//! Every call here is optional polish. A failed or empty answer is logged,
//! counted, and replaced by the input, so a flaky API never costs a lecture
//! its notes.
//!
//! Repair runs in three passes, each switchable in [`CourseConfig`]:
//!
//! 1. **Vision batch fix** (`glitch_fix_with_png`): slides are sent in
//!    batches together with their renders; the answer is split on
//!    `=== SLIDE N ===` delimiters.
//! 2. **Glitch fix** (`glitch_fix`): the mini model proofreads each body.
//! 3. **Formula rewrite** (`rewrite`): the text model repairs broken math
//!    and placeholders.

use crate::config::CourseConfig;
use crate::error::EnhancementError;
use crate::pipeline::encode::{encode_image_file, is_captionable};
use crate::pipeline::llm::{
    complete_with_retry, CompletionRequest, LanguageModel, ModelSet, RetryPolicy,
};
use crate::pipeline::slides::SlideBlock;
use crate::prompts;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Output-token cap for a single caption.
const CAPTION_MAX_TOKENS: usize = 300;

/// Output-token cap per slide in a vision batch.
const VISION_TOKENS_PER_SLIDE: usize = 1000;

/// Outcome counters for slide repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    /// Passes whose answer replaced the slide text.
    pub repaired: usize,
    /// Passes that failed and kept the input.
    pub degraded: usize,
}

/// Outcome counters for captioning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptionStats {
    pub written: usize,
    pub failed: usize,
    /// Images already captioned, missing on disk, or of an unsupported type.
    pub skipped: usize,
}

/// Runs the enhancement passes for one lecture.
pub struct Enhancer<'a> {
    models: &'a ModelSet,
    config: &'a CourseConfig,
    policy: RetryPolicy,
}

impl<'a> Enhancer<'a> {
    pub fn new(models: &'a ModelSet, config: &'a CourseConfig) -> Self {
        Self {
            models,
            config,
            policy: RetryPolicy::from_config(config),
        }
    }

    async fn ask(
        &self,
        model: &dyn LanguageModel,
        request: CompletionRequest,
        stage: &str,
    ) -> Result<String, EnhancementError> {
        let completion = complete_with_retry(model, &request, self.policy, stage).await?;
        Ok(completion.content.trim().to_string())
    }

    /// Proofread one slide body with the mini model.
    pub async fn glitch_fix(&self, title: &str, body: &str) -> Result<String, EnhancementError> {
        let request = CompletionRequest::new(
            prompts::GLITCH_FIX_SYSTEM_PROMPT,
            prompts::glitch_fix_prompt(title, body),
        )
        .with_temperature(0.0)
        .with_max_tokens(2000);
        self.ask(self.models.mini.as_ref(), request, "glitch-fix").await
    }

    /// Repair corrupted formulas and placeholders with the text model.
    pub async fn rewrite_formulas(
        &self,
        title: &str,
        body: &str,
    ) -> Result<String, EnhancementError> {
        let request = CompletionRequest::new(
            prompts::REWRITE_SYSTEM_PROMPT,
            prompts::rewrite_prompt(title, body),
        )
        .with_temperature(0.0)
        .with_max_tokens(self.config.rewrite_max_tokens);
        self.ask(self.models.text.as_ref(), request, "rewrite").await
    }

    /// Repair a batch of slides against their renders.
    ///
    /// Returns one entry per slide in `batch`; `None` keeps the slide's text.
    pub async fn vision_fix_batch(
        &self,
        lecture_dir: &Path,
        batch: &[SlideBlock],
    ) -> Result<Vec<Option<String>>, EnhancementError> {
        let mut images = Vec::with_capacity(batch.len());
        for block in batch {
            images.push(encode_image_file(&lecture_dir.join(&block.slide_png)).await?);
        }
        let pairs: Vec<(&str, &str)> = batch
            .iter()
            .map(|b| (b.title.as_str(), b.body_md.as_str()))
            .collect();
        let request = CompletionRequest::new(
            prompts::VISION_FIX_SYSTEM_PROMPT,
            prompts::vision_fix_prompt(&pairs),
        )
        .with_images(images)
        .with_temperature(0.0)
        .with_max_tokens((VISION_TOKENS_PER_SLIDE * batch.len()).min(8192));
        let answer = self
            .ask(self.models.vision.as_ref(), request, "vision-fix")
            .await?;
        Ok(parse_batch_answer(&answer, batch.len()))
    }

    /// Run the enabled repair passes over every slide.
    pub async fn repair_slides(
        &self,
        lecture_dir: &Path,
        mut blocks: Vec<SlideBlock>,
    ) -> (Vec<SlideBlock>, RepairStats) {
        let mut stats = RepairStats::default();
        let concurrency = self.config.caption_concurrency.max(1);

        if self.config.glitch_fix_with_png {
            let with_png: Vec<usize> = blocks
                .iter()
                .enumerate()
                .filter(|(_, b)| lecture_dir.join(&b.slide_png).is_file())
                .map(|(i, _)| i)
                .collect();
            let batches: Vec<Vec<usize>> = with_png
                .chunks(self.config.glitch_fix_batch_size.max(1))
                .map(<[usize]>::to_vec)
                .collect();

            let snapshot = &blocks;
            let results: Vec<(Vec<usize>, Result<Vec<Option<String>>, EnhancementError>)> =
                stream::iter(batches)
                    .map(|indices| async move {
                        let batch: Vec<SlideBlock> =
                            indices.iter().map(|&i| snapshot[i].clone()).collect();
                        let result = self.vision_fix_batch(lecture_dir, &batch).await;
                        (indices, result)
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;

            for (indices, result) in results {
                match result {
                    Ok(fixed) => {
                        for (i, text) in indices.into_iter().zip(fixed) {
                            if let Some(text) = text {
                                blocks[i].body_md = text;
                                stats.repaired += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("{}", e);
                        stats.degraded += 1;
                    }
                }
            }
        }

        if self.config.glitch_fix || self.config.rewrite {
            let results: Vec<(usize, String, RepairStats)> = stream::iter(
                blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| !b.body_md.trim().is_empty()),
            )
            .map(|(i, block)| async move {
                let (text, s) = self.repair_text(&block.title, &block.body_md).await;
                (i, text, s)
            })
            .buffered(concurrency)
            .collect()
            .await;

            for (i, text, s) in results {
                blocks[i].body_md = text;
                stats.repaired += s.repaired;
                stats.degraded += s.degraded;
            }
        }

        debug!(
            "Repair: {} passes applied, {} degraded",
            stats.repaired, stats.degraded
        );
        (blocks, stats)
    }

    /// Glitch fix then formula rewrite, each falling back to its input.
    async fn repair_text(&self, title: &str, body: &str) -> (String, RepairStats) {
        let mut stats = RepairStats::default();
        let mut text = body.to_string();

        if self.config.glitch_fix {
            match self.glitch_fix(title, &text).await {
                Ok(fixed) => {
                    text = fixed;
                    stats.repaired += 1;
                }
                Err(e) => {
                    warn!("{}: {}", title, e);
                    stats.degraded += 1;
                }
            }
        }
        if self.config.rewrite {
            match self.rewrite_formulas(title, &text).await {
                Ok(fixed) => {
                    text = fixed;
                    stats.repaired += 1;
                }
                Err(e) => {
                    warn!("{}: {}", title, e);
                    stats.degraded += 1;
                }
            }
        }
        (text, stats)
    }

    /// Caption one image given its slide context.
    pub async fn caption(
        &self,
        image: &Path,
        title: &str,
        body: &str,
    ) -> Result<String, EnhancementError> {
        let data = encode_image_file(image).await?;
        let request = CompletionRequest::new(
            prompts::CAPTION_SYSTEM_PROMPT,
            prompts::caption_prompt(title, body),
        )
        .with_images(vec![data])
        .with_temperature(0.2)
        .with_max_tokens(CAPTION_MAX_TOKENS);
        self.ask(self.models.vision.as_ref(), request, "caption")
            .await
    }

    /// Caption every eligible image of a lecture, merged into `existing`.
    ///
    /// Keys are image paths relative to `lecture_dir`. Failed captions are
    /// left out of the map.
    pub async fn caption_lecture(
        &self,
        lecture_dir: &Path,
        blocks: &[SlideBlock],
        mut existing: BTreeMap<String, String>,
    ) -> (BTreeMap<String, String>, CaptionStats) {
        let mut stats = CaptionStats::default();
        if !self.config.caption_images {
            return (existing, stats);
        }

        let mut seen = HashSet::new();
        let mut jobs: Vec<(String, &SlideBlock)> = Vec::new();
        for block in blocks {
            let mut keys: Vec<&String> = block.extracted_images.iter().collect();
            if self.config.caption_slide_pngs {
                keys.push(&block.slide_png);
            }
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let path = lecture_dir.join(key);
                if (!self.config.force_captions && existing.contains_key(key))
                    || !is_captionable(&path)
                    || !path.is_file()
                {
                    stats.skipped += 1;
                    continue;
                }
                jobs.push((key.clone(), block));
            }
        }

        if jobs.is_empty() {
            debug!("Nothing to caption in {}", lecture_dir.display());
            return (existing, stats);
        }
        info!("Captioning {} images", jobs.len());

        let results: Vec<(String, Result<String, EnhancementError>)> = stream::iter(jobs)
            .map(|(key, block)| async move {
                let path = lecture_dir.join(&key);
                let result = self.caption(&path, &block.title, &block.body_md).await;
                (key, result)
            })
            .buffer_unordered(self.config.caption_concurrency.max(1))
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(caption) => {
                    existing.insert(key, caption);
                    stats.written += 1;
                }
                Err(e) => {
                    warn!("Caption for {} omitted: {}", key, e);
                    stats.failed += 1;
                }
            }
        }
        (existing, stats)
    }
}

static RE_SLIDE_DELIM: Lazy<Regex> = Lazy::new(|| Regex::new(r"=== SLIDE (\d+) ===").unwrap());

/// Split a batch answer into per-slide texts (1-based delimiters).
///
/// Out-of-range numbers are ignored; slides with no section, or an empty
/// one, come back as `None`.
pub fn parse_batch_answer(answer: &str, n: usize) -> Vec<Option<String>> {
    let mut out = vec![None; n];
    let delims: Vec<(usize, usize, Option<usize>)> = RE_SLIDE_DELIM
        .captures_iter(answer)
        .filter_map(|c| {
            let m = c.get(0)?;
            Some((m.start(), m.end(), c[1].parse().ok()))
        })
        .collect();

    for (k, (_, end, num)) in delims.iter().enumerate() {
        let next = delims.get(k + 1).map(|d| d.0).unwrap_or(answer.len());
        let text = answer[*end..next].trim();
        match num {
            Some(num) if (1..=n).contains(num) && !text.is_empty() => {
                out[num - 1] = Some(text.to_string());
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::llm::Completion;
    use std::sync::Arc;

    /// Answers by system prompt; fails every vision request.
    struct Scripted;

    #[async_trait::async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError> {
            if !request.images.is_empty() {
                return Err(ModelError::Api("vision offline".into()));
            }
            let content = if request.system == prompts::GLITCH_FIX_SYSTEM_PROMPT {
                "proofread".to_string()
            } else {
                String::new()
            };
            Ok(Completion {
                content,
                ..Default::default()
            })
        }
    }

    fn config() -> CourseConfig {
        CourseConfig::builder()
            .max_retries(0)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn block(i: usize, body: &str, images: &[&str]) -> SlideBlock {
        SlideBlock {
            slide_index: i,
            title: format!("S{i}"),
            body_md: body.to_string(),
            slide_png: crate::pipeline::slides::slide_png_rel(i),
            extracted_images: images.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn batch_answer_parsing() {
        let answer = "noise\n=== SLIDE 2 ===\nsecond\n=== SLIDE 1 ===\nfirst\n=== SLIDE 9 ===\nx\n=== SLIDE 3 ===\n";
        let parsed = parse_batch_answer(answer, 3);
        assert_eq!(
            parsed,
            vec![Some("first".into()), Some("second".into()), None]
        );
    }

    #[tokio::test]
    async fn failed_passes_fall_back_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let models = ModelSet::uniform(Arc::new(Scripted));
        let config = config();
        let enhancer = Enhancer::new(&models, &config);

        let blocks = vec![block(1, "teh body", &[]), block(2, "", &[])];
        let (out, stats) = enhancer.repair_slides(dir.path(), blocks).await;

        // glitch fix answers, rewrite returns empty and is rejected
        assert_eq!(out[0].body_md, "proofread");
        assert_eq!(out[1].body_md, "");
        assert_eq!(stats, RepairStats { repaired: 1, degraded: 1 });
    }

    #[tokio::test]
    async fn captions_skip_existing_and_omit_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img")).unwrap();
        std::fs::create_dir_all(dir.path().join("slides_png")).unwrap();
        std::fs::write(dir.path().join("img/a.png"), b"png").unwrap();
        std::fs::write(dir.path().join("img/b.emf"), b"emf").unwrap();
        std::fs::write(dir.path().join("slides_png/slide01.png"), b"png").unwrap();

        let models = ModelSet::uniform(Arc::new(Scripted));
        let config = config();
        let enhancer = Enhancer::new(&models, &config);

        let mut existing = BTreeMap::new();
        existing.insert("img/a.png".to_string(), "kept".to_string());
        let blocks = vec![block(1, "body", &["img/a.png", "img/b.emf"])];

        let (captions, stats) = enhancer
            .caption_lecture(dir.path(), &blocks, existing)
            .await;
        assert_eq!(captions.get("img/a.png").map(String::as_str), Some("kept"));
        assert!(!captions.contains_key("slides_png/slide01.png"));
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.written, 0);
    }
}
