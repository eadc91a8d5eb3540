//! Per-lecture pipeline stages.
//!
//! Each submodule implements one transformation step and is testable on
//! its own.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ slides ──▶ enhance ──▶ summarize ──▶ postprocess
//! (tools)    (blocks)   (repair,    (LaTeX notes)  (cleanup)
//!                        captions)
//! ```
//!
//! 1. [`extract`]: run the converters for a `.pptx` / `.pdf` lecture
//! 2. [`slides`]: split the extracted Markdown into slide blocks
//! 3. [`enhance`]: model-assisted repair and captioning, degrading on failure
//! 4. [`summarize`]: one LaTeX notes body per lecture
//! 5. [`postprocess`]: deterministic cleanup of model LaTeX
//!
//! [`tools`], [`llm`] and [`encode`] are the plumbing underneath: external
//! processes, model calls with retry, and image payloads.

pub mod encode;
pub mod enhance;
pub mod extract;
pub mod llm;
pub mod postprocess;
pub mod slides;
pub mod summarize;
pub mod tools;
