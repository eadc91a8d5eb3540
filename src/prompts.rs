//! Prompts for every model call in the pipeline.
//!
//! Centralising prompts here keeps the stage modules free of prose and lets
//! unit tests inspect prompts directly without a model.
//!
//! Callers can override the summarization prompt via
//! [`crate::config::CourseConfig::system_prompt`]; every other prompt is fixed
//! because later stages parse the answer format it asks for.

/// System prompt for the cheap per-slide proofreading pass.
pub const GLITCH_FIX_SYSTEM_PROMPT: &str =
    "Fix typos, spacing and OCR junk only. Output ONLY the fixed text.";

/// System prompt for PNG-assisted batch repair.
pub const VISION_FIX_SYSTEM_PROMPT: &str = "Refine slide text from images. Keep format. \
Output ONLY the content for each slide, each preceded by its '=== SLIDE N ===' delimiter.";

/// System prompt for the formula/placeholder rewrite.
pub const REWRITE_SYSTEM_PROMPT: &str =
    "Technical editor fixing formulas. Output ONLY the fixed content.";

/// System prompt for image captions.
pub const CAPTION_SYSTEM_PROMPT: &str = "You create concise, precise technical captions \
(2-3 sentences). State what is visible: chart axes and shape, table comparisons, diagram \
components. Do not speculate beyond the image and the provided slide context.";

/// Default system prompt for per-lecture notes.
///
/// Used when `CourseConfig::system_prompt` is `None`.
pub const DEFAULT_SUMMARY_SYSTEM_PROMPT: &str = r#"You are an expert teaching assistant.
You produce rigorous, exam-useful LaTeX lecture notes with consistent notation.
You keep every formula correct and you point out common mistakes and exam traps."#;

/// System prompt for course structure inference.
pub const STRUCTURE_SYSTEM_PROMPT: &str = r#"You organise university lectures into a course outline.
Answer with a single JSON object and nothing else."#;

/// System prompt for the cross-lecture synthesis.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You synthesize full academic course notes in LaTeX.
You are strict about notation consistency and remove redundancy.
You keep math correct and exam-useful.
Tokens of the form @@SPANn@@ stand for formulas and figures: copy them unchanged, never rewrite, split or drop them."#;

/// Marker after which the synthesis prompt carries the notes corpus.
pub const CORPUS_MARKER: &str = "Lecture notes corpus:\n";

/// Slide bodies sent with a caption request are cut to this many chars.
const CAPTION_CONTEXT_CHARS: usize = 8000;

pub fn glitch_fix_prompt(title: &str, body: &str) -> String {
    format!(
        "Fix obvious OCR/transcription glitches. Keep format and math. No summarizing.\n\
         IMPORTANT: Output ONLY the corrected text, without any preamble.\n\
         Title: {title}\nBody:\n{body}"
    )
}

pub fn rewrite_prompt(title: &str, body: &str) -> String {
    format!(
        "Fix corrupted formulas and placeholders. Keep structure, tables and bullets.\n\
         IMPORTANT: Output ONLY the corrected markdown. Do NOT chat.\n\
         Title: {title}\nMarkdown:\n{body}"
    )
}

/// Batch repair prompt; slides are numbered from 1 in `slides` order.
pub fn vision_fix_prompt(slides: &[(&str, &str)]) -> String {
    let mut out = String::from(
        "Correct the markdown text for these slides using the images.\n\
         Strictly follow the order. Use delimiters '=== SLIDE N ===' where N is the slide number provided below.\n\
         IMPORTANT: Output ONLY the requested format. No conversational filler.\n\n",
    );
    for (i, (title, body)) in slides.iter().enumerate() {
        out.push_str(&format!(
            "=== SLIDE {} INPUT ===\nTitle: {}\nMarkdown:\n{}\n\n",
            i + 1,
            title,
            body
        ));
    }
    out
}

pub fn caption_prompt(title: &str, body: &str) -> String {
    let body: String = body.chars().take(CAPTION_CONTEXT_CHARS).collect();
    format!(
        "Write a concise technical caption (2-3 sentences) for this visual.\n\n\
         Slide title: {title}\n\n\
         Nearby slide content (Markdown, may include formulas/tables):\n{body}\n\n\
         Requirements:\n\
         - 2-3 sentences max\n\
         - If chart: specify axes and key relationship direction/shape\n\
         - If table: what it compares and what varies across rows/cols\n\
         - If diagram or timeline: name the components and their order"
    )
}

pub fn summary_prompt(slides_json: &str, captions_json: &str) -> String {
    format!(
        r#"You are given one lecture's slide content as structured blocks.

You MUST produce LaTeX notes that INCLUDE figures and tables:
- Use \includegraphics for images (paths under img/ or slides_png/)
- Keep tables as LaTeX tabular where feasible (no Markdown tables)
- Put definitions in a description environment: \item[term] definition

Write dense, technical notes. Do NOT oversimplify.

Structure:
- Executive summary (5-12 bullets)
- Definitions & notation
- Core theory and formulas
- Procedures (step-by-step)
- Canonical examples
- Pitfalls / exam traps
- Quick checklist

Output format EXACTLY:

=== LATEX ===
<latex body, no preamble>

Input slides.json:
{slides_json}

Image captions (captions.json):
{captions_json}
"#
    )
}

/// Structure prompt over the per-lecture heading listing.
pub fn structure_prompt(listing: &str) -> String {
    format!(
        r#"Group these lectures into chapters, and each chapter into parts.
Every lecture name must appear in exactly one part. Use the names exactly as given.
Keep related lectures together and order chapters the way the course should be read.

Answer with JSON only, in this shape:
{{"chapters":[{{"title":"...","parts":[{{"title":"...","files":["<lecture name>"]}}]}}]}}

Lectures and their headings:
{listing}"#
    )
}

pub fn synthesis_prompt(structure_json: &str, corpus: &str) -> String {
    format!(
        r#"You are given multiple lecture notes (LaTeX), already containing figure references and tables.
Synthesize them into coherent course notes organized by the chapters and parts below.

Requirements:
- Use \section for each chapter and \subsection for each part.
- Normalize notation across lectures.
- Preserve as much textual content as possible; only deduplicate content repeated across lectures.
- Keep explanations, bullets and formulas intact. Copy every @@SPANn@@ token verbatim.
- Produce LaTeX only, without a preamble.
- After the body, list glossary terms as 'term :: definition', one per line.

Output format EXACTLY:

=== LATEX ===
<latex body>
=== GLOSSARY ===
<term :: definition lines>

Structure:
{structure_json}

{CORPUS_MARKER}{corpus}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prompt_asks_for_latex_tag() {
        let p = summary_prompt("[]", "{}");
        assert!(p.contains("=== LATEX ==="));
        assert!(p.contains("Input slides.json:\n[]"));
    }

    #[test]
    fn vision_prompt_numbers_slides() {
        let p = vision_fix_prompt(&[("A", "a"), ("B", "b")]);
        assert!(p.contains("=== SLIDE 1 INPUT ===\nTitle: A"));
        assert!(p.contains("=== SLIDE 2 INPUT ===\nTitle: B"));
    }

    #[test]
    fn synthesis_prompt_ends_with_corpus() {
        let p = synthesis_prompt("{}", "% SOURCE: L1\nbody");
        let (_, corpus) = p.split_once(CORPUS_MARKER).unwrap();
        assert_eq!(corpus, "% SOURCE: L1\nbody");
    }

    #[test]
    fn caption_context_is_bounded() {
        let long = "x".repeat(20_000);
        let p = caption_prompt("T", &long);
        assert!(p.len() < 9_000);
    }

    #[test]
    fn structure_prompt_shows_json_shape() {
        let p = structure_prompt("Lecture1:\n  Intro");
        assert!(p.contains(r#"{"chapters":[{"title""#));
        assert!(p.ends_with("Lecture1:\n  Intro"));
    }
}
