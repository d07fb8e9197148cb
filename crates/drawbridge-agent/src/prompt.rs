//! Bounded prompt payloads built from annotations.

use std::fmt::Write as _;

use drawbridge_protocols::{Annotation, AnnotationKind};

const MAX_TEXT_CHARS: usize = 500;
const MAX_ATTRIBUTES: usize = 20;
const TRUNCATION_MARK: &str = " …[truncated]";

/// Renders an annotation into a prompt no longer than `max_chars`.
///
/// The user's comment is kept whole when it fits in half the budget; the
/// element context gets the rest.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(64),
        }
    }

    pub fn build(&self, annotation: &Annotation) -> String {
        let request = format!("\n\nRequested change:\n{}", annotation.comment.trim());
        let request = truncate(&request, self.max_chars / 2);

        let context_budget = self.max_chars.saturating_sub(request.chars().count());
        let context = truncate(&self.context(annotation), context_budget);

        let mut prompt = context;
        prompt.push_str(&request);
        prompt
    }

    fn context(&self, annotation: &Annotation) -> String {
        let target = &annotation.target;
        let mut out = String::from(
            "A user annotated a page of this project in the browser. \
             Edit the source files so the page reflects the requested change.\n",
        );

        if !annotation.pathname.is_empty() {
            let _ = writeln!(out, "\nPage: {}", annotation.pathname);
        }
        let viewport = annotation.viewport;
        if viewport.width > 0.0 {
            let _ = writeln!(out, "Viewport: {}x{}", viewport.width, viewport.height);
        }

        if !target.selector.is_empty() || !target.tag_name.is_empty() {
            let tag = if target.tag_name.is_empty() { "element" } else { &target.tag_name };
            let _ = writeln!(out, "Element: <{}> {}", tag.to_ascii_lowercase(), target.selector);
        }
        if !target.element_path.is_empty() {
            let _ = writeln!(out, "Path: {}", target.element_path);
        }
        if !target.text.trim().is_empty() {
            let _ = writeln!(out, "Text: \"{}\"", truncate(target.text.trim(), MAX_TEXT_CHARS));
        }
        if let Some(classes) = target.css_classes.as_ref().filter(|c| !c.is_empty()) {
            let _ = writeln!(out, "Classes: {}", classes.join(" "));
        }
        if let Some(attributes) = target.attributes.as_ref().filter(|a| !a.is_empty()) {
            out.push_str("Attributes:\n");
            for (name, value) in attributes.iter().take(MAX_ATTRIBUTES) {
                let _ = writeln!(out, "  {}=\"{}\"", name, truncate(value, 120));
            }
        }
        let bbox = target.bounding_box;
        if bbox.width > 0.0 || bbox.height > 0.0 {
            let _ = writeln!(
                out,
                "Bounds: x={} y={} width={} height={}",
                bbox.x, bbox.y, bbox.width, bbox.height
            );
        }

        if annotation.kind == AnnotationKind::Drawing {
            if let Some(drawing) = &annotation.drawing {
                let _ = write!(
                    out,
                    "Drawing: {} strokes, {} points",
                    drawing.strokes.len(),
                    drawing.point_count()
                );
                if let Some(color) = &drawing.color {
                    let _ = write!(out, ", color {color}");
                }
                if let Some(b) = drawing.bounds {
                    let _ = write!(out, ", around x={} y={} width={} height={}", b.x, b.y, b.width, b.height);
                }
                out.push('\n');
            }
        }

        out
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(8000)
    }
}

/// Cut `s` to at most `max` chars, marking the cut.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mark_len = TRUNCATION_MARK.chars().count();
    if max <= mark_len {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - mark_len).collect();
    out.push_str(TRUNCATION_MARK);
    out
}
