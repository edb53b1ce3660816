//! Output rendering seam.
//!
//! The core hands the aggregated turn text to a [`TextRenderer`]; it never
//! emits formatting directives itself. Markdown-aware renderers live outside
//! this crate.

/// Turns plain agent text into terminal output.
pub trait TextRenderer: Send + Sync {
    /// Render `text` for display.
    fn render(&self, text: &str) -> String;
}

/// Renderer that prints text as-is, normalised to end with one newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl TextRenderer for PlainRenderer {
    fn render(&self, text: &str) -> String {
        let mut out = text.trim_end().to_owned();
        out.push('\n');
        out
    }
}
