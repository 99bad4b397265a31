//! Turning fetch results into display cards.
//!
//! The orchestrator produces one [`Card`] per requested key, in the order the keys were given,
//! and hands them to a [`RenderSurface`]. Surfaces decide what a card looks like: the
//! [`HtmlSurface`] builds the markup of the showcase widget, the [`TextSurface`] and
//! [`JsonSurface`] are used by the command line.

use std::io;

use serde::Serialize;
use thiserror::Error;

mod html;
mod locale;
mod text;

pub use html::{HtmlRenderer, HtmlSurface, escape_html, language_color};
pub use locale::Locale;
pub use text::{JsonSurface, TextSurface};

/// The display state of one requested key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Card<T> {
    /// The resource was loaded, either fresh or from the cache.
    Loaded { key: String, item: T },
    /// The resource could not be loaded.
    ///
    /// `reason` is only known right after a failed fetch; failures replayed from the cache have
    /// none.
    Failed {
        key: String,
        reason: Option<String>,
    },
}

impl<T> Card<T> {
    pub fn key(&self) -> &str {
        match self {
            Self::Loaded { key, .. } | Self::Failed { key, .. } => key,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// An error writing cards to a [`RenderSurface`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write output")]
    Io(#[from] io::Error),
    #[error("failed to serialize cards")]
    Json(#[from] serde_json::Error),
}

/// Where cards end up.
pub trait RenderSurface<T> {
    /// Shows a placeholder for every key while fetches are pending.
    fn show_loading(&mut self, keys: &[String]) -> Result<(), RenderError>;

    /// Replaces whatever is shown with the final cards.
    fn render(&mut self, cards: &[Card<T>]) -> Result<(), RenderError>;
}

/// A surface that keeps the last rendered cards, mostly useful in tests.
#[derive(Debug, Clone)]
pub struct CollectingSurface<T> {
    pub loading: Vec<Vec<String>>,
    pub rendered: Vec<Card<T>>,
}

impl<T> Default for CollectingSurface<T> {
    fn default() -> Self {
        Self {
            loading: Vec::new(),
            rendered: Vec::new(),
        }
    }
}

impl<T: Clone> RenderSurface<T> for CollectingSurface<T> {
    fn show_loading(&mut self, keys: &[String]) -> Result<(), RenderError> {
        self.loading.push(keys.to_vec());
        Ok(())
    }

    fn render(&mut self, cards: &[Card<T>]) -> Result<(), RenderError> {
        self.rendered = cards.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct NoDefault(u32);

    #[test]
    fn test_collecting_surface() {
        let mut surface = CollectingSurface::<NoDefault>::default();
        assert!(surface.loading.is_empty());
        assert!(surface.rendered.is_empty());

        let keys = vec!["A".to_owned()];
        surface.show_loading(&keys).unwrap();
        let cards = vec![Card::Loaded {
            key: "A".to_owned(),
            item: NoDefault(1),
        }];
        surface.render(&cards).unwrap();
        assert_eq!(surface.loading, vec![keys]);
        assert!(matches!(surface.rendered[0], Card::Loaded { item: NoDefault(1), .. }));
    }
}
