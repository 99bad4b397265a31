use std::io::Write;

use serde::Serialize;

use crate::fetch::Resource;

use super::{Card, RenderError, RenderSurface};

/// Writes one line per card, for terminals and logs.
#[derive(Debug)]
pub struct TextSurface<W> {
    writer: W,
}

impl<W: Write> TextSurface<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RenderSurface<Resource> for TextSurface<W> {
    fn show_loading(&mut self, _keys: &[String]) -> Result<(), RenderError> {
        Ok(())
    }

    fn render(&mut self, cards: &[Card<Resource>]) -> Result<(), RenderError> {
        for card in cards {
            match card {
                Card::Loaded { key, item } => {
                    write!(
                        self.writer,
                        "{key}\tstars={} forks={}",
                        item.stargazers_count, item.forks_count
                    )?;
                    if let Some(language) = &item.language {
                        write!(self.writer, " language={language}")?;
                    }
                    if let Some(updated_at) = item.updated_at {
                        write!(self.writer, " updated={}", updated_at.format("%Y-%m-%d"))?;
                    }
                    writeln!(self.writer)?;
                }
                Card::Failed { key, reason } => {
                    writeln!(
                        self.writer,
                        "{key}\tfailed: {}",
                        reason.as_deref().unwrap_or("unknown error")
                    )?;
                }
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the cards as a pretty-printed JSON array.
#[derive(Debug)]
pub struct JsonSurface<W> {
    writer: W,
}

impl<W: Write> JsonSurface<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<T: Serialize, W: Write> RenderSurface<T> for JsonSurface<W> {
    fn show_loading(&mut self, _keys: &[String]) -> Result<(), RenderError> {
        Ok(())
    }

    fn render(&mut self, cards: &[Card<T>]) -> Result<(), RenderError> {
        serde_json::to_writer_pretty(&mut self.writer, cards)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}
