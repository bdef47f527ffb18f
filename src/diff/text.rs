//! Conversion between `Position`s and byte offsets.
//!
//! Columns count UTF-16 code units. A `\r` immediately before `\n` belongs to
//! the line terminator, not the line.

use crate::models::Position;
use crate::{AppError, Result};

/// Line-start table over a borrowed document.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    /// Index the line starts of `text`.
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { text, starts }
    }

    /// Number of addressable lines; a trailing newline opens one more, empty line.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Byte offset where `line` begins, or the document length past the last line.
    #[must_use]
    pub fn line_start(&self, line: usize) -> usize {
        self.starts.get(line).copied().unwrap_or(self.text.len())
    }

    /// Content of `line` without its terminator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfBounds` if the line does not exist.
    pub fn line_text(&self, line: usize) -> Result<&'a str> {
        let start = *self.starts.get(line).ok_or_else(|| {
            AppError::OutOfBounds(format!(
                "line {line} beyond end of document ({} lines)",
                self.starts.len()
            ))
        })?;
        let end = self
            .starts
            .get(line + 1)
            .map_or(self.text.len(), |next| next - 1);
        let content = &self.text[start..end];
        if end < self.text.len() {
            Ok(content.strip_suffix('\r').unwrap_or(content))
        } else {
            Ok(content)
        }
    }

    /// Byte offset addressed by `position`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfBounds` if the line does not exist, the column
    /// lies past the end of the line, or it splits a surrogate pair.
    pub fn offset_of(&self, position: Position) -> Result<usize> {
        let line = position.line as usize;
        let content = self.line_text(line)?;
        let start = self.starts[line];
        let wanted = position.character as usize;

        let mut units = 0usize;
        for (i, ch) in content.char_indices() {
            if units == wanted {
                return Ok(start + i);
            }
            units += ch.len_utf16();
            if units > wanted {
                return Err(AppError::OutOfBounds(format!(
                    "position {position} splits a surrogate pair"
                )));
            }
        }
        if units == wanted {
            Ok(start + content.len())
        } else {
            Err(AppError::OutOfBounds(format!(
                "position {position} past end of line (length {units})"
            )))
        }
    }

    /// Position of byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfBounds` if `offset` exceeds the document or is
    /// not on a character boundary.
    pub fn position_of(&self, offset: usize) -> Result<Position> {
        if offset > self.text.len() || !self.text.is_char_boundary(offset) {
            return Err(AppError::OutOfBounds(format!(
                "offset {offset} is not a character boundary in a document of {} bytes",
                self.text.len()
            )));
        }
        let line = self.starts.partition_point(|&s| s <= offset) - 1;
        let character = self.text[self.starts[line]..offset].encode_utf16().count();
        Ok(Position::new(to_u32(line)?, to_u32(character)?))
    }

    /// Position one past the last character of the document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfBounds` if the document is too large to address.
    pub fn end_position(&self) -> Result<Position> {
        self.position_of(self.text.len())
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AppError::OutOfBounds(format!("coordinate {value} exceeds u32")))
}
