// SPDX-License-Identifier: GPL-3.0-only

/// Reassembles lines from fragmentary output chunks.
///
/// Both `\n` and `\r` end a line, since progress-style output rewrites the
/// current line with carriage returns. Blank lines are dropped.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return every line it completed.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut lines = Vec::new();

        for ch in text.chars() {
            if ch == '\n' || ch == '\r' {
                let line = std::mem::take(&mut self.partial);
                if !line.trim().is_empty() {
                    lines.push(line);
                }
            } else {
                self.partial.push(ch);
            }
        }

        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.partial);
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}
