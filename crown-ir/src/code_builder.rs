//! Indented text accumulator for generated source.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct CodeBuilder {
    lines: VecDeque<String>,
    current_indent: usize,
    indent_delta: usize,
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::with_indent_delta(4)
    }

    pub fn with_indent_delta(indent_delta: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            current_indent: 0,
            indent_delta,
        }
    }

    pub fn indent_delta(&self) -> usize {
        self.indent_delta
    }

    pub fn lines(&self) -> impl ExactSizeIterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends a line. Multi-line text is dedented and split first.
    pub fn line(&mut self, text: &str) -> &mut Self {
        let lines = extract_lines(text);
        self.add_indented(lines);
        self
    }

    /// Attaches the first line of `text` to the last line, appends the rest.
    pub fn include(&mut self, text: &str) -> &mut Self {
        let mut lines = extract_lines(text).into_iter();
        if let Some(first) = lines.next() {
            self.include_line(&first);
        }
        self.add_indented(lines);
        self
    }

    pub fn empty_line(&mut self) -> &mut Self {
        self.lines.push_back(String::new());
        self
    }

    /// Runs `body` one indent level deeper.
    pub fn indented(&mut self, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.current_indent += self.indent_delta;
        body(self);
        self.current_indent -= self.indent_delta;
        self
    }

    /// Appends every line of `other` at the current indent.
    pub fn extend(&mut self, other: &CodeBuilder) -> &mut Self {
        self.add_indented(other.lines.iter().cloned());
        self
    }

    /// Like [`extend`](Self::extend) but the first line of `other` continues
    /// the last line of `self`.
    pub fn extend_including(&mut self, other: &CodeBuilder) -> &mut Self {
        let mut lines = other.lines.iter();
        let Some(first) = lines.next() else {
            return self;
        };
        self.include_line(first);
        self.add_indented(lines.cloned());
        self
    }

    /// Puts all lines of `other` before the current content.
    pub fn extend_above(&mut self, other: &CodeBuilder) -> &mut Self {
        for line in other.lines.iter().rev() {
            self.lines.push_front(line.clone());
        }
        self
    }

    pub fn string(&self) -> String {
        let mut out = String::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    fn include_line(&mut self, line: &str) {
        match self.lines.back_mut() {
            Some(last) => last.push_str(line),
            None => self.lines.push_back(line.to_owned()),
        }
    }

    fn add_indented(&mut self, lines: impl IntoIterator<Item = String>) {
        let indent = " ".repeat(self.current_indent);
        for line in lines {
            if line.is_empty() || indent.is_empty() {
                self.lines.push_back(line);
            } else {
                self.lines.push_back(format!("{indent}{line}"));
            }
        }
    }
}

fn extract_lines(text: &str) -> Vec<String> {
    if !text.contains('\n') {
        return vec![text.to_owned()];
    }
    let dedented = dedent(text);
    dedented
        .trim_matches('\n')
        .split('\n')
        .map(str::to_owned)
        .collect()
}

/// Removes the whitespace prefix shared by all non-blank lines.
fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                &line[margin..]
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
