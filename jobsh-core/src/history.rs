//! Input line history and `!` expansion.

use miette::Diagnostic;
use std::collections::VecDeque;
use thiserror::Error;

pub const DEFAULT_HISTORY_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum HistoryError {
    #[error("{0}: event not found")]
    EventNotFound(String),
}

/// Result of running history expansion over a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub line: String,
    /// At least one `!` event was substituted.
    pub expanded: bool,
}

/// Bounded record of submitted lines, numbered from 1.
///
/// Numbers stay stable when old entries are dropped, so `!12` keeps
/// referring to the same line for as long as it is retained.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.trim().is_empty() {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with their history numbers, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, line)| (self.dropped + i + 1, line.as_str()))
    }

    pub fn get(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(self.dropped + 1)
            .and_then(|i| self.entries.get(i))
            .map(String::as_str)
    }

    /// The n-th most recent entry; `1` is the last line.
    fn back(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|n| self.entries.len().checked_sub(n + 1))
            .and_then(|i| self.entries.get(i))
            .map(String::as_str)
    }

    fn starting_with(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|line| line.starts_with(prefix))
            .map(String::as_str)
    }

    /// Substitute `!!`, `!n`, `!-n` and `!prefix` events.
    ///
    /// Text inside single quotes and a `!` followed by whitespace, `=` or
    /// the end of the line are left alone.
    pub fn expand(&self, line: &str) -> Result<Expansion, HistoryError> {
        let mut out = String::with_capacity(line.len());
        let mut expanded = false;
        let mut in_single = false;
        let mut chars = line.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c == '\'' {
                in_single = !in_single;
                out.push(c);
                continue;
            }
            if c != '!' || in_single {
                out.push(c);
                continue;
            }

            let rest = &line[pos + 1..];
            let designator_len = designator_len(rest);
            if designator_len == 0 {
                out.push(c);
                continue;
            }

            let designator = &rest[..designator_len];
            let event = self
                .resolve(designator)
                .ok_or_else(|| HistoryError::EventNotFound(format!("!{designator}")))?;
            out.push_str(event);
            expanded = true;

            while chars.next_if(|(i, _)| *i <= pos + designator_len).is_some() {}
        }

        Ok(Expansion {
            line: out,
            expanded,
        })
    }

    fn resolve(&self, designator: &str) -> Option<&str> {
        if designator == "!" {
            return self.back(1);
        }
        if let Some(n) = designator.strip_prefix('-') {
            return n.parse().ok().and_then(|n| self.back(n));
        }
        if let Ok(n) = designator.parse::<usize>() {
            return self.get(n);
        }
        self.starting_with(designator)
    }
}

/// Length in bytes of the event designator following a `!`.
fn designator_len(rest: &str) -> usize {
    let mut chars = rest.chars();
    match chars.next() {
        None => 0,
        Some('!') => 1,
        Some(c) if c.is_whitespace() || matches!(c, '=' | '(' | '"') => 0,
        Some('-') => {
            let digits = rest[1..].chars().take_while(char::is_ascii_digit).count();
            if digits == 0 { 0 } else { 1 + digits }
        }
        Some(c) if c.is_ascii_digit() => rest.chars().take_while(char::is_ascii_digit).count(),
        Some(_) => rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace() || matches!(c, '|' | '&' | ';' | '<' | '>' | '\'' | '"'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len()),
    }
}
