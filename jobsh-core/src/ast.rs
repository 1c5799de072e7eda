//! Immutable pipeline descriptions produced by the parser.
//!
//! A [`CommandLine`] is everything typed on one input line. It holds zero or
//! more [`Pipeline`]s, each of which becomes at most one job.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program name followed by its arguments. Never empty.
    pub argv: Vec<String>,
    /// Send this command's standard error wherever its standard output goes.
    pub stderr_to_stdout: bool,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stderr_to_stdout: false,
        }
    }

    /// The program to run.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.argv.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&shell_escape::escape(Cow::Borrowed(word.as_str())))?;
        }
        Ok(())
    }
}

/// Where the last command of a pipeline writes its standard output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: PathBuf,
    /// Append instead of truncating.
    pub append: bool,
}

/// An ordered chain of commands connected stdout-to-stdin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    /// Standard input of the first command.
    pub input: Option<PathBuf>,
    /// Standard output of the last command.
    pub output: Option<OutputRedirect>,
    /// Run without waiting and without the terminal.
    pub background: bool,
}

impl Pipeline {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }

    pub fn first(&self) -> Option<&Command> {
        self.commands.first()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Renders the commands the way a user would retype them, without
/// redirections or the trailing `&`.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                let prev = &self.commands[i - 1];
                f.write_str(if prev.stderr_to_stdout { " |& " } else { " | " })?;
            }
            write!(f, "{command}")?;
        }
        Ok(())
    }
}

/// Everything parsed from a single input line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub pipelines: Vec<Pipeline>,
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl IntoIterator for CommandLine {
    type Item = Pipeline;
    type IntoIter = std::vec::IntoIter<Pipeline>;

    fn into_iter(self) -> Self::IntoIter {
        self.pipelines.into_iter()
    }
}
