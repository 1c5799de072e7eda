//! Turns an input line into a [`CommandLine`].
//!
//! The grammar is deliberately small: words, quotes, pipes, `;` and `&`
//! separators, and redirections at either end of a pipeline. There are no
//! variables, globbing or control flow.

use miette::Diagnostic;
use std::iter::Peekable;
use std::mem;
use std::path::PathBuf;
use std::str::Chars;
use thiserror::Error;

use crate::ast::{Command, CommandLine, OutputRedirect, Pipeline};

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ParseError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("missing file name after '{0}'")]
    MissingTarget(&'static str),
    #[error("syntax error near '{0}': empty command")]
    EmptyCommand(&'static str),
    #[error("more than one {0} redirection in a pipeline")]
    DuplicateRedirect(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    PipeBoth,
    Semi,
    Amp,
    Less,
    Great,
    DGreat,
    GreatBoth,
    DGreatBoth,
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::Word(_) => "word",
            Token::Pipe => "|",
            Token::PipeBoth => "|&",
            Token::Semi => ";",
            Token::Amp => "&",
            Token::Less => "<",
            Token::Great => ">",
            Token::DGreat => ">>",
            Token::GreatBoth => ">&",
            Token::DGreatBoth => ">>&",
        }
    }
}

/// Parse one input line.
///
/// Blank lines and lines made only of separators yield an empty
/// [`CommandLine`].
pub fn parse(line: &str) -> Result<CommandLine, ParseError> {
    let tokens = tokenize(line)?;
    let mut pipelines = Vec::new();
    let mut builder = PipelineBuilder::default();
    let mut tokens = tokens.into_iter();

    while let Some(token) = tokens.next() {
        match token {
            Token::Word(word) => builder.current.push(word),
            Token::Pipe | Token::PipeBoth => {
                builder.end_command(&token)?;
            }
            Token::Less => {
                let target = expect_target(tokens.next(), "<")?;
                if builder.input.replace(target).is_some() {
                    return Err(ParseError::DuplicateRedirect("input"));
                }
            }
            Token::Great | Token::DGreat | Token::GreatBoth | Token::DGreatBoth => {
                let symbol = token.symbol();
                let path = expect_target(tokens.next(), symbol)?;
                let append = matches!(token, Token::DGreat | Token::DGreatBoth);
                let redirect = OutputRedirect { path, append };
                if builder.output.replace(redirect).is_some() {
                    return Err(ParseError::DuplicateRedirect("output"));
                }
                builder.output_merges_stderr = matches!(token, Token::GreatBoth | Token::DGreatBoth);
            }
            Token::Semi => {
                if let Some(pipeline) = builder.finish(false, ";")? {
                    pipelines.push(pipeline);
                }
            }
            Token::Amp => match builder.finish(true, "&")? {
                Some(pipeline) => pipelines.push(pipeline),
                None => return Err(ParseError::EmptyCommand("&")),
            },
        }
    }

    if let Some(pipeline) = builder.finish(false, "end of line")? {
        pipelines.push(pipeline);
    }

    Ok(CommandLine { pipelines })
}

fn expect_target(token: Option<Token>, symbol: &'static str) -> Result<PathBuf, ParseError> {
    match token {
        Some(Token::Word(word)) => Ok(PathBuf::from(word)),
        _ => Err(ParseError::MissingTarget(symbol)),
    }
}

#[derive(Default)]
struct PipelineBuilder {
    commands: Vec<Command>,
    current: Vec<String>,
    input: Option<PathBuf>,
    output: Option<OutputRedirect>,
    output_merges_stderr: bool,
}

impl PipelineBuilder {
    fn end_command(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.current.is_empty() {
            return Err(ParseError::EmptyCommand(token.symbol()));
        }
        let mut command = Command::new(mem::take(&mut self.current));
        command.stderr_to_stdout = matches!(token, Token::PipeBoth);
        self.commands.push(command);
        Ok(())
    }

    fn is_blank(&self) -> bool {
        self.commands.is_empty()
            && self.current.is_empty()
            && self.input.is_none()
            && self.output.is_none()
    }

    fn finish(
        &mut self,
        background: bool,
        at: &'static str,
    ) -> Result<Option<Pipeline>, ParseError> {
        if self.is_blank() {
            return Ok(None);
        }
        if self.current.is_empty() {
            return Err(ParseError::EmptyCommand(at));
        }

        let done = mem::take(self);
        let mut commands = done.commands;
        let mut last = Command::new(done.current);
        last.stderr_to_stdout = done.output_merges_stderr;
        commands.push(last);

        Ok(Some(Pipeline {
            commands,
            input: done.input,
            output: done.output,
            background,
        }))
    }
}

fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut word: Option<String> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        let operator = match c {
            c if c.is_whitespace() => {
                flush(&mut word, &mut tokens);
                continue;
            }
            '|' => {
                if chars.next_if_eq(&'&').is_some() {
                    Token::PipeBoth
                } else {
                    Token::Pipe
                }
            }
            '&' => Token::Amp,
            ';' => Token::Semi,
            '<' => Token::Less,
            '>' => {
                let append = chars.next_if_eq(&'>').is_some();
                let both = chars.next_if_eq(&'&').is_some();
                match (append, both) {
                    (false, false) => Token::Great,
                    (true, false) => Token::DGreat,
                    (false, true) => Token::GreatBoth,
                    (true, true) => Token::DGreatBoth,
                }
            }
            '\'' => {
                let text = word.get_or_insert_with(String::new);
                single_quoted(&mut chars, text)?;
                continue;
            }
            '"' => {
                let text = word.get_or_insert_with(String::new);
                double_quoted(&mut chars, text)?;
                continue;
            }
            '\\' => {
                let text = word.get_or_insert_with(String::new);
                text.push(chars.next().unwrap_or('\\'));
                continue;
            }
            c => {
                word.get_or_insert_with(String::new).push(c);
                continue;
            }
        };
        flush(&mut word, &mut tokens);
        tokens.push(operator);
    }
    flush(&mut word, &mut tokens);

    Ok(tokens)
}

fn flush(word: &mut Option<String>, tokens: &mut Vec<Token>) {
    if let Some(word) = word.take() {
        tokens.push(Token::Word(word));
    }
}

fn single_quoted(chars: &mut Peekable<Chars<'_>>, text: &mut String) -> Result<(), ParseError> {
    for c in chars.by_ref() {
        if c == '\'' {
            return Ok(());
        }
        text.push(c);
    }
    Err(ParseError::UnterminatedQuote('\''))
}

fn double_quoted(chars: &mut Peekable<Chars<'_>>, text: &mut String) -> Result<(), ParseError> {
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(()),
            '\\' => match chars.next_if(|next| matches!(next, '"' | '\\')) {
                Some(escaped) => text.push(escaped),
                None => text.push('\\'),
            },
            c => text.push(c),
        }
    }
    Err(ParseError::UnterminatedQuote('"'))
}
