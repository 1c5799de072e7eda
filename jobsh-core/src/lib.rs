//! Core types for jobsh.
//!
//! This crate holds everything that does not touch processes or the
//! terminal: the pipeline description handed to the job engine, the
//! parser that produces it, input history, and the configuration file.

pub mod ast;
pub mod config;
pub mod history;
pub mod parser;

pub use ast::{Command, CommandLine, OutputRedirect, Pipeline};
pub use config::{ConfigError, DEFAULT_MAX_JOBS, MIN_MAX_JOBS, PromptStyle, ShellConfig};
pub use history::{Expansion, History, HistoryError};
pub use parser::{ParseError, parse};
