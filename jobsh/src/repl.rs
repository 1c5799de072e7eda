//! The read/evaluate loop.

use jobsh_core::{ShellConfig, parse};
use jobsh_jobs::{ChildWatcher, Dispatcher, Flow, Terminal};
use miette::{IntoDiagnostic, Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor};
use std::io;
use tracing::{debug, warn};

use crate::prompt;

/// Read lines until end of input or `exit`.
///
/// Only errors that leave job bookkeeping untrustworthy end the loop
/// early; they are returned so the shell exits with a failure status.
pub fn run(config: &ShellConfig) -> Result<()> {
    let terminal = Terminal::acquire()?;
    let interactive = terminal.is_interactive();
    let watcher = ChildWatcher::install()
        .into_diagnostic()
        .wrap_err("Failed to watch for child processes")?;
    let mut dispatcher = Dispatcher::new(terminal, config, io::stdout()).with_watcher(watcher);

    let editor_config = Config::builder()
        .max_history_size(config.history_size)
        .into_diagnostic()?
        .auto_add_history(false)
        .build();
    let mut editor = DefaultEditor::with_config(editor_config)
        .into_diagnostic()
        .wrap_err("Failed to set up line editing")?;
    debug!(interactive, "Starting read loop");

    loop {
        dispatcher.before_prompt()?;

        let prompt = if interactive {
            prompt::build(config.prompt)
        } else {
            String::new()
        };
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).into_diagnostic().wrap_err("Failed to read input"),
        };

        let expansion = match dispatcher.expand(&line) {
            Ok(expansion) => expansion,
            Err(e) => {
                eprintln!("jobsh: {e}");
                continue;
            }
        };
        if expansion.expanded {
            println!("{}", expansion.line);
        }
        let line = expansion.line;
        dispatcher.record(&line);
        if !line.trim().is_empty() {
            if let Err(e) = editor.add_history_entry(line.as_str()) {
                warn!("Failed to add history entry: {}", e);
            }
        }

        let parsed = match parse(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("jobsh: {e}");
                continue;
            }
        };
        if dispatcher.evaluate(&parsed)? == Flow::Exit {
            break;
        }
    }

    debug!("Leaving read loop");
    Ok(())
}
