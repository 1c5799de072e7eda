use jobsh_core::PromptStyle;
use nix::unistd::{Uid, User};
use std::env;
use tracing::debug;

const PLAIN: &str = "jobsh> ";

/// `user@host in dir> `, or `jobsh> ` when any part is unavailable.
pub fn build(style: PromptStyle) -> String {
    match style {
        PromptStyle::Plain => PLAIN.to_string(),
        PromptStyle::Full => full().unwrap_or_else(|| PLAIN.to_string()),
    }
}

fn full() -> Option<String> {
    let user = User::from_uid(Uid::current()).ok().flatten()?.name;
    let host = hostname::get().ok()?.into_string().ok()?;
    let cwd = env::current_dir().ok()?;
    let dir = match cwd.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => cwd.display().to_string(),
    };
    Some(format_prompt(&user, &host, &dir))
}

fn format_prompt(user: &str, host: &str, dir: &str) -> String {
    debug!(user, host, dir, "Built prompt");
    format!("{user}@{host} in {dir}> ")
}
