use std::path::Path;

use crate::tree::NodeId;

/// The environment variable the server publishes into every pane so child
/// processes can call back: `CY=socket={path};id={node_id}`.
pub const CONTEXT_ENV: &str = "CY";

#[derive(Clone, Debug)]
pub struct Config {
    pub shell: String,
    pub term: String,
    pub editor: String,
}

/// Sanity-check a shell path the way tmux does.
fn check_shell(shell: &str) -> bool {
    !shell.is_empty() && shell.starts_with('/')
}

pub fn default_shell() -> String {
    let shell = std::env::var("SHELL").unwrap_or_default();
    if check_shell(&shell) {
        return shell;
    }
    "/bin/bash".to_string()
}

impl Config {
    pub fn from_env() -> Config {
        let editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_default();
        Config {
            shell: default_shell(),
            term: std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
            editor,
        }
    }
}

pub fn format_context(socket: &Path, id: NodeId) -> String {
    format!("socket={};id={}", socket.display(), id)
}

pub fn parse_context(value: &str) -> Option<(String, NodeId)> {
    let mut socket = None;
    let mut id = None;
    for part in value.split(';') {
        if let Some(path) = part.strip_prefix("socket=") {
            socket = Some(path.to_string());
        } else if let Some(node) = part.strip_prefix("id=") {
            id = node.parse().ok();
        }
    }
    Some((socket?, id?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn context_round_trip() {
        let formatted = format_context(&PathBuf::from("/run/cy-default"), 42);
        assert_eq!(formatted, "socket=/run/cy-default;id=42");
        assert_eq!(
            parse_context(&formatted),
            Some(("/run/cy-default".to_string(), 42))
        );
        assert_eq!(parse_context("garbage"), None);
    }

    #[test]
    fn shell_validation() {
        assert!(check_shell("/bin/zsh"));
        assert!(!check_shell("zsh"));
        assert!(!check_shell(""));
    }
}
