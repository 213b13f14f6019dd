use anyhow::{Context, Result, bail};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::types::MediaKind;

/// Operator input to the running suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    ToggleMinimized,
    Rescan,
    /// Append an HTML fragment file to the document body
    Insert(PathBuf),
    /// Detach the n-th element of a kind (document order)
    Remove { kind: MediaKind, ordinal: usize },
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<PanelCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "toggle" | "t" => PanelCommand::ToggleMinimized,
        "rescan" | "refresh" | "r" => PanelCommand::Rescan,
        "quit" | "exit" | "q" => PanelCommand::Quit,
        "insert" | "i" => {
            let path = words.next().context("usage: insert <FILE>")?;
            PanelCommand::Insert(PathBuf::from(path))
        }
        "remove" | "rm" => {
            let kind = words.next().context("usage: remove <video|audio> <ORDINAL>")?;
            let kind = MediaKind::from_tag(kind)
                .with_context(|| format!("unknown media kind '{kind}'"))?;
            let ordinal = words
                .next()
                .context("usage: remove <video|audio> <ORDINAL>")?
                .parse()
                .context("ordinal must be a non-negative integer")?;
            PanelCommand::Remove { kind, ordinal }
        }
        other => bail!("unknown command '{other}' (toggle, rescan, insert, remove, quit)"),
    };
    Ok(Some(command))
}

/// Spawn a background thread reading commands from stdin. EOF sends `Quit`.
pub fn spawn_listener(sender: UnboundedSender<PanelCommand>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("Command listener started");
        let stdin = std::io::stdin();
        if let Err(e) = listen_for_commands(stdin.lock(), &sender) {
            error!(error = %e, "Command listener error");
        }
        let _ = sender.send(PanelCommand::Quit);
    })
}

fn listen_for_commands(input: impl BufRead, sender: &UnboundedSender<PanelCommand>) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read command input")?;
        match parse_command(&line) {
            Ok(Some(command)) => {
                debug!(command = ?command, "Received command");
                let quit = command == PanelCommand::Quit;
                sender.send(command).context("Failed to send command")?;
                if quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(input = %line, error = %e, "Ignoring command"),
        }
    }
    Ok(())
}
