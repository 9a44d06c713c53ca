//! Operator console read from standard input.

use std::io::BufRead;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reply to anything other than `exit`.
pub const UNRECOGNIZED: &str = "Unrecognized command. Type 'exit' to quit";

/// A console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Shut the server down
    Exit,
    /// Blank line
    Empty,
    /// Anything else
    Unrecognized(String),
}

impl ConsoleCommand {
    /// Parse one input line.
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "exit" => Self::Exit,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

/// Read stdin lines on a dedicated thread.
///
/// The thread is never joined, so a pending read does not hold up process
/// exit.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Handle console lines until `exit`, end of input, or shutdown.
///
/// `exit` cancels `shutdown`. End of input leaves the server running.
pub async fn run(mut lines: mpsc::Receiver<String>, shutdown: CancellationToken) {
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            return;
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Exit => {
                info!("Exit requested from console");
                shutdown.cancel();
                return;
            }
            ConsoleCommand::Empty => {}
            ConsoleCommand::Unrecognized(command) => {
                debug!(command = %command, "Unrecognized console command");
                println!("{}", UNRECOGNIZED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exit() {
        assert_eq!(ConsoleCommand::parse("exit"), ConsoleCommand::Exit);
        assert_eq!(ConsoleCommand::parse("  exit\n"), ConsoleCommand::Exit);
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(ConsoleCommand::parse("   "), ConsoleCommand::Empty);
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(
            ConsoleCommand::parse("quit"),
            ConsoleCommand::Unrecognized("quit".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse("exit now"),
            ConsoleCommand::Unrecognized("exit now".to_string())
        );
    }

    #[tokio::test]
    async fn test_exit_cancels_shutdown() {
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        tx.send("status".to_string()).await.unwrap();
        tx.send("exit".to_string()).await.unwrap();

        run(rx, shutdown.clone()).await;
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_end_of_input_keeps_running() {
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);
        let shutdown = CancellationToken::new();

        run(rx, shutdown.clone()).await;
        assert!(!shutdown.is_cancelled());
    }
}
