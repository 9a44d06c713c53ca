// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Parley

//! Console command parsing.

use std::io::BufRead;

use parley_relay::{Field, Limits};
use tokio::sync::mpsc;

/// Hint printed when `send` lacks a recipient or message.
pub const SEND_USAGE: &str = "Type 'send <username> <message>' to send a message";

/// Reply to an unknown command.
pub const UNRECOGNIZED: &str = "Unrecognized command. Type 'send <username> <message>' or 'exit'";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the chat
    Exit,
    /// Send `content` to `to`
    Send { to: String, content: String },
    /// `send` with fewer than two arguments
    Usage,
    /// A `send` refused before it reaches the network
    Invalid(String),
    /// Blank line
    Empty,
    /// Anything else
    Unrecognized,
}

impl Command {
    /// Parse one input line.
    ///
    /// Arguments are split on single spaces; the first is the recipient and
    /// the rest are re-joined with single spaces, so the message keeps its
    /// inner spacing.
    pub fn parse(line: &str, limits: &Limits) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Self::Empty;
        }
        if line == "exit" {
            return Self::Exit;
        }

        let mut tokens = line.split(' ');
        if tokens.next() != Some("send") {
            return Self::Unrecognized;
        }

        let args: Vec<&str> = tokens.collect();
        if args.len() < 2 {
            return Self::Usage;
        }

        let to = args[0];
        let content = args[1..].join(" ");

        if limits.check(Field::To, to.len()).is_err() {
            return Self::Invalid(format!(
                "Recipient username cannot be longer than {} characters",
                limits.max_name_len()
            ));
        }
        if limits.check(Field::Content, content.len()).is_err() {
            return Self::Invalid(format!(
                "Message cannot be longer than {} characters",
                limits.max_message_len()
            ));
        }

        Self::Send {
            to: to.to_string(),
            content,
        }
    }
}

/// Parse `input` line by line on a dedicated thread.
///
/// Blank lines are skipped. The thread is never joined, so a read blocked
/// on the terminal does not hold up exit. The channel closes at end of input.
pub fn spawn_reader<R>(input: R, limits: Limits) -> mpsc::Receiver<Command>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            let command = Command::parse(&line, &limits);
            if command == Command::Empty {
                continue;
            }
            if tx.blocking_send(command).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line, &Limits::default())
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(parse("exit"), Command::Exit);
        assert_eq!(parse("exit\n"), Command::Exit);
    }

    #[test]
    fn test_parse_send() {
        assert_eq!(
            parse("send bob hello there"),
            Command::Send {
                to: "bob".to_string(),
                content: "hello there".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_send_keeps_inner_spacing() {
        assert_eq!(
            parse("send bob a  b"),
            Command::Send {
                to: "bob".to_string(),
                content: "a  b".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_send_missing_arguments() {
        assert_eq!(parse("send"), Command::Usage);
        assert_eq!(parse("send bob"), Command::Usage);
    }

    #[test]
    fn test_parse_send_limits() {
        let long_name = format!("send {} hi", "b".repeat(33));
        assert!(matches!(parse(&long_name), Command::Invalid(msg) if msg.contains("32")));

        let long_body = format!("send bob {}", "x".repeat(2049));
        assert!(matches!(parse(&long_body), Command::Invalid(msg) if msg.contains("2048")));

        let max_body = format!("send bob {}", "x".repeat(2048));
        assert!(matches!(parse(&max_body), Command::Send { .. }));
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(parse("hello"), Command::Unrecognized);
        assert_eq!(parse("sendbob hi"), Command::Unrecognized);
        assert_eq!(parse("   "), Command::Empty);
    }

    #[tokio::test]
    async fn test_spawn_reader_parses_lines_in_order() {
        let input = std::io::Cursor::new("send bob hi\n\nfoo\nexit\n");
        let mut commands = spawn_reader(input, Limits::default());

        assert_eq!(
            commands.recv().await,
            Some(Command::Send {
                to: "bob".to_string(),
                content: "hi".to_string(),
            })
        );
        assert_eq!(commands.recv().await, Some(Command::Unrecognized));
        assert_eq!(commands.recv().await, Some(Command::Exit));
        assert_eq!(commands.recv().await, None);
    }
}
