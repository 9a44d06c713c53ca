// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Parley

//! Terminal formatting for received envelopes and local notices.

use crossterm::style::Stylize;
use parley_relay::Envelope;

/// Format a received envelope for display.
///
/// User messages show as `<from>: <content>` with the name in green and the
/// body in blue. Server errors are shown in red.
pub fn envelope(envelope: &Envelope) -> String {
    if envelope.is_error {
        return error(&envelope.content);
    }
    format!(
        "{}: {}",
        envelope.from.as_str().green(),
        envelope.content.as_str().blue()
    )
}

/// Format an error line.
pub fn error(message: &str) -> String {
    message.red().to_string()
}

/// Format a display name.
pub fn name(name: &str) -> String {
    name.green().to_string()
}
