//! Output formatting for CLI commands.

use std::io::{self, Write};

use anyhow::Result;
use roomlog_config::Config;
use roomlog_store::{LogEntry, MessageKind};

/// One line per entry: `[time] sender: content`, with the kind shown when
/// it is not plain text.
pub fn entry_line(entry: &LogEntry) -> String {
    let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
    match entry.kind {
        MessageKind::Text => format!("[{time}] {}: {}", entry.sender, entry.content),
        kind => format!("[{time}] {} ({kind}): {}", entry.sender, entry.content),
    }
}

pub fn entries(entries: &[LogEntry], json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in entries {
        if json {
            serde_json::to_writer(&mut out, entry)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", entry_line(entry))?;
        }
    }
    Ok(())
}

/// Effective configuration as TOML, as `config show` prints it.
pub fn config_toml(config: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
