// Builders for the command subset the jukebox needs.

use std::fmt;

/// Daemon subsystems the scheduler can wait on with `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// The server-side playlist changed.
    Playlist,
    /// Playback started, stopped or advanced.
    Player,
    /// The daemon's database update state changed.
    Update,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Playlist => "playlist",
            Subsystem::Player => "player",
            Subsystem::Update => "update",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quote a command argument per the line protocol. Locators produced by this
/// crate are filesystem-safe and never need quoting, but arguments are not
/// guaranteed to come from this crate.
pub fn escape_argument(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"', '\'', '\\']) {
        return arg.to_string();
    }

    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('"');
    escaped
}

/// `idle` with an optional subsystem filter.
pub(crate) fn idle_command(subsystems: &[Subsystem]) -> String {
    if subsystems.is_empty() {
        return "idle".to_string();
    }
    let names: Vec<&str> = subsystems.iter().map(Subsystem::as_str).collect();
    format!("idle {}", names.join(" "))
}

/// Boolean daemon options are `0`/`1` flags.
pub(crate) fn option_command(name: &str, enabled: bool) -> String {
    format!("{} {}", name, u8::from(enabled))
}
