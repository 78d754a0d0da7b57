//! Chat command parsing

use crate::types::ChatMessage;

/// A command extracted from a chat message, e.g. `!seed easy` → `seed ["easy"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lowercased verb without the prefix
    pub verb: String,
    /// Remaining whitespace-separated words, case preserved
    pub args: Vec<String>,
}

impl Command {
    /// Parse raw text against a command prefix
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }

        let mut words = text.split_whitespace();
        let verb = words.next()?.strip_prefix(prefix)?;
        if verb.is_empty() {
            return None;
        }

        Some(Self {
            verb: verb.to_lowercase(),
            args: words.map(str::to_string).collect(),
        })
    }

    /// Parse a chat message; bot and system messages are never commands
    pub fn from_message(message: &ChatMessage, prefix: &str) -> Option<Self> {
        if message.is_bot_originated() || message.is_system {
            return None;
        }
        Self::parse(&message.text, prefix)
    }

    /// Argument at `index`, if present
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}
