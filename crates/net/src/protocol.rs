//! Lobby protocol message parsing and serialization
//!
//! Wire format, one message per line:
//!   [`:`source SPACE] verb [SPACE param]* [SPACE `:`trailing]
//!
//! Any run of whitespace separates fields, so tab-separated sentences split
//! like spaces. Only a trailing param keeps its whitespace.
//!
//! Lines are terminated by `\n` (servers commonly send `\r\n`); parsing
//! operates on the content without the terminator.

use std::fmt;

use lobbyist_core::User;

/// A parsed lobby message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional source (`nick!user@host` or a server name)
    pub source: Option<String>,
    /// The verb as received (e.g. `SAID`, `ACCEPTED`, `005`)
    pub verb: String,
    /// Parameters; the last may have been a trailing param with spaces
    pub params: Vec<String>,
}

/// A line that cannot be parsed into a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message: empty line")]
    Empty,
    #[error("malformed message: source present but verb missing")]
    MissingVerb,
}

impl Message {
    /// Build a message to send
    pub fn new(verb: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            source: None,
            verb: verb.into(),
            params,
        }
    }

    /// Parse a single line (trailing `\r\n` and whitespace are ignored)
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end();

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (source, rest) = match input.strip_prefix(':') {
            Some(stripped) => match stripped.split_once(char::is_whitespace) {
                Some((source, rest)) => (Some(source.to_owned()), rest),
                None => return Err(ParseError::MissingVerb),
            },
            None => (None, input),
        };

        let rest = rest.trim_start();
        let (verb, mut remaining) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

        if verb.is_empty() {
            return Err(ParseError::MissingVerb);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start();
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(char::is_whitespace) {
                Some((param, tail)) => {
                    params.push(param.to_owned());
                    remaining = tail;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            source,
            verb: verb.to_owned(),
            params,
        })
    }

    /// Serialize to the wire format (without the line terminator)
    ///
    /// The last parameter is written in trailing form only when it needs it
    /// (empty, contains whitespace, or starts with `:`).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref source) = self.source {
            out.push(':');
            out.push_str(source);
            out.push(' ');
        }

        out.push_str(&self.verb);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if last.is_empty() || last.contains(char::is_whitespace) || last.starts_with(':') {
                out.push(':');
            }
            out.push_str(last);
        }

        out
    }

    /// Case-insensitive verb comparison
    pub fn is_verb(&self, verb: &str) -> bool {
        self.verb.eq_ignore_ascii_case(verb)
    }

    /// Name of the per-verb event this message is dispatched under
    pub fn event_name(&self) -> String {
        format!("spring-{}", self.verb.to_ascii_lowercase())
    }

    /// Parameter by index
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Parameters from `start` on, joined by single spaces
    pub fn joined_from(&self, start: usize) -> String {
        self.params.get(start..).unwrap_or_default().join(" ")
    }

    /// Source parsed into a user identity
    pub fn user(&self) -> Option<User> {
        self.source.as_deref().map(User::parse)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}
