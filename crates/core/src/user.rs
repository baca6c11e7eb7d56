//! User identity parsed from message sources
//!
//! Sources arrive shaped like `nick!user@host`. Anything else is a bare
//! nickname.

use std::fmt;

/// A lobby user as seen in a message source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl User {
    /// Parse a `nick!user@host` hostmask, falling back to a bare nickname
    pub fn parse(source: &str) -> Self {
        if let Some((nick, userhost)) = source.split_once('!') {
            if let Some((user, host)) = userhost.split_once('@') {
                return Self {
                    nick: nick.to_string(),
                    user: Some(user.to_string()),
                    host: Some(host.to_string()),
                };
            }
        }

        Self::bare(source)
    }

    /// A user known only by nickname
    pub fn bare(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            user: None,
            host: None,
        }
    }

    /// Full hostmask, or the nickname when the user has no user/host part
    pub fn hostmask(&self) -> String {
        self.to_string()
    }

    pub fn is_bare(&self) -> bool {
        self.user.is_none() && self.host.is_none()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => write!(f, "{}!{}@{}", self.nick, user, host),
            _ => f.write_str(&self.nick),
        }
    }
}
