//! Event names published on the bus
//!
//! Every parsed line is also published as `spring-<verb>` (lowercase verb);
//! see [`crate::protocol::Message::event_name`].

// Lifecycle
pub const CONNECTED: &str = "connected";
pub const NETID_AVAILABLE: &str = "netid-available";
pub const LOGIN_INITIATED: &str = "login-initiated";
pub const REGISTRATION_SENT: &str = "registration-sent";
pub const ACCEPTED: &str = "accepted";
pub const DENIED: &str = "denied";
pub const CONNECTION_LOST: &str = "connection-lost";
pub const RECONNECTED: &str = "reconnected";

// Wire
pub const RAW: &str = "raw";
pub const SPRING: &str = "spring";
pub const PARSE_FAILED: &str = "parse-failed";
pub const LOBBY_SEND: &str = "lobby-send";
pub const SEND_FAILED: &str = "send-failed";
pub const PONG: &str = "pong";

// Chat and presence
pub const SAID: &str = "said";
pub const SAIDEX: &str = "saidex";
pub const SAID_PRIVATE: &str = "said-private";
pub const SAIDEX_PRIVATE: &str = "saidex-private";
pub const NOTICE: &str = "notice";
pub const JOINED: &str = "joined";
pub const LEFT: &str = "left";
pub const QUIT: &str = "quit";
pub const KICK: &str = "kick";
pub const NICK: &str = "nick";
pub const NICK_IN_USE: &str = "nick-in-use";
pub const MODE_SET: &str = "+mode";
pub const MODE_UNSET: &str = "-mode";

// Server state
pub const TASSERVER: &str = "tasserver";
pub const CLIENTS: &str = "clients";
pub const ADDUSER: &str = "adduser";
pub const REMOVEUSER: &str = "removeuser";
pub const AGREEMENT: &str = "agreement";
pub const AGREEMENT_END: &str = "agreement-end";
pub const LOGININFOEND: &str = "logininfoend";
pub const FAILED: &str = "failed";

/// Name of the per-flag mode event, e.g. `mode +o`
pub fn mode_flag(sign: char, flag: char) -> String {
    format!("mode {sign}{flag}")
}
