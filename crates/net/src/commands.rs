//! Outgoing command lines
//!
//! Pure formatters; the client queues whatever these return. Chat text is
//! cut into chunks of [`MAX_CHAT_CHARS`] characters, one line per chunk.

/// Longest chat text carried by a single line, in characters
pub const MAX_CHAT_CHARS: usize = 400;

/// How line breaks inside chat text are neutralised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Newlines {
    Space,
    Strip,
}

fn clean(text: &str, newlines: Newlines) -> String {
    match newlines {
        Newlines::Space => text.replace(['\r', '\n'], " "),
        Newlines::Strip => text.replace(['\r', '\n'], ""),
    }
}

/// Split text into chunks of at most `max` characters
fn chunks(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max.max(1)).map(|c| c.iter().collect()).collect()
}

fn chat(prefix: &str, text: &str, newlines: Newlines) -> Vec<String> {
    chunks(&clean(text, newlines), MAX_CHAT_CHARS)
        .into_iter()
        .map(|chunk| format!("{prefix}{chunk}"))
        .collect()
}

pub fn login(username: &str, password_hash: &str, cpu: u32, client_name: &str, flags: &str) -> String {
    format!("LOGIN {username} {password_hash} {cpu} * {client_name}\t0\t{flags}")
}

pub fn register(username: &str, password_hash: &str, email: Option<&str>) -> String {
    match email {
        Some(email) => format!("REGISTER {username} {password_hash} {email}"),
        None => format!("REGISTER {username} {password_hash}"),
    }
}

pub fn confirm_agreement() -> String {
    "CONFIRMAGREEMENT".to_string()
}

pub fn join(channel: &str) -> String {
    format!("JOIN {channel}")
}

pub fn leave(channel: &str) -> String {
    format!("LEAVE {channel}")
}

pub fn ping() -> String {
    "PING".to_string()
}

/// Reply to a server probe, echoing its token if one was given
pub fn pong(token: Option<&str>) -> String {
    match token {
        Some(token) => format!("PONG {token}"),
        None => "PONG".to_string(),
    }
}

/// Channel message; newlines become spaces
pub fn say(channel: &str, text: &str) -> Vec<String> {
    chat(&format!("SAY {channel} "), text, Newlines::Space)
}

/// Channel emote; newlines are removed
pub fn say_ex(channel: &str, text: &str) -> Vec<String> {
    chat(&format!("SAYEX {channel} "), text, Newlines::Strip)
}

pub fn say_private(username: &str, text: &str) -> Vec<String> {
    chat(&format!("SAYPRIVATE {username} :"), text, Newlines::Strip)
}

pub fn say_private_ex(username: &str, text: &str) -> Vec<String> {
    chat(&format!("SAYPRIVATEEX {username} :"), text, Newlines::Strip)
}

/// Announce a user bridged in from an external service
///
/// The external name is reduced to ASCII letters and digits.
pub fn bridge_client_from(location: &str, external_id: &str, external_username: &str) -> String {
    let name: String = external_username
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("BRIDGECLIENTFROM {location} {external_id} {name}")
}

pub fn unbridge_client_from(location: &str, external_id: &str) -> String {
    format!("UNBRIDGECLIENTFROM {location} {external_id}")
}

pub fn join_from(channel: &str, location: &str, external_id: &str) -> String {
    format!("JOINFROM {channel} {location} {external_id}")
}

pub fn leave_from(channel: &str, location: &str, external_id: &str) -> String {
    format!("LEAVEFROM {channel} {location} {external_id}")
}

/// Relay a bridged user's message into a channel
pub fn say_from(channel: &str, domain: &str, user: &str, text: &str) -> Vec<String> {
    chat(&format!("SAYFROM {channel} {domain} {user} "), text, Newlines::Space)
}
