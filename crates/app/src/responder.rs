//! Responder - chat logger and echo bot
//!
//! Logs channel chatter, presence changes and connection lifecycle. With echo
//! enabled it answers every channel message that is not its own.

use chrono::Utc;
use lobbyist_net::{events, Event, EventBus, HandlerResult};
use tracing::{info, warn};

/// Subscribes logging and echo handlers on a bus
#[derive(Debug, Clone, Copy)]
pub struct Responder {
    echo: bool,
}

impl Responder {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    /// Register all handlers; call before connecting so nothing is missed
    pub fn install(self, bus: &EventBus) {
        bus.subscribe(events::ACCEPTED, on_accepted);
        bus.subscribe(events::DENIED, |e| {
            warn!(reason = ?e.text("reason"), "Login denied");
            Ok(())
        });
        bus.subscribe(events::AGREEMENT_END, on_agreement);
        bus.subscribe(events::CONNECTION_LOST, on_connection_lost);
        bus.subscribe(events::RECONNECTED, |e| {
            info!(netid = ?e.connection().map(|c| c.netid()), "Reconnected");
            Ok(())
        });
        bus.subscribe(events::JOINED, |e| {
            info!(channel = ?e.text("channel"), user = ?e.user("user").map(|u| &u.nick), "Joined");
            Ok(())
        });
        bus.subscribe(events::LEFT, |e| {
            info!(channel = ?e.text("channel"), user = ?e.user("user").map(|u| &u.nick), "Left");
            Ok(())
        });
        bus.subscribe(events::SAID_PRIVATE, |e| {
            info!(user = ?e.user("user").map(|u| &u.nick), text = ?e.text("text"), "Private message");
            Ok(())
        });
        bus.subscribe(events::SAID, move |e| on_said(e, self.echo));
    }
}

fn on_accepted(event: &Event) -> HandlerResult {
    if let Some(client) = event.client() {
        info!(netid = %client.netid(), channels = ?client.channels(), "Logged in");
    }
    Ok(())
}

/// The server wants the terms accepted before the first login
fn on_agreement(event: &Event) -> HandlerResult {
    if let Some(client) = event.client() {
        info!("Confirming server agreement");
        client.confirm_agreement()?;
    }
    Ok(())
}

fn on_connection_lost(event: &Event) -> HandlerResult {
    let Some(conn) = event.connection() else {
        return Ok(());
    };
    let uptime = Utc::now() - conn.established_at();
    warn!(
        netid = %conn.netid(),
        reason = ?event.text("reason"),
        uptime_secs = uptime.num_seconds(),
        "Connection lost, waiting for reconnect"
    );
    Ok(())
}

fn on_said(event: &Event, echo: bool) -> HandlerResult {
    let nick = event.user("user").map(|u| u.nick.as_str()).unwrap_or_default();
    let channel = event.text("target").unwrap_or_default();
    let text = event.text("text").unwrap_or_default();
    info!(channel = %channel, user = %nick, text = %text, "Said");

    if !echo {
        return Ok(());
    }
    let own = event.connection().and_then(|c| c.nickname());
    if let (Some(reply), Some(client)) = (echo_reply(nick, own.as_deref(), text), event.client()) {
        client.say(channel, &reply)?;
    }
    Ok(())
}

/// Reply for a channel message, or None for our own or empty messages
fn echo_reply(nick: &str, own_nick: Option<&str>, text: &str) -> Option<String> {
    if nick.is_empty() || text.trim().is_empty() || Some(nick) == own_nick {
        return None;
    }
    Some(format!("{nick}: you said {text}"))
}
