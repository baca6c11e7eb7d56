//! Protocol handlers installed on every bus a client uses
//!
//! Turns `raw` lines into parsed `spring` events, fans those out as
//! `spring-<verb>`, and derives the chat, presence and lifecycle events bot
//! code subscribes to. Handlers report missing parameters as errors; the bus
//! logs them and carries on.

use std::sync::Arc;

use lobbyist_core::User;
use tracing::{debug, info};

use crate::bus::{Event, EventBus, HandlerError, HandlerResult};
use crate::commands;
use crate::connection::{Connection, ConnectionState};
use crate::events;
use crate::protocol::Message;

/// Modes that take an argument when the server does not advertise CHANMODES
const DEFAULT_ARGUMENT_MODES: &str = "beIqaohvlk";

/// Install the protocol handlers once per bus
pub(crate) fn install(bus: &EventBus) {
    if !bus.claim_core_install() {
        return;
    }

    bus.subscribe(events::CONNECTED, auto_login);
    bus.subscribe(events::RAW, parse_raw);
    bus.subscribe(events::SPRING, redispatch_verb);

    bus.subscribe("spring-ping", reply_pong);
    bus.subscribe("spring-pong", catch_pong);
    bus.subscribe("spring-accepted", accepted);
    bus.subscribe("spring-denied", denied);

    bus.subscribe("spring-said", |e| channel_chat(e, events::SAID));
    bus.subscribe("spring-saidex", |e| channel_chat(e, events::SAIDEX));
    bus.subscribe("spring-saidprivate", |e| private_chat(e, events::SAID_PRIVATE));
    bus.subscribe("spring-saidprivateex", |e| private_chat(e, events::SAIDEX_PRIVATE));
    bus.subscribe("spring-notice", |e| private_chat(e, events::NOTICE));

    bus.subscribe("spring-joined", joined);
    bus.subscribe("spring-left", left);
    bus.subscribe("spring-quit", quit);
    bus.subscribe("spring-kick", kick);
    bus.subscribe("spring-nick", nick);
    bus.subscribe("spring-mode", mode);
    bus.subscribe("spring-005", server_supports);
    bus.subscribe("spring-433", nick_in_use);

    for (verb, renamed) in [
        ("spring-tasserver", events::TASSERVER),
        ("spring-clients", events::CLIENTS),
        ("spring-adduser", events::ADDUSER),
        ("spring-removeuser", events::REMOVEUSER),
        ("spring-agreement", events::AGREEMENT),
        ("spring-agreementend", events::AGREEMENT_END),
        ("spring-logininfoend", events::LOGININFOEND),
        ("spring-failed", events::FAILED),
    ] {
        bus.subscribe(verb, move |e| rename(e, renamed));
    }

    for verb in [
        "spring-motd",
        "spring-joinfailed",
        "spring-joinedfrom",
        "spring-leftfrom",
        "spring-saidfrom",
    ] {
        bus.subscribe(verb, log_message);
    }

    debug!("Installed protocol handlers");
}

fn connection(event: &Event) -> Result<&Arc<Connection>, HandlerError> {
    event
        .connection()
        .ok_or_else(|| format!("{} event without a connection", event.name()).into())
}

fn message(event: &Event) -> Result<&Message, HandlerError> {
    event
        .message()
        .ok_or_else(|| format!("{} event without a message", event.name()).into())
}

fn param<'a>(msg: &'a Message, index: usize) -> Result<&'a str, HandlerError> {
    msg.param(index)
        .ok_or_else(|| format!("{}: missing parameter {index}", msg.verb).into())
}

fn publish(event: &Event, derived: Event) -> HandlerResult {
    connection(event)?.bus().publish(&derived);
    Ok(())
}

fn auto_login(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    if let Some(client) = event.client() {
        client.send_login(conn)?;
    }
    Ok(())
}

fn parse_raw(event: &Event) -> HandlerResult {
    let text = event.text("text").ok_or("raw event without text")?;
    let parsed = match Message::parse(text) {
        Ok(msg) => Event::derive(events::SPRING, event).with_message(Arc::new(msg)),
        Err(e) => {
            debug!(line = %text, error = %e, "Unparseable line");
            Event::derive(events::PARSE_FAILED, event)
                .with("text", text)
                .with("error", e.to_string())
        }
    };
    publish(event, parsed)
}

fn redispatch_verb(event: &Event) -> HandlerResult {
    let name = message(event)?.event_name();
    publish(event, Event::derive(name, event))
}

fn reply_pong(event: &Event) -> HandlerResult {
    let msg = message(event)?;
    connection(event)?.writeln(commands::pong(msg.param(0)))?;
    Ok(())
}

fn catch_pong(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let mut pong = Event::derive(events::PONG, event);
    if let Some(lag) = conn.liveness().record_pong() {
        pong = pong.with("lag", lag);
    }
    publish(event, pong)
}

fn accepted(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let msg = message(event)?;

    conn.set_state(ConnectionState::Accepted);
    if let Some(nick) = msg.param(0) {
        conn.set_nickname(nick);
    }
    info!(netid = %conn.netid(), nick = ?conn.nickname(), "Login accepted");

    conn.start_heartbeat();
    if let Some(client) = event.client() {
        client.rejoin(conn)?;
    }
    publish(event, Event::derive(events::ACCEPTED, event))
}

fn denied(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let reason = message(event)?.joined_from(0);

    conn.set_state(ConnectionState::Denied);
    info!(netid = %conn.netid(), reason = %reason, "Login denied");
    publish(event, Event::derive(events::DENIED, event).with("reason", reason))
}

/// `SAID <channel> <user> <text...>`
fn channel_chat(event: &Event, name: &str) -> HandlerResult {
    let msg = message(event)?;
    let target = param(msg, 0)?;
    let user = match msg.user() {
        Some(user) => user,
        None => User::parse(param(msg, 1)?),
    };

    publish(
        event,
        Event::derive(name, event)
            .with("user", user)
            .with("target", target)
            .with("text", msg.joined_from(2)),
    )
}

/// `SAIDPRIVATE <user> <text...>`
fn private_chat(event: &Event, name: &str) -> HandlerResult {
    let msg = message(event)?;
    let target = param(msg, 0)?;
    let user = msg.user().unwrap_or_else(|| User::parse(target));

    publish(
        event,
        Event::derive(name, event)
            .with("user", user)
            .with("target", target)
            .with("text", msg.joined_from(1)),
    )
}

fn joined(event: &Event) -> HandlerResult {
    let msg = message(event)?;
    let channel = param(msg, 0)?;
    let user = User::parse(param(msg, 1)?);
    publish(
        event,
        Event::derive(events::JOINED, event)
            .with("channel", channel)
            .with("user", user),
    )
}

fn left(event: &Event) -> HandlerResult {
    let msg = message(event)?;
    let channel = param(msg, 0)?;
    let user = User::parse(param(msg, 1)?);
    let mut left = Event::derive(events::LEFT, event)
        .with("channel", channel)
        .with("user", user);
    let reason = msg.joined_from(2);
    if !reason.is_empty() {
        left = left.with("reason", reason);
    }
    publish(event, left)
}

fn quit(event: &Event) -> HandlerResult {
    let msg = message(event)?;
    let user = msg.user().ok_or("QUIT without a source")?;
    let mut quit = Event::derive(events::QUIT, event).with("user", user);
    if let Some(reason) = msg.param(0) {
        quit = quit.with("reason", reason);
    }
    publish(event, quit)
}

fn kick(event: &Event) -> HandlerResult {
    let msg = message(event)?;
    let kicker = msg.user().ok_or("KICK without a source")?;
    let mut kick = Event::derive(events::KICK, event)
        .with("kicker", kicker)
        .with("channel", param(msg, 0)?)
        .with("kickee", User::parse(param(msg, 1)?));
    if let Some(reason) = msg.param(2) {
        kick = kick.with("reason", reason);
    }
    publish(event, kick)
}

fn nick(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let msg = message(event)?;
    let old = msg.user().ok_or("NICK without a source")?;
    let new_nick = param(msg, 0)?;

    if conn.nickname().as_deref() == Some(old.nick.as_str()) {
        conn.set_nickname(new_nick);
    }
    publish(
        event,
        Event::derive(events::NICK, event)
            .with("user", old)
            .with("new_nick", new_nick),
    )
}

/// Modes that consume an argument, from CHANMODES and PREFIX when advertised
fn argument_modes(conn: &Connection) -> String {
    let Some(Some(chanmodes)) = conn.capability("CHANMODES") else {
        return DEFAULT_ARGUMENT_MODES.to_string();
    };

    // The last CHANMODES group never takes an argument
    let groups: Vec<&str> = chanmodes.split(',').collect();
    let mut modes = groups[..groups.len().saturating_sub(1)].concat();
    if let Some(Some(prefix)) = conn.capability("PREFIX") {
        if let Some(letters) = prefix.strip_prefix('(').and_then(|p| p.split(')').next()) {
            modes.push_str(letters);
        }
    }
    modes
}

/// `:<user> MODE <channel> <+modes-modes> [args...]`
fn mode(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let msg = message(event)?;
    let channel = param(msg, 0)?;
    let modes = param(msg, 1)?;
    let user = msg.user();
    let with_args = argument_modes(conn);
    let mut args = msg.params.iter().skip(2);

    let mut sign = '+';
    for flag in modes.chars() {
        if flag == '+' || flag == '-' {
            sign = flag;
            continue;
        }
        let arg = if with_args.contains(flag) { args.next() } else { None };

        let build = |name: &str| {
            let mut e = Event::derive(name, event).with("channel", channel);
            if let Some(user) = &user {
                e = e.with("user", user.clone());
            }
            if let Some(arg) = arg {
                e = e.with("arg", arg.as_str());
            }
            e
        };

        let summary = if sign == '+' { events::MODE_SET } else { events::MODE_UNSET };
        publish(event, build(summary).with("mode", flag.to_string()))?;
        publish(event, build(events::mode_flag(sign, flag).as_str()))?;
    }
    Ok(())
}

/// `005 <nick> <feature[=value]>... :are supported by this server`
fn server_supports(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let msg = message(event)?;
    let Some(features) = msg.params.get(1..msg.params.len().saturating_sub(1)) else {
        return Ok(());
    };

    for feature in features {
        match feature.split_once('=') {
            Some((name, value)) => conn.set_capability(name, Some(value.to_string())),
            None => conn.set_capability(feature.as_str(), None),
        }
    }
    debug!(netid = %conn.netid(), features = ?features, "Server capabilities");
    Ok(())
}

fn nick_in_use(event: &Event) -> HandlerResult {
    let conn = connection(event)?;
    let msg = message(event)?;
    let mut e = Event::derive(events::NICK_IN_USE, event);
    if let Some(nick) = msg.param(1).map(str::to_string).or_else(|| conn.nickname()) {
        e = e.with("nick", nick);
    }
    publish(event, e)
}

fn rename(event: &Event, name: &str) -> HandlerResult {
    publish(event, Event::derive(name, event))
}

fn log_message(event: &Event) -> HandlerResult {
    let msg = message(event)?;
    debug!(verb = %msg.verb, line = %msg, "Server notice");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, Weak};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use crate::client::Timing;
    use crate::transport::Target;

    fn setup() -> (EventBus, Arc<Connection>) {
        let bus = EventBus::new();
        install(&bus);
        let conn = Connection::new(
            Target::new("lobby.test", 8200),
            Timing::default(),
            bus.clone(),
            Weak::new(),
            CancellationToken::new(),
        );
        (bus, conn)
    }

    fn feed(conn: &Arc<Connection>, line: &str) {
        conn.bus().publish(&conn.event(events::RAW).with("text", line));
    }

    fn capture(bus: &EventBus, name: &str) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(name, move |event| {
            s.lock().unwrap().push(event.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn test_install_is_idempotent() {
        let bus = EventBus::new();
        install(&bus);
        let count = bus.subscriber_count();
        install(&bus);
        assert_eq!(bus.subscriber_count(), count);
    }

    #[test]
    fn test_said_dispatch() {
        let (bus, conn) = setup();
        let said = capture(&bus, events::SAID);

        feed(&conn, ":bigbot!bigbot@spring SAID #channel bigbot hello world");

        let said = said.lock().unwrap();
        assert_eq!(said.len(), 1);
        let event = &said[0];
        assert_eq!(event.user("user").unwrap().hostmask(), "bigbot!bigbot@spring");
        assert_eq!(event.text("target"), Some("#channel"));
        assert_eq!(event.text("text"), Some("hello world"));
        assert_eq!(event.message().unwrap().verb, "SAID");
    }

    #[test]
    fn test_said_without_source_uses_param() {
        let (bus, conn) = setup();
        let said = capture(&bus, events::SAIDEX);

        feed(&conn, "SAIDEX main alice waves at everyone");

        let said = said.lock().unwrap();
        assert_eq!(said[0].user("user").unwrap().nick, "alice");
        assert_eq!(said[0].text("text"), Some("waves at everyone"));
    }

    #[test]
    fn test_private_chat() {
        let (bus, conn) = setup();
        let said = capture(&bus, events::SAID_PRIVATE);

        feed(&conn, "SAIDPRIVATE alice are you there?");

        let said = said.lock().unwrap();
        assert_eq!(said[0].user("user").unwrap().nick, "alice");
        assert_eq!(said[0].text("text"), Some("are you there?"));
    }

    #[test]
    fn test_every_raw_line_yields_one_parsed_event() {
        let (bus, conn) = setup();
        let spring = capture(&bus, events::SPRING);
        let failed = capture(&bus, events::PARSE_FAILED);

        feed(&conn, "TASSERVER 0.38 * 8201 0");
        feed(&conn, ":broken");
        feed(&conn, "");

        assert_eq!(spring.lock().unwrap().len(), 1);
        let failed = failed.lock().unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].text("text"), Some(":broken"));
    }

    #[test]
    fn test_ping_queues_pong() {
        let (_bus, conn) = setup();
        feed(&conn, "PING");
        feed(&conn, "PING token");
        assert_eq!(conn.pending(), vec!["PONG", "PONG token"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_publishes_lag() {
        let (bus, conn) = setup();
        let pongs = capture(&bus, events::PONG);

        conn.liveness().record_ping();
        tokio::time::advance(Duration::from_millis(80)).await;
        feed(&conn, "PONG");

        let pongs = pongs.lock().unwrap();
        assert_eq!(pongs[0].duration("lag"), Some(Duration::from_millis(80)));
        assert_eq!(conn.lag(), Some(Duration::from_millis(80)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_and_denied() {
        let (bus, conn) = setup();
        let accepted = capture(&bus, events::ACCEPTED);

        feed(&conn, "ACCEPTED bigbot");
        assert_eq!(conn.state(), ConnectionState::Accepted);
        assert_eq!(conn.nickname().as_deref(), Some("bigbot"));
        assert_eq!(accepted.lock().unwrap().len(), 1);

        // Heartbeat sends its first ping right away
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(conn.pending(), vec!["PING"]);

        let (bus, conn) = setup();
        let denied = capture(&bus, events::DENIED);
        feed(&conn, "DENIED Bad username/password");
        assert_eq!(conn.state(), ConnectionState::Denied);
        assert_eq!(denied.lock().unwrap()[0].text("reason"), Some("Bad username/password"));
    }

    #[test]
    fn test_joined_and_left() {
        let (bus, conn) = setup();
        let joined = capture(&bus, events::JOINED);
        let left = capture(&bus, events::LEFT);

        feed(&conn, "JOINED main alice");
        feed(&conn, "LEFT main alice");
        feed(&conn, "LEFT main bob :gone fishing");

        let joined = joined.lock().unwrap();
        assert_eq!(joined[0].text("channel"), Some("main"));
        assert_eq!(joined[0].user("user").unwrap().nick, "alice");

        let left = left.lock().unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].text("reason"), None);
        assert_eq!(left[1].text("reason"), Some("gone fishing"));
    }

    #[test]
    fn test_missing_params_do_not_panic() {
        let (bus, conn) = setup();
        let joined = capture(&bus, events::JOINED);
        let spring = capture(&bus, events::SPRING);

        feed(&conn, "JOINED main");
        feed(&conn, "SAID");

        assert!(joined.lock().unwrap().is_empty());
        assert_eq!(spring.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_kick_quit_and_nick() {
        let (bus, conn) = setup();
        let kicks = capture(&bus, events::KICK);
        let quits = capture(&bus, events::QUIT);
        let nicks = capture(&bus, events::NICK);
        conn.set_nickname("bot");

        feed(&conn, ":op!o@h KICK #main troll :behave");
        feed(&conn, ":alice!a@h QUIT :bye");
        feed(&conn, ":bot!b@h NICK bot_");

        let kicks = kicks.lock().unwrap();
        assert_eq!(kicks[0].user("kicker").unwrap().nick, "op");
        assert_eq!(kicks[0].user("kickee").unwrap().nick, "troll");
        assert_eq!(kicks[0].text("reason"), Some("behave"));

        assert_eq!(quits.lock().unwrap()[0].text("reason"), Some("bye"));

        assert_eq!(nicks.lock().unwrap()[0].text("new_nick"), Some("bot_"));
        assert_eq!(conn.nickname().as_deref(), Some("bot_"));
        assert_eq!(conn.old_nickname().as_deref(), Some("bot"));
    }

    #[test]
    fn test_capabilities_and_modes() {
        let (bus, conn) = setup();
        let set = capture(&bus, events::MODE_SET);
        let unset = capture(&bus, events::MODE_UNSET);
        let ops = capture(&bus, "mode +o");

        feed(&conn, ":server 005 bot CHANMODES=b,k,l,imnt PREFIX=(ov)@+ WHOX :are supported");
        assert_eq!(conn.capability("CHANMODES"), Some(Some("b,k,l,imnt".to_string())));
        assert_eq!(conn.capability("WHOX"), Some(None));
        assert_eq!(conn.capability("bot"), None);

        feed(&conn, ":ChanServ!c@services MODE #main +om-v alice bob");

        let set = set.lock().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].text("mode"), Some("o"));
        assert_eq!(set[0].text("arg"), Some("alice"));
        assert_eq!(set[1].text("mode"), Some("m"));
        assert_eq!(set[1].text("arg"), None);

        let unset = unset.lock().unwrap();
        assert_eq!(unset[0].text("mode"), Some("v"));
        assert_eq!(unset[0].text("arg"), Some("bob"));

        assert_eq!(ops.lock().unwrap()[0].text("channel"), Some("#main"));
    }

    #[test]
    fn test_default_argument_modes() {
        let (_bus, conn) = setup();
        assert_eq!(argument_modes(&conn), DEFAULT_ARGUMENT_MODES);
    }

    #[test]
    fn test_plain_renames() {
        let (bus, conn) = setup();
        let agreement_end = capture(&bus, events::AGREEMENT_END);
        let tasserver = capture(&bus, events::TASSERVER);

        feed(&conn, "AGREEMENTEND");
        feed(&conn, "TASSERVER 0.38 * 8201 0");

        assert_eq!(agreement_end.lock().unwrap().len(), 1);
        assert_eq!(tasserver.lock().unwrap()[0].message().unwrap().params[0], "0.38");
    }
}
