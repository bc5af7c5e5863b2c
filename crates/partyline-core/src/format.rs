//! User-facing text for everything the core announces.

use partyline_types::models::{Action, Reason, Target};

use crate::mention::Mention;

pub fn sequence_tagged(text: &str, sequence: u32) -> String {
    format!("{} ({})", text, sequence)
}

pub fn alias_prefixed(alias: &str, text: &str) -> String {
    format!("[{}] {}", alias, text)
}

pub fn meant(alias: &str, text: &str) -> String {
    format!("_{} meant {}_", alias, text)
}

pub fn woke_up(aliases: &[String]) -> String {
    aliases
        .iter()
        .map(|alias| format!("_{} is no longer snoozing_", alias))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `x++ [back to 0], y-- [back to 3]`, naming each undone mention as it was
/// originally written.
pub fn undoing(undos: &[Reason]) -> String {
    let parts: Vec<String> = undos
        .iter()
        .map(|undo| {
            format!(
                "{}{} [back to {}]",
                undo.target.name,
                undo.action.opposite().symbol(),
                undo.score
            )
        })
        .collect();
    format!("Undoing original actions: {}", parts.join(", "))
}

fn score_note(reason: &Reason) -> String {
    match reason.action {
        Action::Increment => format!("[woot! now at {}]", reason.score),
        Action::Decrement => format!("[ouch! now at {}]", reason.score),
    }
}

/// Follows every scored mention in `text` with its new score.
///
/// `mentions` and `reasons` must line up one to one, in encounter order.
pub fn decorate(text: &str, mentions: &[Mention], reasons: &[Reason]) -> String {
    let mut out = String::with_capacity(text.len() + reasons.len() * 20);
    let mut cursor = 0;
    for (mention, reason) in mentions.iter().zip(reasons) {
        out.push_str(&text[cursor..mention.span.end]);
        out.push(' ');
        out.push_str(&score_note(reason));
        cursor = mention.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// One scoring entry: `increment by neil@gmail.com (x++ for being awesome)`.
pub fn reason_line(reason: &Reason) -> String {
    format!(
        "{} by {} ({})",
        reason.action.verb(),
        reason.actor,
        reason.message
    )
}

/// Current score followed by the listed entries, one per line.
pub fn reasons_listing(target: &Target, reasons: &[Reason]) -> String {
    let mut lines = vec![format!("{}: {}", target.key.name, target.score)];
    lines.extend(reasons.iter().map(reason_line));
    lines.join("\n")
}

pub fn joined(alias: &str) -> String {
    format!("_{} has joined the channel_", alias)
}

pub fn left(alias: &str) -> String {
    format!("_{} has left the channel_", alias)
}

pub fn kicked(alias: &str, removed: &str) -> String {
    format!("_{} kicked {}_", alias, removed)
}

pub fn uninvited(alias: &str, identity: &str) -> String {
    format!("_{} uninvited {}_", alias, identity)
}

pub fn nobody_to_kick(token: &str) -> String {
    format!("Nobody named '{}' to kick.", token)
}

pub fn invited(alias: &str, address: &str) -> String {
    format!("_{} invited {}_", alias, address)
}

pub fn invite_only_changed(alias: &str, invite_only: bool) -> String {
    if invite_only {
        format!("_{} set the room to invite-only_", alias)
    } else {
        format!("_{} set the room to open_", alias)
    }
}

pub fn debug_enabled(name: &str) -> String {
    format!("enabling {} for you", name)
}

pub const DEBUG_CLEARED: &str = "clearing all debug options";

pub fn debug_listing(names: &[&str]) -> String {
    format!("Your current debug options are: [{}]", names.join(", "))
}

pub fn unknown_debug_option(name: &str) -> String {
    format!("Unknown debug option: {}", name)
}

pub const SNOOZE_USAGE: &str = "Usage: /snooze <N>[smhd]";
