//! Handles one inbound message against one channel: join, dispatch,
//! score, announce, persist.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use partyline_types::events::{InboundMessage, Outbound};

use crate::directory::{Channel, DebugOption, KickOutcome, normalize_identity};
use crate::error::{CoreError, Result};
use crate::format;
use crate::ledger::Ledger;
use crate::mention::MentionParser;
use crate::reconcile::{EditCommand, Reconciler};
use crate::store::Store;

/// Entries listed by `/reasons`.
pub const REASONS_LISTED: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'t> {
    Edit(EditCommand),
    Reasons(&'t str),
    Debug(Option<&'t str>),
    Kick(&'t str),
    Invite(&'t str),
    InviteOnly,
    Leave,
    Snooze(&'t str),
    Chat,
}

impl<'t> Command<'t> {
    fn parse(text: &'t str) -> Self {
        if let Some(edit) = EditCommand::parse(text) {
            return Self::Edit(edit);
        }

        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return Self::Chat;
        }
        let mut words = trimmed.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next();

        match (name, arg) {
            ("/reasons", Some(target)) => Self::Reasons(target),
            ("/debug", arg) => Self::Debug(arg),
            ("/kick", Some(token)) => Self::Kick(token),
            ("/invite", Some(address)) => Self::Invite(address),
            ("/inviteonly", None) => Self::InviteOnly,
            ("/leave", None) => Self::Leave,
            ("/snooze", Some(length)) => Self::Snooze(length),
            _ => Self::Chat,
        }
    }
}

/// `30m`, `2h`, `1d`, `45s`; a bare number means minutes.
fn parse_snooze(length: &str) -> Option<Duration> {
    let (digits, unit) = match length.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => length.split_at(idx),
        None => (length, "m"),
    };
    let n: i64 = digits.parse().ok()?;
    match unit {
        "s" => Some(Duration::seconds(n)),
        "m" => Some(Duration::minutes(n)),
        "h" => Some(Duration::hours(n)),
        "d" => Some(Duration::days(n)),
        _ => None,
    }
}

pub struct Session<'a> {
    store: &'a dyn Store,
    parser: &'a MentionParser,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a dyn Store, parser: &'a MentionParser) -> Self {
        Self { store, parser }
    }

    /// Handles `msg` and turns failures into the one line the sender sees.
    pub fn respond(
        &self,
        channel: &mut Channel,
        msg: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        match self.handle(channel, msg, now) {
            Ok(out) => out,
            Err(e) => {
                if e.is_retryable() {
                    error!("Message to {} from {} failed: {:#}", channel.name(), msg.sender, e);
                } else {
                    info!("Message to {} from {} refused: {}", channel.name(), msg.sender, e);
                }
                vec![Outbound::direct(
                    e.user_message(),
                    &normalize_identity(&msg.sender),
                )]
            }
        }
    }

    /// Runs against a copy of `channel` and a fresh ledger, then saves the
    /// copy and every staged ledger entry in one write. Only after that
    /// succeeds is the copy swapped in; on error nothing has changed,
    /// in memory or in the store.
    pub fn handle(
        &self,
        channel: &mut Channel,
        msg: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>> {
        let name = channel.name().to_string();
        let mut ledger = Ledger::new(self.store, &name);
        let mut working = channel.clone();
        let out = self.dispatch(&mut working, &mut ledger, msg, now)?;

        let records = ledger.into_records();
        self.store.commit(&working, &records).map_err(|e| {
            error!("Failed to save {} with {} record(s): {:#}", name, records.len(), e);
            CoreError::Persistence(e)
        })?;
        *channel = working;
        Ok(out)
    }

    fn dispatch(
        &self,
        channel: &mut Channel,
        ledger: &mut Ledger<'_>,
        msg: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>> {
        let sender = normalize_identity(&msg.sender);
        let mut out = Vec::new();

        if channel.member(&sender).is_none() {
            let alias = channel.add_member(&sender)?.alias().to_string();
            out.extend(channel.broadcast(&format::joined(&alias), None, now));
        }
        let Some(alias) = channel.member(&sender).map(|m| m.alias().to_string()) else {
            warn!("{} vanished from {} mid-message", sender, channel.name());
            return Ok(out);
        };

        match Command::parse(&msg.text) {
            Command::Edit(edit) => {
                self.edit(channel, ledger, &sender, &alias, msg, &edit, now, &mut out)?
            }
            Command::Chat => self.chat(channel, ledger, &sender, &alias, &msg.text, now, &mut out)?,
            Command::Reasons(target) => {
                let target = ledger.target(target)?;
                let reasons = ledger.recent_reasons(&target.key.name, REASONS_LISTED)?;
                let listing = format::reasons_listing(&target, &reasons);
                out.extend(channel.broadcast(&listing, None, now));
            }
            Command::Debug(arg) => {
                let reply = Self::debug(channel, &sender, arg);
                out.push(Outbound::direct(reply, &sender));
            }
            Command::Kick(token) => {
                let text = match channel.kick(token) {
                    KickOutcome::RemovedMember(m) => format::kicked(&alias, m.alias()),
                    KickOutcome::RemovedInvite(identity) => format::uninvited(&alias, &identity),
                    KickOutcome::NothingRemoved => format::nobody_to_kick(token),
                };
                out.extend(channel.broadcast(&text, None, now));
            }
            Command::Invite(address) => {
                let address = normalize_identity(address);
                channel.invite(&address);
                out.extend(channel.broadcast(&format::invited(&alias, &address), None, now));
            }
            Command::InviteOnly => {
                let invite_only = !channel.is_invite_only();
                channel.set_invite_only(invite_only);
                let text = format::invite_only_changed(&alias, invite_only);
                out.extend(channel.broadcast(&text, None, now));
            }
            Command::Leave => {
                channel.remove_member(&sender);
                out.extend(channel.broadcast(&format::left(&alias), None, now));
            }
            Command::Snooze(length) => {
                let reply = match (parse_snooze(length), channel.member_mut(&sender)) {
                    (Some(duration), Some(member)) => {
                        let until = now + duration;
                        member.snooze(until);
                        format!("Okay, snoozing until {}", until.to_rfc3339())
                    }
                    _ => format::SNOOZE_USAGE.to_string(),
                };
                out.push(Outbound::direct(reply, &sender));
            }
        }

        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn chat(
        &self,
        channel: &mut Channel,
        ledger: &mut Ledger<'_>,
        sender: &str,
        alias: &str,
        text: &str,
        now: DateTime<Utc>,
        out: &mut Vec<Outbound>,
    ) -> Result<()> {
        if let Some(member) = channel.member_mut(sender) {
            member.record_message(text);
        }

        let mentions = self.parser.parse(text);
        if mentions.is_empty() {
            let line = format::alias_prefixed(alias, text);
            out.extend(channel.broadcast(&line, Some(sender), now));
            return Ok(());
        }

        let reasons = ledger.apply_reasons(sender, text, &mentions, now)?;
        let decorated = format::decorate(text, &mentions, &reasons);
        out.extend(channel.broadcast(&format::alias_prefixed(alias, &decorated), None, now));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn edit(
        &self,
        channel: &mut Channel,
        ledger: &mut Ledger<'_>,
        sender: &str,
        alias: &str,
        msg: &InboundMessage,
        edit: &EditCommand,
        now: DateTime<Utc>,
        out: &mut Vec<Outbound>,
    ) -> Result<()> {
        // Snapshot before recording the command so it can never match itself.
        let history: Vec<String> = match channel.member_mut(sender) {
            Some(member) => {
                let history = member.last_messages().map(String::from).collect();
                member.record_message(&msg.text);
                history
            }
            None => return Ok(()),
        };
        out.extend(channel.broadcast(&format::alias_prefixed(alias, &msg.text), Some(sender), now));

        let reconciled = match channel.member_mut(sender) {
            Some(member) => {
                Reconciler::new(self.parser, ledger).reconcile(member, &history, edit, now)
            }
            None => return Ok(()),
        };

        let rec = match reconciled {
            Ok(rec) => rec,
            Err(CoreError::NoMatchingMessage) => {
                debug!("{} edit {:?} matched nothing", sender, edit.pattern);
                let line = CoreError::NoMatchingMessage.user_message();
                out.extend(channel.broadcast(line, None, now));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !rec.undone.is_empty() {
            out.extend(channel.broadcast(&format::undoing(&rec.undone), None, now));
        }
        let shown = if rec.rescored() {
            format::decorate(&rec.replacement, &rec.replacement_mentions, &rec.redone)
        } else {
            rec.replacement.clone()
        };
        out.extend(channel.broadcast(&format::meant(alias, &shown), None, now));
        Ok(())
    }

    fn debug(channel: &mut Channel, sender: &str, arg: Option<&str>) -> String {
        let Some(member) = channel.member_mut(sender) else {
            return format::debug_listing(&[]);
        };
        match arg {
            None => {
                let names: Vec<&str> = member.debug_options().map(DebugOption::name).collect();
                format::debug_listing(&names)
            }
            Some("clear") => {
                member.clear_debug();
                format::DEBUG_CLEARED.to_string()
            }
            Some(name) => match DebugOption::from_name(name) {
                Some(option) => {
                    member.enable_debug(option);
                    format::debug_enabled(option.name())
                }
                None => format::unknown_debug_option(name),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(Command::parse("hello"), Command::Chat);
        assert_eq!(Command::parse(" /reasons x"), Command::Reasons("x"));
        assert_eq!(Command::parse("/reasons"), Command::Chat);
        assert_eq!(Command::parse("/debug"), Command::Debug(None));
        assert_eq!(Command::parse("/debug clear"), Command::Debug(Some("clear")));
        assert_eq!(Command::parse("/kick bob"), Command::Kick("bob"));
        assert_eq!(Command::parse("/inviteonly"), Command::InviteOnly);
        assert_eq!(Command::parse("/snooze 5m"), Command::Snooze("5m"));
        assert_eq!(Command::parse("x /reasons"), Command::Chat);
        assert!(matches!(Command::parse("s/a/b/"), Command::Edit(_)));
    }

    #[test]
    fn snooze_lengths() {
        assert_eq!(parse_snooze("30"), Some(Duration::minutes(30)));
        assert_eq!(parse_snooze("45s"), Some(Duration::seconds(45)));
        assert_eq!(parse_snooze("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_snooze("1d"), Some(Duration::days(1)));
        assert_eq!(parse_snooze("1w"), None);
        assert_eq!(parse_snooze("soon"), None);
    }
}
