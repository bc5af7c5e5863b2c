//! Channel roster: members, aliases, invites, snooze state, message history
//! and the per-channel broadcast sequence counter.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use partyline_types::events::Outbound;

use crate::error::{CoreError, Result};
use crate::format;

/// Number of past messages kept per member for search/replace.
pub const HISTORY_CAPACITY: usize = 10;

/// Longest message (in chars) kept in history. The full text is still broadcast.
pub const MAX_HISTORY_MESSAGE_CHARS: usize = 512;

/// The sequence counter lives in `[0, SEQUENCE_MODULUS)`.
pub const SEQUENCE_MODULUS: u32 = 100;

/// Canonical form of an address: trimmed, lowercased, `/resource` stripped.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim()
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// The part of `text` kept in a member's history.
pub fn clip_for_history(text: &str) -> &str {
    match text.char_indices().nth(MAX_HISTORY_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeStatus {
    NotSnoozing,
    Snoozing,
    /// The snooze has expired but nobody has cleared it yet.
    ShouldWake,
}

/// Per-member feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DebugOption {
    /// Append the channel sequence number to every delivered broadcast.
    #[serde(rename = "sequenceIds")]
    SequenceIds,
}

impl DebugOption {
    pub const ALL: [DebugOption; 1] = [DebugOption::SequenceIds];

    pub fn name(self) -> &'static str {
        match self {
            Self::SequenceIds => "sequenceIds",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.name().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    identity: String,
    alias: String,
    #[serde(default)]
    snooze_until: Option<DateTime<Utc>>,
    /// Most recent first.
    #[serde(default)]
    last_messages: VecDeque<String>,
    #[serde(default)]
    debug_options: BTreeSet<DebugOption>,
}

impl Member {
    /// `identity` must already be normalized. The alias defaults to the
    /// local part of the address.
    pub fn new(identity: &str) -> Self {
        let alias = identity.split('@').next().unwrap_or(identity).to_string();
        Self {
            identity: identity.to_string(),
            alias,
            snooze_until: None,
            last_messages: VecDeque::with_capacity(HISTORY_CAPACITY),
            debug_options: BTreeSet::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn snooze_until(&self) -> Option<DateTime<Utc>> {
        self.snooze_until
    }

    pub fn snooze_status(&self, now: DateTime<Utc>) -> SnoozeStatus {
        match self.snooze_until {
            None => SnoozeStatus::NotSnoozing,
            Some(until) if until < now => SnoozeStatus::ShouldWake,
            Some(_) => SnoozeStatus::Snoozing,
        }
    }

    pub fn snooze(&mut self, until: DateTime<Utc>) {
        self.snooze_until = Some(until);
    }

    /// Clears an expired snooze. Returns true if the member was woken.
    pub fn unsnooze_if_necessary(&mut self, now: DateTime<Utc>) -> bool {
        if self.snooze_status(now) == SnoozeStatus::ShouldWake {
            self.snooze_until = None;
            return true;
        }
        false
    }

    pub fn last_messages(&self) -> impl Iterator<Item = &str> {
        self.last_messages.iter().map(String::as_str)
    }

    /// Pushes a message onto the history. Talking also ends any snooze.
    pub fn record_message(&mut self, text: &str) {
        self.snooze_until = None;
        self.last_messages.push_front(clip_for_history(text).to_string());
        self.last_messages.truncate(HISTORY_CAPACITY);
    }

    pub fn debug_options(&self) -> impl Iterator<Item = DebugOption> + '_ {
        self.debug_options.iter().copied()
    }

    pub fn is_debug_enabled(&self, option: DebugOption) -> bool {
        self.debug_options.contains(&option)
    }

    pub fn enable_debug(&mut self, option: DebugOption) {
        self.debug_options.insert(option);
    }

    pub fn clear_debug(&mut self) {
        self.debug_options.clear();
    }
}

/// Which of the three things `kick` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KickOutcome {
    RemovedMember(Member),
    RemovedInvite(String),
    NothingRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    name: String,
    /// Keyed by normalized identity.
    #[serde(default)]
    members: BTreeMap<String, Member>,
    #[serde(default)]
    invite_only: bool,
    #[serde(default)]
    invited: Vec<String>,
    #[serde(default)]
    sequence: u32,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: BTreeMap::new(),
            invite_only: false,
            invited: Vec::new(),
            sequence: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, identity: &str) -> Option<&Member> {
        self.members.get(identity)
    }

    pub fn member_mut(&mut self, identity: &str) -> Option<&mut Member> {
        self.members.get_mut(identity)
    }

    pub fn member_by_alias(&self, alias: &str) -> Option<&Member> {
        self.members.values().find(|m| m.alias == alias)
    }

    pub fn is_invite_only(&self) -> bool {
        self.invite_only
    }

    pub fn set_invite_only(&mut self, invite_only: bool) {
        self.invite_only = invite_only;
    }

    pub fn invitees(&self) -> &[String] {
        &self.invited
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Adds an address to the pending invites. Returns false if it was
    /// already there.
    pub fn invite(&mut self, address: &str) -> bool {
        let identity = normalize_identity(address);
        if self.invited.contains(&identity) {
            return false;
        }
        self.invited.push(identity);
        true
    }

    pub fn can_join(&self, identity: &str) -> bool {
        !self.invite_only || self.invited.contains(&normalize_identity(identity))
    }

    /// Adds a member, consuming a matching invite if there is one.
    ///
    /// The default alias gets `_` prepended until no other member uses it.
    pub fn add_member(&mut self, raw_identity: &str) -> Result<&Member> {
        let identity = normalize_identity(raw_identity);

        if self.members.contains_key(&identity) {
            return Ok(&self.members[&identity]);
        }

        match self.invited.iter().position(|i| *i == identity) {
            Some(pos) => {
                self.invited.remove(pos);
            }
            None if self.invite_only => {
                return Err(CoreError::NotInvited {
                    channel: self.name.clone(),
                });
            }
            None => {}
        }

        let mut member = Member::new(&identity);
        while self.member_by_alias(&member.alias).is_some() {
            member.alias.insert(0, '_');
        }

        info!("{} joined {} as {}", identity, self.name, member.alias);
        Ok(&*self.members.entry(identity).or_insert(member))
    }

    /// Removing someone who is not here is only worth a warning.
    pub fn remove_member(&mut self, identity: &str) -> Option<Member> {
        let removed = self.members.remove(&normalize_identity(identity));
        if removed.is_none() {
            warn!(
                "{} was not actually in channel {} when removing",
                identity, self.name
            );
        }
        removed
    }

    /// Removes a member (by alias, then identity) or else a pending invite.
    pub fn kick(&mut self, token: &str) -> KickOutcome {
        let identity = match self.member_by_alias(token) {
            Some(member) => Some(member.identity.clone()),
            None => {
                let identity = normalize_identity(token);
                self.members.contains_key(&identity).then_some(identity)
            }
        };

        if let Some(identity) = identity {
            if let Some(member) = self.remove_member(&identity) {
                return KickOutcome::RemovedMember(member);
            }
        }

        let identity = normalize_identity(token);
        if let Some(pos) = self.invited.iter().position(|i| *i == identity) {
            return KickOutcome::RemovedInvite(self.invited.remove(pos));
        }

        KickOutcome::NothingRemoved
    }

    /// Clears every expired snooze and returns the woken aliases.
    pub fn wake_snoozers(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.members
            .values_mut()
            .filter_map(|m| m.unsnooze_if_necessary(now).then(|| m.alias.clone()))
            .collect()
    }

    /// One logical broadcast.
    ///
    /// Wakes expired snoozers first and, if any woke, announces them to the
    /// whole channel ahead of `text`. `exclude` is usually the sender.
    pub fn broadcast(
        &mut self,
        text: &str,
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();

        let awoken = self.wake_snoozers(now);
        if !awoken.is_empty() {
            out.extend(self.deliver(&format::woke_up(&awoken), None, now));
        }

        out.extend(self.deliver(text, exclude, now));
        out
    }

    fn deliver(&mut self, text: &str, exclude: Option<&str>, now: DateTime<Utc>) -> Vec<Outbound> {
        let mut plain = Vec::new();
        let mut tagged = Vec::new();

        for member in self.members.values() {
            if Some(member.identity.as_str()) == exclude
                || member.snooze_status(now) == SnoozeStatus::Snoozing
            {
                continue;
            }
            if member.is_debug_enabled(DebugOption::SequenceIds) {
                tagged.push(member.identity.clone());
            } else {
                plain.push(member.identity.clone());
            }
        }

        // Invitees see traffic as soon as they accept the chat request.
        plain.extend(self.invited.iter().cloned());

        let sequence = self.advance_sequence();

        let mut out = Vec::with_capacity(2);
        if !plain.is_empty() {
            out.push(Outbound {
                text: text.to_string(),
                audience: plain,
            });
        }
        if !tagged.is_empty() {
            out.push(Outbound {
                text: format::sequence_tagged(text, sequence),
                audience: tagged,
            });
        }
        out
    }

    /// Returns the value to tag the current broadcast with, then advances.
    fn advance_sequence(&mut self) -> u32 {
        let current = self.sequence;
        self.sequence = (self.sequence + 1) % SEQUENCE_MODULUS;
        current
    }

    /// Drops invites that were already accepted. Returns true if anything
    /// changed and the channel should be saved.
    pub fn fix_up(&mut self) -> bool {
        let before = self.invited.len();
        let members = &self.members;
        self.invited.retain(|identity| !members.contains_key(identity));

        let fixed = self.invited.len() != before;
        if fixed {
            warn!("Channel {} needed fixing up", self.name);
        }
        fixed
    }
}
