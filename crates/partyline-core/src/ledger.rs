//! Per-channel counters and their append-only event log.
//!
//! All arithmetic happens on a working copy of the touched targets, and the
//! entries it produces are only staged. Undo and redo within one message
//! share that copy, so the whole message reaches the store in one write,
//! undo entries first. A failed write just means dropping the ledger.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use partyline_types::models::{Action, Reason, Record, Target, TargetKey};

use crate::directory::clip_for_history;
use crate::error::{CoreError, Result};
use crate::mention::Mention;
use crate::store::Store;

/// How far back [`Ledger::resolve_committed`] looks per target.
const RESOLVE_WINDOW: usize = 50;

/// Targets fetched for one logical action, in first-touch order.
#[derive(Clone)]
struct WorkingSet<'a> {
    store: &'a dyn Store,
    channel: &'a str,
    targets: Vec<Target>,
    index: HashMap<String, usize>,
}

impl<'a> WorkingSet<'a> {
    fn new(store: &'a dyn Store, channel: &'a str) -> Self {
        Self {
            store,
            channel,
            targets: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn get(&self, name: &str) -> Option<&Target> {
        self.index
            .get(&name.to_lowercase())
            .map(|&idx| &self.targets[idx])
    }

    fn target_mut(&mut self, name: &str) -> Result<&mut Target> {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                let key = TargetKey::new(self.channel, name);
                let target = self
                    .store
                    .get_or_create_target(&key)
                    .map_err(CoreError::Persistence)?;
                self.targets.push(target);
                self.index.insert(key.name, self.targets.len() - 1);
                self.targets.len() - 1
            }
        };
        Ok(&mut self.targets[idx])
    }

    fn take_action(
        &mut self,
        name: &str,
        actor: &str,
        action: Action,
        message: &str,
        reverses: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Reason> {
        let target = self.target_mut(name)?;
        target.score += action.delta();
        Ok(Reason {
            id: Uuid::new_v4(),
            target: target.key.clone(),
            actor: actor.to_string(),
            action,
            message: message.to_string(),
            score: target.score,
            reverses,
            created_at: now,
        })
    }

    fn score_mentions(
        &mut self,
        actor: &str,
        message: &str,
        mentions: &[Mention],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reason>> {
        mentions
            .iter()
            .map(|m| self.take_action(&m.target, actor, m.action, message, None, now))
            .collect()
    }
}

/// One message's worth of ledger work for one channel.
pub struct Ledger<'a> {
    store: &'a dyn Store,
    channel: &'a str,
    working: WorkingSet<'a>,
    /// Creation order.
    staged: Vec<Reason>,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a dyn Store, channel: &'a str) -> Self {
        Self {
            store,
            channel,
            working: WorkingSet::new(store, channel),
            staged: Vec::new(),
        }
    }

    /// Scores every mention in order and stages the resulting entries.
    /// Repeated mentions of one target each get their own entry.
    pub fn apply_reasons(
        &mut self,
        actor: &str,
        message: &str,
        mentions: &[Mention],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reason>> {
        let reasons = self.working.score_mentions(actor, message, mentions, now)?;
        self.staged.extend(reasons.iter().cloned());
        debug!(
            "{} staged {} reason(s) in {}",
            actor,
            reasons.len(),
            self.channel
        );
        Ok(reasons)
    }

    /// Same arithmetic as [`Ledger::apply_reasons`], on top of anything
    /// already staged, but the scores are hypothetical and nothing is kept.
    pub fn preview_reasons(
        &self,
        actor: &str,
        message: &str,
        mentions: &[Mention],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reason>> {
        let mut working = self.working.clone();
        working.score_mentions(actor, message, mentions, now)
    }

    /// Swaps each hypothetical entry for the committed one it stands for
    /// (same actor and action, same message as far as history keeps it, not
    /// yet reversed), so compensating entries link to real records. Entries
    /// with no match are kept as is.
    pub fn resolve_committed(&self, previews: Vec<Reason>) -> Result<Vec<Reason>> {
        let mut recent: HashMap<String, Vec<Reason>> = HashMap::new();
        let mut claimed: HashSet<Uuid> = self.staged.iter().filter_map(|r| r.reverses).collect();
        let mut resolved = Vec::with_capacity(previews.len());

        for preview in previews {
            if !recent.contains_key(&preview.target.name) {
                let entries = self.recent_reasons(&preview.target.name, RESOLVE_WINDOW)?;
                claimed.extend(entries.iter().filter_map(|r| r.reverses));
                recent.insert(preview.target.name.clone(), entries);
            }

            let committed = recent[&preview.target.name].iter().find(|r| {
                !r.is_undo()
                    && !claimed.contains(&r.id)
                    && r.actor == preview.actor
                    && r.action == preview.action
                    && clip_for_history(&r.message) == clip_for_history(&preview.message)
            });

            match committed {
                Some(r) => {
                    claimed.insert(r.id);
                    resolved.push(r.clone());
                }
                None => resolved.push(preview),
            }
        }

        Ok(resolved)
    }

    /// Stages the compensating entry for `reason`, scored against the
    /// target's current value.
    pub fn undo(&mut self, reason: &Reason, now: DateTime<Utc>) -> Result<Reason> {
        let mut undos = self.undo_all(std::slice::from_ref(reason), now)?;
        Ok(undos.remove(0))
    }

    /// Stages compensating entries for a batch, each seeing the ones
    /// before it.
    pub fn undo_all(&mut self, reasons: &[Reason], now: DateTime<Utc>) -> Result<Vec<Reason>> {
        let undos = reasons
            .iter()
            .map(|r| {
                self.working.take_action(
                    &r.target.name,
                    &r.actor,
                    r.action.opposite(),
                    &r.message,
                    Some(r.id),
                    now,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        self.staged.extend(undos.iter().cloned());
        Ok(undos)
    }

    pub fn staged(&self) -> &[Reason] {
        &self.staged
    }

    /// Touched targets with their final scores, then the staged reasons in
    /// creation order. Empty when nothing was staged.
    pub fn into_records(self) -> Vec<Record> {
        if self.staged.is_empty() {
            return Vec::new();
        }
        self.working
            .targets
            .into_iter()
            .map(Record::Target)
            .chain(self.staged.into_iter().map(Record::Reason))
            .collect()
    }

    /// Writes everything staged in one `put_all`, for callers that have no
    /// channel to save alongside.
    pub fn commit(self) -> Result<Vec<Reason>> {
        let staged = self.staged.clone();
        let store = self.store;
        let channel = self.channel;
        let records = self.into_records();
        if records.is_empty() {
            return Ok(staged);
        }
        store.put_all(&records).map_err(|e| {
            error!("Failed to persist ledger batch in {}: {:#}", channel, e);
            CoreError::Persistence(e)
        })?;
        Ok(staged)
    }

    /// The target as this ledger sees it, staged changes included.
    pub fn target(&self, name: &str) -> Result<Target> {
        if let Some(target) = self.working.get(name) {
            return Ok(target.clone());
        }
        self.store
            .get_or_create_target(&TargetKey::new(self.channel, name))
            .map_err(CoreError::Persistence)
    }

    /// Committed entries only.
    pub fn recent_reasons(&self, name: &str, limit: usize) -> Result<Vec<Reason>> {
        self.store
            .recent_reasons(&TargetKey::new(self.channel, name), limit)
            .map_err(CoreError::Persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MAX_HISTORY_MESSAGE_CHARS;
    use crate::mention::MentionParser;
    use crate::store::MemoryStore;

    const NEIL: &str = "neil@gmail.com";

    fn key(name: &str) -> TargetKey {
        TargetKey::new("party", name)
    }

    fn commit(store: &MemoryStore, text: &str) -> Vec<Reason> {
        let mentions = MentionParser::default().parse(text);
        let mut ledger = Ledger::new(store, "party");
        ledger
            .apply_reasons(NEIL, text, &mentions, Utc::now())
            .unwrap();
        ledger.commit().unwrap()
    }

    #[test]
    fn increment_then_decrement_is_neutral() {
        let store = MemoryStore::new();
        commit(&store, "x++");
        commit(&store, "x--");
        assert_eq!(store.score(&key("x")).unwrap(), 0);
        assert_eq!(store.reasons_for(&key("x")).unwrap().len(), 2);
    }

    #[test]
    fn repeated_mentions_are_separate_events() {
        let store = MemoryStore::new();
        commit(&store, "x++");
        let reasons = commit(&store, "x++ x++");
        let scores: Vec<i64> = reasons.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![2, 3]);
        assert_eq!(store.score(&key("x")).unwrap(), 3);
    }

    #[test]
    fn staged_entries_stay_out_of_the_store_until_commit() {
        let store = MemoryStore::new();
        let mentions = MentionParser::default().parse("x++");
        let mut ledger = Ledger::new(&store, "party");
        ledger.apply_reasons(NEIL, "x++", &mentions, Utc::now()).unwrap();

        assert_eq!(ledger.target("X").unwrap().score, 1);
        assert_eq!(store.score(&key("x")).unwrap(), 0);
        drop(ledger);
        assert!(store.reasons_for(&key("x")).unwrap().is_empty());
    }

    #[test]
    fn preview_accumulates_but_writes_nothing() {
        let store = MemoryStore::new();
        commit(&store, "x++");
        let text = "x++ x++ y--";
        let mentions = MentionParser::default().parse(text);
        let ledger = Ledger::new(&store, "party");
        let preview = ledger
            .preview_reasons(NEIL, text, &mentions, Utc::now())
            .unwrap();

        let scores: Vec<i64> = preview.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![2, 3, -1]);
        assert!(ledger.staged().is_empty());
        assert_eq!(ledger.into_records(), Vec::new());
        assert_eq!(store.score(&key("x")).unwrap(), 1);
        assert_eq!(store.score(&key("y")).unwrap(), 0);
    }

    #[test]
    fn undo_restores_previous_score_as_a_new_entry() {
        let store = MemoryStore::new();
        commit(&store, "x++");
        let r = commit(&store, "x++").remove(0);
        assert_eq!(r.score, 2);

        let mut ledger = Ledger::new(&store, "party");
        let inverse = ledger.undo(&r, Utc::now()).unwrap();
        assert_eq!(inverse.action, Action::Decrement);
        assert_eq!(inverse.score, r.score_before());
        assert_eq!(inverse.reverses, Some(r.id));
        assert_eq!(inverse.message, r.message);

        // undo only stages
        assert_eq!(store.score(&key("x")).unwrap(), 2);

        ledger.commit().unwrap();
        assert_eq!(store.score(&key("x")).unwrap(), 1);
        let history = store.reasons_for(&key("x")).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1], r);
        assert_eq!(history[2], inverse);
    }

    #[test]
    fn undo_all_chains_scores_within_a_batch() {
        let store = MemoryStore::new();
        let reasons = commit(&store, "jason++ jason++ intren-- intren--");
        let undos = Ledger::new(&store, "party")
            .undo_all(&reasons, Utc::now())
            .unwrap();
        let scores: Vec<i64> = undos.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![1, 0, -1, 0]);
    }

    #[test]
    fn undo_then_redo_is_one_write_in_order() {
        let store = MemoryStore::new();
        let original = commit(&store, "x++");
        let parser = MentionParser::default();

        let mut ledger = Ledger::new(&store, "party");
        ledger.undo_all(&original, Utc::now()).unwrap();
        let redo = ledger
            .apply_reasons(NEIL, "x++ x++", &parser.parse("x++ x++"), Utc::now())
            .unwrap();
        // the redo sees the staged undo
        let scores: Vec<i64> = redo.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![1, 2]);

        let records = ledger.into_records();
        assert_eq!(records.len(), 4);
        assert_eq!(
            records[0],
            Record::Target(Target {
                key: key("x"),
                score: 2
            })
        );
        assert!(matches!(&records[1], Record::Reason(r) if r.is_undo()));
    }

    #[test]
    fn resolve_links_previews_to_committed_entries() {
        let store = MemoryStore::new();
        let committed = commit(&store, "x++ x++");
        let text = "x++ x++";
        let mentions = MentionParser::default().parse(text);
        let ledger = Ledger::new(&store, "party");
        let preview = ledger
            .preview_reasons(NEIL, text, &mentions, Utc::now())
            .unwrap();

        let resolved = ledger.resolve_committed(preview).unwrap();
        let mut ids: Vec<Uuid> = resolved.iter().map(|r| r.id).collect();
        let mut expected: Vec<Uuid> = committed.iter().map(|r| r.id).collect();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);

        // once reversed, an entry is not matched again
        let mut ledger = ledger;
        ledger.undo_all(&resolved, Utc::now()).unwrap();
        ledger.commit().unwrap();
        let ledger = Ledger::new(&store, "party");
        let again = ledger
            .preview_reasons(NEIL, text, &mentions, Utc::now())
            .unwrap();
        let again = ledger.resolve_committed(again).unwrap();
        assert!(again.iter().all(|r| !expected.contains(&r.id)));
    }

    #[test]
    fn resolve_matches_messages_cut_short_by_history() {
        let store = MemoryStore::new();
        let long = format!("x++ {}", "a".repeat(MAX_HISTORY_MESSAGE_CHARS));
        let committed = commit(&store, &long);

        let remembered = clip_for_history(&long);
        assert_ne!(remembered, long);
        let ledger = Ledger::new(&store, "party");
        let mentions = MentionParser::default().parse(remembered);
        let preview = ledger
            .preview_reasons(NEIL, remembered, &mentions, Utc::now())
            .unwrap();

        let resolved = ledger.resolve_committed(preview).unwrap();
        assert_eq!(resolved, committed);
    }

    #[test]
    fn score_replays_from_reasons() {
        let store = MemoryStore::new();
        commit(&store, "x++ x++ x--");
        commit(&store, "x-- y++ x--");
        let replayed: i64 = store
            .reasons_for(&key("x"))
            .unwrap()
            .iter()
            .map(|r| r.action.delta())
            .sum();
        assert_eq!(replayed, store.score(&key("x")).unwrap());
        assert_eq!(replayed, -1);
    }

    #[test]
    fn failed_commit_leaves_store_untouched() {
        let store = MemoryStore::new();
        commit(&store, "x++");
        store.set_fail_writes(true);

        let mentions = MentionParser::default().parse("x++ y++");
        let mut ledger = Ledger::new(&store, "party");
        ledger
            .apply_reasons(NEIL, "x++ y++", &mentions, Utc::now())
            .unwrap();
        let err = ledger.commit().unwrap_err();
        assert!(err.is_retryable());

        store.set_fail_writes(false);
        assert_eq!(store.score(&key("x")).unwrap(), 1);
        assert_eq!(store.score(&key("y")).unwrap(), 0);
    }

    #[test]
    fn channels_do_not_share_targets() {
        let store = MemoryStore::new();
        commit(&store, "x++");
        let mut ledger = Ledger::new(&store, "other");
        ledger
            .apply_reasons(NEIL, "x--", &MentionParser::default().parse("x--"), Utc::now())
            .unwrap();
        ledger.commit().unwrap();
        assert_eq!(store.score(&key("x")).unwrap(), 1);
        assert_eq!(store.score(&TargetKey::new("other", "x")).unwrap(), -1);
    }
}
