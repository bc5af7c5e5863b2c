//! Search/replace edits of earlier messages, with the ledger kept honest:
//! whatever the old text scored is reversed before the new text is scored.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use partyline_types::models::Reason;

use crate::directory::Member;
use crate::error::{CoreError, Result};
use crate::ledger::Ledger;
use crate::mention::{Mention, MentionParser};

static EDIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^s/([^/]+)/([^/]+)(/?)(g?)$").expect("edit pattern is valid"));

/// A parsed `s/pattern/replacement/[g]` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCommand {
    pub pattern: String,
    pub replacement: String,
    pub global: bool,
}

impl EditCommand {
    /// Without the trailing slash a final `g` belongs to the replacement,
    /// so `s/foo/bag` means "replace with bag".
    pub fn parse(text: &str) -> Option<Self> {
        let caps = EDIT.captures(text.trim())?;
        let pattern = caps.get(1)?.as_str().to_string();
        let mut replacement = caps.get(2)?.as_str().to_string();
        let slash = caps.get(3).map_or("", |m| m.as_str());
        let g = caps.get(4).map_or("", |m| m.as_str());

        let global = if slash.is_empty() {
            replacement.push_str(g);
            false
        } else {
            g == "g"
        };

        Some(Self {
            pattern,
            replacement,
            global,
        })
    }

    pub fn is_edit(text: &str) -> bool {
        EDIT.is_match(text.trim())
    }

    pub fn apply(&self, regex: &Regex, text: &str) -> String {
        if self.global {
            regex.replace_all(text, self.replacement.as_str()).into_owned()
        } else {
            regex.replace(text, self.replacement.as_str()).into_owned()
        }
    }
}

/// Everything an edit did, in the order it happened.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub original: String,
    pub replacement: String,
    /// Compensating entries for the original text, staged first.
    pub undone: Vec<Reason>,
    /// Mentions found in the replacement; `redone` lines up with these.
    pub replacement_mentions: Vec<Mention>,
    /// Entries staged for the replacement text. Empty when the replacement
    /// mentions nothing, in which case it went into history.
    pub redone: Vec<Reason>,
}

impl Reconciliation {
    pub fn rescored(&self) -> bool {
        !self.replacement_mentions.is_empty()
    }
}

pub struct Reconciler<'r, 'a> {
    parser: &'r MentionParser,
    ledger: &'r mut Ledger<'a>,
}

impl<'r, 'a> Reconciler<'r, 'a> {
    pub fn new(parser: &'r MentionParser, ledger: &'r mut Ledger<'a>) -> Self {
        Self { parser, ledger }
    }

    /// Applies `edit` to the newest entry of `history` it matches.
    ///
    /// `history` is most-recent-first and is taken by the caller before the
    /// edit command itself was recorded. Undo and redo are staged on the
    /// ledger in that order; the caller commits them together. Not
    /// idempotent: every committed call appends fresh compensating entries.
    pub fn reconcile(
        &mut self,
        member: &mut Member,
        history: &[String],
        edit: &EditCommand,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        let regex = Regex::new(&edit.pattern).map_err(|e| {
            debug!("Unusable edit pattern {:?}: {}", edit.pattern, e);
            CoreError::NoMatchingMessage
        })?;

        let original = history
            .iter()
            .find(|text| regex.is_match(text))
            .ok_or(CoreError::NoMatchingMessage)?
            .clone();
        let replacement = edit.apply(&regex, &original);
        let actor = member.identity().to_string();

        let original_mentions = self.parser.parse(&original);
        let undone = if original_mentions.is_empty() {
            Vec::new()
        } else {
            let would_have =
                self.ledger
                    .preview_reasons(&actor, &original, &original_mentions, now)?;
            let would_have = self.ledger.resolve_committed(would_have)?;
            let undone = self.ledger.undo_all(&would_have, now)?;
            info!("{} undoing {} reason(s) by editing", actor, undone.len());
            undone
        };

        let replacement_mentions = self.parser.parse(&replacement);
        let redone = if replacement_mentions.is_empty() {
            member.record_message(&replacement);
            Vec::new()
        } else {
            self.ledger
                .apply_reasons(&actor, &replacement, &replacement_mentions, now)?
        };

        Ok(Reconciliation {
            original,
            replacement,
            undone,
            replacement_mentions,
            redone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use partyline_types::models::TargetKey;

    const NEIL: &str = "neil@gmail.com";

    fn score(store: &MemoryStore, name: &str) -> i64 {
        store.score(&TargetKey::new("party", name)).unwrap()
    }

    fn said(store: &MemoryStore, member: &mut Member, text: &str) {
        let parser = MentionParser::default();
        let mentions = parser.parse(text);
        let mut ledger = Ledger::new(store, "party");
        ledger
            .apply_reasons(NEIL, text, &mentions, Utc::now())
            .unwrap();
        ledger.commit().unwrap();
        member.record_message(text);
    }

    fn history(member: &Member) -> Vec<String> {
        member.last_messages().map(String::from).collect()
    }

    #[test]
    fn parses_edit_forms() {
        let first = EditCommand::parse("s/foo/bar/").unwrap();
        assert_eq!(first.pattern, "foo");
        assert_eq!(first.replacement, "bar");
        assert!(!first.global);

        assert!(EditCommand::parse(" s/foo/bar/g").unwrap().global);

        let bare = EditCommand::parse("s/foo/bag").unwrap();
        assert_eq!(bare.replacement, "bag");
        assert!(!bare.global);

        assert!(EditCommand::parse("s/foo/").is_none());
        assert!(EditCommand::parse("x s/foo/bar/").is_none());
        assert!(EditCommand::is_edit("s/foo/bar"));
    }

    #[test]
    fn first_match_and_global_replacement() {
        let regex = Regex::new("foo").unwrap();
        let first = EditCommand::parse("s/foo/bar/").unwrap();
        let all = EditCommand::parse("s/foo/bar/g").unwrap();
        assert_eq!(first.apply(&regex, "foo foo"), "bar foo");
        assert_eq!(all.apply(&regex, "foo baz foo"), "bar baz bar");
    }

    #[test]
    fn no_match_changes_nothing() {
        let store = MemoryStore::new();
        let parser = MentionParser::default();
        let mut member = Member::new(NEIL);
        said(&store, &mut member, "x++ hello");
        let before = member.clone();

        let err = Reconciler::new(&parser, &mut Ledger::new(&store, "party"))
            .reconcile(
                &mut member,
                &history(&before),
                &EditCommand::parse("s/absent/here/").unwrap(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NoMatchingMessage));
        assert_eq!(member, before);
        assert_eq!(score(&store, "x"), 1);
    }

    #[test]
    fn undo_and_redo_are_staged_in_order() {
        let store = MemoryStore::new();
        let parser = MentionParser::default();
        let mut member = Member::new(NEIL);
        said(&store, &mut member, "x++ foo");

        let past = history(&member);
        let mut ledger = Ledger::new(&store, "party");
        let rec = Reconciler::new(&parser, &mut ledger)
            .reconcile(
                &mut member,
                &past,
                &EditCommand::parse("s/x/y/").unwrap(),
                Utc::now(),
            )
            .unwrap();

        let staged: Vec<(String, bool)> = ledger
            .staged()
            .iter()
            .map(|r| (r.target.name.clone(), r.is_undo()))
            .collect();
        assert_eq!(staged, vec![("x".to_string(), true), ("y".to_string(), false)]);
        assert_eq!(rec.undone[0].score, 0);
        assert_eq!(rec.redone[0].score, 1);

        // dropping the ledger drops both halves
        drop(ledger);
        assert_eq!(score(&store, "x"), 1);
        assert_eq!(score(&store, "y"), 0);
    }

    #[test]
    fn invalid_pattern_is_no_match() {
        let store = MemoryStore::new();
        let parser = MentionParser::default();
        let mut member = Member::new(NEIL);
        member.record_message("a(b");
        let past = history(&member);
        let err = Reconciler::new(&parser, &mut Ledger::new(&store, "party"))
            .reconcile(
                &mut member,
                &past,
                &EditCommand::parse("s/(/x/").unwrap(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NoMatchingMessage));
    }

    #[test]
    fn plain_edit_goes_into_history() {
        let store = MemoryStore::new();
        let parser = MentionParser::default();
        let mut member = Member::new(NEIL);
        member.record_message("foo foo");

        let past = history(&member);
        let rec = Reconciler::new(&parser, &mut Ledger::new(&store, "party"))
            .reconcile(
                &mut member,
                &past,
                &EditCommand::parse("s/foo/bar/").unwrap(),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(rec.replacement, "bar foo");
        assert!(rec.undone.is_empty());
        assert!(!rec.rescored());
        assert_eq!(member.last_messages().next(), Some("bar foo"));
    }

    #[test]
    fn picks_most_recent_matching_message() {
        let store = MemoryStore::new();
        let parser = MentionParser::default();
        let mut member = Member::new(NEIL);
        member.record_message("foo one");
        member.record_message("foo two");
        member.record_message("unrelated");

        let past = history(&member);
        let rec = Reconciler::new(&parser, &mut Ledger::new(&store, "party"))
            .reconcile(
                &mut member,
                &past,
                &EditCommand::parse("s/foo/bar/").unwrap(),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(rec.original, "foo two");
    }

    #[test]
    fn fixing_a_typo_moves_the_points() {
        let store = MemoryStore::new();
        let parser = MentionParser::default();
        let mut member = Member::new(NEIL);
        said(&store, &mut member, "intern++");
        said(&store, &mut member, "intern++");
        said(&store, &mut member, "jason++");
        said(&store, &mut member, "jason++ jason++ intren-- intren-- /combine");

        let past = history(&member);
        let mut ledger = Ledger::new(&store, "party");
        let rec = Reconciler::new(&parser, &mut ledger)
            .reconcile(
                &mut member,
                &past,
                &EditCommand::parse("s/intren/intern/g").unwrap(),
                Utc::now(),
            )
            .unwrap();
        // nothing reaches the store before the commit
        assert_eq!(score(&store, "intren"), -2);
        ledger.commit().unwrap();

        let undone: Vec<i64> = rec.undone.iter().map(|r| r.score).collect();
        assert_eq!(undone, vec![2, 1, -1, 0]);
        let redone: Vec<i64> = rec.redone.iter().map(|r| r.score).collect();
        assert_eq!(redone, vec![2, 3, 1, 0]);

        assert_eq!(score(&store, "jason"), 3);
        assert_eq!(score(&store, "intern"), 0);
        assert_eq!(score(&store, "intren"), 0);

        // history of the mistyped target keeps both the mistakes and their reversal
        let intren = store.reasons_for(&TargetKey::new("party", "intren")).unwrap();
        assert_eq!(intren.len(), 4);
        assert_eq!(intren.iter().filter(|r| r.is_undo()).count(), 2);
    }
}
