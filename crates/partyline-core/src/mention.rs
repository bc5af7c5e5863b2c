//! `target++` / `target--` extraction.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use partyline_types::models::Action;

/// Target characters, then the operator, then end of text or whitespace.
static MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\w\-.+]+)(\+\+|--)(?:$|\s+)").expect("mention pattern is valid")
});

/// Always excluded: `c++` and arrows like `<----`.
pub const DEFAULT_BLACKLIST: [&str; 2] = ["c", "-*"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Lowercased target name.
    pub target: String,
    pub action: Action,
    /// Byte range of `target++` in the source text, operator included.
    pub span: Range<usize>,
}

impl Mention {
    pub fn token(&self) -> String {
        format!("{}{}", self.target, self.action.symbol())
    }
}

#[derive(Debug, Clone)]
pub struct MentionParser {
    blacklist: Vec<Regex>,
}

impl Default for MentionParser {
    fn default() -> Self {
        Self::with_blacklist::<&str>(&[]).expect("default blacklist is valid")
    }
}

impl MentionParser {
    /// Builds a parser whose blacklist is the defaults plus `extra`. Each
    /// pattern must match a whole target name to exclude it.
    pub fn with_blacklist<S: AsRef<str>>(extra: &[S]) -> Result<Self, regex::Error> {
        let blacklist = DEFAULT_BLACKLIST
            .iter()
            .copied()
            .chain(extra.iter().map(AsRef::as_ref))
            .map(|pattern| Regex::new(&format!("^(?:{})$", pattern)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { blacklist })
    }

    pub fn is_blacklisted(&self, target: &str) -> bool {
        self.blacklist.iter().any(|p| p.is_match(target))
    }

    /// Ordered, non-overlapping mentions, blacklisted names dropped.
    pub fn parse(&self, text: &str) -> Vec<Mention> {
        MENTION
            .captures_iter(text)
            .filter_map(|caps| {
                let name = caps.get(1)?;
                let op = caps.get(2)?;
                let target = name.as_str().to_lowercase();
                if self.is_blacklisted(&target) {
                    return None;
                }
                Some(Mention {
                    target,
                    action: Action::from_symbol(op.as_str())?,
                    span: name.start()..op.end(),
                })
            })
            .collect()
    }

    pub fn has_mentions(&self, text: &str) -> bool {
        !self.parse(text).is_empty()
    }
}
