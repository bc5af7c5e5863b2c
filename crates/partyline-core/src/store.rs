//! Persistence port. The core only needs point lookups and one atomic
//! write per handled message; anything fancier belongs to the storage crate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow, bail};

use partyline_types::models::{Reason, Record, Target, TargetKey};

use crate::directory::Channel;

pub trait Store: Send + Sync {
    fn load_channel(&self, name: &str) -> Result<Option<Channel>>;

    /// Saves the whole channel aggregate, members included.
    fn put_channel(&self, channel: &Channel) -> Result<()>;

    fn delete_channel(&self, name: &str) -> Result<()>;

    /// Returns the stored target, or a fresh zero-score one. Never writes.
    fn get_or_create_target(&self, key: &TargetKey) -> Result<Target>;

    /// Writes every record or none of them. Reasons keep the given order.
    fn put_all(&self, records: &[Record]) -> Result<()>;

    /// Saves `channel` together with `records`, all or nothing. One handled
    /// message is exactly one call.
    fn commit(&self, channel: &Channel, records: &[Record]) -> Result<()>;

    /// Up to `limit` reasons for one target, most recent first.
    fn recent_reasons(&self, key: &TargetKey, limit: usize) -> Result<Vec<Reason>>;
}

#[derive(Default)]
struct MemoryInner {
    channels: HashMap<String, Channel>,
    targets: HashMap<TargetKey, Target>,
    /// Creation order.
    reasons: Vec<Reason>,
}

/// What a write touches, for [`MemoryStore::fail_writes_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Channel,
    Ledger,
}

/// In-process store. Writes can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_channel_writes: AtomicBool,
    fail_ledger_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write returns an error and changes nothing.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_channel_writes.store(fail, Ordering::SeqCst);
        self.fail_ledger_writes.store(fail, Ordering::SeqCst);
    }

    /// Fails only writes that touch `kind`. A commit touching it fails as a
    /// whole.
    pub fn fail_writes_to(&self, kind: WriteKind) {
        self.set_fail_writes(false);
        match kind {
            WriteKind::Channel => self.fail_channel_writes.store(true, Ordering::SeqCst),
            WriteKind::Ledger => self.fail_ledger_writes.store(true, Ordering::SeqCst),
        }
    }

    /// Every reason ever written for `key`, oldest first.
    pub fn reasons_for(&self, key: &TargetKey) -> Result<Vec<Reason>> {
        let inner = self.lock()?;
        Ok(inner
            .reasons
            .iter()
            .filter(|r| r.target == *key)
            .cloned()
            .collect())
    }

    pub fn score(&self, key: &TargetKey) -> Result<i64> {
        Ok(self.get_or_create_target(key)?.score)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("memory store lock poisoned: {}", e))
    }

    fn check_writable(&self, kind: WriteKind) -> Result<()> {
        let failing = match kind {
            WriteKind::Channel => &self.fail_channel_writes,
            WriteKind::Ledger => &self.fail_ledger_writes,
        };
        if failing.load(Ordering::SeqCst) {
            bail!("memory store is refusing {:?} writes", kind);
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn load_channel(&self, name: &str) -> Result<Option<Channel>> {
        Ok(self.lock()?.channels.get(name).cloned())
    }

    fn put_channel(&self, channel: &Channel) -> Result<()> {
        self.check_writable(WriteKind::Channel)?;
        self.lock()?
            .channels
            .insert(channel.name().to_string(), channel.clone());
        Ok(())
    }

    fn delete_channel(&self, name: &str) -> Result<()> {
        self.check_writable(WriteKind::Channel)?;
        self.lock()?.channels.remove(name);
        Ok(())
    }

    fn get_or_create_target(&self, key: &TargetKey) -> Result<Target> {
        Ok(self
            .lock()?
            .targets
            .get(key)
            .cloned()
            .unwrap_or_else(|| Target::new(key.clone())))
    }

    fn put_all(&self, records: &[Record]) -> Result<()> {
        self.check_writable(WriteKind::Ledger)?;
        apply_records(&mut *self.lock()?, records);
        Ok(())
    }

    fn commit(&self, channel: &Channel, records: &[Record]) -> Result<()> {
        self.check_writable(WriteKind::Channel)?;
        if !records.is_empty() {
            self.check_writable(WriteKind::Ledger)?;
        }
        let mut inner = self.lock()?;
        inner
            .channels
            .insert(channel.name().to_string(), channel.clone());
        apply_records(&mut inner, records);
        Ok(())
    }

    fn recent_reasons(&self, key: &TargetKey, limit: usize) -> Result<Vec<Reason>> {
        let inner = self.lock()?;
        Ok(inner
            .reasons
            .iter()
            .rev()
            .filter(|r| r.target == *key)
            .take(limit)
            .cloned()
            .collect())
    }
}

fn apply_records(inner: &mut MemoryInner, records: &[Record]) {
    for record in records {
        match record {
            Record::Target(target) => {
                inner.targets.insert(target.key.clone(), target.clone());
            }
            Record::Reason(reason) => inner.reasons.push(reason.clone()),
        }
    }
}
