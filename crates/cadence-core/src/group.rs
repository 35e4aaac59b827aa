//! Priority-ordered multiset with traversal-safe, deferred mutation.
//!
//! An [`OrderedGroup`] keeps its members sorted by descending priority, ties
//! broken by insertion order. Traversals are driven by a [`SafeIter`] cursor
//! that does not borrow the group between calls, so code running between two
//! `next` calls may freely add, remove, or reprioritize members, including
//! the group being traversed.
//!
//! # Deferred mutation
//!
//! While any traversal is active, structural changes are appended to a FIFO
//! queue instead of being applied. When the last active traversal stops, the
//! queue is drained exactly once, in order. The traversal counter is per
//! group, so nested traversals of the same group are fine.
//!
//! ```
//! use cadence_core::group::OrderedGroup;
//!
//! let mut group = OrderedGroup::new();
//! group.add("low", 0);
//! group.add("high", 10);
//!
//! let mut seen = Vec::new();
//! let mut iter = group.iter();
//! while iter.has_next(&mut group) {
//!     let member = *iter.next(&mut group).unwrap();
//!     group.add("late", 5); // deferred until the traversal ends
//!     seen.push(member);
//! }
//! assert_eq!(seen, ["high", "low"]);
//! assert_eq!(group.len(), 4);
//! ```

use std::cmp::Ordering;
use std::collections::btree_map::Range;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use crate::error::GroupError;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Sort key of one entry. Higher priority sorts first; within a priority,
/// lower `seq` (earlier insertion) sorts first. `seq` is unique per group,
/// so no two entries ever compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    priority: i32,
    seq: u64,
}

impl EntryKey {
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Changes and pending operations
// ---------------------------------------------------------------------------

/// A structural change that took effect, either immediately or during a
/// drain. Only recorded by groups created with [`OrderedGroup::tracked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange<M> {
    Added { member: M, priority: i32 },
    Removed { member: M, priority: i32 },
    Reprioritized { member: M, from: i32, to: i32 },
}

/// What happened to an `add` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Inserted immediately.
    Applied,
    /// Queued until the last active traversal stops.
    Queued,
    /// Cancelled a still-queued removal of the same member and priority, so
    /// the existing entry simply stays.
    Cancelled,
}

#[derive(Debug)]
enum PendingOp<M> {
    Add { member: M, priority: i32 },
    Remove { member: M, priority: i32 },
    /// Removal of one particular entry, wherever a queued reprioritize has
    /// moved it by the time it drains.
    RemoveSeq { member: M, seq: u64 },
    Reprioritize { member: M, from: i32, to: i32 },
}

/// Entries of `map` at exactly `priority`, in insertion order.
fn band<V>(map: &BTreeMap<EntryKey, V>, priority: i32) -> Range<'_, EntryKey, V> {
    map.range(EntryKey { priority, seq: 0 }..=EntryKey { priority, seq: u64::MAX })
}

// ---------------------------------------------------------------------------
// OrderedGroup
// ---------------------------------------------------------------------------

/// A priority-ordered multiset of members. The same member may be present
/// several times, at the same or different priorities.
#[derive(Debug)]
pub struct OrderedGroup<M> {
    entries: BTreeMap<EntryKey, M>,
    pending: VecDeque<PendingOp<M>>,
    /// Number of traversals that have started and not yet stopped.
    traversals: usize,
    next_seq: u64,
    /// Applied changes waiting for the owner, when tracking is enabled.
    changes: Option<Vec<GroupChange<M>>>,
}

impl<M> Default for OrderedGroup<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> OrderedGroup<M> {
    /// Create an empty group that does not record changes.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            pending: VecDeque::new(),
            traversals: 0,
            next_seq: 0,
            changes: None,
        }
    }

    /// Create an empty group that records every applied change for
    /// [`take_changes`](Self::take_changes).
    pub fn tracked() -> Self {
        Self {
            changes: Some(Vec::new()),
            ..Self::new()
        }
    }

    /// Number of entries currently in the ordered structure. Queued changes
    /// are not counted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any traversal is active.
    pub fn iterating(&self) -> bool {
        self.traversals > 0
    }

    /// Number of queued structural changes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Members in traversal order, without starting a traversal.
    pub fn members(&self) -> impl Iterator<Item = &M> {
        self.entries.values()
    }

    /// Entries in traversal order, without starting a traversal.
    pub fn entries(&self) -> impl Iterator<Item = (EntryKey, &M)> {
        self.entries.iter().map(|(k, m)| (*k, m))
    }

    /// Drain the changes recorded since the last call. Always empty for
    /// untracked groups.
    pub fn take_changes(&mut self) -> Vec<GroupChange<M>> {
        self.changes.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Start a traversal, highest priority first. The returned iterator
    /// must be driven to exhaustion or [`stop`](SafeIter::stop)ped, or the
    /// queue never drains.
    pub fn iter(&mut self) -> SafeIter {
        self.traversals += 1;
        SafeIter {
            cursor: None,
            last: None,
            active: true,
        }
    }

    fn record(&mut self, change: GroupChange<M>) {
        if let Some(changes) = self.changes.as_mut() {
            changes.push(change);
        }
    }

    fn end_traversal(&mut self) -> usize
    where
        M: PartialEq + Clone,
    {
        self.traversals = self.traversals.saturating_sub(1);
        if self.traversals > 0 {
            return 0;
        }
        let mut applied = 0;
        while let Some(op) = self.pending.pop_front() {
            self.apply(op);
            applied += 1;
        }
        if applied > 0 {
            log::trace!("drained {applied} queued group change(s)");
        }
        applied
    }

    fn peek_after(&self, cursor: Option<EntryKey>) -> Option<EntryKey> {
        match cursor {
            None => self.entries.keys().next().copied(),
            Some(key) => self
                .entries
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(|(k, _)| *k),
        }
    }
}

impl<M: PartialEq + Clone> OrderedGroup<M> {
    /// Add `member` at `priority`. Applied immediately when no traversal is
    /// active, queued otherwise.
    pub fn add(&mut self, member: M, priority: i32) -> Update {
        if !self.iterating() {
            self.apply(PendingOp::Add { member, priority });
            return Update::Applied;
        }
        if let Some(pos) = self.queued_removal(&member, priority) {
            self.pending.remove(pos);
            return Update::Cancelled;
        }
        self.pending.push_back(PendingOp::Add { member, priority });
        Update::Queued
    }

    /// Remove one entry of `member` at `priority`. Returns whether a
    /// matching entry existed, counting queued changes.
    pub fn remove(&mut self, member: &M, priority: i32) -> bool {
        if !self.iterating() {
            let Some(key) = self.find(member, priority) else {
                return false;
            };
            self.remove_entry(key);
            return true;
        }
        if let Some(pos) = self.pending.iter().rposition(
            |op| matches!(op, PendingOp::Add { member: m, priority: p } if m == member && *p == priority),
        ) && !self.touched_after(pos, member)
        {
            self.pending.remove(pos);
            return true;
        }
        if self.projected_count(member, priority) == 0 {
            return false;
        }
        self.pending.push_back(PendingOp::Remove {
            member: member.clone(),
            priority,
        });
        true
    }

    /// Move one entry of `member` from priority `from` to `to`, keeping its
    /// insertion-order tiebreak. Deferred like add and remove.
    pub fn change_priority(&mut self, member: &M, from: i32, to: i32) -> bool {
        if from == to {
            return self.projected_count(member, from) > 0;
        }
        if !self.iterating() {
            if self.find(member, from).is_none() {
                return false;
            }
            self.apply(PendingOp::Reprioritize {
                member: member.clone(),
                from,
                to,
            });
            return true;
        }
        if self.projected_count(member, from) == 0 {
            return false;
        }
        self.pending.push_back(PendingOp::Reprioritize {
            member: member.clone(),
            from,
            to,
        });
        true
    }

    /// Whether `member` is present at any priority, ignoring queued changes.
    pub fn contains(&self, member: &M) -> bool {
        self.entries.values().any(|m| m == member)
    }

    fn find(&self, member: &M, priority: i32) -> Option<EntryKey> {
        band(&self.entries, priority)
            .find(|&(_, m)| m == member)
            .map(|(k, _)| *k)
    }

    /// Replay the queue over a shadow of the entries, resolving each op the
    /// way a drain will. Returns the projected entries and, per queued op,
    /// the key it lands on (`None` if it will find nothing).
    fn replay(&self) -> (BTreeMap<EntryKey, &M>, Vec<Option<EntryKey>>) {
        let mut shadow: BTreeMap<EntryKey, &M> = self.entries.iter().map(|(k, m)| (*k, m)).collect();
        let mut next_seq = self.next_seq;
        let mut landed = Vec::with_capacity(self.pending.len());
        for op in &self.pending {
            let key = match op {
                PendingOp::Add { member, priority } => {
                    let key = EntryKey {
                        priority: *priority,
                        seq: next_seq,
                    };
                    next_seq += 1;
                    shadow.insert(key, member);
                    Some(key)
                }
                PendingOp::Remove { member, priority } => {
                    let key = band(&shadow, *priority)
                        .find(|&(_, &m)| m == member)
                        .map(|(k, _)| *k);
                    key.filter(|k| shadow.remove(k).is_some())
                }
                PendingOp::RemoveSeq { seq, .. } => {
                    let key = shadow.keys().find(|k| k.seq == *seq).copied();
                    key.filter(|k| shadow.remove(k).is_some())
                }
                PendingOp::Reprioritize { member, from, to } => {
                    let key = band(&shadow, *from)
                        .find(|&(_, &m)| m == member)
                        .map(|(k, _)| *k);
                    key.and_then(|key| {
                        let value = shadow.remove(&key)?;
                        let moved = EntryKey {
                            priority: *to,
                            seq: key.seq,
                        };
                        shadow.insert(moved, value);
                        Some(moved)
                    })
                }
            };
            landed.push(key);
        }
        (shadow, landed)
    }

    /// Position of the last queued removal that will take `member` out of
    /// `priority`, provided nothing queued after it depends on it.
    fn queued_removal(&self, member: &M, priority: i32) -> Option<usize> {
        let (_, landed) = self.replay();
        let pos = (0..self.pending.len()).rev().find(|&pos| match &self.pending[pos] {
            PendingOp::Remove { member: m, .. } | PendingOp::RemoveSeq { member: m, .. } => {
                m == member && landed[pos].is_some_and(|k| k.priority == priority)
            }
            _ => false,
        })?;
        (!self.touched_after(pos, member)).then_some(pos)
    }

    /// Whether a queued op after `pos`, other than an add, resolves against
    /// `member`'s entries. Dropping the op at `pos` could change what that
    /// later op lands on.
    fn touched_after(&self, pos: usize, member: &M) -> bool {
        self.pending.iter().skip(pos + 1).any(|op| match op {
            PendingOp::Add { .. } => false,
            PendingOp::Remove { member: m, .. }
            | PendingOp::RemoveSeq { member: m, .. }
            | PendingOp::Reprioritize { member: m, .. } => m == member,
        })
    }

    /// How many `(member, priority)` entries the group will hold once the
    /// queue drains.
    fn projected_count(&self, member: &M, priority: i32) -> usize {
        let (shadow, _) = self.replay();
        band(&shadow, priority).filter(|&(_, &m)| m == member).count()
    }

    fn remove_entry(&mut self, key: EntryKey) {
        if let Some(member) = self.entries.remove(&key) {
            self.record(GroupChange::Removed {
                member,
                priority: key.priority,
            });
        }
    }

    fn apply(&mut self, op: PendingOp<M>) {
        match op {
            PendingOp::Add { member, priority } => {
                let key = EntryKey {
                    priority,
                    seq: self.next_seq,
                };
                self.next_seq += 1;
                self.entries.insert(key, member.clone());
                self.record(GroupChange::Added { member, priority });
            }
            PendingOp::Remove { member, priority } => {
                if let Some(key) = self.find(&member, priority) {
                    self.remove_entry(key);
                }
            }
            PendingOp::RemoveSeq { seq, .. } => {
                if let Some(key) = self.entries.keys().find(|k| k.seq == seq).copied() {
                    self.remove_entry(key);
                }
            }
            PendingOp::Reprioritize { member, from, to } => {
                if let Some(key) = self.find(&member, from)
                    && let Some(value) = self.entries.remove(&key)
                {
                    self.entries.insert(EntryKey { priority: to, seq: key.seq }, value);
                    self.record(GroupChange::Reprioritized { member, from, to });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SafeIter
// ---------------------------------------------------------------------------

/// A traversal cursor over an [`OrderedGroup`].
///
/// Every traversal abandoned before exhaustion must call [`stop`](Self::stop);
/// an iterator dropped while still active logs a warning and leaves the
/// group's queue undrained.
#[derive(Debug)]
pub struct SafeIter {
    /// Key of the last entry yielded; the next entry is the first after it.
    cursor: Option<EntryKey>,
    /// Key eligible for [`remove`](Self::remove).
    last: Option<EntryKey>,
    active: bool,
}

impl SafeIter {
    /// Whether this traversal is still active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Priority of the entry most recently returned by `next`.
    pub fn priority(&self) -> Option<i32> {
        self.last.map(|k| k.priority)
    }

    /// Whether another element remains. Returning `false` stops the
    /// traversal, exactly once.
    pub fn has_next<M: PartialEq + Clone>(&mut self, group: &mut OrderedGroup<M>) -> bool {
        if !self.active {
            return false;
        }
        if group.peek_after(self.cursor).is_some() {
            return true;
        }
        self.stop(group);
        false
    }

    /// Advance to the next element.
    pub fn next<'g, M: PartialEq + Clone>(
        &mut self,
        group: &'g mut OrderedGroup<M>,
    ) -> Result<&'g M, GroupError> {
        if !self.active {
            return Err(GroupError::IteratorExhausted);
        }
        let Some(key) = group.peek_after(self.cursor) else {
            self.stop(group);
            return Err(GroupError::IteratorExhausted);
        };
        self.cursor = Some(key);
        self.last = Some(key);
        group.entries.get(&key).ok_or(GroupError::IteratorExhausted)
    }

    /// Request removal of the element most recently returned by `next`.
    /// No-op without a preceding `next`, or after `stop`.
    pub fn remove<M: PartialEq + Clone>(&mut self, group: &mut OrderedGroup<M>) {
        if !self.active {
            return;
        }
        if let Some(key) = self.last.take()
            && let Some(member) = group.entries.get(&key)
        {
            let member = member.clone();
            group.pending.push_back(PendingOp::RemoveSeq { member, seq: key.seq });
        }
    }

    /// End the traversal. Idempotent. Drains the group's queue when this was
    /// its last active traversal, returning how many queued changes were
    /// applied.
    pub fn stop<M: PartialEq + Clone>(&mut self, group: &mut OrderedGroup<M>) -> usize {
        if !self.active {
            return 0;
        }
        self.active = false;
        self.last = None;
        group.end_traversal()
    }
}

impl Drop for SafeIter {
    fn drop(&mut self) {
        if self.active {
            log::warn!("group traversal dropped without stop(); its queued changes will not drain");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
