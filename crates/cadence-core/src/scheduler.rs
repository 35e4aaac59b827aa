//! The scheduler: owns the thinker arena and drives the frame cascade.
//!
//! # Architecture
//!
//! The `Scheduler` owns:
//! - The world state `W` shared by every thinker
//! - A `SlotMap` of thinker nodes (behavior, time factor, remainder, timers,
//!   child group)
//! - The root [`OrderedGroup`] and root time factor
//! - A frame counter and a queue of pending lifecycle hooks
//!
//! # Frame cascade
//!
//! Each [`advance`](Scheduler::advance) runs two passes over the attached
//! tree, siblings always highest priority first:
//! 1. **Tick pass** -- each thinker adds its effective time factor to its
//!    remainder and runs one tick step per whole [`UNIT`]: expired timers
//!    fire, then `on_tick`. Its children follow.
//! 2. **Frame pass** -- each thinker's `on_frame` runs exactly once, then its
//!    children's.
//!
//! Attachment changes requested while a group is being traversed are queued
//! and take effect when that group's last traversal ends. Lifecycle hooks
//! (`on_attach`, `on_detach`) run once the change has actually happened.

use std::any::Any;
use std::collections::VecDeque;
use std::hash::Hasher;
use std::time::Duration;

use slotmap::SlotMap;

use crate::clock::FrameClock;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::fixed::{Fixed64, Ticks, UNIT, ZERO};
use crate::group::{GroupChange, OrderedGroup, Update};
use crate::hash::StateHash;
use crate::id::{Parent, ThinkerId, TimerHandle};
use crate::thinker::{ThinkContext, Thinker, TimeFactor};

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    handle: TimerHandle,
    remaining: u32,
}

/// Per-thinker state stored in the arena.
struct Node<W> {
    /// `None` while one of the thinker's hooks is running.
    behavior: Option<Box<dyn Thinker<W>>>,
    /// The group this thinker is actually a member of.
    parent: Option<Parent>,
    /// The group this thinker will belong to once queued changes drain.
    next_parent: Option<Parent>,
    /// Priority as of the last request, queued or applied.
    priority: i32,
    time_factor: TimeFactor,
    remainder: Fixed64,
    /// Running timers in registration order.
    timers: Vec<Timer>,
    children: OrderedGroup<ThinkerId>,
    ticks_run: u64,
}

impl<W> Node<W> {
    fn new(behavior: Box<dyn Thinker<W>>) -> Self {
        Self {
            behavior: Some(behavior),
            parent: None,
            next_parent: None,
            priority: 0,
            time_factor: TimeFactor::Inherit,
            remainder: ZERO,
            timers: Vec::new(),
            children: OrderedGroup::tracked(),
            ticks_run: 0,
        }
    }

    fn is_running(&self) -> bool {
        self.behavior.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Attached(Parent),
    Detached(Parent),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Root container of the scheduling tree.
pub struct Scheduler<W = ()> {
    world: W,
    nodes: SlotMap<ThinkerId, Node<W>>,
    root: OrderedGroup<ThinkerId>,
    /// Time factor for thinkers that inherit all the way up.
    time_factor: Fixed64,
    config: SchedulerConfig,
    frame: Ticks,
    /// Lifecycle hooks waiting to run, in the order their changes happened.
    hooks: VecDeque<(ThinkerId, Lifecycle)>,
}

impl<W: std::fmt::Debug> std::fmt::Debug for Scheduler<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("world", &self.world)
            .field("frame", &self.frame)
            .field("time_factor", &self.time_factor)
            .field("thinkers", &self.nodes.len())
            .field("root_children", &self.root.len())
            .finish_non_exhaustive()
    }
}

impl<W: Default + 'static> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new(W::default())
    }
}

impl<W: 'static> Scheduler<W> {
    /// Create a scheduler with the default configuration.
    pub fn new(world: W) -> Self {
        let config = SchedulerConfig::default();
        Self {
            world,
            nodes: SlotMap::with_key(),
            root: OrderedGroup::tracked(),
            time_factor: config.root_time_factor(),
            config,
            frame: 0,
            hooks: VecDeque::new(),
        }
    }

    /// Create a scheduler from a validated configuration.
    pub fn with_config(world: W, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let mut scheduler = Self::new(world);
        scheduler.time_factor = config.root_time_factor();
        scheduler.config = config;
        Ok(scheduler)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// A frame clock paced by this scheduler's configuration.
    pub fn clock(&self) -> Result<FrameClock, SchedulerError> {
        FrameClock::with_config(&self.config)
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn into_world(self) -> W {
        self.world
    }

    /// Number of frames started so far.
    pub fn frame(&self) -> Ticks {
        self.frame
    }

    /// Number of thinkers in the arena, attached or not.
    pub fn thinker_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: ThinkerId) -> bool {
        self.nodes.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Root time factor
    // -----------------------------------------------------------------------

    pub fn root_time_factor(&self) -> Fixed64 {
        self.time_factor
    }

    pub fn set_root_time_factor(&mut self, factor: Fixed64) -> Result<(), SchedulerError> {
        if factor < ZERO {
            return Err(SchedulerError::NegativeTimeFactor(factor));
        }
        self.time_factor = factor;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Arena
    // -----------------------------------------------------------------------

    /// Add a detached thinker to the arena.
    pub fn spawn(&mut self, thinker: impl Thinker<W>) -> ThinkerId {
        let id = self.nodes.insert(Node::new(Box::new(thinker)));
        log::debug!("spawned thinker {id:?}");
        id
    }

    /// Remove a thinker from the arena and hand back its behavior.
    ///
    /// The thinker must be detached with no attachment pending, and none of
    /// its hooks may be running. Its children are detached first.
    pub fn despawn(&mut self, id: ThinkerId) -> Result<Box<dyn Thinker<W>>, SchedulerError> {
        self.check_removable(id)?;
        let children: Vec<ThinkerId> = self.node(id)?.children.members().copied().collect();
        for child in children {
            if self
                .nodes
                .get(child)
                .is_some_and(|node| node.next_parent == Some(Parent::Thinker(id)))
            {
                self.detach(child)?;
            }
        }
        // Detach hooks may have re-attached this thinker.
        self.check_removable(id)?;

        let node = self.nodes.remove(id).ok_or(SchedulerError::ThinkerNotFound(id))?;
        for &orphan in node.children.members() {
            if let Some(child) = self.nodes.get_mut(orphan)
                && child.next_parent == Some(Parent::Thinker(id))
            {
                log::warn!("thinker {orphan:?} re-attached to despawning {id:?}; detaching without hooks");
                child.parent = None;
                child.next_parent = None;
            }
        }
        log::debug!("despawned thinker {id:?}");
        node.behavior.ok_or(SchedulerError::Busy(id))
    }

    fn check_removable(&self, id: ThinkerId) -> Result<(), SchedulerError> {
        let node = self.node(id)?;
        if node.is_running() || node.children.iterating() {
            return Err(SchedulerError::Busy(id));
        }
        if node.parent.is_some() || node.next_parent.is_some() {
            return Err(SchedulerError::StillAttached(id));
        }
        Ok(())
    }

    fn node(&self, id: ThinkerId) -> Result<&Node<W>, SchedulerError> {
        self.nodes.get(id).ok_or(SchedulerError::ThinkerNotFound(id))
    }

    fn node_mut(&mut self, id: ThinkerId) -> Result<&mut Node<W>, SchedulerError> {
        self.nodes.get_mut(id).ok_or(SchedulerError::ThinkerNotFound(id))
    }

    /// Borrow a thinker's behavior as its concrete type. `None` while one of
    /// its hooks is running.
    pub fn thinker<T: Thinker<W>>(&self, id: ThinkerId) -> Option<&T> {
        let behavior = self.nodes.get(id)?.behavior.as_deref()?;
        let any: &dyn Any = behavior;
        any.downcast_ref::<T>()
    }

    pub fn thinker_mut<T: Thinker<W>>(&mut self, id: ThinkerId) -> Option<&mut T> {
        let behavior = self.nodes.get_mut(id)?.behavior.as_deref_mut()?;
        let any: &mut dyn Any = behavior;
        any.downcast_mut::<T>()
    }

    // -----------------------------------------------------------------------
    // Attachment
    // -----------------------------------------------------------------------

    /// Attach `child` beneath `parent` at `priority`, moving it if it is
    /// attached elsewhere.
    ///
    /// Returns `Ok(false)` when `child` already is, or is about to be,
    /// attached to `parent`; its priority is left alone in that case. If the
    /// target group is being traversed the attachment takes effect when the
    /// traversal ends. Attaching beneath oneself or one's own descendant is
    /// rejected with [`SchedulerError::Cycle`] and changes nothing.
    pub fn attach(
        &mut self,
        child: ThinkerId,
        parent: impl Into<Parent>,
        priority: i32,
    ) -> Result<bool, SchedulerError> {
        let parent = parent.into();
        let node = self.node(child)?;
        let (previous, old_priority) = (node.next_parent, node.priority);
        if let Parent::Thinker(p) = parent {
            self.node(p)?;
        }
        if previous == Some(parent) {
            return Ok(false);
        }
        if self.would_cycle(child, parent) {
            log::warn!("rejected attaching {child:?} under {parent:?}: cycle");
            return Err(SchedulerError::Cycle { child, parent });
        }

        if let Some(previous) = previous
            && let Some(group) = self.group_mut(previous)
        {
            group.remove(&child, old_priority);
        }
        let node = self.node_mut(child)?;
        node.next_parent = Some(parent);
        node.priority = priority;
        let update = match self.group_mut(parent) {
            Some(group) => group.add(child, priority),
            None => return Err(SchedulerError::ThinkerNotFound(child)),
        };
        log::debug!("attach {child:?} under {parent:?} at priority {priority}: {update:?}");

        if let Some(previous) = previous {
            self.absorb(previous);
        }
        self.absorb(parent);
        if update == Update::Cancelled {
            // The queued removal was dropped, so the old entry stays put.
            self.mark_attached(child, parent);
        }
        self.flush_hooks()?;
        Ok(true)
    }

    /// Detach `child` from its parent. Returns `Ok(false)` if it is not
    /// attached (or about to be).
    pub fn detach(&mut self, child: ThinkerId) -> Result<bool, SchedulerError> {
        let node = self.node_mut(child)?;
        let Some(previous) = node.next_parent.take() else {
            return Ok(false);
        };
        let priority = node.priority;
        if let Some(group) = self.group_mut(previous) {
            group.remove(&child, priority);
        }
        log::debug!("detach {child:?} from {previous:?}");
        self.absorb(previous);
        self.flush_hooks()?;
        Ok(true)
    }

    /// The group `id` currently belongs to.
    pub fn parent(&self, id: ThinkerId) -> Option<Parent> {
        self.nodes.get(id)?.parent
    }

    /// The group `id` will belong to once queued changes drain.
    pub fn requested_parent(&self, id: ThinkerId) -> Option<Parent> {
        self.nodes.get(id)?.next_parent
    }

    pub fn is_attached(&self, id: ThinkerId) -> bool {
        self.parent(id).is_some()
    }

    /// Thinkers currently attached beneath `parent`, in execution order.
    pub fn children(&self, parent: impl Into<Parent>) -> Vec<ThinkerId> {
        let parent = parent.into();
        let Some(group) = self.group(parent) else {
            return Vec::new();
        };
        group
            .members()
            .copied()
            .filter(|&id| self.parent(id) == Some(parent))
            .collect()
    }

    fn would_cycle(&self, child: ThinkerId, parent: Parent) -> bool {
        self.reaches(parent, child, |node| node.next_parent)
            || self.reaches(parent, child, |node| node.parent)
    }

    /// Whether walking up from `start` with `step` meets `target`.
    fn reaches(
        &self,
        start: Parent,
        target: ThinkerId,
        step: impl Fn(&Node<W>) -> Option<Parent>,
    ) -> bool {
        let mut current = start;
        for _ in 0..=self.nodes.len() {
            let Parent::Thinker(id) = current else {
                return false;
            };
            if id == target {
                return true;
            }
            match self.nodes.get(id).and_then(&step) {
                Some(next) => current = next,
                None => return false,
            }
        }
        true
    }

    fn group(&self, owner: Parent) -> Option<&OrderedGroup<ThinkerId>> {
        match owner {
            Parent::Root => Some(&self.root),
            Parent::Thinker(id) => self.nodes.get(id).map(|node| &node.children),
        }
    }

    fn group_mut(&mut self, owner: Parent) -> Option<&mut OrderedGroup<ThinkerId>> {
        match owner {
            Parent::Root => Some(&mut self.root),
            Parent::Thinker(id) => self.nodes.get_mut(id).map(|node| &mut node.children),
        }
    }

    /// Fold the changes `owner`'s group has applied into node state, queuing
    /// the matching lifecycle hooks.
    fn absorb(&mut self, owner: Parent) {
        let Some(group) = self.group_mut(owner) else {
            return;
        };
        let changes = group.take_changes();
        for change in changes {
            match change {
                GroupChange::Added { member, .. } => self.mark_attached(member, owner),
                GroupChange::Removed { member, .. } => self.mark_detached(member, owner),
                GroupChange::Reprioritized { member, from, to } => {
                    log::trace!("thinker {member:?} moved from priority {from} to {to}");
                }
            }
        }
    }

    fn mark_attached(&mut self, id: ThinkerId, owner: Parent) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        match node.parent {
            Some(current) if current == owner => return,
            // Moved before the old group drained its removal.
            Some(stale) => self.hooks.push_back((id, Lifecycle::Detached(stale))),
            None => {}
        }
        node.parent = Some(owner);
        self.hooks.push_back((id, Lifecycle::Attached(owner)));
    }

    fn mark_detached(&mut self, id: ThinkerId, owner: Parent) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if node.parent == Some(owner) {
            node.parent = None;
            self.hooks.push_back((id, Lifecycle::Detached(owner)));
        }
    }

    fn settle(&mut self, owner: Parent) -> Result<(), SchedulerError> {
        self.absorb(owner);
        self.flush_hooks()
    }

    /// Run queued lifecycle hooks. Hooks for thinkers that are running are
    /// kept for a later flush.
    fn flush_hooks(&mut self) -> Result<(), SchedulerError> {
        let mut parked = Vec::new();
        let mut result = Ok(());
        while let Some((id, event)) = self.hooks.pop_front() {
            match self.nodes.get(id) {
                None => continue,
                Some(node) if node.is_running() => {
                    parked.push((id, event));
                    continue;
                }
                Some(_) => {}
            }
            let outcome = match event {
                Lifecycle::Attached(parent) => {
                    self.run_hook(id, |thinker, cx| thinker.on_attach(cx, parent))
                }
                Lifecycle::Detached(parent) => {
                    self.run_hook(id, |thinker, cx| thinker.on_detach(cx, parent))
                }
            };
            if let Err(err) = outcome {
                result = Err(err);
                break;
            }
        }
        for entry in parked.into_iter().rev() {
            self.hooks.push_front(entry);
        }
        result
    }

    // -----------------------------------------------------------------------
    // Per-thinker configuration
    // -----------------------------------------------------------------------

    pub fn priority(&self, id: ThinkerId) -> Option<i32> {
        Some(self.nodes.get(id)?.priority)
    }

    /// Change a thinker's action priority. While its group is being
    /// traversed the new order takes effect when the traversal ends.
    pub fn set_priority(&mut self, id: ThinkerId, priority: i32) -> Result<(), SchedulerError> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.priority, priority);
        let next_parent = node.next_parent;
        if old == priority {
            return Ok(());
        }
        if let Some(parent) = next_parent {
            if let Some(group) = self.group_mut(parent) {
                group.change_priority(&id, old, priority);
            }
            self.absorb(parent);
        }
        Ok(())
    }

    pub fn time_factor(&self, id: ThinkerId) -> Option<TimeFactor> {
        Some(self.nodes.get(id)?.time_factor)
    }

    pub fn set_time_factor(&mut self, id: ThinkerId, factor: TimeFactor) -> Result<(), SchedulerError> {
        if let TimeFactor::Fixed(value) = factor
            && value < ZERO
        {
            return Err(SchedulerError::NegativeTimeFactor(value));
        }
        self.node_mut(id)?.time_factor = factor;
        Ok(())
    }

    /// The time factor `id` runs at right now: its own, or the nearest
    /// attached ancestor's, or the root's. Zero for a detached thinker that
    /// inherits, or an unknown id.
    pub fn effective_time_factor(&self, id: ThinkerId) -> Fixed64 {
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            let Some(node) = self.nodes.get(current) else {
                return ZERO;
            };
            if let TimeFactor::Fixed(value) = node.time_factor {
                return value;
            }
            match node.parent {
                Some(Parent::Thinker(parent)) => current = parent,
                Some(Parent::Root) => return self.time_factor,
                None => return ZERO,
            }
        }
        ZERO
    }

    /// Fractional tick carried over to the next frame.
    pub fn remainder(&self, id: ThinkerId) -> Option<Fixed64> {
        Some(self.nodes.get(id)?.remainder)
    }

    /// Tick steps `id` has run since it was spawned.
    pub fn ticks_run(&self, id: ThinkerId) -> Option<u64> {
        Some(self.nodes.get(id)?.ticks_run)
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Start, restart, or cancel a timer.
    ///
    /// A timer set to `n` reports `n`, `n - 1`, ..., `1` on successive tick
    /// steps and fires on the step after it reports `1`; `0` fires on the
    /// next tick step. Negative `ticks` cancels. Restarting keeps the timer's
    /// place in the firing order.
    pub fn set_timer(
        &mut self,
        id: ThinkerId,
        handle: TimerHandle,
        ticks: i64,
    ) -> Result<(), SchedulerError> {
        let node = self.node_mut(id)?;
        let existing = node.timers.iter().position(|timer| timer.handle == handle);
        match (existing, u32::try_from(ticks)) {
            (Some(pos), Err(_)) if ticks < 0 => {
                node.timers.remove(pos);
            }
            (None, Err(_)) if ticks < 0 => {}
            (Some(pos), remaining) => node.timers[pos].remaining = remaining.unwrap_or(u32::MAX),
            (None, remaining) => node.timers.push(Timer {
                handle,
                remaining: remaining.unwrap_or(u32::MAX),
            }),
        }
        Ok(())
    }

    /// Ticks left on a timer, or `None` if it is not running.
    pub fn timer(&self, id: ThinkerId, handle: TimerHandle) -> Option<u32> {
        self.nodes
            .get(id)?
            .timers
            .iter()
            .find(|timer| timer.handle == handle)
            .map(|timer| timer.remaining)
    }

    // -----------------------------------------------------------------------
    // Frame cascade
    // -----------------------------------------------------------------------

    /// Run one frame: the tick pass, then the frame pass.
    ///
    /// An error from any hook aborts the rest of the frame and is returned.
    /// Traversals still end cleanly, so queued changes drain and the tree
    /// stays consistent.
    ///
    /// Called from inside a hook, the nested frame skips every thinker whose
    /// hook is running: they get no `on_tick` and no `on_frame` for it. Their
    /// time still accumulates, and the outer tick loop spends it, but their
    /// frame count falls behind [`frame`](Self::frame) by one per nesting.
    pub fn advance(&mut self) -> Result<(), SchedulerError> {
        self.frame += 1;
        log::trace!("frame {} begins", self.frame);
        self.walk(Parent::Root, Self::tick_thinker)?;
        self.walk(Parent::Root, Self::frame_thinker)
    }

    /// Run `frames` frames back to back.
    pub fn run_frames(&mut self, frames: u32) -> Result<(), SchedulerError> {
        for _ in 0..frames {
            self.advance()?;
        }
        Ok(())
    }

    /// Run however many frames `clock` says are due at `now`.
    pub fn catch_up(&mut self, clock: &mut FrameClock, now: Duration) -> Result<u32, SchedulerError> {
        let due = clock.frames_due(now);
        self.run_frames(due)?;
        Ok(due)
    }

    /// Visit every member of `owner`'s group in order, skipping members that
    /// have left or asked to leave it.
    fn walk(
        &mut self,
        owner: Parent,
        visit: fn(&mut Self, ThinkerId) -> Result<(), SchedulerError>,
    ) -> Result<(), SchedulerError> {
        let Some(group) = self.group_mut(owner) else {
            return Ok(());
        };
        let mut iter = group.iter();
        let mut result = Ok(());
        while let Some(group) = self.group_mut(owner) {
            if !iter.has_next(group) {
                break;
            }
            let child = match iter.next(group) {
                Ok(&child) => child,
                Err(err) => {
                    result = Err(err.into());
                    break;
                }
            };
            if self
                .nodes
                .get(child)
                .is_some_and(|node| node.parent == Some(owner) && node.next_parent == Some(owner))
                && let Err(err) = visit(self, child)
            {
                result = Err(err);
                break;
            }
        }
        if let Some(group) = self.group_mut(owner) {
            iter.stop(group);
        }
        let settled = self.settle(owner);
        result.and(settled)
    }

    fn tick_thinker(&mut self, id: ThinkerId) -> Result<(), SchedulerError> {
        let factor = self.effective_time_factor(id);
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(());
        };
        node.remainder = node.remainder.saturating_add(factor);
        // A running thinker's outer tick loop picks up what a nested pass
        // adds here.
        if !node.is_running() {
            // Stop as soon as the thinker asks to leave or move; what is left
            // of its remainder carries over.
            while let Some(node) = self.nodes.get_mut(id)
                && node.next_parent == node.parent
                && node.remainder >= UNIT
            {
                node.remainder -= UNIT;
                node.ticks_run += 1;
                self.tick_step(id)?;
            }
        }
        if !self.nodes.get(id).is_some_and(|node| node.next_parent == node.parent) {
            return Ok(());
        }
        self.walk(Parent::Thinker(id), Self::tick_thinker)
    }

    fn tick_step(&mut self, id: ThinkerId) -> Result<(), SchedulerError> {
        let mut expired = Vec::new();
        if let Some(node) = self.nodes.get_mut(id) {
            node.timers.retain_mut(|timer| {
                if timer.remaining <= 1 {
                    expired.push(timer.handle);
                    false
                } else {
                    timer.remaining -= 1;
                    true
                }
            });
        }
        for handle in expired {
            self.run_hook(id, |thinker, cx| thinker.on_timer(cx, handle))?;
        }
        self.run_hook(id, |thinker, cx| thinker.on_tick(cx))
    }

    fn frame_thinker(&mut self, id: ThinkerId) -> Result<(), SchedulerError> {
        self.run_hook(id, |thinker, cx| thinker.on_frame(cx))?;
        self.walk(Parent::Thinker(id), Self::frame_thinker)
    }

    /// Check the behavior out, run `hook`, and put it back. Skipped when the
    /// behavior is already checked out.
    fn run_hook<F>(&mut self, id: ThinkerId, hook: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut dyn Thinker<W>, &mut ThinkContext<'_, W>) -> Result<(), SchedulerError>,
    {
        let Some(mut behavior) = self.nodes.get_mut(id).and_then(|node| node.behavior.take()) else {
            return Ok(());
        };
        let result = hook(&mut *behavior, &mut ThinkContext::new(self, id));
        if let Some(node) = self.nodes.get_mut(id) {
            node.behavior = Some(behavior);
        }
        let flushed = self.flush_hooks();
        result.and(flushed)
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    /// Hash of the frame counter and every attached thinker's scheduling
    /// state, in execution order. Identical setups driven identically hash
    /// equal.
    pub fn state_hash(&self) -> u64 {
        let mut hash = StateHash::new();
        hash.write_u64(self.frame);
        hash.write_fixed64(self.time_factor);
        self.hash_group(Parent::Root, &mut hash);
        hash.finish()
    }

    fn hash_group(&self, owner: Parent, hash: &mut StateHash) {
        let Some(group) = self.group(owner) else {
            return;
        };
        for (key, &id) in group.entries() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.parent != Some(owner) {
                continue;
            }
            hash.write_i32(key.priority());
            hash.write_fixed64(node.remainder);
            hash.write_u64(node.ticks_run);
            for timer in &node.timers {
                hash.write_timer(timer.handle, timer.remaining);
            }
            self.hash_group(Parent::Thinker(id), hash);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{from_f64, from_ticks};
    use crate::test_utils::*;

    #[test]
    fn double_time_factor_runs_two_ticks_per_frame() {
        let mut s = Scheduler::new(Journal::default());
        let id = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_time_factor(id, TimeFactor::Fixed(from_ticks(2))).unwrap();
        s.run_frames(30).unwrap();
        assert_eq!(s.ticks_run(id), Some(60));
        assert_eq!(s.world().count("a", Hook::Tick), 60);
        assert_eq!(s.world().count("a", Hook::Frame), 30);
    }

    #[test]
    fn fractional_time_factor_carries_remainder() {
        let mut s = Scheduler::new(Journal::default());
        let id = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_time_factor(id, TimeFactor::Fixed(from_f64(0.5))).unwrap();
        s.advance().unwrap();
        assert_eq!(s.ticks_run(id), Some(0));
        assert_eq!(s.remainder(id), Some(from_f64(0.5)));
        s.advance().unwrap();
        assert_eq!(s.ticks_run(id), Some(1));
        assert_eq!(s.remainder(id), Some(ZERO));
    }

    #[test]
    fn zero_time_factor_still_gets_frames() {
        let mut s = Scheduler::new(Journal::default());
        let id = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_time_factor(id, TimeFactor::Fixed(ZERO)).unwrap();
        s.run_frames(4).unwrap();
        assert_eq!(s.world().count("a", Hook::Tick), 0);
        assert_eq!(s.world().count("a", Hook::Frame), 4);
    }

    #[test]
    fn inherit_walks_to_nearest_concrete_ancestor() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        let b = spawn_probe(&mut s, "b", a, 0);
        let c = spawn_probe(&mut s, "c", b, 0);
        assert_eq!(s.effective_time_factor(c), UNIT);

        s.set_time_factor(a, TimeFactor::Fixed(from_ticks(3))).unwrap();
        assert_eq!(s.effective_time_factor(c), from_ticks(3));

        s.set_time_factor(b, TimeFactor::Fixed(from_f64(0.25))).unwrap();
        assert_eq!(s.effective_time_factor(c), from_f64(0.25));

        s.set_root_time_factor(from_ticks(2)).unwrap();
        s.set_time_factor(a, TimeFactor::Inherit).unwrap();
        s.set_time_factor(b, TimeFactor::Inherit).unwrap();
        assert_eq!(s.effective_time_factor(c), from_ticks(2));
    }

    #[test]
    fn detached_inheritor_has_zero_time_factor() {
        let mut s = Scheduler::new(Journal::default());
        let a = s.spawn(probe("a"));
        assert_eq!(s.effective_time_factor(a), ZERO);
        s.set_time_factor(a, TimeFactor::Fixed(UNIT)).unwrap();
        assert_eq!(s.effective_time_factor(a), UNIT);
    }

    #[test]
    fn negative_time_factor_is_rejected() {
        let mut s = Scheduler::new(Journal::default());
        let a = s.spawn(probe("a"));
        let err = s.set_time_factor(a, TimeFactor::Fixed(from_f64(-1.0))).unwrap_err();
        assert!(matches!(err, SchedulerError::NegativeTimeFactor(_)));
        assert_eq!(s.time_factor(a), Some(TimeFactor::Inherit));
        assert!(s.set_root_time_factor(from_f64(-0.5)).is_err());
    }

    #[test]
    fn siblings_run_by_priority_then_attachment_order() {
        let mut s = Scheduler::new(Journal::default());
        spawn_probe(&mut s, "low", Parent::Root, -1);
        spawn_probe(&mut s, "first", Parent::Root, 5);
        spawn_probe(&mut s, "mid", Parent::Root, 0);
        spawn_probe(&mut s, "second", Parent::Root, 5);
        s.advance().unwrap();
        assert_eq!(s.world().names(Hook::Tick), vec!["first", "second", "mid", "low"]);
        assert_eq!(s.world().names(Hook::Frame), vec!["first", "second", "mid", "low"]);
    }

    #[test]
    fn children_tick_before_any_frame_hook() {
        let mut s = Scheduler::new(Journal::default());
        let parent = spawn_probe(&mut s, "parent", Parent::Root, 0);
        spawn_probe(&mut s, "child", parent, 0);
        s.world_mut().clear();
        s.advance().unwrap();
        assert_eq!(
            s.world().entries,
            vec![
                ("parent", Hook::Tick),
                ("child", Hook::Tick),
                ("parent", Hook::Frame),
                ("child", Hook::Frame),
            ]
        );
    }

    #[test]
    fn attach_and_detach_fire_hooks() {
        let mut s = Scheduler::new(Journal::default());
        let a = s.spawn(probe("a"));
        assert!(s.attach(a, Parent::Root, 0).unwrap());
        assert!(!s.attach(a, Parent::Root, 3).unwrap());
        assert_eq!(s.priority(a), Some(0));
        assert!(s.detach(a).unwrap());
        assert!(!s.detach(a).unwrap());
        assert_eq!(
            s.world().entries,
            vec![("a", Hook::Attach(Parent::Root)), ("a", Hook::Detach(Parent::Root))]
        );
    }

    #[test]
    fn cycle_is_rejected_and_tree_unchanged() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        let b = spawn_probe(&mut s, "b", a, 0);
        let c = spawn_probe(&mut s, "c", b, 0);
        let before = s.state_hash();

        assert!(matches!(s.attach(a, c, 0), Err(SchedulerError::Cycle { .. })));
        assert!(matches!(s.attach(a, a, 0), Err(SchedulerError::Cycle { .. })));
        assert_eq!(s.parent(a), Some(Parent::Root));
        assert_eq!(s.children(Parent::Root), vec![a]);
        assert_eq!(s.children(a), vec![b]);
        assert_eq!(s.state_hash(), before);
    }

    #[test]
    fn moving_between_parents_keeps_one_membership() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        let b = spawn_probe(&mut s, "b", Parent::Root, 0);
        let c = spawn_probe(&mut s, "c", a, 0);
        s.world_mut().clear();

        assert!(s.attach(c, b, 2).unwrap());
        assert_eq!(s.parent(c), Some(Parent::Thinker(b)));
        assert!(s.children(a).is_empty());
        assert_eq!(s.children(b), vec![c]);
        assert_eq!(
            s.world().entries,
            vec![
                ("c", Hook::Detach(Parent::Thinker(a))),
                ("c", Hook::Attach(Parent::Thinker(b))),
            ]
        );
    }

    #[test]
    fn timers_count_down_and_fire_once() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        let h = TimerHandle(7);
        s.set_timer(a, h, 3).unwrap();
        assert_eq!(s.timer(a, h), Some(3));
        s.advance().unwrap();
        assert_eq!(s.timer(a, h), Some(2));
        s.advance().unwrap();
        assert_eq!(s.timer(a, h), Some(1));
        assert_eq!(s.world().count("a", Hook::Timer(h)), 0);
        s.advance().unwrap();
        assert_eq!(s.timer(a, h), None);
        assert_eq!(s.world().count("a", Hook::Timer(h)), 1);
        s.run_frames(5).unwrap();
        assert_eq!(s.world().count("a", Hook::Timer(h)), 1);
    }

    #[test]
    fn timer_fires_before_tick_hook() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_timer(a, TimerHandle(1), 0).unwrap();
        s.world_mut().clear();
        s.advance().unwrap();
        assert_eq!(
            s.world().entries[..2],
            [("a", Hook::Timer(TimerHandle(1))), ("a", Hook::Tick)]
        );
    }

    #[test]
    fn timers_fire_in_registration_order() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_timer(a, TimerHandle(9), 2).unwrap();
        s.set_timer(a, TimerHandle(1), 2).unwrap();
        s.set_timer(a, TimerHandle(5), 2).unwrap();
        // Restarting keeps the original slot.
        s.set_timer(a, TimerHandle(9), 2).unwrap();
        s.run_frames(2).unwrap();
        let fired: Vec<Hook> = s
            .world()
            .entries
            .iter()
            .filter(|(_, hook)| matches!(hook, Hook::Timer(_)))
            .map(|(_, hook)| *hook)
            .collect();
        assert_eq!(
            fired,
            vec![
                Hook::Timer(TimerHandle(9)),
                Hook::Timer(TimerHandle(1)),
                Hook::Timer(TimerHandle(5)),
            ]
        );
    }

    #[test]
    fn negative_ticks_cancel_timer() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_timer(a, TimerHandle(1), 1).unwrap();
        s.set_timer(a, TimerHandle(1), -1).unwrap();
        assert_eq!(s.timer(a, TimerHandle(1)), None);
        s.set_timer(a, TimerHandle(2), -5).unwrap();
        s.run_frames(3).unwrap();
        assert_eq!(s.world().count("a", Hook::Timer(TimerHandle(1))), 0);
    }

    #[test]
    fn timers_only_advance_on_ticks() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.set_time_factor(a, TimeFactor::Fixed(ZERO)).unwrap();
        s.set_timer(a, TimerHandle(1), 1).unwrap();
        s.run_frames(10).unwrap();
        assert_eq!(s.timer(a, TimerHandle(1)), Some(1));
    }

    #[test]
    fn despawn_requires_detached() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        assert!(matches!(s.despawn(a), Err(SchedulerError::StillAttached(_))));
        s.detach(a).unwrap();
        let behavior = s.despawn(a).unwrap();
        let any: &dyn Any = &*behavior;
        assert_eq!(any.downcast_ref::<Probe>().map(|p| p.name), Some("a"));
        assert!(!s.contains(a));
        assert!(matches!(s.despawn(a), Err(SchedulerError::ThinkerNotFound(_))));
    }

    #[test]
    fn despawn_detaches_children() {
        let mut s = Scheduler::new(Journal::default());
        let a = s.spawn(probe("a"));
        let b = spawn_probe(&mut s, "b", a, 0);
        s.despawn(a).unwrap();
        assert_eq!(s.parent(b), None);
        assert_eq!(s.world().count("b", Hook::Detach(Parent::Thinker(a))), 1);
        s.attach(b, Parent::Root, 0).unwrap();
        s.advance().unwrap();
        assert_eq!(s.ticks_run(b), Some(1));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut s = Scheduler::new(Journal::default());
        let a = s.spawn(probe("a"));
        s.despawn(a).unwrap();
        assert!(matches!(s.attach(a, Parent::Root, 0), Err(SchedulerError::ThinkerNotFound(_))));
        assert!(matches!(s.set_priority(a, 1), Err(SchedulerError::ThinkerNotFound(_))));
        assert!(s.set_timer(a, TimerHandle(0), 1).is_err());
        let b = s.spawn(probe("b"));
        assert!(matches!(s.attach(b, a, 0), Err(SchedulerError::ThinkerNotFound(_))));
        assert_eq!(s.effective_time_factor(a), ZERO);
    }

    #[test]
    fn set_priority_reorders_siblings() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        spawn_probe(&mut s, "b", Parent::Root, 1);
        s.set_priority(a, 2).unwrap();
        s.world_mut().clear();
        s.advance().unwrap();
        assert_eq!(s.world().names(Hook::Tick), vec!["a", "b"]);
    }

    #[test]
    fn config_sets_root_time_factor() {
        let config = SchedulerConfig::from_ron("(time_factor: 2.0)").unwrap();
        let mut s = Scheduler::with_config(Journal::default(), config).unwrap();
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        s.advance().unwrap();
        assert_eq!(s.ticks_run(a), Some(2));
    }

    #[test]
    fn catch_up_runs_due_frames() {
        let mut s = Scheduler::new(Journal::default());
        let a = spawn_probe(&mut s, "a", Parent::Root, 0);
        let mut clock = s.clock().unwrap();
        assert_eq!(s.catch_up(&mut clock, Duration::ZERO).unwrap(), 0);
        assert_eq!(s.catch_up(&mut clock, Duration::from_millis(51)).unwrap(), 3);
        assert_eq!(s.frame(), 3);
        assert_eq!(s.ticks_run(a), Some(3));
    }

    #[test]
    fn thinker_downcast() {
        let mut s = Scheduler::new(Journal::default());
        let a = s.spawn(probe("a"));
        assert_eq!(s.thinker::<Probe>(a).map(|p| p.name), Some("a"));
        s.thinker_mut::<Probe>(a).unwrap().name = "renamed";
        assert_eq!(s.thinker::<Probe>(a).map(|p| p.name), Some("renamed"));
    }
}
