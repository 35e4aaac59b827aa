//! Thinkers: the units of scheduled behavior.
//!
//! A thinker hooks into the scheduler's frame cascade via the [`Thinker`]
//! trait, receiving a [`ThinkContext`] that gives mutable access to the
//! world state and to the scheduler itself. Every hook defaults to a no-op,
//! so thinkers only override what they care about.
//!
//! A thinker's hooks are never re-entered: while one of its hooks runs, its
//! behavior is checked out of the scheduler, and any nested pass (for
//! example a hook that calls [`ThinkContext::advance`]) skips it.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::fixed::{Fixed64, Ticks};
use crate::id::{Parent, ThinkerId, TimerHandle};
use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Time factor
// ---------------------------------------------------------------------------

/// How many ticks a thinker experiences per frame, on average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeFactor {
    /// Use the nearest ancestor's concrete factor, or the root's.
    #[default]
    Inherit,
    /// A non-negative number of ticks per frame.
    Fixed(Fixed64),
}

// ---------------------------------------------------------------------------
// Thinker trait
// ---------------------------------------------------------------------------

/// Behavior attached to a node of the scheduling tree.
///
/// Errors returned from a hook propagate out of [`Scheduler::advance`],
/// aborting the rest of that frame's cascade.
pub trait Thinker<W>: Any {
    /// Called once per whole tick this thinker accumulates, after any timers
    /// that expired on the same tick have fired.
    fn on_tick(&mut self, cx: &mut ThinkContext<'_, W>) -> Result<(), SchedulerError> {
        let _ = cx;
        Ok(())
    }

    /// Called exactly once per frame, after every tick of the frame.
    fn on_frame(&mut self, cx: &mut ThinkContext<'_, W>) -> Result<(), SchedulerError> {
        let _ = cx;
        Ok(())
    }

    /// Called when a timer set with [`ThinkContext::set_timer`] expires.
    fn on_timer(
        &mut self,
        cx: &mut ThinkContext<'_, W>,
        handle: TimerHandle,
    ) -> Result<(), SchedulerError> {
        let _ = (cx, handle);
        Ok(())
    }

    /// Called once the thinker has actually joined `parent`'s group.
    fn on_attach(&mut self, cx: &mut ThinkContext<'_, W>, parent: Parent) -> Result<(), SchedulerError> {
        let _ = (cx, parent);
        Ok(())
    }

    /// Called once the thinker has actually left `parent`'s group.
    fn on_detach(&mut self, cx: &mut ThinkContext<'_, W>, parent: Parent) -> Result<(), SchedulerError> {
        let _ = (cx, parent);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ThinkContext
// ---------------------------------------------------------------------------

/// Mutable context passed to thinker hooks.
///
/// Provides access to the world, the scheduler, and shortcuts for operating
/// on the running thinker.
pub struct ThinkContext<'a, W> {
    scheduler: &'a mut Scheduler<W>,
    id: ThinkerId,
}

impl<'a, W: 'static> ThinkContext<'a, W> {
    pub(crate) fn new(scheduler: &'a mut Scheduler<W>, id: ThinkerId) -> Self {
        Self { scheduler, id }
    }

    /// The thinker whose hook is running.
    pub fn id(&self) -> ThinkerId {
        self.id
    }

    pub fn world(&self) -> &W {
        self.scheduler.world()
    }

    pub fn world_mut(&mut self) -> &mut W {
        self.scheduler.world_mut()
    }

    pub fn scheduler(&self) -> &Scheduler<W> {
        &*self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<W> {
        &mut *self.scheduler
    }

    /// Frames completed or in progress on the scheduler.
    pub fn frame(&self) -> Ticks {
        self.scheduler.frame()
    }

    pub fn set_timer(&mut self, handle: TimerHandle, ticks: i64) -> Result<(), SchedulerError> {
        self.scheduler.set_timer(self.id, handle, ticks)
    }

    pub fn timer(&self, handle: TimerHandle) -> Option<u32> {
        self.scheduler.timer(self.id, handle)
    }

    pub fn set_priority(&mut self, priority: i32) -> Result<(), SchedulerError> {
        self.scheduler.set_priority(self.id, priority)
    }

    pub fn set_time_factor(&mut self, factor: TimeFactor) -> Result<(), SchedulerError> {
        self.scheduler.set_time_factor(self.id, factor)
    }

    pub fn effective_time_factor(&self) -> Fixed64 {
        self.scheduler.effective_time_factor(self.id)
    }

    /// Spawn a detached thinker.
    pub fn spawn(&mut self, thinker: impl Thinker<W>) -> ThinkerId {
        self.scheduler.spawn(thinker)
    }

    /// Attach `child` beneath the running thinker.
    pub fn attach_child(&mut self, child: ThinkerId, priority: i32) -> Result<bool, SchedulerError> {
        self.scheduler.attach(child, self.id, priority)
    }

    /// Detach the running thinker from its parent.
    pub fn detach_self(&mut self) -> Result<bool, SchedulerError> {
        self.scheduler.detach(self.id)
    }

    /// Run a whole frame on the scheduler from inside a hook.
    pub fn advance(&mut self) -> Result<(), SchedulerError> {
        self.scheduler.advance()
    }
}
