//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::error::SchedulerError;
use crate::fixed::Fixed64;
use crate::id::{Parent, ThinkerId, TimerHandle};
use crate::scheduler::Scheduler;
use crate::thinker::{ThinkContext, Thinker};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Journal
// ===========================================================================

/// A hook invocation recorded by [`Probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Tick,
    Frame,
    Timer(TimerHandle),
    Attach(Parent),
    Detach(Parent),
}

/// World type for tests: an ordered log of every hook that ran.
#[derive(Debug, Default)]
pub struct Journal {
    pub entries: Vec<(&'static str, Hook)>,
}

impl Journal {
    pub fn record(&mut self, name: &'static str, hook: Hook) {
        self.entries.push((name, hook));
    }

    /// Names of the thinkers that ran `hook`, in order.
    pub fn names(&self, hook: Hook) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|(_, h)| *h == hook)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn count(&self, name: &'static str, hook: Hook) -> usize {
        self.entries
            .iter()
            .filter(|(n, h)| *n == name && *h == hook)
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ===========================================================================
// Thinkers
// ===========================================================================

/// Records every hook into the [`Journal`] under its name.
#[derive(Debug, Clone)]
pub struct Probe {
    pub name: &'static str,
}

pub fn probe(name: &'static str) -> Probe {
    Probe { name }
}

impl Thinker<Journal> for Probe {
    fn on_tick(&mut self, cx: &mut ThinkContext<'_, Journal>) -> Result<(), SchedulerError> {
        cx.world_mut().record(self.name, Hook::Tick);
        Ok(())
    }

    fn on_frame(&mut self, cx: &mut ThinkContext<'_, Journal>) -> Result<(), SchedulerError> {
        cx.world_mut().record(self.name, Hook::Frame);
        Ok(())
    }

    fn on_timer(
        &mut self,
        cx: &mut ThinkContext<'_, Journal>,
        handle: TimerHandle,
    ) -> Result<(), SchedulerError> {
        cx.world_mut().record(self.name, Hook::Timer(handle));
        Ok(())
    }

    fn on_attach(&mut self, cx: &mut ThinkContext<'_, Journal>, parent: Parent) -> Result<(), SchedulerError> {
        cx.world_mut().record(self.name, Hook::Attach(parent));
        Ok(())
    }

    fn on_detach(&mut self, cx: &mut ThinkContext<'_, Journal>, parent: Parent) -> Result<(), SchedulerError> {
        cx.world_mut().record(self.name, Hook::Detach(parent));
        Ok(())
    }
}

/// Fails every tick after recording it.
#[derive(Debug, Clone)]
pub struct Faulty {
    pub name: &'static str,
}

impl Thinker<Journal> for Faulty {
    fn on_tick(&mut self, cx: &mut ThinkContext<'_, Journal>) -> Result<(), SchedulerError> {
        cx.world_mut().record(self.name, Hook::Tick);
        Err(SchedulerError::action(format!("{} failed", self.name)))
    }
}

// ===========================================================================
// Tree builders
// ===========================================================================

/// Spawn a [`Probe`] and attach it beneath `parent`.
pub fn spawn_probe(
    scheduler: &mut Scheduler<Journal>,
    name: &'static str,
    parent: impl Into<Parent>,
    priority: i32,
) -> ThinkerId {
    let id = scheduler.spawn(probe(name));
    scheduler
        .attach(id, parent, priority)
        .expect("probe attach should succeed");
    id
}

/// A root with `width` probes, each with `depth` generations of a single
/// child beneath it. Returns the top-level ids.
pub fn build_forest(scheduler: &mut Scheduler<Journal>, width: usize, depth: usize) -> Vec<ThinkerId> {
    let mut tops = Vec::with_capacity(width);
    for i in 0..width {
        let top = spawn_probe(scheduler, "top", Parent::Root, (i % 4) as i32);
        let mut parent = top;
        for _ in 0..depth {
            parent = spawn_probe(scheduler, "child", parent, 0);
        }
        tops.push(top);
    }
    tops
}
