//! Cadence Core -- deterministic time-stepping and priority scheduling.
//!
//! This crate decides how simulated time advances, in what order a
//! changing population of actors ("thinkers") runs its per-tick and
//! per-frame behavior, and how those actors can add, remove, reprioritize,
//! or iterate over each other mid-update without corrupting state.
//!
//! # Frame Cascade
//!
//! Each call to [`scheduler::Scheduler::advance`] runs one frame:
//!
//! 1. **Tick pass** -- Every attached thinker adds its effective time factor
//!    to its remainder and runs one tick step (timers, then `on_tick`) per
//!    whole unit accumulated. Children follow their parent.
//! 2. **Frame pass** -- Every attached thinker's `on_frame` runs once,
//!    parents before children.
//!
//! Siblings always run highest priority first, ties broken by attachment
//! order.
//!
//! # Deferred Mutation Pattern
//!
//! Changes to a group that is being traversed are queued and applied when
//! its last traversal stops, never mid-walk:
//!
//! ```rust
//! use cadence_core::group::{OrderedGroup, Update};
//!
//! let mut group = OrderedGroup::new();
//! group.add("a", 0);
//! let mut iter = group.iter();
//! assert_eq!(group.add("b", 1), Update::Queued);
//! assert_eq!(group.len(), 1);
//! iter.stop(&mut group);
//! assert_eq!(group.len(), 2);
//! ```
//!
//! # Key Types
//!
//! - [`scheduler::Scheduler`] -- Thinker arena, root group, and cascade.
//! - [`thinker::Thinker`] -- Hook trait implemented by scheduled behavior.
//! - [`group::OrderedGroup`] -- Priority-ordered multiset with deferred
//!   mutation and [`group::SafeIter`] traversals.
//! - [`event::EventGroup`] -- Priority-ordered list of shared events.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic time.
//! - [`clock::FrameClock`] -- Turns elapsed wall time into frames due.
//! - [`config::SchedulerConfig`] -- RON-loadable scheduler settings.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod fixed;
pub mod group;
pub mod hash;
pub mod id;
pub mod scheduler;
pub mod thinker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
