//! Priority-ordered event lists.
//!
//! An [`EventGroup`] holds shared event handles and performs them in
//! priority order against a caller-supplied context. Events may add or
//! remove entries, themselves included, while the group is performing;
//! those changes take effect once the traversal ends.

use std::fmt;
use std::rc::Rc;

use crate::error::SchedulerError;
use crate::group::{OrderedGroup, Update};

/// Something an [`EventGroup`] can perform.
pub trait Event<C> {
    fn perform(&self, events: &mut EventGroup<C>, cx: &mut C) -> Result<(), SchedulerError>;
}

/// Adapts a closure into an [`Event`].
pub struct FnEvent<F>(pub F);

impl<C, F> Event<C> for FnEvent<F>
where
    F: Fn(&mut EventGroup<C>, &mut C) -> Result<(), SchedulerError>,
{
    fn perform(&self, events: &mut EventGroup<C>, cx: &mut C) -> Result<(), SchedulerError> {
        (self.0)(events, cx)
    }
}

/// A shared handle to an event. Handles compare equal when they point at
/// the same event.
pub struct EventHandle<C>(Rc<dyn Event<C>>);

impl<C: 'static> EventHandle<C> {
    pub fn new(event: impl Event<C> + 'static) -> Self {
        Self(Rc::new(event))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut EventGroup<C>, &mut C) -> Result<(), SchedulerError> + 'static,
    {
        Self::new(FnEvent(f))
    }

    pub fn perform(&self, events: &mut EventGroup<C>, cx: &mut C) -> Result<(), SchedulerError> {
        self.0.perform(events, cx)
    }
}

impl<C> Clone for EventHandle<C> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<C> PartialEq for EventHandle<C> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl<C> Eq for EventHandle<C> {}

impl<C> fmt::Debug for EventHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandle")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// A priority-ordered multiset of events.
pub struct EventGroup<C> {
    events: OrderedGroup<EventHandle<C>>,
}

impl<C> Default for EventGroup<C> {
    fn default() -> Self {
        Self {
            events: OrderedGroup::new(),
        }
    }
}

impl<C> fmt::Debug for EventGroup<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventGroup")
            .field("len", &self.events.len())
            .field("pending", &self.events.pending_len())
            .field("iterating", &self.events.iterating())
            .finish()
    }
}

impl<C: 'static> EventGroup<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iterating(&self) -> bool {
        self.events.iterating()
    }

    pub fn contains(&self, event: &EventHandle<C>) -> bool {
        self.events.contains(event)
    }

    /// Add `event` at `priority`; deferred while performing.
    pub fn add(&mut self, event: EventHandle<C>, priority: i32) -> Update {
        self.events.add(event, priority)
    }

    /// Remove one entry of `event` at `priority`; deferred while performing.
    pub fn remove(&mut self, event: &EventHandle<C>, priority: i32) -> bool {
        self.events.remove(event, priority)
    }

    /// Perform every event, highest priority first.
    ///
    /// The first error stops the traversal and is returned; queued changes
    /// still drain.
    pub fn perform(&mut self, cx: &mut C) -> Result<(), SchedulerError> {
        let mut iter = self.events.iter();
        let mut result = Ok(());
        while iter.has_next(&mut self.events) {
            let event = match iter.next(&mut self.events) {
                Ok(event) => event.clone(),
                Err(err) => {
                    result = Err(err.into());
                    break;
                }
            };
            if let Err(err) = event.perform(self, cx) {
                result = Err(err);
                break;
            }
        }
        let drained = iter.stop(&mut self.events);
        if drained > 0 {
            log::trace!("event group settled {drained} change(s)");
        }
        result
    }
}
