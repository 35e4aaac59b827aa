use crate::fixed::Fixed64;
use crate::id::{Parent, ThinkerId};

/// Errors raised by an [`OrderedGroup`](crate::group::OrderedGroup)
/// traversal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("no more elements: the traversal is exhausted or stopped")]
    IteratorExhausted,
}

/// Errors raised by the scheduler, its configuration, and thinker or event
/// actions.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("thinker not found: {0:?}")]
    ThinkerNotFound(ThinkerId),

    #[error("time factor must be non-negative, got {0}")]
    NegativeTimeFactor(Fixed64),

    #[error("frame rate must be positive and finite, got {0}")]
    NonPositiveFrameRate(f64),

    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    Cycle { child: ThinkerId, parent: Parent },

    /// The thinker still has a parent, or an attachment is pending.
    #[error("thinker {0:?} is still attached")]
    StillAttached(ThinkerId),

    /// The thinker's hooks are executing, or its children are being
    /// traversed.
    #[error("thinker {0:?} is running")]
    Busy(ThinkerId),

    #[error(transparent)]
    Group(#[from] GroupError),

    /// An error returned by user code from a thinker hook or an event.
    #[error("action failed: {0}")]
    Action(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("config parse error: {0}")]
    Config(#[from] ron::error::SpannedError),
}

impl SchedulerError {
    /// Wrap an error raised by user code.
    pub fn action(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        SchedulerError::Action(err.into())
    }
}
