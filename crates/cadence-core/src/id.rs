use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a thinker in the scheduler's arena.
    pub struct ThinkerId;
}

/// Identifies a timer on a thinker. Chosen by the thinker's author; cheap to
/// copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerHandle(pub u32);

/// Where a thinker is attached: directly under the scheduler's root, or
/// beneath another thinker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parent {
    Root,
    Thinker(ThinkerId),
}

impl Parent {
    /// The parent thinker, or `None` for the root.
    pub fn thinker(self) -> Option<ThinkerId> {
        match self {
            Parent::Root => None,
            Parent::Thinker(id) => Some(id),
        }
    }
}

impl From<ThinkerId> for Parent {
    fn from(id: ThinkerId) -> Self {
        Parent::Thinker(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn timer_handles_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(TimerHandle(0), "blink");
        map.insert(TimerHandle(1), "respawn");
        assert_eq!(map[&TimerHandle(1)], "respawn");
    }

    #[test]
    fn parent_from_thinker_id() {
        let mut sm = SlotMap::<ThinkerId, ()>::with_key();
        let id = sm.insert(());
        assert_eq!(Parent::from(id), Parent::Thinker(id));
        assert_eq!(Parent::from(id).thinker(), Some(id));
        assert_eq!(Parent::Root.thinker(), None);
    }
}
