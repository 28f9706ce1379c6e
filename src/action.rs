use crate::model::Model;
use crate::prelude::{AgentId, EntityId, Result, StateId};
use crate::queue::NO_ONE;
use crate::tool::Tool;
use crate::virus::Virus;
use std::sync::Arc;

/// A user-supplied finalizer stored in the model's hook table and
/// referenced from actions by index.
pub type ActionHookFn = Arc<dyn Fn(AgentId, &mut Model) -> Result<()> + Send + Sync>;

/// The structural part of an action's finalizer: the one place where an
/// agent's virus/tool/entity collections are touched. Removals carry the
/// index into the owning collection.
#[derive(Debug, Clone)]
pub enum ActionOp {
    None,
    AddVirus(Virus),
    RmVirus(usize),
    AddTool(Tool),
    RmTool(usize),
    AddEntity(EntityId),
    RmEntity(usize),
}

impl Default for ActionOp {
    fn default() -> Self {
        ActionOp::None
    }
}

/// A deferred mutation of one agent: an optional collection edit, an
/// optional state transition, a queue delta and an optional hook. Nothing
/// here is applied until the buffer flushes.
#[derive(Debug, Clone)]
pub struct Action {
    pub(crate) agent: AgentId,
    pub(crate) op: ActionOp,
    pub(crate) new_state: Option<StateId>,
    pub(crate) queue: i8,
    pub(crate) hook: Option<usize>,
}

impl Default for Action {
    fn default() -> Self {
        Action {
            agent: 0,
            op: ActionOp::None,
            new_state: None,
            queue: NO_ONE,
            hook: None,
        }
    }
}

/// The action arena. Capacity grows monotonically and slots below the
/// watermark are reused across phases, so the hot loop stops allocating
/// once the buffer has seen its high-water mark.
#[derive(Debug, Clone, Default)]
pub struct ActionBuffer {
    actions: Vec<Action>,
    pending: usize,
}

impl ActionBuffer {
    pub fn push(&mut self, action: Action) {
        self.pending += 1;
        if self.pending > self.actions.len() {
            self.actions.push(action);
        } else {
            self.actions[self.pending - 1] = action;
        }
    }

    /// Newest-first: flushing pops from the watermark down.
    pub fn pop(&mut self) -> Option<Action> {
        if self.pending == 0 {
            return None;
        }
        self.pending -= 1;
        Some(std::mem::take(&mut self.actions[self.pending]))
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    pub fn capacity(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_action(agent: AgentId, new_state: StateId) -> Action {
        Action {
            agent,
            new_state: Some(new_state),
            ..Action::default()
        }
    }

    #[test]
    fn pops_lifo() {
        let mut buf = ActionBuffer::default();
        buf.push(state_action(0, 1));
        buf.push(state_action(1, 2));
        assert_eq!(buf.pop().unwrap().agent, 1);
        assert_eq!(buf.pop().unwrap().agent, 0);
        assert!(buf.pop().is_none());
    }

    #[test]
    fn capacity_is_reused() {
        let mut buf = ActionBuffer::default();
        for i in 0..8 {
            buf.push(state_action(i, 0));
        }
        while buf.pop().is_some() {}
        assert_eq!(buf.capacity(), 8);
        for i in 0..5 {
            buf.push(state_action(i, 0));
        }
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.pending(), 5);
    }

    #[test]
    fn push_during_drain_is_seen() {
        let mut buf = ActionBuffer::default();
        buf.push(state_action(0, 1));
        let first = buf.pop().unwrap();
        assert_eq!(first.agent, 0);
        buf.push(state_action(7, 1));
        assert_eq!(buf.pop().unwrap().agent, 7);
    }
}
