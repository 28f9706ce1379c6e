use crate::prelude::{AgentId, EntityId};
use getset::{CopyGetters, Getters};

/// A grouping of agents (a workplace, a school, ...). Membership is a
/// plain id list on both sides; agents may belong to several entities.
#[derive(Debug, Clone, Default, PartialEq, Getters, CopyGetters)]
pub struct Entity {
    #[getset(get_copy = "pub")]
    id: EntityId,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    agents: Vec<AgentId>,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Entity {
            id,
            name: name.into(),
            agents: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.agents.len()
    }

    pub(crate) fn add_agent(&mut self, agent: AgentId) {
        self.agents.push(agent);
    }

    pub(crate) fn rm_agent(&mut self, agent: AgentId) {
        self.agents.retain(|&a| a != agent);
    }
}
