use crate::prelude::{AgentId, Day, EntityId, StateId, VirusId};
use crate::tool::Tool;
use crate::virus::Virus;
use getset::{CopyGetters, Getters};

/// A modeled individual. The id always equals the agent's index in the
/// model's population vector; neighbors and entities are stored as ids,
/// while virus and tool instances are owned outright.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Agent {
    #[getset(get_copy = "pub")]
    id: AgentId,
    #[getset(get_copy = "pub")]
    state: StateId,
    #[getset(get_copy = "pub")]
    state_prev: StateId,
    /// Day of the last state change, `-1` before the first one.
    #[getset(get_copy = "pub")]
    state_changed: Day,

    #[getset(get = "pub")]
    viruses: Vec<Virus>,
    #[getset(get = "pub")]
    tools: Vec<Tool>,
    #[getset(get = "pub")]
    neighbors: Vec<AgentId>,
    #[getset(get = "pub")]
    entities: Vec<EntityId>,
}

impl Agent {
    pub fn new(id: AgentId) -> Self {
        Agent {
            id,
            state: 0,
            state_prev: 0,
            state_changed: -1,
            viruses: Vec::new(),
            tools: Vec::new(),
            neighbors: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Back to the baseline state, dropping infections and tools but
    /// keeping network ties and entity memberships.
    pub fn reset(&mut self) {
        self.state = 0;
        self.state_prev = 0;
        self.state_changed = -1;
        self.viruses.clear();
        self.tools.clear();
    }

    pub fn n_viruses(&self) -> usize {
        self.viruses.len()
    }

    pub fn n_tools(&self) -> usize {
        self.tools.len()
    }

    pub fn has_virus(&self, id: VirusId) -> bool {
        self.viruses.iter().any(|v| v.id() == id)
    }

    pub fn has_tool(&self, id: usize) -> bool {
        self.tools.iter().any(|t| t.id() == id)
    }

    /// Carrying at least one virus.
    pub fn is_infected(&self) -> bool {
        !self.viruses.is_empty()
    }

    pub fn add_neighbor(&mut self, id: AgentId) {
        if !self.neighbors.contains(&id) {
            self.neighbors.push(id);
        }
    }

    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }

    pub(crate) fn viruses_mut(&mut self) -> &mut Vec<Virus> {
        &mut self.viruses
    }

    pub(crate) fn tools_mut(&mut self) -> &mut Vec<Tool> {
        &mut self.tools
    }

    pub(crate) fn entities_mut(&mut self) -> &mut Vec<EntityId> {
        &mut self.entities
    }

    pub(crate) fn neighbors_mut(&mut self) -> &mut Vec<AgentId> {
        &mut self.neighbors
    }

    pub(crate) fn record_change(&mut self, new_state: StateId, day: Day) {
        self.state_prev = self.state;
        self.state = new_state;
        self.state_changed = day;
    }

    /// State rewrite used when the agent changes twice in one day: the
    /// previous state is kept so the day's net transition stays correct.
    pub(crate) fn rewrite_change(&mut self, new_state: StateId) {
        self.state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virus::Virus;

    #[test]
    fn reset_keeps_network() {
        let mut agent = Agent::new(3);
        agent.add_neighbor(1);
        agent.add_neighbor(1);
        agent.add_neighbor(2);
        agent.viruses_mut().push(Virus::new("flu"));
        agent.record_change(2, 5);
        agent.reset();
        assert_eq!(agent.state(), 0);
        assert_eq!(agent.state_changed(), -1);
        assert!(!agent.is_infected());
        assert_eq!(agent.neighbors(), &vec![1, 2]);
    }

    #[test]
    fn double_change_preserves_origin() {
        let mut agent = Agent::new(0);
        agent.record_change(1, 4);
        assert_eq!(agent.state_prev(), 0);
        agent.rewrite_change(2);
        assert_eq!(agent.state(), 2);
        assert_eq!(agent.state_prev(), 0);
        assert_eq!(agent.state_changed(), 4);
    }
}
