use crate::action::{Action, ActionBuffer, ActionHookFn, ActionOp};
use crate::adjlist::AdjList;
use crate::agent::Agent;
use crate::db::DataBase;
use crate::entity::Entity;
use crate::global::{GlobalAction, GlobalFn};
use crate::mixer::{MixerFn, Mixers};
use crate::prelude::{
    AgentId, Day, EntityId, Error, Parameters, Real, Result, StateId, ToolId, VirusId,
};
use crate::queue::{TransmissionQueue, EVERYONE, NO_ONE, ONLY_SELF};
use crate::rng::RngStream;
use crate::tool::Tool;
use crate::virus::Virus;
use log::{debug, info, trace};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Update function registered for a state, called once per in-scope agent
/// per day. Update functions inspect the world and enqueue actions; they
/// never mutate agents directly.
pub type UpdateFn = Arc<dyn Fn(AgentId, &mut Model) -> Result<()> + Send + Sync>;

/// Network rewiring hook, called once per day with the configured
/// proportion.
pub type RewireFn = Arc<dyn Fn(&mut Model, Real) -> Result<()> + Send + Sync>;

/// Custom seeding hook for a virus or tool, called at reset with the
/// catalog id.
pub type DistFn = Arc<dyn Fn(usize, &mut Model) -> Result<()> + Send + Sync>;

/// How a catalog virus/tool is handed out at reset.
#[derive(Clone)]
enum Seeding {
    Proportion(Real),
    Count(usize),
    Fun(DistFn),
}

impl fmt::Debug for Seeding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seeding::Proportion(p) => write!(f, "Proportion({})", p),
            Seeding::Count(n) => write!(f, "Count({})", n),
            Seeding::Fun(_) => write!(f, "Fun(..)"),
        }
    }
}

/// The simulation driver. Owns the population, the virus/tool catalogs,
/// the state registry, the action buffer, the activity mask and the
/// accounting database, and advances everything one day at a time.
pub struct Model {
    name: String,
    population: Vec<Agent>,
    population_backup: Option<Vec<Agent>>,
    entities: Vec<Entity>,
    entities_backup: Option<Vec<Entity>>,
    directed: bool,

    viruses: Vec<Virus>,
    viruses_seeding: Vec<Seeding>,
    tools: Vec<Tool>,
    tools_seeding: Vec<Seeding>,

    state_labels: Vec<String>,
    state_fun: Vec<Option<UpdateFn>>,
    parameters: Parameters,

    db: DataBase,
    actions: ActionBuffer,
    action_hooks: Vec<ActionHookFn>,
    queue: TransmissionQueue,
    use_queuing: bool,
    globals: Vec<GlobalAction>,
    rewire_fun: Option<RewireFn>,
    rewire_prop: Real,
    mixers: Mixers,
    rng: RngStream,

    current_date: Day,
    ndays: u32,
    n_replicates: u32,
}

impl Model {
    pub fn new() -> Self {
        Model {
            name: String::from("model"),
            population: Vec::new(),
            population_backup: None,
            entities: Vec::new(),
            entities_backup: None,
            directed: false,
            viruses: Vec::new(),
            viruses_seeding: Vec::new(),
            tools: Vec::new(),
            tools_seeding: Vec::new(),
            state_labels: Vec::new(),
            state_fun: Vec::new(),
            parameters: Parameters::new(),
            db: DataBase::new(),
            actions: ActionBuffer::default(),
            action_hooks: Vec::new(),
            queue: TransmissionQueue::default(),
            use_queuing: true,
            globals: Vec::new(),
            rewire_fun: None,
            rewire_prop: 0.0,
            mixers: Mixers::default(),
            rng: RngStream::new(),
            current_date: 0,
            ndays: 0,
            n_replicates: 0,
        }
    }

    // ------------------------------------------------------------------
    // Plain accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn size(&self) -> usize {
        self.population.len()
    }

    pub fn today(&self) -> Day {
        if self.ndays == 0 {
            0
        } else {
            self.current_date
        }
    }

    pub fn ndays(&self) -> u32 {
        self.ndays
    }

    pub fn n_replicates(&self) -> u32 {
        self.n_replicates
    }

    pub fn nstates(&self) -> usize {
        self.state_labels.len()
    }

    pub fn states(&self) -> &[String] {
        &self.state_labels
    }

    pub fn db(&self) -> &DataBase {
        &self.db
    }

    pub fn population(&self) -> &[Agent] {
        &self.population
    }

    pub fn agent(&self, id: AgentId) -> &Agent {
        &self.population[id]
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn n_viruses(&self) -> usize {
        self.viruses.len()
    }

    pub fn virus(&self, id: VirusId) -> &Virus {
        &self.viruses[id]
    }

    pub fn n_tools(&self) -> usize {
        self.tools.len()
    }

    pub fn tool(&self, id: ToolId) -> &Tool {
        &self.tools[id]
    }

    pub fn n_entities(&self) -> usize {
        self.entities.len()
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id]
    }

    pub fn queue(&self) -> &TransmissionQueue {
        &self.queue
    }

    pub fn is_queuing_on(&self) -> bool {
        self.use_queuing
    }

    pub fn queuing_on(&mut self) {
        self.use_queuing = true;
    }

    pub fn queuing_off(&mut self) {
        self.use_queuing = false;
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    // ------------------------------------------------------------------
    // Random draws
    // ------------------------------------------------------------------

    pub fn seed(&mut self, seed: u64) {
        self.rng.seed(seed);
    }

    pub fn runif(&mut self) -> Real {
        self.rng.runif()
    }

    pub fn rng_mut(&mut self) -> &mut RngStream {
        &mut self.rng
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Register a parameter, keeping any existing value.
    pub fn add_param(&mut self, value: Real, name: impl Into<String>) -> Real {
        self.parameters.entry(name.into()).or_insert(value);
        value
    }

    pub fn set_param(&mut self, name: &str, value: Real) -> Result<()> {
        match self.parameters.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::Config(format!(
                "the parameter {:?} does not exist",
                name
            ))),
        }
    }

    pub fn get_param(&self, name: &str) -> Result<Real> {
        self.parameters
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("the parameter {:?} does not exist", name)))
    }

    /// Merge a `name : number` parameters file, keeping existing values.
    pub fn read_params(&mut self, path: impl AsRef<Path>) -> Result<()> {
        for (name, value) in crate::params::read_params_file(path)? {
            self.add_param(value, name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // States, viruses, tools, entities, globals
    // ------------------------------------------------------------------

    /// Register a new state with an optional update function. Labels must
    /// be unique.
    pub fn add_state(&mut self, label: impl Into<String>, fun: Option<UpdateFn>) -> Result<StateId> {
        let label = label.into();
        if self.state_labels.iter().any(|l| *l == label) {
            return Err(Error::Config(format!(
                "state {:?} already registered",
                label
            )));
        }
        self.state_labels.push(label);
        self.state_fun.push(fun);
        Ok(self.state_labels.len() - 1)
    }

    /// Register a virus seeded into a share of the population at reset.
    pub fn add_virus(&mut self, virus: Virus, prevalence: Real) -> Result<VirusId> {
        if !(0.0..=1.0).contains(&prevalence) {
            return Err(Error::Config(format!(
                "prevalence of virus {:?} must be in [0, 1], got {}",
                virus.name(),
                prevalence
            )));
        }
        self.register_virus(virus, Seeding::Proportion(prevalence))
    }

    /// Register a virus seeded into a fixed number of agents at reset.
    pub fn add_virus_n(&mut self, virus: Virus, count: usize) -> Result<VirusId> {
        self.register_virus(virus, Seeding::Count(count))
    }

    /// Register a virus with a custom seeding function.
    pub fn add_virus_fun(&mut self, virus: Virus, fun: DistFn) -> Result<VirusId> {
        self.register_virus(virus, Seeding::Fun(fun))
    }

    fn register_virus(&mut self, mut virus: Virus, seeding: Seeding) -> Result<VirusId> {
        if virus.state_init().is_none() {
            return Err(Error::Config(format!(
                "the virus {:?} has no init state",
                virus.name()
            )));
        }
        if virus.state_post().is_none() {
            return Err(Error::Config(format!(
                "the virus {:?} has no post state",
                virus.name()
            )));
        }
        let id = self.db.record_virus(virus.name().clone());
        virus.set_id(id);
        debug!("registered virus {:?} as {}", virus.name(), id);
        self.viruses.push(virus);
        self.viruses_seeding.push(seeding);
        Ok(id)
    }

    pub fn add_tool(&mut self, tool: Tool, prevalence: Real) -> Result<ToolId> {
        if !(0.0..=1.0).contains(&prevalence) {
            return Err(Error::Config(format!(
                "prevalence of tool {:?} must be in [0, 1], got {}",
                tool.name(),
                prevalence
            )));
        }
        self.register_tool(tool, Seeding::Proportion(prevalence))
    }

    pub fn add_tool_n(&mut self, tool: Tool, count: usize) -> Result<ToolId> {
        self.register_tool(tool, Seeding::Count(count))
    }

    pub fn add_tool_fun(&mut self, tool: Tool, fun: DistFn) -> Result<ToolId> {
        self.register_tool(tool, Seeding::Fun(fun))
    }

    fn register_tool(&mut self, mut tool: Tool, seeding: Seeding) -> Result<ToolId> {
        let id = self.db.record_tool(tool.name().clone());
        tool.set_id(id);
        self.tools.push(tool);
        self.tools_seeding.push(seeding);
        Ok(id)
    }

    pub fn add_entity(&mut self, name: impl Into<String>) -> EntityId {
        let id = self.entities.len();
        self.entities.push(Entity::new(id, name));
        id
    }

    /// Load `agent entity` integer pairs, subscribing each agent to the
    /// entity. Ids outside the population/entity sets are range errors.
    pub fn load_agents_entities_ties(&mut self, path: impl AsRef<Path>, skip: usize) -> Result<()> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        for (lineno, raw) in data.lines().enumerate() {
            if lineno < skip {
                continue;
            }
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let agent = parse_id(tokens.next(), line, lineno + 1)?;
            let entity = parse_id(tokens.next(), line, lineno + 1)?;
            if agent >= self.size() {
                return Err(Error::Range(format!(
                    "agent {} at line {} is above the max id {}",
                    agent,
                    lineno + 1,
                    self.size().saturating_sub(1)
                )));
            }
            if entity >= self.entities.len() {
                return Err(Error::Range(format!(
                    "entity {} at line {} is above the max id {}",
                    entity,
                    lineno + 1,
                    self.entities.len().saturating_sub(1)
                )));
            }
            if !self.population[agent].entities().contains(&entity) {
                self.population[agent].entities_mut().push(entity);
                self.entities[entity].add_agent(agent);
            }
        }
        Ok(())
    }

    pub fn add_global_action(&mut self, fun: GlobalFn, name: impl Into<String>, day: Day) {
        self.globals.push(GlobalAction::new(fun, name, day));
    }

    pub fn get_global_action(&self, name: &str) -> Result<&GlobalAction> {
        self.globals
            .iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| Error::Config(format!("the global action {:?} was not found", name)))
    }

    pub fn rm_global_action(&mut self, name: &str) -> Result<()> {
        let before = self.globals.len();
        self.globals.retain(|g| g.name() != name);
        if self.globals.len() == before {
            return Err(Error::Config(format!(
                "the global action {:?} was not found",
                name
            )));
        }
        Ok(())
    }

    pub fn set_rewire_fun(&mut self, fun: RewireFn) {
        self.rewire_fun = Some(fun);
    }

    pub fn set_rewire_prop(&mut self, prop: Real) -> Result<()> {
        if !(0.0..=1.0).contains(&prop) {
            return Err(Error::Range(format!(
                "rewire proportion must be in [0, 1], got {}",
                prop
            )));
        }
        self.rewire_prop = prop;
        Ok(())
    }

    pub fn rewire_prop(&self) -> Real {
        self.rewire_prop
    }

    // ------------------------------------------------------------------
    // Mixers
    // ------------------------------------------------------------------

    pub fn set_susceptibility_reduction_mixer(&mut self, fun: MixerFn) {
        self.mixers.susceptibility = fun;
    }

    pub fn set_transmission_reduction_mixer(&mut self, fun: MixerFn) {
        self.mixers.transmission = fun;
    }

    pub fn set_recovery_enhancer_mixer(&mut self, fun: MixerFn) {
        self.mixers.recovery = fun;
    }

    pub fn set_death_reduction_mixer(&mut self, fun: MixerFn) {
        self.mixers.death = fun;
    }

    pub fn susceptibility_reduction(&self, agent: AgentId, virus: &Virus) -> Real {
        (self.mixers.susceptibility)(&self.population[agent], virus, self).clamp(0.0, 1.0)
    }

    pub fn transmission_reduction(&self, agent: AgentId, virus: &Virus) -> Real {
        (self.mixers.transmission)(&self.population[agent], virus, self).clamp(0.0, 1.0)
    }

    pub fn recovery_enhancer(&self, agent: AgentId, virus: &Virus) -> Real {
        (self.mixers.recovery)(&self.population[agent], virus, self).clamp(0.0, 1.0)
    }

    pub fn death_reduction(&self, agent: AgentId, virus: &Virus) -> Real {
        (self.mixers.death)(&self.population[agent], virus, self).clamp(0.0, 1.0)
    }

    // ------------------------------------------------------------------
    // Population and network
    // ------------------------------------------------------------------

    /// Replace the population with `n` unconnected agents.
    pub fn agents_empty_graph(&mut self, n: usize) {
        self.population = (0..n).map(Agent::new).collect();
        self.population_backup = None;
    }

    pub fn agents_from_adjlist(&mut self, al: &AdjList) -> Result<()> {
        self.agents_empty_graph(al.vcount());
        self.directed = al.directed();
        for i in 0..al.vcount() {
            for (&j, _) in al.neighbors(i)? {
                self.population[i].add_neighbor(j);
            }
        }
        Ok(())
    }

    pub fn agents_from_edgelist(
        &mut self,
        source: &[AgentId],
        target: &[AgentId],
        size: usize,
        directed: bool,
    ) -> Result<()> {
        let al = AdjList::from_edgelist(source, target, size, directed)?;
        self.agents_from_adjlist(&al)
    }

    pub fn agents_from_edgelist_file(
        &mut self,
        path: impl AsRef<Path>,
        skip: usize,
        directed: bool,
    ) -> Result<()> {
        let al = AdjList::read_edgelist(path, skip, directed)?;
        self.agents_from_adjlist(&al)
    }

    /// Connect two agents, mirroring the tie unless the model is directed.
    pub fn add_neighbor(&mut self, a: AgentId, b: AgentId) {
        self.population[a].add_neighbor(b);
        if !self.directed {
            self.population[b].add_neighbor(a);
        }
    }

    pub fn write_edgelist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut out = String::from("source target\n");
        for agent in &self.population {
            for &n in agent.neighbors() {
                if self.directed || agent.id() <= n {
                    out.push_str(&format!("{} {}\n", agent.id(), n));
                }
            }
        }
        fs::write(path, out).map_err(|e| Error::io(path, e))
    }

    /// Swap the far endpoints of the `ia`-th edge of `a` and the `ib`-th
    /// edge of `b`, fixing the mirrored entries on undirected networks.
    pub(crate) fn swap_edge_endpoints(
        &mut self,
        a: AgentId,
        ia: usize,
        b: AgentId,
        ib: usize,
    ) -> Result<()> {
        let x = self.population[a].neighbors()[ia];
        let y = self.population[b].neighbors()[ib];
        self.population[a].neighbors_mut()[ia] = y;
        self.population[b].neighbors_mut()[ib] = x;
        if !self.directed {
            replace_neighbor(self.population[x].neighbors_mut(), a, b)?;
            replace_neighbor(self.population[y].neighbors_mut(), b, a)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enqueue surface: everything here is deferred until the next flush
    // ------------------------------------------------------------------

    /// Register a reusable finalizer hook; actions reference it by the
    /// returned id.
    pub fn add_action_hook(&mut self, fun: ActionHookFn) -> usize {
        self.action_hooks.push(fun);
        self.action_hooks.len() - 1
    }

    /// Enqueue a bare action with an explicit queue delta and optional
    /// hook.
    pub fn queue_action(
        &mut self,
        agent: AgentId,
        new_state: Option<StateId>,
        queue: i8,
        hook: Option<usize>,
    ) {
        self.actions.push(Action {
            agent,
            op: ActionOp::None,
            new_state,
            queue,
            hook,
        });
    }

    pub fn change_state(&mut self, agent: AgentId, new_state: StateId) {
        self.change_state_q(agent, new_state, NO_ONE);
    }

    pub fn change_state_q(&mut self, agent: AgentId, new_state: StateId, queue: i8) {
        self.queue_action(agent, Some(new_state), queue, None);
    }

    /// Enqueue acquiring `virus`, landing on its `state_init` with its
    /// `queue_init` delta. Dropped silently when the agent already hosts
    /// a virus with the same id.
    pub fn add_virus_to(&mut self, agent: AgentId, virus: Virus) {
        if self.population[agent].has_virus(virus.id()) {
            trace!(
                "agent {} already hosts virus {}; dropping the infection",
                agent,
                virus.id()
            );
            return;
        }
        let new_state = virus.state_init();
        let queue = virus.queue_init();
        self.actions.push(Action {
            agent,
            new_state,
            queue,
            op: ActionOp::AddVirus(virus),
            hook: None,
        });
    }

    /// Enqueue removing the agent's `index`-th virus, landing on its
    /// `state_rm` (when configured) with its `queue_rm` delta.
    pub fn rm_virus_from(&mut self, agent: AgentId, index: usize) -> Result<()> {
        let (state, queue) = {
            let virus = self.virus_of(agent, index)?;
            (virus.state_rm(), virus.queue_rm())
        };
        self.actions.push(Action {
            agent,
            new_state: state,
            queue,
            op: ActionOp::RmVirus(index),
            hook: None,
        });
        Ok(())
    }

    /// Same as [`rm_virus_from`](Self::rm_virus_from) but with explicit
    /// target state and queue delta.
    pub fn rm_virus_from_with(
        &mut self,
        agent: AgentId,
        index: usize,
        new_state: Option<StateId>,
        queue: i8,
    ) -> Result<()> {
        self.virus_of(agent, index)?;
        self.actions.push(Action {
            agent,
            new_state,
            queue,
            op: ActionOp::RmVirus(index),
            hook: None,
        });
        Ok(())
    }

    fn virus_of(&self, agent: AgentId, index: usize) -> Result<&Virus> {
        self.population[agent].viruses().get(index).ok_or_else(|| {
            Error::Range(format!(
                "agent {} carries {} viruses; index {} is invalid",
                agent,
                self.population[agent].n_viruses(),
                index
            ))
        })
    }

    pub fn add_tool_to(&mut self, agent: AgentId, tool: Tool) {
        if self.population[agent].has_tool(tool.id()) {
            return;
        }
        let new_state = tool.state_init();
        let queue = tool.queue_init();
        self.actions.push(Action {
            agent,
            new_state,
            queue,
            op: ActionOp::AddTool(tool),
            hook: None,
        });
    }

    pub fn rm_tool_from(&mut self, agent: AgentId, index: usize) -> Result<()> {
        let (state, queue) = {
            let tool = self.population[agent].tools().get(index).ok_or_else(|| {
                Error::Range(format!(
                    "agent {} carries {} tools; index {} is invalid",
                    agent,
                    self.population[agent].n_tools(),
                    index
                ))
            })?;
            (tool.state_post(), tool.queue_post())
        };
        self.actions.push(Action {
            agent,
            new_state: state,
            queue,
            op: ActionOp::RmTool(index),
            hook: None,
        });
        Ok(())
    }

    pub fn add_entity_to(&mut self, agent: AgentId, entity: EntityId) -> Result<()> {
        if entity >= self.entities.len() {
            return Err(Error::Range(format!(
                "the entity id {} is not registered",
                entity
            )));
        }
        self.actions.push(Action {
            agent,
            new_state: None,
            queue: NO_ONE,
            op: ActionOp::AddEntity(entity),
            hook: None,
        });
        Ok(())
    }

    pub fn rm_entity_from(&mut self, agent: AgentId, index: usize) -> Result<()> {
        if index >= self.population[agent].entities().len() {
            return Err(Error::Range(format!(
                "agent {} belongs to {} entities; index {} is invalid",
                agent,
                self.population[agent].entities().len(),
                index
            )));
        }
        self.actions.push(Action {
            agent,
            new_state: None,
            queue: NO_ONE,
            op: ActionOp::RmEntity(index),
            hook: None,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // The flush: actions become visible here, newest first
    // ------------------------------------------------------------------

    /// Apply every buffered action. Finalizers run first and are the only
    /// site where virus/tool/entity collections change; state accounting
    /// nets out same-day double transitions; queue deltas maintain the
    /// activity mask. Actions enqueued while flushing (from hooks) are
    /// drained in the same call.
    pub fn flush_actions(&mut self) -> Result<()> {
        while let Some(action) = self.actions.pop() {
            let Action {
                agent: agent_id,
                op,
                new_state,
                queue,
                hook,
            } = action;

            match op {
                ActionOp::None => {}
                ActionOp::AddVirus(mut virus) => {
                    let today = self.today();
                    let state = self.population[agent_id].state();
                    self.db
                        .record_transmission(virus.host(), agent_id, virus.id(), today);
                    self.db.virus_attached(virus.id(), state);
                    virus.attach(agent_id, today);
                    self.population[agent_id].viruses_mut().push(virus);
                }
                ActionOp::RmVirus(index) => {
                    if index >= self.population[agent_id].n_viruses() {
                        return Err(Error::Range(format!(
                            "cannot remove virus {} from agent {} carrying {}",
                            index,
                            agent_id,
                            self.population[agent_id].n_viruses()
                        )));
                    }
                    let state = self.population[agent_id].state();
                    let virus = self.population[agent_id].viruses_mut().remove(index);
                    self.db.virus_detached(virus.id(), state);
                }
                ActionOp::AddTool(tool) => {
                    let state = self.population[agent_id].state();
                    self.db.tool_attached(tool.id(), state);
                    self.population[agent_id].tools_mut().push(tool);
                }
                ActionOp::RmTool(index) => {
                    if index >= self.population[agent_id].n_tools() {
                        return Err(Error::Range(format!(
                            "cannot remove tool {} from agent {} carrying {}",
                            index,
                            agent_id,
                            self.population[agent_id].n_tools()
                        )));
                    }
                    let state = self.population[agent_id].state();
                    let tool = self.population[agent_id].tools_mut().remove(index);
                    self.db.tool_detached(tool.id(), state);
                }
                ActionOp::AddEntity(entity) => {
                    if entity >= self.entities.len() {
                        return Err(Error::Range(format!(
                            "the entity id {} is not registered",
                            entity
                        )));
                    }
                    if !self.population[agent_id].entities().contains(&entity) {
                        self.population[agent_id].entities_mut().push(entity);
                        self.entities[entity].add_agent(agent_id);
                    }
                }
                ActionOp::RmEntity(index) => {
                    if index >= self.population[agent_id].entities().len() {
                        return Err(Error::Range(format!(
                            "cannot drop entity {} from agent {}",
                            index, agent_id
                        )));
                    }
                    let entity = self.population[agent_id].entities()[index];
                    self.population[agent_id].entities_mut().remove(index);
                    self.entities[entity].rm_agent(agent_id);
                }
            }

            if let Some(hook_id) = hook {
                let fun = self.action_hooks.get(hook_id).cloned().ok_or_else(|| {
                    Error::Range(format!("the action hook {} is not registered", hook_id))
                })?;
                fun(agent_id, self)?;
            }

            if let Some(next_state) = new_state {
                if next_state >= self.nstates() {
                    return Err(Error::Range(format!(
                        "the proposed state {} is out of range; the model has {} states",
                        next_state,
                        self.nstates()
                    )));
                }
                let today = self.today();
                let agent = &self.population[agent_id];
                let (state, state_prev, changed) =
                    (agent.state(), agent.state_prev(), agent.state_changed());
                if next_state != state {
                    if changed == today {
                        // Second change today: roll the earlier accounting
                        // back so the day nets a single prev -> next move.
                        self.db.update_state(state_prev, state, true);
                        self.db.update_state(state_prev, next_state, false);
                        for vi in 0..self.population[agent_id].n_viruses() {
                            let vid = self.population[agent_id].viruses()[vi].id();
                            self.db.update_virus(vid, state, state_prev);
                            self.db.update_virus(vid, state_prev, next_state);
                        }
                        for ti in 0..self.population[agent_id].n_tools() {
                            let tid = self.population[agent_id].tools()[ti].id();
                            self.db.update_tool(tid, state, state_prev);
                            self.db.update_tool(tid, state_prev, next_state);
                        }
                        self.population[agent_id].rewrite_change(next_state);
                    } else {
                        self.db.update_state(state, next_state, false);
                        for vi in 0..self.population[agent_id].n_viruses() {
                            let vid = self.population[agent_id].viruses()[vi].id();
                            self.db.update_virus(vid, state, next_state);
                        }
                        for ti in 0..self.population[agent_id].n_tools() {
                            let tid = self.population[agent_id].tools()[ti].id();
                            self.db.update_tool(tid, state, next_state);
                        }
                        self.population[agent_id].record_change(next_state, today);
                    }
                }
            }

            if self.use_queuing {
                match queue {
                    q if q == EVERYONE || q == -EVERYONE => {
                        let delta = if q > 0 { 1 } else { -1 };
                        self.queue.bump(agent_id, delta);
                        for k in 0..self.population[agent_id].degree() {
                            let neighbor = self.population[agent_id].neighbors()[k];
                            self.queue.bump(neighbor, delta);
                        }
                    }
                    q if q == ONLY_SELF || q == -ONLY_SELF => {
                        self.queue.bump(agent_id, q as i64);
                    }
                    q if q == NO_ONE => {}
                    other => {
                        return Err(Error::Range(format!(
                            "invalid queue delta {}; valid values are -2..=2",
                            other
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reset and seeding
    // ------------------------------------------------------------------

    /// Snapshot the population and entities; `reset()` restores from it.
    pub fn set_backup(&mut self) {
        self.population_backup = Some(self.population.clone());
        self.entities_backup = Some(self.entities.clone());
    }

    /// Back to day 0: restore the population snapshot (taking it now if
    /// none exists yet), wipe the accounting, clear the activity mask,
    /// redistribute viruses and tools, and record the day-0 baseline.
    pub fn reset(&mut self) -> Result<()> {
        match &self.population_backup {
            Some(backup) => self.population = backup.clone(),
            None => self.population_backup = Some(self.population.clone()),
        }
        match &self.entities_backup {
            Some(backup) => self.entities = backup.clone(),
            None => self.entities_backup = Some(self.entities.clone()),
        }

        self.current_date = 0;
        self.db.reset(&self.state_labels, &self.population);
        self.queue.reset(self.population.len());

        self.dist_virus()?;
        self.dist_tools()?;

        self.next_day()
    }

    fn dist_virus(&mut self) -> Result<()> {
        let n = self.size();
        let mut idx: Vec<AgentId> = (0..n).collect();
        // one shared pool: prevalence-seeded viruses never land twice on
        // the same agent
        let mut n_left = n;
        for v in 0..self.viruses.len() {
            match self.viruses_seeding[v].clone() {
                Seeding::Fun(fun) => fun(v, self)?,
                Seeding::Proportion(p) => {
                    let count = (p * n as Real).floor() as usize;
                    self.seed_virus(v, count, &mut idx, &mut n_left)?;
                }
                Seeding::Count(count) => {
                    self.seed_virus(v, count, &mut idx, &mut n_left)?;
                }
            }
            self.flush_actions()?;
        }
        Ok(())
    }

    fn seed_virus(
        &mut self,
        virus: VirusId,
        count: usize,
        idx: &mut [AgentId],
        n_left: &mut usize,
    ) -> Result<()> {
        let n = self.size();
        if count > n {
            return Err(Error::Range(format!(
                "there are only {} agents; cannot seed the virus in {}",
                n, count
            )));
        }
        let mut left = count;
        while left > 0 {
            if *n_left == 0 {
                return Err(Error::Range(
                    "no unseeded agents are left to infect".to_string(),
                ));
            }
            let loc = (self.rng.runif() * *n_left as Real).floor() as usize;
            let agent = idx[loc];
            let instance = self.viruses[virus].clone();
            self.add_virus_to(agent, instance);
            *n_left -= 1;
            idx.swap(loc, *n_left);
            left -= 1;
        }
        Ok(())
    }

    fn dist_tools(&mut self) -> Result<()> {
        let n = self.size();
        for t in 0..self.tools.len() {
            match self.tools_seeding[t].clone() {
                Seeding::Fun(fun) => fun(t, self)?,
                seeding => {
                    let count = match seeding {
                        Seeding::Proportion(p) => (p * n as Real).floor() as usize,
                        Seeding::Count(c) => c,
                        Seeding::Fun(_) => 0,
                    };
                    if count > n {
                        return Err(Error::Range(format!(
                            "there are only {} agents; cannot hand the tool to {}",
                            n, count
                        )));
                    }
                    // tools draw from a fresh pool: holding one tool does
                    // not exclude holding another
                    let mut idx: Vec<AgentId> = (0..n).collect();
                    let mut n_left = n;
                    let mut left = count;
                    while left > 0 {
                        let loc = (self.rng.runif() * n_left as Real).floor() as usize;
                        let agent = idx[loc];
                        let instance = self.tools[t].clone();
                        self.add_tool_to(agent, instance);
                        n_left -= 1;
                        idx.swap(loc, n_left);
                        left -= 1;
                    }
                }
            }
            self.flush_actions()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // The day loop
    // ------------------------------------------------------------------

    /// Execute one replicate over `ndays`, reseeding first when a seed is
    /// given.
    pub fn run(&mut self, ndays: u32, seed: Option<u64>) -> Result<()> {
        if self.size() == 0 {
            return Err(Error::Config("there are no agents in this model".into()));
        }
        if self.nstates() == 0 {
            return Err(Error::Config(
                "no states registered in this model; at least one is required".into(),
            ));
        }
        self.ndays = ndays;
        if let Some(seed) = seed {
            self.rng.seed(seed);
        }
        self.validate_catalogs()?;
        self.reset()?;

        info!(
            "running {:?}: {} agents, {} days",
            self.name,
            self.size(),
            ndays
        );
        for _ in 0..ndays {
            trace!("day {}", self.current_date);
            self.update_state_phase()?;
            self.run_global_actions()?;
            self.rewire_step()?;
            self.next_day()?;
            self.mutate_viruses()?;
        }
        // the last `next_day` stepped one past the horizon
        self.current_date -= 1;
        self.n_replicates += 1;
        Ok(())
    }

    fn validate_catalogs(&self) -> Result<()> {
        let nstates = self.nstates();
        let check = |state: Option<StateId>, owner: &str| -> Result<()> {
            if let Some(s) = state {
                if s >= nstates {
                    return Err(Error::Range(format!(
                        "{} uses state {}, but states must be below {}",
                        owner, s, nstates
                    )));
                }
            }
            Ok(())
        };
        for virus in &self.viruses {
            check(virus.state_init(), virus.name())?;
            check(virus.state_post(), virus.name())?;
            check(virus.state_rm(), virus.name())?;
            for rate in [
                virus.prob_infecting(),
                virus.prob_recovery(),
                virus.prob_death(),
                virus.incubation(),
            ]
            .iter()
            {
                if let Some(name) = rate.name() {
                    if !self.parameters.contains_key(name) {
                        return Err(Error::Config(format!(
                            "virus {:?} references the unknown parameter {:?}",
                            virus.name(),
                            name
                        )));
                    }
                }
            }
        }
        for tool in &self.tools {
            check(tool.state_init(), tool.name())?;
            check(tool.state_post(), tool.name())?;
        }
        Ok(())
    }

    fn update_state_phase(&mut self) -> Result<()> {
        let funs = self.state_fun.clone();
        for i in 0..self.population.len() {
            if self.use_queuing && !self.queue.is_active(i) {
                continue;
            }
            let state = self.population[i].state();
            if let Some(fun) = &funs[state] {
                fun(i, self)?;
            }
        }
        self.flush_actions()
    }

    fn run_global_actions(&mut self) -> Result<()> {
        let today = self.today();
        let globals = self.globals.clone();
        for global in &globals {
            if global.applies(today) {
                (global.fun())(self)?;
            }
            self.flush_actions()?;
        }
        Ok(())
    }

    fn rewire_step(&mut self) -> Result<()> {
        if let Some(fun) = self.rewire_fun.clone() {
            let prop = self.rewire_prop;
            fun(self, prop)?;
        }
        Ok(())
    }

    fn next_day(&mut self) -> Result<()> {
        self.flush_actions()?;
        let today = self.today();
        self.db.record(today);
        self.current_date += 1;
        Ok(())
    }

    fn mutate_viruses(&mut self) -> Result<()> {
        for i in 0..self.population.len() {
            if self.use_queuing && !self.queue.is_active(i) {
                continue;
            }
            for vi in 0..self.population[i].n_viruses() {
                if let Some(fun) = self.population[i].viruses()[vi].mutation_fn() {
                    fun(i, vi, self)?;
                }
            }
        }
        self.flush_actions()
    }

    /// Mutable access to a carried virus instance, the hook mutation
    /// functions use to rewrite the virus they were called for.
    pub fn virus_instance_mut(&mut self, agent: AgentId, index: usize) -> Result<&mut Virus> {
        self.population[agent]
            .viruses_mut()
            .get_mut(index)
            .ok_or_else(|| Error::Range(format!("agent {} has no virus {}", agent, index)))
    }

    // ------------------------------------------------------------------
    // Replicates
    // ------------------------------------------------------------------

    /// Deep copy for a worker thread. In debug builds the copy is checked
    /// for structural equality with its source.
    pub fn clone_replica(&self) -> Model {
        let copy = self.clone();
        debug_assert!(
            copy == *self,
            "the model copy does not match its source after cloning"
        );
        copy
    }

    /// Run `nexperiments` seeded replicates, partitioned over `nthreads`
    /// workers. Per-replicate seeds are pre-drawn from the master engine
    /// in index order, so results do not depend on the thread count. The
    /// callback receives each finished replicate in turn; completed
    /// replicates keep their output even when a later one fails.
    pub fn run_multiple(
        &mut self,
        ndays: u32,
        nexperiments: usize,
        seed: Option<u64>,
        saver: Option<crate::saver::SaveFn>,
        nthreads: usize,
    ) -> Result<()> {
        if let Some(seed) = seed {
            self.rng.seed(seed);
        }
        let seeds: Vec<u64> = (0..nexperiments).map(|_| self.rng.gen_seed()).collect();

        self.set_backup();
        let pre = self.n_replicates;

        let nthreads = nthreads.max(1).min(nexperiments.max(1));
        let share = nexperiments / nthreads;
        let mut counts = vec![share; nthreads];
        counts[nthreads - 1] += nexperiments - share * nthreads;
        let mut starts = Vec::with_capacity(nthreads);
        let mut acc = 0;
        for &c in &counts {
            starts.push(acc);
            acc += c;
        }

        info!(
            "starting {} replicates of {:?} using {} thread(s)",
            nexperiments, self.name, nthreads
        );

        let mut clones: Vec<Model> = (1..nthreads).map(|_| self.clone_replica()).collect();
        {
            let seeds = &seeds;
            let saver = saver.as_ref();
            let mut workers: Vec<(usize, usize, &mut Model)> = Vec::with_capacity(nthreads);
            workers.push((starts[0], counts[0], &mut *self));
            for (k, model) in clones.iter_mut().enumerate() {
                workers.push((starts[k + 1], counts[k + 1], model));
            }
            workers
                .into_par_iter()
                .try_for_each(|(start, count, model)| -> Result<()> {
                    for k in 0..count {
                        let i = start + k;
                        model.run(ndays, Some(seeds[i]))?;
                        if let Some(fun) = saver {
                            fun(i, model)?;
                        }
                    }
                    Ok(())
                })?;
        }

        self.n_replicates = pre + nexperiments as u32;
        Ok(())
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Model {
            name: self.name.clone(),
            population: self.population.clone(),
            population_backup: self.population_backup.clone(),
            entities: self.entities.clone(),
            entities_backup: self.entities_backup.clone(),
            directed: self.directed,
            viruses: self.viruses.clone(),
            viruses_seeding: self.viruses_seeding.clone(),
            tools: self.tools.clone(),
            tools_seeding: self.tools_seeding.clone(),
            state_labels: self.state_labels.clone(),
            state_fun: self.state_fun.clone(),
            parameters: self.parameters.clone(),
            db: self.db.clone(),
            actions: self.actions.clone(),
            action_hooks: self.action_hooks.clone(),
            queue: self.queue.clone(),
            use_queuing: self.use_queuing,
            globals: self.globals.clone(),
            rewire_fun: self.rewire_fun.clone(),
            rewire_prop: self.rewire_prop,
            mixers: self.mixers.clone(),
            rng: self.rng.clone(),
            current_date: self.current_date,
            ndays: self.ndays,
            n_replicates: self.n_replicates,
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.population == other.population
            && self.entities == other.entities
            && self.directed == other.directed
            && self.viruses == other.viruses
            && self.tools == other.tools
            && self.state_labels == other.state_labels
            && self.parameters == other.parameters
            && self.db == other.db
            && self.queue == other.queue
            && self.use_queuing == other.use_queuing
            && self.current_date == other.current_date
            && self.ndays == other.ndays
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("nstates", &self.nstates())
            .field("n_viruses", &self.viruses.len())
            .field("n_tools", &self.tools.len())
            .field("current_date", &self.current_date)
            .field("ndays", &self.ndays)
            .finish()
    }
}

fn replace_neighbor(neighbors: &mut Vec<AgentId>, from: AgentId, to: AgentId) -> Result<()> {
    match neighbors.iter().position(|&n| n == from) {
        Some(k) => {
            neighbors[k] = to;
            Ok(())
        }
        None => Err(Error::Logic(format!(
            "neighbor lists lost symmetry: {} is missing",
            from
        ))),
    }
}

fn parse_id(token: Option<&str>, line: &str, lineno: usize) -> Result<usize> {
    let token = token
        .ok_or_else(|| Error::format(lineno, format!("expected two integers, got {:?}", line)))?;
    token
        .parse::<usize>()
        .map_err(|_| Error::format(lineno, format!("{:?} is not an integer id", token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use assert_approx_eq::assert_approx_eq;
    use std::sync::Mutex;

    fn sir_states(m: &mut Model) {
        m.add_state("Susceptible", Some(Arc::new(default_update_susceptible)))
            .unwrap();
        m.add_state("Infected", Some(Arc::new(default_update_infected)))
            .unwrap();
        m.add_state("Recovered", None).unwrap();
    }

    fn flu(beta: Real, rho: Real) -> Virus {
        let mut virus = Virus::new("flu");
        virus
            .set_state(1, 1, 2)
            .set_prob_infecting(beta)
            .set_prob_recovery(rho);
        virus
    }

    fn seed_on(agent: AgentId) -> crate::model::DistFn {
        Arc::new(move |vid, m: &mut Model| {
            let virus = m.virus(vid).clone();
            m.add_virus_to(agent, virus);
            Ok(())
        })
    }

    fn line_graph(m: &mut Model, n: usize) {
        let source: Vec<usize> = (0..n - 1).collect();
        let target: Vec<usize> = (1..n).collect();
        m.agents_from_edgelist(&source, &target, n, false).unwrap();
    }

    fn full_graph(m: &mut Model, n: usize) {
        let mut source = Vec::new();
        let mut target = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                source.push(i);
                target.push(j);
            }
        }
        m.agents_from_edgelist(&source, &target, n, false).unwrap();
    }

    fn infected_series(m: &Model, ndays: Day) -> Vec<i64> {
        (0..=ndays)
            .map(|d| m.db().hist_total_on(d, 1).unwrap())
            .collect()
    }

    #[test]
    fn sir_line_spreads_outward() {
        let mut m = Model::new();
        line_graph(&mut m, 5);
        sir_states(&mut m);
        m.add_virus_fun(flu(1.0, 0.0), seed_on(2)).unwrap();
        m.run(4, Some(42)).unwrap();
        assert_eq!(infected_series(&m, 4), vec![1, 3, 5, 5, 5]);
    }

    #[test]
    fn sir_fully_connected_burns_out() {
        let mut m = Model::new();
        full_graph(&mut m, 10);
        sir_states(&mut m);
        m.add_virus_fun(flu(0.5, 0.5), seed_on(0)).unwrap();
        m.run(20, Some(1)).unwrap();

        let secondary = m
            .db()
            .transmissions()
            .iter()
            .filter(|t| t.source.is_some())
            .count();
        assert!(secondary <= 9, "saw {} secondary infections", secondary);
        assert_eq!(m.db().hist_total_on(20, 1), Some(0));

        // conservation on every recorded day
        for d in 0..=20 {
            let total: i64 = (0..3).map(|s| m.db().hist_total_on(d, s).unwrap()).sum();
            assert_eq!(total, 10, "day {}", d);
        }
    }

    #[test]
    fn fully_connected_certain_infection_covers_everyone() {
        let n = 16;
        let ndays = (n as Real).log2().ceil() as u32;
        let mut m = Model::new();
        full_graph(&mut m, n);
        sir_states(&mut m);
        m.add_virus_fun(flu(1.0, 0.0), seed_on(0)).unwrap();
        m.run(ndays, Some(11)).unwrap();
        assert_eq!(m.db().hist_total_on(ndays as Day, 1), Some(n as i64));
    }

    #[test]
    fn two_half_tools_mix_to_three_quarters() {
        let mut m = Model::new();
        m.agents_empty_graph(1);
        sir_states(&mut m);

        let mut t1 = Tool::new("mask");
        t1.set_susceptibility_reduction(0.5);
        let mut t2 = Tool::new("vaccine");
        t2.set_susceptibility_reduction(0.5);
        let t1_id = m.add_tool_fun(t1, Arc::new(|_, _| Ok(()))).unwrap();
        let t2_id = m.add_tool_fun(t2, Arc::new(|_, _| Ok(()))).unwrap();

        let virus = flu(1.0, 0.0);

        // zero tools: every reduction is 0
        assert_approx_eq!(m.susceptibility_reduction(0, &virus), 0.0, 1e-12);
        assert_approx_eq!(m.transmission_reduction(0, &virus), 0.0, 1e-12);
        assert_approx_eq!(m.recovery_enhancer(0, &virus), 0.0, 1e-12);
        assert_approx_eq!(m.death_reduction(0, &virus), 0.0, 1e-12);

        let t1 = m.tool(t1_id).clone();
        let t2 = m.tool(t2_id).clone();
        m.add_tool_to(0, t1);
        m.add_tool_to(0, t2);
        m.flush_actions().unwrap();

        assert_approx_eq!(m.susceptibility_reduction(0, &virus), 0.75, 1e-12);
        let beta = virus.prob_infecting().get(m.parameters());
        let effective = beta * (1.0 - m.susceptibility_reduction(0, &virus));
        assert_approx_eq!(effective, 0.25, 1e-12);
    }

    #[test]
    fn same_day_double_transition_nets_once() {
        let mut m = Model::new();
        m.agents_empty_graph(1);
        sir_states(&mut m);
        m.add_global_action(
            Arc::new(|m: &mut Model| {
                // pushed I-last so the LIFO flush applies S -> I first,
                // then I -> R on the same day
                m.change_state(0, 2);
                m.change_state(0, 1);
                Ok(())
            }),
            "two jumps",
            1,
        );
        m.run(1, Some(0)).unwrap();

        assert_eq!(m.agent(0).state(), 2);
        assert_eq!(m.db().hist_total_on(1, 0), Some(0));
        assert_eq!(m.db().hist_total_on(1, 1), Some(0));
        assert_eq!(m.db().hist_total_on(1, 2), Some(1));

        let day1_moves: Vec<_> = m
            .db()
            .hist_transitions()
            .iter()
            .filter(|&&(d, _, _, c)| d == 1 && c != 0)
            .cloned()
            .collect();
        assert_eq!(day1_moves, vec![(1, 0, 2, 1)]);
    }

    fn replicate_model() -> Model {
        let mut m = Model::new();
        crate::network::agents_smallworld(&mut m, 30, 4, 0.0).unwrap();
        sir_states(&mut m);
        m.add_virus(flu(0.3, 0.3), 0.1).unwrap();
        m
    }

    fn collect_replicates(nthreads: usize) -> Vec<(Vec<(Day, StateId, i64)>, usize)> {
        let results = Arc::new(Mutex::new(vec![None; 8]));
        let sink = results.clone();
        let saver: SaveFn = Arc::new(move |i, model: &Model| {
            let series = model.db().hist_total().clone();
            let transmissions = model.db().transmissions().len();
            sink.lock()
                .map_err(|_| Error::Logic("poisoned sink".into()))?[i] =
                Some((series, transmissions));
            Ok(())
        });
        let mut m = replicate_model();
        m.run_multiple(10, 8, Some(7), Some(saver), nthreads).unwrap();
        assert_eq!(m.n_replicates(), 8);
        let collected = results.lock().unwrap();
        collected.iter().map(|r| r.clone().unwrap()).collect()
    }

    #[test]
    fn replicates_do_not_depend_on_thread_count() {
        let serial = collect_replicates(1);
        let parallel = collect_replicates(4);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn generation_time_of_a_daily_chain() {
        let mut m = Model::new();
        line_graph(&mut m, 4);
        sir_states(&mut m);
        m.add_virus_fun(flu(1.0, 0.0), seed_on(0)).unwrap();
        m.run(3, Some(3)).unwrap();

        assert_approx_eq!(m.db().mean_generation_time(0).unwrap(), 1.0, 1e-12);
        let rt = m.db().reproductive_numbers();
        assert_eq!(rt, vec![(0, 0, 1), (0, 1, 1), (0, 2, 1), (0, 3, 0)]);
        assert_approx_eq!(m.db().mean_reproductive_number(0, 0).unwrap(), 1.0, 1e-12);
    }

    #[test]
    fn single_agent_recovers_and_stays_recovered() {
        let mut m = Model::new();
        m.agents_empty_graph(1);
        sir_states(&mut m);
        m.add_virus_fun(flu(1.0, 1.0), seed_on(0)).unwrap();
        m.run(3, Some(9)).unwrap();
        assert_eq!(infected_series(&m, 3), vec![1, 0, 0, 0]);
        assert_eq!(m.db().hist_total_on(1, 2), Some(1));
        assert_eq!(m.db().hist_total_on(3, 2), Some(1));
        assert!(!m.agent(0).is_infected());
    }

    #[test]
    fn zero_virus_model_is_inert() {
        let mut m = Model::new();
        line_graph(&mut m, 5);
        sir_states(&mut m);
        m.run(6, Some(4)).unwrap();
        for d in 0..=6 {
            assert_eq!(m.db().hist_total_on(d, 0), Some(5), "day {}", d);
        }
        assert!(m.db().transmissions().is_empty());
    }

    #[test]
    fn fixed_seed_runs_are_identical() {
        let build = || {
            let mut m = Model::new();
            full_graph(&mut m, 12);
            sir_states(&mut m);
            m.add_virus(flu(0.4, 0.2), 0.25).unwrap();
            m
        };
        let mut a = build();
        let mut b = build();
        a.run(15, Some(123)).unwrap();
        b.run(15, Some(123)).unwrap();
        assert_eq!(a.db().hist_total(), b.db().hist_total());
        assert_eq!(a.db().transmissions(), b.db().transmissions());
    }

    #[test]
    fn reset_twice_equals_reset_once() {
        let mut m = Model::new();
        line_graph(&mut m, 5);
        sir_states(&mut m);
        m.add_virus_fun(flu(1.0, 0.0), seed_on(2)).unwrap();
        m.ndays = 4;
        m.reset().unwrap();
        let once = m.clone_replica();
        m.reset().unwrap();
        assert_eq!(m.population(), once.population());
        assert_eq!(m.db(), once.db());
        assert_eq!(m.queue(), once.queue());
    }

    #[test]
    fn queue_mask_limits_the_update_scope() {
        let touched = Arc::new(Mutex::new(0usize));
        let counter = touched.clone();
        let counting_susceptible: UpdateFn = Arc::new(move |id, m: &mut Model| {
            *counter.lock().map_err(|_| Error::Logic("poisoned".into()))? += 1;
            default_update_susceptible(id, m)
        });

        let mut m = Model::new();
        line_graph(&mut m, 5);
        m.add_state("Susceptible", Some(counting_susceptible)).unwrap();
        m.add_state("Infected", Some(Arc::new(default_update_infected)))
            .unwrap();
        m.add_state("Recovered", None).unwrap();
        m.add_virus_fun(flu(0.0, 0.0), seed_on(2)).unwrap();
        m.run(1, Some(5)).unwrap();

        // only the seeded agent's neighborhood was in scope
        assert_eq!(*touched.lock().unwrap(), 2);
        assert!(m.queue().is_active(2));
        assert!(!m.queue().is_active(0));
    }

    #[test]
    fn queue_counts_drop_when_the_virus_clears() {
        let mut m = Model::new();
        line_graph(&mut m, 3);
        sir_states(&mut m);
        m.add_virus_fun(flu(0.0, 1.0), seed_on(1)).unwrap();
        m.run(2, Some(6)).unwrap();
        for i in 0..3 {
            assert_eq!(m.queue().get(i), 0, "agent {}", i);
        }
    }

    #[test]
    fn build_surface_rejects_bad_input() {
        let mut m = Model::new();
        m.agents_empty_graph(3);
        sir_states(&mut m);

        match m.add_state("Infected", None) {
            Err(Error::Config(_)) => {}
            other => panic!("expected a config error, got {:?}", other),
        }
        assert!(m.add_virus(flu(1.0, 0.0), 1.5).is_err());

        let mut no_states = Virus::new("ghost");
        no_states.set_prob_infecting(1.0);
        assert!(m.add_virus(no_states, 0.1).is_err());

        let mut empty = Model::new();
        empty.add_state("Susceptible", None).unwrap();
        match empty.run(1, None) {
            Err(Error::Config(_)) => {}
            other => panic!("expected a config error, got {:?}", other),
        }

        let mut stateless = Model::new();
        stateless.agents_empty_graph(2);
        assert!(stateless.run(1, None).is_err());
    }

    #[test]
    fn out_of_range_state_is_rejected_at_flush() {
        let mut m = Model::new();
        m.agents_empty_graph(1);
        sir_states(&mut m);
        m.change_state(0, 99);
        match m.flush_actions() {
            Err(Error::Range(_)) => {}
            other => panic!("expected a range error, got {:?}", other),
        }
    }

    #[test]
    fn invalid_queue_delta_is_rejected_at_flush() {
        let mut m = Model::new();
        m.agents_empty_graph(1);
        sir_states(&mut m);
        m.queue_action(0, None, 5, None);
        match m.flush_actions() {
            Err(Error::Range(_)) => {}
            other => panic!("expected a range error, got {:?}", other),
        }
    }

    #[test]
    fn virus_with_unknown_parameter_fails_at_run() {
        let mut m = Model::new();
        m.agents_empty_graph(2);
        sir_states(&mut m);
        let mut virus = Virus::new("paramized");
        virus.set_state(1, 1, 2).set_prob_infecting("Infectiousness");
        m.add_virus(virus, 0.5).unwrap();
        match m.run(1, Some(0)) {
            Err(Error::Config(_)) => {}
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn named_parameters_drive_the_dynamics() {
        let mut m = Model::new();
        full_graph(&mut m, 6);
        sir_states(&mut m);
        m.add_param(1.0, "Infectiousness");
        let mut virus = Virus::new("paramized");
        virus
            .set_state(1, 1, 2)
            .set_prob_infecting("Infectiousness")
            .set_prob_recovery(0.0);
        m.add_virus_fun(virus, seed_on(0)).unwrap();
        m.run(1, Some(2)).unwrap();
        assert_eq!(m.db().hist_total_on(1, 1), Some(6));
    }

    #[test]
    fn failing_replicate_surfaces_but_keeps_earlier_output() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let sink = done.clone();
        let saver: SaveFn = Arc::new(move |i, _: &Model| {
            if i == 3 {
                return Err(Error::Config("replicate 3 exploded".into()));
            }
            sink.lock()
                .map_err(|_| Error::Logic("poisoned".into()))?
                .push(i);
            Ok(())
        });
        let mut m = replicate_model();
        assert!(m.run_multiple(5, 4, Some(2), Some(saver), 1).is_err());
        assert_eq!(&*done.lock().unwrap(), &[0, 1, 2]);
    }

    #[test]
    fn global_actions_register_and_remove() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let mut m = Model::new();
        m.agents_empty_graph(1);
        sir_states(&mut m);
        m.add_global_action(
            Arc::new(move |m: &mut Model| {
                sink.lock()
                    .map_err(|_| Error::Logic("poisoned".into()))?
                    .push(m.today());
                Ok(())
            }),
            "tracker",
            2,
        );
        assert!(m.get_global_action("tracker").is_ok());
        assert!(m.get_global_action("ghost").is_err());
        m.run(4, Some(0)).unwrap();
        assert_eq!(&*fired.lock().unwrap(), &[2]);

        m.rm_global_action("tracker").unwrap();
        assert!(m.rm_global_action("tracker").is_err());
    }

    #[test]
    fn entities_subscribe_through_actions() {
        let mut m = Model::new();
        m.agents_empty_graph(3);
        sir_states(&mut m);
        let office = m.add_entity("office");
        m.add_entity_to(0, office).unwrap();
        m.add_entity_to(2, office).unwrap();
        assert!(m.add_entity_to(0, 9).is_err());
        m.flush_actions().unwrap();
        assert_eq!(m.entity(office).agents(), &vec![0, 2]);
        assert_eq!(m.agent(0).entities(), &vec![office]);

        m.rm_entity_from(0, 0).unwrap();
        m.flush_actions().unwrap();
        assert_eq!(m.entity(office).agents(), &vec![2]);
    }

    #[test]
    fn mutation_hook_rewrites_the_instance() {
        let mut m = Model::new();
        line_graph(&mut m, 2);
        sir_states(&mut m);
        let mut virus = flu(0.0, 0.0);
        virus.set_mutation(Arc::new(|agent, index, m: &mut Model| {
            m.virus_instance_mut(agent, index)?
                .set_prob_infecting(0.123);
            Ok(())
        }));
        m.add_virus_fun(virus, seed_on(0)).unwrap();
        m.run(1, Some(1)).unwrap();
        let carried = &m.agent(0).viruses()[0];
        assert_approx_eq!(carried.prob_infecting().get(m.parameters()), 0.123, 1e-12);
    }

    #[test]
    fn rewire_hook_runs_each_day() {
        let mut m = Model::new();
        crate::network::agents_smallworld(&mut m, 12, 4, 0.0).unwrap();
        sir_states(&mut m);
        m.set_rewire_fun(Arc::new(crate::network::rewire_degseq));
        m.set_rewire_prop(0.3).unwrap();
        assert!(m.set_rewire_prop(1.2).is_err());
        m.run(3, Some(10)).unwrap();
        for i in 0..12 {
            assert_eq!(m.agent(i).degree(), 4);
        }
    }

    #[test]
    fn action_hooks_fire_inside_the_flush() {
        let mut m = Model::new();
        m.agents_empty_graph(2);
        sir_states(&mut m);
        // the hook chains a second action into the same flush
        let hook = m.add_action_hook(Arc::new(|_, m: &mut Model| {
            m.change_state(1, 1);
            Ok(())
        }));
        m.queue_action(0, Some(1), NO_ONE, Some(hook));
        m.flush_actions().unwrap();
        assert_eq!(m.agent(0).state(), 1);
        assert_eq!(m.agent(1).state(), 1);
    }

    #[test]
    fn fixed_count_seeding_lands_exactly() {
        let mut m = Model::new();
        line_graph(&mut m, 8);
        sir_states(&mut m);
        m.add_virus_n(flu(0.0, 0.0), 3).unwrap();
        m.run(1, Some(21)).unwrap();
        assert_eq!(m.db().hist_total_on(0, 1), Some(3));

        let mut crowded = Model::new();
        line_graph(&mut crowded, 2);
        sir_states(&mut crowded);
        crowded.add_virus_n(flu(0.0, 0.0), 5).unwrap();
        match crowded.run(1, Some(0)) {
            Err(Error::Range(_)) => {}
            other => panic!("expected a range error, got {:?}", other),
        }
    }

    #[test]
    fn tools_distribute_by_prevalence() {
        let mut m = Model::new();
        m.agents_empty_graph(10);
        sir_states(&mut m);
        let mut mask = Tool::new("mask");
        mask.set_transmission_reduction(0.3);
        m.add_tool(mask, 0.5).unwrap();
        m.run(1, Some(13)).unwrap();

        let holders = m.population().iter().filter(|a| a.n_tools() > 0).count();
        assert_eq!(holders, 5);
        let day0_mask: Vec<_> = m
            .db()
            .hist_tool()
            .iter()
            .filter(|&&(d, _, _, c)| d == 0 && c != 0)
            .cloned()
            .collect();
        assert_eq!(day0_mask, vec![(0, 0, 0, 5)]);

        let holder = m
            .population()
            .iter()
            .position(|a| a.n_tools() > 0)
            .unwrap();
        m.rm_tool_from(holder, 0).unwrap();
        assert!(m.rm_tool_from(holder, 3).is_err());
        m.flush_actions().unwrap();
        assert_eq!(m.agent(holder).n_tools(), 0);
    }

    #[test]
    fn write_edgelist_round_trips() {
        let mut m = Model::new();
        line_graph(&mut m, 4);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edges.txt");
        m.write_edgelist(&path).unwrap();

        let mut copy = Model::new();
        copy.agents_from_edgelist_file(&path, 1, false).unwrap();
        for i in 0..4 {
            assert_eq!(copy.agent(i).neighbors(), m.agent(i).neighbors());
        }
    }

    #[test]
    fn entity_ties_load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 0\n1 0\n2 1").unwrap();

        let mut m = Model::new();
        m.agents_empty_graph(3);
        m.add_entity("office");
        m.add_entity("school");
        m.load_agents_entities_ties(file.path(), 0).unwrap();
        assert_eq!(m.entity(0).size(), 2);
        assert_eq!(m.entity(1).agents(), &vec![2]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "9 0").unwrap();
        assert!(m.load_agents_entities_ties(bad.path(), 0).is_err());
    }

    #[test]
    fn params_files_merge_without_clobbering() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# params\nBeta : 0.9\nGamma : 0.1").unwrap();

        let mut m = Model::new();
        m.add_param(0.5, "Beta");
        m.read_params(file.path()).unwrap();
        assert_approx_eq!(m.get_param("Beta").unwrap(), 0.5, 1e-12);
        assert_approx_eq!(m.get_param("Gamma").unwrap(), 0.1, 1e-12);
        m.set_param("Beta", 0.7).unwrap();
        assert!(m.set_param("Missing", 1.0).is_err());
        assert!(m.get_param("Missing").is_err());
    }
}
