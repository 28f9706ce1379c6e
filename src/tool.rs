use crate::agent::Agent;
use crate::model::Model;
use crate::prelude::{Parameters, Rate, Real, StateId, ToolId};
use crate::queue::NO_ONE;
use crate::virus::Virus;
use getset::{CopyGetters, Getters};
use std::fmt;
use std::sync::Arc;

/// A tool effect evaluated against a concrete (agent, virus) pair.
pub type ToolFn = Arc<dyn Fn(&Agent, &Virus, &Model) -> Real + Send + Sync>;

/// One of a tool's four effect hooks: a literal reduction, a named model
/// parameter, or a function of the agent/virus pair. Values are expected
/// in `[0, 1]`; the mixers clamp the combined result.
#[derive(Clone)]
pub enum ToolEffect {
    Fixed(Real),
    Named(String),
    Fun(ToolFn),
}

impl ToolEffect {
    pub fn eval(&self, agent: &Agent, virus: &Virus, model: &Model, params: &Parameters) -> Real {
        match self {
            ToolEffect::Fixed(value) => *value,
            ToolEffect::Named(name) => Rate::Named(name.clone()).get(params),
            ToolEffect::Fun(fun) => fun(agent, virus, model),
        }
    }
}

impl Default for ToolEffect {
    fn default() -> Self {
        ToolEffect::Fixed(0.0)
    }
}

impl From<Real> for ToolEffect {
    fn from(value: Real) -> Self {
        ToolEffect::Fixed(value)
    }
}

impl From<&str> for ToolEffect {
    fn from(name: &str) -> Self {
        ToolEffect::Named(name.to_string())
    }
}

impl fmt::Debug for ToolEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolEffect::Fixed(value) => write!(f, "Fixed({})", value),
            ToolEffect::Named(name) => write!(f, "Named({:?})", name),
            ToolEffect::Fun(_) => write!(f, "Fun(..)"),
        }
    }
}

impl PartialEq for ToolEffect {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ToolEffect::Fixed(a), ToolEffect::Fixed(b)) => a == b,
            (ToolEffect::Named(a), ToolEffect::Named(b)) => a == b,
            (ToolEffect::Fun(a), ToolEffect::Fun(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A protective intervention held by an agent (vaccine, mask, ...).
/// Multiple tools combine multiplicatively on complements, see the mixer
/// module.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Tool {
    #[getset(get_copy = "pub")]
    id: ToolId,
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    susceptibility_reduction: ToolEffect,
    #[getset(get = "pub")]
    transmission_reduction: ToolEffect,
    #[getset(get = "pub")]
    recovery_enhancer: ToolEffect,
    #[getset(get = "pub")]
    death_reduction: ToolEffect,

    #[getset(get_copy = "pub")]
    state_init: Option<StateId>,
    #[getset(get_copy = "pub")]
    state_post: Option<StateId>,
    #[getset(get_copy = "pub")]
    queue_init: i8,
    #[getset(get_copy = "pub")]
    queue_post: i8,
}

impl Tool {
    pub fn new(name: impl Into<String>) -> Self {
        Tool {
            id: 0,
            name: name.into(),
            susceptibility_reduction: ToolEffect::default(),
            transmission_reduction: ToolEffect::default(),
            recovery_enhancer: ToolEffect::default(),
            death_reduction: ToolEffect::default(),
            state_init: None,
            state_post: None,
            queue_init: NO_ONE,
            queue_post: NO_ONE,
        }
    }

    pub fn set_susceptibility_reduction(&mut self, effect: impl Into<ToolEffect>) -> &mut Self {
        self.susceptibility_reduction = effect.into();
        self
    }

    pub fn set_transmission_reduction(&mut self, effect: impl Into<ToolEffect>) -> &mut Self {
        self.transmission_reduction = effect.into();
        self
    }

    pub fn set_recovery_enhancer(&mut self, effect: impl Into<ToolEffect>) -> &mut Self {
        self.recovery_enhancer = effect.into();
        self
    }

    pub fn set_death_reduction(&mut self, effect: impl Into<ToolEffect>) -> &mut Self {
        self.death_reduction = effect.into();
        self
    }

    pub fn set_state(
        &mut self,
        init: impl Into<Option<StateId>>,
        post: impl Into<Option<StateId>>,
    ) -> &mut Self {
        self.state_init = init.into();
        self.state_post = post.into();
        self
    }

    pub fn set_queue(&mut self, init: i8, post: i8) -> &mut Self {
        self.queue_init = init;
        self.queue_post = post;
        self
    }

    pub(crate) fn set_id(&mut self, id: ToolId) {
        self.id = id;
    }
}
