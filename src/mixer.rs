use crate::agent::Agent;
use crate::model::Model;
use crate::prelude::Real;
use crate::virus::Virus;
use std::fmt;
use std::sync::Arc;

/// Combines the matching effect of every tool an agent holds into one
/// probability reduction. Implementations must keep the identity
/// "zero tools => reduction 0".
pub type MixerFn = Arc<dyn Fn(&Agent, &Virus, &Model) -> Real + Send + Sync>;

/// The default mixers treat each tool as independent protection:
/// `1 - prod_k (1 - effect_k)`.
pub fn susceptibility_reduction_mixer(agent: &Agent, virus: &Virus, model: &Model) -> Real {
    let mut total = 1.0;
    for tool in agent.tools() {
        total *= 1.0
            - tool
                .susceptibility_reduction()
                .eval(agent, virus, model, model.parameters());
    }
    1.0 - total
}

pub fn transmission_reduction_mixer(agent: &Agent, virus: &Virus, model: &Model) -> Real {
    let mut total = 1.0;
    for tool in agent.tools() {
        total *= 1.0
            - tool
                .transmission_reduction()
                .eval(agent, virus, model, model.parameters());
    }
    1.0 - total
}

pub fn recovery_enhancer_mixer(agent: &Agent, virus: &Virus, model: &Model) -> Real {
    let mut total = 1.0;
    for tool in agent.tools() {
        total *= 1.0
            - tool
                .recovery_enhancer()
                .eval(agent, virus, model, model.parameters());
    }
    1.0 - total
}

pub fn death_reduction_mixer(agent: &Agent, virus: &Virus, model: &Model) -> Real {
    let mut total = 1.0;
    for tool in agent.tools() {
        total *= 1.0
            - tool
                .death_reduction()
                .eval(agent, virus, model, model.parameters());
    }
    1.0 - total
}

/// The model's four pluggable mixer slots.
#[derive(Clone)]
pub struct Mixers {
    pub susceptibility: MixerFn,
    pub transmission: MixerFn,
    pub recovery: MixerFn,
    pub death: MixerFn,
}

impl Default for Mixers {
    fn default() -> Self {
        Mixers {
            susceptibility: Arc::new(susceptibility_reduction_mixer),
            transmission: Arc::new(transmission_reduction_mixer),
            recovery: Arc::new(recovery_enhancer_mixer),
            death: Arc::new(death_reduction_mixer),
        }
    }
}

impl fmt::Debug for Mixers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mixers { .. }")
    }
}
