pub use crate::action::ActionHookFn;
pub use crate::adjlist::AdjList;
pub use crate::agent::Agent;
pub use crate::db::{DataBase, Transmission};
pub use crate::entity::Entity;
pub use crate::error::{Error, Result};
pub use crate::global::{GlobalAction, GlobalFn, EVERY_DAY};
pub use crate::mixer::MixerFn;
pub use crate::model::{DistFn, Model, RewireFn, UpdateFn};
pub use crate::params::{Parameters, Rate};
pub use crate::queue::{TransmissionQueue, EVERYONE, NO_ONE, ONLY_SELF};
pub use crate::saver::{make_save_run, SaveFn, SaveParts};
pub use crate::tool::{Tool, ToolEffect};
pub use crate::update::{
    default_update_exposed, default_update_infected, default_update_susceptible,
};
pub use crate::virus::{MutationFn, Virus};

pub type Real = f64;
pub type Day = i32;
pub type AgentId = usize;
pub type StateId = usize;
pub type VirusId = usize;
pub type ToolId = usize;
pub type EntityId = usize;
