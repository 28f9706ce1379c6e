use crate::model::Model;
use crate::prelude::{AgentId, Day, Rate, Result, StateId, VirusId};
use crate::queue::{EVERYONE, NO_ONE};
use getset::{CopyGetters, Getters};
use std::fmt;
use std::sync::Arc;

/// Per-virus mutation hook, called once per carried virus at the end of
/// each day with the host id and the index of the virus in the host's
/// collection. It may rewrite the virus in place or enqueue actions.
pub type MutationFn = Arc<dyn Fn(AgentId, usize, &mut Model) -> Result<()> + Send + Sync>;

/// A transmissible process. The catalog entry registered on the model is
/// a template; agents carry their own clones, each remembering its host
/// and the day it was acquired.
///
/// The state trio configures where the host lands on acquisition
/// (`state_init`), on natural progression (`state_post`) and on
/// removal/recovery (`state_rm`, `None` keeps the current state). Each of
/// the three carries a queue delta applied when the matching action
/// flushes.
#[derive(Clone, Getters, CopyGetters)]
pub struct Virus {
    #[getset(get_copy = "pub")]
    id: VirusId,
    #[getset(get = "pub")]
    name: String,
    #[getset(get_copy = "pub")]
    host: Option<AgentId>,
    #[getset(get_copy = "pub")]
    date_acquired: Day,

    #[getset(get = "pub")]
    prob_infecting: Rate,
    #[getset(get = "pub")]
    prob_recovery: Rate,
    #[getset(get = "pub")]
    prob_death: Rate,
    #[getset(get = "pub")]
    incubation: Rate,

    #[getset(get_copy = "pub")]
    state_init: Option<StateId>,
    #[getset(get_copy = "pub")]
    state_post: Option<StateId>,
    #[getset(get_copy = "pub")]
    state_rm: Option<StateId>,

    #[getset(get_copy = "pub")]
    queue_init: i8,
    #[getset(get_copy = "pub")]
    queue_post: i8,
    #[getset(get_copy = "pub")]
    queue_rm: i8,

    mutation: Option<MutationFn>,
}

impl Virus {
    pub fn new(name: impl Into<String>) -> Self {
        Virus {
            id: 0,
            name: name.into(),
            host: None,
            date_acquired: -1,
            prob_infecting: Rate::Fixed(1.0),
            prob_recovery: Rate::Fixed(0.5),
            prob_death: Rate::Fixed(0.0),
            incubation: Rate::Fixed(0.0),
            state_init: None,
            state_post: None,
            state_rm: None,
            queue_init: EVERYONE,
            queue_post: NO_ONE,
            queue_rm: -EVERYONE,
            mutation: None,
        }
    }

    pub fn set_prob_infecting(&mut self, rate: impl Into<Rate>) -> &mut Self {
        self.prob_infecting = rate.into();
        self
    }

    pub fn set_prob_recovery(&mut self, rate: impl Into<Rate>) -> &mut Self {
        self.prob_recovery = rate.into();
        self
    }

    pub fn set_prob_death(&mut self, rate: impl Into<Rate>) -> &mut Self {
        self.prob_death = rate.into();
        self
    }

    pub fn set_incubation(&mut self, rate: impl Into<Rate>) -> &mut Self {
        self.incubation = rate.into();
        self
    }

    /// Configure the acquisition/progression/removal state trio.
    pub fn set_state(
        &mut self,
        init: impl Into<Option<StateId>>,
        post: impl Into<Option<StateId>>,
        rm: impl Into<Option<StateId>>,
    ) -> &mut Self {
        self.state_init = init.into();
        self.state_post = post.into();
        self.state_rm = rm.into();
        self
    }

    /// Configure the queue deltas matching the state trio.
    pub fn set_queue(&mut self, init: i8, post: i8, rm: i8) -> &mut Self {
        self.queue_init = init;
        self.queue_post = post;
        self.queue_rm = rm;
        self
    }

    pub fn set_mutation(&mut self, fun: MutationFn) -> &mut Self {
        self.mutation = Some(fun);
        self
    }

    pub fn mutation_fn(&self) -> Option<MutationFn> {
        self.mutation.clone()
    }

    pub(crate) fn set_id(&mut self, id: VirusId) {
        self.id = id;
    }

    pub(crate) fn attach(&mut self, host: AgentId, day: Day) {
        self.host = Some(host);
        self.date_acquired = day;
    }
}

impl fmt::Debug for Virus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Virus")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("date_acquired", &self.date_acquired)
            .field("state", &(self.state_init, self.state_post, self.state_rm))
            .field("queue", &(self.queue_init, self.queue_post, self.queue_rm))
            .finish()
    }
}

impl PartialEq for Virus {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.host == other.host
            && self.date_acquired == other.date_acquired
            && self.prob_infecting == other.prob_infecting
            && self.prob_recovery == other.prob_recovery
            && self.prob_death == other.prob_death
            && self.incubation == other.incubation
            && self.state_init == other.state_init
            && self.state_post == other.state_post
            && self.state_rm == other.state_rm
            && self.queue_init == other.queue_init
            && self.queue_post == other.queue_post
            && self.queue_rm == other.queue_rm
            && match (&self.mutation, &other.mutation) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}
