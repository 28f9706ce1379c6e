use crate::model::Model;
use crate::prelude::{AgentId, Real, Result};

const CERTAIN: Real = 1.0 - 1e-10;

/// Select at most one event out of a set of per-event probabilities.
///
/// The no-event probability is `prod(1 - p_i)`. Events with probability
/// ~1 are certain: one of them is picked uniformly. Otherwise the residual
/// mass is split proportionally to `p_i * p_none / (1 - p_i)`, so a single
/// draw decides both whether anything happens and which event wins.
pub fn roulette(probs: &[Real], m: &mut Model) -> Option<usize> {
    if probs.is_empty() {
        return None;
    }

    let mut p_none = 1.0;
    let mut certain: Vec<usize> = Vec::new();
    for (i, &p) in probs.iter().enumerate() {
        p_none *= 1.0 - p;
        if p >= CERTAIN {
            certain.push(i);
        }
    }

    let r = m.runif();
    if !certain.is_empty() {
        return Some(certain[(r * certain.len() as Real).floor() as usize % certain.len()]);
    }
    if r > 1.0 - p_none {
        return None;
    }

    let weights: Vec<Real> = probs.iter().map(|&p| p * p_none / (1.0 - p)).collect();
    let total: Real = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut cumsum = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumsum += w / total * (1.0 - p_none);
        if r < cumsum {
            return Some(i);
        }
    }
    Some(probs.len() - 1)
}

/// Stock update for susceptible-like states: scan virus-carrying
/// neighbors, weight each of their viruses by
/// `beta * (1 - transmission_reduction(src)) * (1 - susceptibility_reduction(dst))`
/// and acquire at most one of them.
pub fn default_update_susceptible(id: AgentId, m: &mut Model) -> Result<()> {
    if m.agent(id).is_infected() {
        return Ok(());
    }

    let mut probs: Vec<Real> = Vec::new();
    let mut sources: Vec<(AgentId, usize)> = Vec::new();
    for k in 0..m.agent(id).neighbors().len() {
        let neighbor = m.agent(id).neighbors()[k];
        for vi in 0..m.agent(neighbor).n_viruses() {
            let virus = &m.agent(neighbor).viruses()[vi];
            let beta = virus.prob_infecting().get(m.parameters());
            let p = beta
                * (1.0 - m.transmission_reduction(neighbor, virus))
                * (1.0 - m.susceptibility_reduction(id, virus));
            probs.push(p);
            sources.push((neighbor, vi));
        }
    }

    if let Some(which) = roulette(&probs, m) {
        let (neighbor, vi) = sources[which];
        let virus = m.agent(neighbor).viruses()[vi].clone();
        m.add_virus_to(id, virus);
    }
    Ok(())
}

/// Stock update for infected-like states: competing risks per carried
/// virus between dying (`mu * (1 - death_reduction)`) and recovering
/// (`1 - (1 - rho) * (1 - recovery_enhancer)`). Recovery removes the
/// winning virus and lands on its `state_rm`; a fatal course sheds every
/// virus and settles in the winner's `state_post`.
pub fn default_update_infected(id: AgentId, m: &mut Model) -> Result<()> {
    let n_viruses = m.agent(id).n_viruses();
    if n_viruses == 0 {
        return Ok(());
    }

    // Even slots die, odd slots recover.
    let mut probs: Vec<Real> = Vec::with_capacity(2 * n_viruses);
    for vi in 0..n_viruses {
        let virus = &m.agent(id).viruses()[vi];
        let mu = virus.prob_death().get(m.parameters());
        let rho = virus.prob_recovery().get(m.parameters());
        probs.push(mu * (1.0 - m.death_reduction(id, virus)));
        probs.push(1.0 - (1.0 - rho) * (1.0 - m.recovery_enhancer(id, virus)));
    }

    if let Some(which) = roulette(&probs, m) {
        let vi = which / 2;
        if which % 2 == 0 {
            let post = m.agent(id).viruses()[vi].state_post();
            for k in 0..n_viruses {
                let queue = m.agent(id).viruses()[k].queue_rm();
                m.rm_virus_from_with(id, k, post, queue)?;
            }
        } else {
            m.rm_virus_from(id, vi)?;
        }
    }
    Ok(())
}

/// Stock update for exposed-like states: draw each virus's incubation
/// hook; when one fires the agent advances to that virus's `state_post`,
/// keeping the virus.
pub fn default_update_exposed(id: AgentId, m: &mut Model) -> Result<()> {
    let n_viruses = m.agent(id).n_viruses();
    if n_viruses == 0 {
        return Ok(());
    }

    let mut probs: Vec<Real> = Vec::with_capacity(n_viruses);
    for vi in 0..n_viruses {
        let virus = &m.agent(id).viruses()[vi];
        probs.push(virus.incubation().get(m.parameters()));
    }

    if let Some(which) = roulette(&probs, m) {
        let virus = &m.agent(id).viruses()[which];
        let (post, queue) = (virus.state_post(), virus.queue_post());
        if let Some(post) = post {
            m.change_state_q(id, post, queue);
        }
    }
    Ok(())
}
