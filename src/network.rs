use crate::model::Model;
use crate::prelude::{AgentId, Error, Real, Result};

/// Build a Watts-Strogatz small-world population: a ring lattice where
/// every agent touches its `k/2` nearest neighbors on each side, then each
/// lattice edge is rewired with probability `p` to a uniformly chosen
/// endpoint.
pub fn agents_smallworld(model: &mut Model, n: usize, k: usize, p: Real) -> Result<()> {
    if n == 0 {
        return Err(Error::Config("cannot build an empty smallworld".into()));
    }
    if k >= n {
        return Err(Error::Range(format!(
            "mean degree {} does not fit a population of {}",
            k, n
        )));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Range(format!(
            "rewiring probability must be in [0, 1], got {}",
            p
        )));
    }

    model.agents_empty_graph(n);
    let half = (k / 2).max(1);
    let mut edges: Vec<(AgentId, AgentId)> = Vec::with_capacity(n * half);
    for i in 0..n {
        for step in 1..=half {
            edges.push((i, (i + step) % n));
        }
    }

    for (i, j) in edges {
        let j = if model.runif() < p {
            // pick a replacement endpoint avoiding self-loops
            let mut candidate = (model.runif() * n as Real).floor() as usize % n;
            let mut guard = 0;
            while candidate == i && guard < 16 {
                candidate = (model.runif() * n as Real).floor() as usize % n;
                guard += 1;
            }
            if candidate == i {
                j
            } else {
                candidate
            }
        } else {
            j
        };
        if i != j {
            model.add_neighbor(i, j);
        }
    }
    Ok(())
}

/// Degree-preserving rewiring: swap the far endpoints of random edge
/// pairs. `prop` scales how many swaps are attempted relative to the
/// total neighbor-slot count. Swaps that would create self-loops or
/// parallel edges are skipped, so every agent keeps its degree.
pub fn rewire_degseq(model: &mut Model, prop: Real) -> Result<()> {
    let n = model.size();
    if n < 2 {
        return Ok(());
    }
    let total_slots: usize = (0..n).map(|i| model.agent(i).degree()).sum();
    let nswaps = (prop * total_slots as Real / 2.0).floor() as usize;

    for _ in 0..nswaps {
        let a = (model.runif() * n as Real).floor() as usize % n;
        let b = (model.runif() * n as Real).floor() as usize % n;
        let da = model.agent(a).degree();
        let db = model.agent(b).degree();
        if a == b || da == 0 || db == 0 {
            continue;
        }
        let ia = (model.runif() * da as Real).floor() as usize % da;
        let ib = (model.runif() * db as Real).floor() as usize % db;
        let x = model.agent(a).neighbors()[ia];
        let y = model.agent(b).neighbors()[ib];

        // after the swap: a-y and b-x
        if x == b || y == a || x == y {
            continue;
        }
        if model.agent(a).neighbors().contains(&y) || model.agent(b).neighbors().contains(&x) {
            continue;
        }
        model.swap_edge_endpoints(a, ia, b, ib)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn smallworld_without_rewiring_is_a_lattice() {
        let mut m = Model::new();
        m.seed(1);
        agents_smallworld(&mut m, 10, 4, 0.0).unwrap();
        for i in 0..10 {
            assert_eq!(m.agent(i).degree(), 4, "agent {} degree", i);
        }
    }

    #[test]
    fn smallworld_rejects_bad_arguments() {
        let mut m = Model::new();
        assert!(agents_smallworld(&mut m, 0, 2, 0.0).is_err());
        assert!(agents_smallworld(&mut m, 5, 8, 0.0).is_err());
        assert!(agents_smallworld(&mut m, 5, 2, 1.5).is_err());
    }

    #[test]
    fn degseq_rewiring_preserves_degrees() {
        let mut m = Model::new();
        m.seed(7);
        agents_smallworld(&mut m, 20, 4, 0.0).unwrap();
        let before: Vec<usize> = (0..20).map(|i| m.agent(i).degree()).collect();
        rewire_degseq(&mut m, 0.5).unwrap();
        let after: Vec<usize> = (0..20).map(|i| m.agent(i).degree()).collect();
        assert_eq!(before, after);
        // symmetry still holds
        for i in 0..20 {
            for &j in m.agent(i).neighbors() {
                assert!(m.agent(j).neighbors().contains(&i), "{} <-> {}", i, j);
            }
        }
    }
}
