use crate::prelude::{AgentId, Error, Result};
use getset::CopyGetters;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Adjacency list read from a whitespace-delimited edgelist. Duplicate
/// edges bump a per-edge counter instead of creating multi-edges, and
/// undirected lists hold both directions. Neighbor sets iterate in
/// ascending id order, which keeps downstream simulations deterministic.
#[derive(Debug, Clone, Default, CopyGetters)]
pub struct AdjList {
    dat: Vec<BTreeMap<AgentId, u32>>,
    #[getset(get_copy = "pub")]
    directed: bool,
    #[getset(get_copy = "pub")]
    n_edges: usize,
}

impl AdjList {
    pub fn new(size: usize, directed: bool) -> Self {
        AdjList {
            dat: vec![BTreeMap::new(); size],
            directed,
            n_edges: 0,
        }
    }

    /// Read `src dst` integer pairs, one per line, skipping `skip` header
    /// lines. Blank lines are ignored.
    pub fn read_edgelist(path: impl AsRef<Path>, skip: usize, directed: bool) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        let mut al = AdjList::new(0, directed);
        for (lineno, raw) in data.lines().enumerate() {
            if lineno < skip {
                continue;
            }
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let (i, j) = parse_edge(line, lineno + 1)?;
            al.push_edge(i, j);
        }
        Ok(al)
    }

    pub fn from_edgelist(
        source: &[AgentId],
        target: &[AgentId],
        size: usize,
        directed: bool,
    ) -> Result<Self> {
        if source.len() != target.len() {
            return Err(Error::Config(format!(
                "source and target lengths differ ({} vs {})",
                source.len(),
                target.len()
            )));
        }
        let mut al = AdjList::new(size, directed);
        for (&i, &j) in source.iter().zip(target.iter()) {
            al.push_edge(i, j);
        }
        Ok(al)
    }

    /// Insert one edge, growing the vertex set as needed. Existing edges
    /// only increase their duplicate counter.
    pub fn push_edge(&mut self, i: AgentId, j: AgentId) {
        let top = i.max(j) + 1;
        if top > self.dat.len() {
            self.dat.resize(top, BTreeMap::new());
        }
        *self.dat[i].entry(j).or_insert(0) += 1;
        if !self.directed {
            *self.dat[j].entry(i).or_insert(0) += 1;
        }
        self.n_edges += 1;
    }

    pub fn vcount(&self) -> usize {
        self.dat.len()
    }

    pub fn ecount(&self) -> usize {
        self.n_edges
    }

    pub fn neighbors(&self, i: AgentId) -> Result<&BTreeMap<AgentId, u32>> {
        self.dat
            .get(i)
            .ok_or_else(|| Error::Range(format!("the vertex id {} is not in the network", i)))
    }
}

fn parse_edge(line: &str, lineno: usize) -> Result<(AgentId, AgentId)> {
    let mut tokens = line.split_whitespace();
    let i = parse_token(tokens.next(), line, lineno)?;
    let j = parse_token(tokens.next(), line, lineno)?;
    Ok((i, j))
}

fn parse_token(token: Option<&str>, line: &str, lineno: usize) -> Result<AgentId> {
    let token =
        token.ok_or_else(|| Error::format(lineno, format!("expected `src dst`, got {:?}", line)))?;
    token
        .parse::<AgentId>()
        .map_err(|_| Error::format(lineno, format!("{:?} is not an integer vertex id", token)))
}
