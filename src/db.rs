use crate::agent::Agent;
use crate::prelude::{AgentId, Day, Error, Real, Result, StateId, ToolId, VirusId};
use getset::Getters;
use ndarray::Array2;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// One recorded transmission: on `date`, `source` passed `virus` to
/// `target`. Seeded infections have no source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transmission {
    pub date: Day,
    pub source: Option<AgentId>,
    pub target: AgentId,
    pub virus: VirusId,
}

/// The accounting database. Running counters track the current day and
/// are rolled into append-only history rows once per day; the transmission
/// log, per-agent exposure days and per-virus first-seen days feed the
/// reproductive-number and generation-time derivations.
///
/// Counters are signed: the undo sequences used when an agent changes
/// state twice in one day pass through intermediate values that a
/// non-negative type could not represent.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct DataBase {
    nstates: usize,
    n_agents: usize,
    state_labels: Vec<String>,
    virus_names: Vec<String>,
    tool_names: Vec<String>,

    today_total: Vec<i64>,
    today_virus: Vec<Vec<i64>>,
    today_tool: Vec<Vec<i64>>,
    transitions: Array2<i64>,

    /// `(day, state, count)` rows, one block per recorded day.
    #[getset(get = "pub")]
    hist_total: Vec<(Day, StateId, i64)>,
    #[getset(get = "pub")]
    hist_virus: Vec<(Day, VirusId, StateId, i64)>,
    #[getset(get = "pub")]
    hist_tool: Vec<(Day, ToolId, StateId, i64)>,
    #[getset(get = "pub")]
    hist_transitions: Vec<(Day, StateId, StateId, i64)>,
    #[getset(get = "pub")]
    transmissions: Vec<Transmission>,

    exposure_day: HashMap<(VirusId, AgentId), Day>,
    first_seen: Vec<Option<Day>>,
}

impl DataBase {
    pub fn new() -> Self {
        DataBase {
            nstates: 0,
            n_agents: 0,
            state_labels: Vec::new(),
            virus_names: Vec::new(),
            tool_names: Vec::new(),
            today_total: Vec::new(),
            today_virus: Vec::new(),
            today_tool: Vec::new(),
            transitions: Array2::zeros((0, 0)),
            hist_total: Vec::new(),
            hist_virus: Vec::new(),
            hist_tool: Vec::new(),
            hist_transitions: Vec::new(),
            transmissions: Vec::new(),
            exposure_day: HashMap::new(),
            first_seen: Vec::new(),
        }
    }

    /// Register a virus in the catalog and hand back its id.
    pub fn record_virus(&mut self, name: impl Into<String>) -> VirusId {
        self.virus_names.push(name.into());
        self.first_seen.push(None);
        self.virus_names.len() - 1
    }

    pub fn record_tool(&mut self, name: impl Into<String>) -> ToolId {
        self.tool_names.push(name.into());
        self.tool_names.len() - 1
    }

    pub fn n_viruses(&self) -> usize {
        self.virus_names.len()
    }

    pub fn n_tools(&self) -> usize {
        self.tool_names.len()
    }

    /// Wipe history and re-count the running totals from the population.
    pub fn reset(&mut self, state_labels: &[String], population: &[Agent]) {
        self.nstates = state_labels.len();
        self.n_agents = population.len();
        self.state_labels = state_labels.to_vec();

        self.today_total = vec![0; self.nstates];
        self.today_virus = vec![vec![0; self.nstates]; self.virus_names.len()];
        self.today_tool = vec![vec![0; self.nstates]; self.tool_names.len()];
        self.transitions = Array2::zeros((self.nstates, self.nstates));

        self.hist_total.clear();
        self.hist_virus.clear();
        self.hist_tool.clear();
        self.hist_transitions.clear();
        self.transmissions.clear();
        self.exposure_day.clear();
        for seen in self.first_seen.iter_mut() {
            *seen = None;
        }

        for agent in population {
            self.today_total[agent.state()] += 1;
            for virus in agent.viruses() {
                self.today_virus[virus.id()][agent.state()] += 1;
            }
            for tool in agent.tools() {
                self.today_tool[tool.id()][agent.state()] += 1;
            }
        }
    }

    /// Move one agent between state counters. With `undo` the change is
    /// reversed instead, which is how a same-day second transition rolls
    /// back its first accounting. Counters are inert until `reset` sizes
    /// them.
    pub fn update_state(&mut self, from: StateId, to: StateId, undo: bool) {
        let sign = if undo { -1 } else { 1 };
        bump(&mut self.today_total, from, -sign);
        bump(&mut self.today_total, to, sign);
        if from < self.nstates && to < self.nstates {
            self.transitions[[from, to]] += sign;
        }
    }

    pub fn update_virus(&mut self, virus: VirusId, from: StateId, to: StateId) {
        if let Some(counts) = self.today_virus.get_mut(virus) {
            bump(counts, from, -1);
            bump(counts, to, 1);
        }
    }

    pub fn update_tool(&mut self, tool: ToolId, from: StateId, to: StateId) {
        if let Some(counts) = self.today_tool.get_mut(tool) {
            bump(counts, from, -1);
            bump(counts, to, 1);
        }
    }

    pub(crate) fn virus_attached(&mut self, virus: VirusId, state: StateId) {
        if let Some(counts) = self.today_virus.get_mut(virus) {
            bump(counts, state, 1);
        }
    }

    pub(crate) fn virus_detached(&mut self, virus: VirusId, state: StateId) {
        if let Some(counts) = self.today_virus.get_mut(virus) {
            bump(counts, state, -1);
        }
    }

    pub(crate) fn tool_attached(&mut self, tool: ToolId, state: StateId) {
        if let Some(counts) = self.today_tool.get_mut(tool) {
            bump(counts, state, 1);
        }
    }

    pub(crate) fn tool_detached(&mut self, tool: ToolId, state: StateId) {
        if let Some(counts) = self.today_tool.get_mut(tool) {
            bump(counts, state, -1);
        }
    }

    /// Append the transmission edge and note the target's exposure day.
    /// The first infection by a virus also stamps its first-seen day.
    pub fn record_transmission(
        &mut self,
        source: Option<AgentId>,
        target: AgentId,
        virus: VirusId,
        date: Day,
    ) {
        self.transmissions.push(Transmission {
            date,
            source,
            target,
            virus,
        });
        self.exposure_day.entry((virus, target)).or_insert(date);
        if self.first_seen[virus].is_none() {
            self.first_seen[virus] = Some(date);
        }
    }

    /// Snapshot the running counters into the history for `day`. The
    /// counters themselves roll forward unchanged; the transition matrix
    /// restarts from zero for the next day.
    pub fn record(&mut self, day: Day) {
        debug_assert_eq!(
            self.today_total.iter().sum::<i64>(),
            self.n_agents as i64,
            "state counts no longer add up to the population size"
        );

        for (state, &count) in self.today_total.iter().enumerate() {
            self.hist_total.push((day, state, count));
        }
        for (virus, counts) in self.today_virus.iter().enumerate() {
            for (state, &count) in counts.iter().enumerate() {
                self.hist_virus.push((day, virus, state, count));
            }
        }
        for (tool, counts) in self.today_tool.iter().enumerate() {
            for (state, &count) in counts.iter().enumerate() {
                self.hist_tool.push((day, tool, state, count));
            }
        }
        for from in 0..self.nstates {
            for to in 0..self.nstates {
                self.hist_transitions
                    .push((day, from, to, self.transitions[[from, to]]));
            }
        }
        self.transitions.fill(0);
    }

    pub fn today_total(&self) -> &[i64] {
        &self.today_total
    }

    pub fn state_labels(&self) -> &[String] {
        &self.state_labels
    }

    /// Count of `state` on `day`, if recorded.
    pub fn hist_total_on(&self, day: Day, state: StateId) -> Option<i64> {
        self.hist_total
            .iter()
            .find(|&&(d, s, _)| d == day && s == state)
            .map(|&(_, _, c)| c)
    }

    pub fn first_seen(&self, virus: VirusId) -> Option<Day> {
        self.first_seen.get(virus).copied().flatten()
    }

    pub fn exposure_day(&self, virus: VirusId, agent: AgentId) -> Option<Day> {
        self.exposure_day.get(&(virus, agent)).copied()
    }

    /// Out-degree of the transmission DAG per (virus, source): every
    /// agent ever exposed appears, including those with no secondary
    /// infections. Rows come out sorted by virus then source.
    pub fn reproductive_numbers(&self) -> Vec<(VirusId, AgentId, usize)> {
        let mut counts: HashMap<(VirusId, AgentId), usize> = HashMap::new();
        for &(virus, agent) in self.exposure_day.keys() {
            counts.insert((virus, agent), 0);
        }
        for t in &self.transmissions {
            if let Some(source) = t.source {
                *counts.entry((t.virus, source)).or_insert(0) += 1;
            }
        }
        let mut rows: Vec<(VirusId, AgentId, usize)> = counts
            .into_iter()
            .map(|((virus, agent), count)| (virus, agent, count))
            .collect();
        rows.sort_unstable();
        rows
    }

    /// Mean out-degree restricted to agents first infected by `virus` on
    /// `day`.
    pub fn mean_reproductive_number(&self, virus: VirusId, day: Day) -> Option<Real> {
        let rows = self.reproductive_numbers();
        let mut total = 0usize;
        let mut n = 0usize;
        for (v, agent, count) in rows {
            if v == virus && self.exposure_day(v, agent) == Some(day) {
                total += count;
                n += 1;
            }
        }
        if n == 0 {
            return None;
        }
        Some(total as Real / n as Real)
    }

    /// Mean, over transmission edges, of the day difference between the
    /// source's own exposure and the transmission event.
    pub fn mean_generation_time(&self, virus: VirusId) -> Option<Real> {
        let mut total = 0.0;
        let mut n = 0usize;
        for t in &self.transmissions {
            if t.virus != virus {
                continue;
            }
            let source = match t.source {
                Some(source) => source,
                None => continue,
            };
            if let Some(exposed) = self.exposure_day(virus, source) {
                total += (t.date - exposed) as Real;
                n += 1;
            }
        }
        if n == 0 {
            return None;
        }
        Some(total / n as Real)
    }

    // ------------------------------------------------------------------
    // CSV writers. Headers are always written, even for empty runs.
    // ------------------------------------------------------------------

    pub fn write_total_hist(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            date: Day,
            state: &'a str,
            counts: i64,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["date", "state", "counts"])?;
        for &(date, state, counts) in &self.hist_total {
            wtr.serialize(Row {
                date,
                state: &self.state_labels[state],
                counts,
            })
            .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_virus_info(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            id: VirusId,
            name: &'a str,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["id", "name"])?;
        for (id, name) in self.virus_names.iter().enumerate() {
            wtr.serialize(Row { id, name })
                .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_virus_hist(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            date: Day,
            virus_id: VirusId,
            state: &'a str,
            counts: i64,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["date", "virus_id", "state", "counts"])?;
        for &(date, virus_id, state, counts) in &self.hist_virus {
            wtr.serialize(Row {
                date,
                virus_id,
                state: &self.state_labels[state],
                counts,
            })
            .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_tool_info(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            id: ToolId,
            name: &'a str,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["id", "name"])?;
        for (id, name) in self.tool_names.iter().enumerate() {
            wtr.serialize(Row { id, name })
                .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_tool_hist(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            date: Day,
            tool_id: ToolId,
            state: &'a str,
            counts: i64,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["date", "tool_id", "state", "counts"])?;
        for &(date, tool_id, state, counts) in &self.hist_tool {
            wtr.serialize(Row {
                date,
                tool_id,
                state: &self.state_labels[state],
                counts,
            })
            .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_transmissions(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row {
            date: Day,
            source: i64,
            target: AgentId,
            virus_id: VirusId,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["date", "source", "target", "virus_id"])?;
        for t in &self.transmissions {
            wtr.serialize(Row {
                date: t.date,
                source: t.source.map(|s| s as i64).unwrap_or(-1),
                target: t.target,
                virus_id: t.virus,
            })
            .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_transitions(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            date: Day,
            from: &'a str,
            to: &'a str,
            counts: i64,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["date", "from", "to", "counts"])?;
        for &(date, from, to, counts) in &self.hist_transitions {
            wtr.serialize(Row {
                date,
                from: &self.state_labels[from],
                to: &self.state_labels[to],
                counts,
            })
            .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_reproductive(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row {
            virus_id: VirusId,
            source: AgentId,
            rt: usize,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["virus_id", "source", "rt"])?;
        for (virus_id, source, rt) in self.reproductive_numbers() {
            wtr.serialize(Row {
                virus_id,
                source,
                rt,
            })
            .map_err(|e| Error::from_csv(path, e))?;
        }
        finish(path, wtr)
    }

    pub fn write_generation(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct Row {
            virus_id: VirusId,
            mean_generation_time: Real,
        }
        let path = path.as_ref();
        let mut wtr = writer(path, &["virus_id", "mean_generation_time"])?;
        for virus_id in 0..self.virus_names.len() {
            if let Some(mean_generation_time) = self.mean_generation_time(virus_id) {
                wtr.serialize(Row {
                    virus_id,
                    mean_generation_time,
                })
                .map_err(|e| Error::from_csv(path, e))?;
            }
        }
        finish(path, wtr)
    }
}

impl Default for DataBase {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counts: &mut Vec<i64>, idx: usize, delta: i64) {
    if let Some(slot) = counts.get_mut(idx) {
        *slot += delta;
    }
}

fn writer(path: &Path, header: &[&str]) -> Result<csv::Writer<std::fs::File>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| Error::from_csv(path, e))?;
    wtr.write_record(header)
        .map_err(|e| Error::from_csv(path, e))?;
    Ok(wtr)
}

fn finish(path: &Path, mut wtr: csv::Writer<std::fs::File>) -> Result<()> {
    wtr.flush().map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use assert_approx_eq::assert_approx_eq;

    fn labels() -> Vec<String> {
        vec!["S".to_string(), "I".to_string(), "R".to_string()]
    }

    fn fresh_db(n_agents: usize) -> DataBase {
        let mut db = DataBase::new();
        db.record_virus("flu");
        let population: Vec<Agent> = (0..n_agents).map(Agent::new).collect();
        db.reset(&labels(), &population);
        db
    }

    #[test]
    fn reset_counts_baseline_states() {
        let db = fresh_db(5);
        assert_eq!(db.today_total(), &[5, 0, 0]);
    }

    #[test]
    fn undo_yields_net_transition() {
        let mut db = fresh_db(3);
        // agent goes S -> I, then the same day I -> R: the flush calls
        // undo(S -> I) followed by apply(S -> R).
        db.update_state(0, 1, false);
        db.update_state(0, 1, true);
        db.update_state(0, 2, false);
        db.record(0);
        assert_eq!(db.today_total(), &[2, 0, 1]);
        assert_eq!(db.hist_total_on(0, 0), Some(2));
        assert_eq!(db.hist_total_on(0, 1), Some(0));
        assert_eq!(db.hist_total_on(0, 2), Some(1));
        // the transition history holds the single net S -> R jump
        let s_to_r: Vec<_> = db
            .hist_transitions()
            .iter()
            .filter(|&&(_, _, _, c)| c != 0)
            .collect();
        assert_eq!(s_to_r, vec![&(0, 0, 2, 1)]);
    }

    #[test]
    fn counters_roll_forward_between_days() {
        let mut db = fresh_db(2);
        db.update_state(0, 1, false);
        db.record(0);
        db.record(1);
        assert_eq!(db.hist_total_on(1, 1), Some(1));
        // transitions restart every day
        assert_eq!(
            db.hist_transitions()
                .iter()
                .filter(|&&(d, _, _, c)| d == 1 && c != 0)
                .count(),
            0
        );
    }

    #[test]
    fn transmission_log_feeds_rt() {
        let mut db = fresh_db(4);
        db.record_transmission(None, 0, 0, 0);
        db.record_transmission(Some(0), 1, 0, 1);
        db.record_transmission(Some(0), 2, 0, 1);
        db.record_transmission(Some(1), 3, 0, 2);
        let rows = db.reproductive_numbers();
        assert_eq!(rows, vec![(0, 0, 2), (0, 1, 1), (0, 2, 0), (0, 3, 0)]);
        assert_approx_eq!(db.mean_reproductive_number(0, 0).unwrap(), 2.0, 1e-12);
        assert_approx_eq!(db.mean_reproductive_number(0, 1).unwrap(), 0.5, 1e-12);
    }

    #[test]
    fn generation_time_over_a_chain() {
        let mut db = fresh_db(4);
        db.record_transmission(None, 0, 0, 0);
        db.record_transmission(Some(0), 1, 0, 1);
        db.record_transmission(Some(1), 2, 0, 2);
        db.record_transmission(Some(2), 3, 0, 3);
        assert_approx_eq!(db.mean_generation_time(0).unwrap(), 1.0, 1e-12);
        assert_eq!(db.first_seen(0), Some(0));
    }

    #[test]
    fn exposure_day_keeps_the_first_date() {
        let mut db = fresh_db(2);
        db.record_transmission(None, 0, 0, 0);
        db.record_transmission(Some(1), 0, 0, 5);
        assert_eq!(db.exposure_day(0, 0), Some(0));
    }

    #[test]
    fn csv_files_carry_headers() {
        let db = fresh_db(1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty_transmission.csv");
        db.write_transmissions(&path).unwrap();
        let data = std::fs::read_to_string(&path).unwrap();
        assert_eq!(data.trim(), "date,source,target,virus_id");
    }

    #[test]
    fn total_hist_csv_rows() {
        let mut db = fresh_db(2);
        db.update_state(0, 1, false);
        db.record(0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist.csv");
        db.write_total_hist(&path).unwrap();
        let data = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines[0], "date,state,counts");
        assert_eq!(lines[1], "0,S,1");
        assert_eq!(lines[2], "0,I,1");
        assert_eq!(lines[3], "0,R,0");
    }
}
