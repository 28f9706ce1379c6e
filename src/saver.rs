use crate::model::Model;
use crate::prelude::{Error, Result};
use std::sync::Arc;

/// Per-replicate callback run after each experiment with the replicate
/// index and the finished model.
pub type SaveFn = Arc<dyn Fn(usize, &Model) -> Result<()> + Send + Sync>;

/// Which CSV artifacts a saver writes. The default matches the batch
/// driver's: only the total history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveParts {
    pub total_hist: bool,
    pub virus_info: bool,
    pub virus_hist: bool,
    pub tool_info: bool,
    pub tool_hist: bool,
    pub transmission: bool,
    pub transition: bool,
    pub reproductive: bool,
    pub generation: bool,
}

impl Default for SaveParts {
    fn default() -> Self {
        SaveParts {
            total_hist: true,
            virus_info: false,
            virus_hist: false,
            tool_info: false,
            tool_hist: false,
            transmission: false,
            transition: false,
            reproductive: false,
            generation: false,
        }
    }
}

impl SaveParts {
    pub fn all() -> Self {
        SaveParts {
            total_hist: true,
            virus_info: true,
            virus_hist: true,
            tool_info: true,
            tool_hist: true,
            transmission: true,
            transition: true,
            reproductive: true,
            generation: true,
        }
    }
}

/// Build a saver that writes the selected artifacts per replicate. `fmt`
/// must contain exactly one `%`, replaced by the replicate index, e.g.
/// `out/run_%` becomes `out/run_3_total_hist.csv` for replicate 3.
pub fn make_save_run(fmt: &str, parts: SaveParts) -> Result<SaveFn> {
    let n_marks = fmt.matches('%').count();
    if n_marks != 1 {
        return Err(Error::Config(format!(
            "the filename template must contain exactly one '%', {:?} has {}",
            fmt, n_marks
        )));
    }

    let fmt = fmt.to_string();
    Ok(Arc::new(move |index, model| {
        let stem = fmt.replace('%', &index.to_string());
        let db = model.db();
        if parts.total_hist {
            db.write_total_hist(format!("{}_total_hist.csv", stem))?;
        }
        if parts.virus_info {
            db.write_virus_info(format!("{}_virus_info.csv", stem))?;
        }
        if parts.virus_hist {
            db.write_virus_hist(format!("{}_virus_hist.csv", stem))?;
        }
        if parts.tool_info {
            db.write_tool_info(format!("{}_tool_info.csv", stem))?;
        }
        if parts.tool_hist {
            db.write_tool_hist(format!("{}_tool_hist.csv", stem))?;
        }
        if parts.transmission {
            db.write_transmissions(format!("{}_transmission.csv", stem))?;
        }
        if parts.transition {
            db.write_transitions(format!("{}_transition.csv", stem))?;
        }
        if parts.reproductive {
            db.write_reproductive(format!("{}_reproductive.csv", stem))?;
        }
        if parts.generation {
            db.write_generation(format!("{}_generation.csv", stem))?;
        }
        Ok(())
    }))
}
