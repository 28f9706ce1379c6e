use outbreak::network::agents_smallworld;
use outbreak::prelude::*;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::sync::Arc;

/// Run configuration, read from a TOML file when one is given on the
/// command line.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pop_size: usize,
    mean_degree: usize,
    rewire: Real,
    prevalence: Real,
    infectiousness: Real,
    recovery: Real,
    ndays: u32,
    replicates: usize,
    threads: usize,
    seed: u64,
    output: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pop_size: 10_000,
            mean_degree: 8,
            rewire: 0.1,
            prevalence: 0.01,
            infectiousness: 0.9,
            recovery: 0.3,
            ndays: 60,
            replicates: 4,
            threads: 2,
            seed: 42,
            output: String::from("sir_%"),
        }
    }
}

fn build_model(cfg: &Config) -> Result<Model> {
    let mut model = Model::new();
    model.set_name("sir");
    model.seed(cfg.seed);
    agents_smallworld(&mut model, cfg.pop_size, cfg.mean_degree, cfg.rewire)?;

    model.add_state(
        "Susceptible",
        Some(Arc::new(default_update_susceptible)),
    )?;
    model.add_state("Infected", Some(Arc::new(default_update_infected)))?;
    model.add_state("Recovered", None)?;

    model.add_param(cfg.infectiousness, "Infectiousness");
    model.add_param(cfg.recovery, "Prob. of Recovery");

    let mut virus = Virus::new("flu");
    virus
        .set_state(1, 1, 2)
        .set_prob_infecting("Infectiousness")
        .set_prob_recovery("Prob. of Recovery");
    model.add_virus(virus, cfg.prevalence)?;
    Ok(model)
}

fn run(cfg: Config) -> Result<()> {
    let mut model = build_model(&cfg)?;
    let saver = make_save_run(
        &cfg.output,
        SaveParts {
            transmission: true,
            reproductive: true,
            generation: true,
            ..SaveParts::default()
        },
    )?;
    model.run_multiple(
        cfg.ndays,
        cfg.replicates,
        Some(cfg.seed),
        Some(saver),
        cfg.threads,
    )?;

    for virus in 0..model.n_viruses() {
        if let Some(gen) = model.db().mean_generation_time(virus) {
            log::info!("virus {}: mean generation time {:.2}", virus, gen);
        }
    }
    Ok(())
}

pub fn main() {
    use simple_logger::SimpleLogger;
    SimpleLogger::new().init().unwrap();

    let cfg = match env::args().nth(1) {
        Some(path) => {
            let data = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("cannot read {}: {}", path, e));
            toml::from_str(&data).unwrap_or_else(|e| panic!("bad config {}: {}", path, e))
        }
        None => Config::default(),
    };
    log::info!("{:?}", cfg);

    if let Err(e) = run(cfg) {
        eprintln!("simulation failed: {}", e);
        std::process::exit(1);
    }
}
