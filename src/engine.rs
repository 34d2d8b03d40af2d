use crate::config::{Competition, Config, ResponseScope};
use crate::corpus::Corpus;
use crate::model::{Distribution, EMPTY, Label, Population};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Distribution as _, Uniform};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, training corpus, population and random number generator,
/// and provides methods to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    corpus: Corpus,
    pop: Population,
    rng: ChaCha12Rng,
    step: usize,
}

impl Engine {
    /// Create a new `Engine` with a freshly drawn corpus and the packed initial population.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let mut rng = match cfg.dynamics.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let corpus =
            Corpus::generate(&cfg.corpus, &mut rng).context("failed to generate corpus")?;
        log::info!("generated {} training examples", corpus.examples().len());

        Self::with_corpus(cfg, corpus, rng)
    }

    /// Create a new `Engine` around an existing corpus.
    ///
    /// Fails if some cell type can never accept an example of the corpus.
    pub fn with_corpus(cfg: Config, corpus: Corpus, rng: ChaCha12Rng) -> Result<Self> {
        let pop_cfg = &cfg.population;
        for cell_type in 1..=pop_cfg.n_types {
            if !corpus.covers(cell_type) {
                bail!("no training example elicits a response from cell type {cell_type}");
            }
        }

        let pop = Population::new(pop_cfg.n_types, pop_cfg.cells_per_type, pop_cfg.n_slots);

        Ok(Self {
            cfg,
            corpus,
            pop,
            rng,
            step: 0,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn population(&self) -> &Population {
        &self.pop
    }

    /// Number of steps performed so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Perform the simulation, logging the distribution of every step and
    /// writing it to a file when one is given.
    ///
    /// Rows are `step,count_0,count_1,...,count_n`.
    pub fn run_simulation<P: AsRef<Path>>(&mut self, file: Option<P>) -> Result<()> {
        let mut writer = match file {
            Some(file) => {
                let file = file.as_ref();
                let file =
                    File::create(file).with_context(|| format!("failed to create {file:?}"))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let n_steps = self.cfg.n_steps()?;
        let steps_per_save = self.cfg.output.steps_per_save;

        for i_step in 0..n_steps {
            let step = self.step;
            let dist = self.perform_step().context("failed to perform step")?;
            log::info!("step {step}: {dist}");

            if let Some(writer) = writer.as_mut() {
                writeln!(writer, "{step},{dist}").context("failed to write distribution")?;
            }

            if (i_step + 1) % steps_per_save == 0 || i_step + 1 == n_steps {
                if let Some(writer) = writer.as_mut() {
                    writer.flush().context("failed to flush writer stream")?;
                }
                let progress = 100.0 * (i_step + 1) as f64 / n_steps as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    /// Scan every slot once, in ascending order, and return the resulting distribution.
    ///
    /// Updates happen in place, so later slots see the clones and vacancies
    /// produced earlier in the same step.
    pub fn perform_step(&mut self) -> Result<Distribution> {
        let time_step = self.cfg.dynamics.time_step;
        let activation_dist = Bernoulli::new(time_step / 2.0)?;
        let elimination_dist = Bernoulli::new(time_step)?;
        let rival_dist = Uniform::new(0, self.pop.n_slots())?;

        let mut last_resp = Label::NoResponse;

        for i_slot in 0..self.pop.n_slots() {
            let cell_type = self.pop.slot(i_slot);
            if cell_type == EMPTY {
                continue;
            }

            // Activation.
            let mut resp = match self.cfg.dynamics.response_scope {
                ResponseScope::PerSlot => Label::NoResponse,
                ResponseScope::CarryOver => last_resp,
            };
            if activation_dist.sample(&mut self.rng) {
                resp = self.corpus.resolve(cell_type, &mut self.rng);
            }

            // Migration into the most recent vacancy.
            if resp == Label::Positive {
                self.pop.clone_into_free(i_slot);
            }

            // Competition with a random slot of the same type.
            let i_rival = rival_dist.sample(&mut self.rng);
            if self.pop.slot(i_rival) == cell_type {
                if elimination_dist.sample(&mut self.rng) {
                    self.pop.vacate(i_slot);
                } else if self.cfg.dynamics.competition == Competition::DoubleCheck {
                    resp = Label::NoResponse;
                    if activation_dist.sample(&mut self.rng) {
                        resp = self.corpus.resolve(cell_type, &mut self.rng);
                    }
                    if resp == Label::Positive {
                        self.pop.vacate(i_slot);
                    }
                }
            }

            last_resp = resp;
        }

        self.step += 1;

        let dist = self.pop.distribution();
        debug_assert_eq!(self.pop.free_slots().len(), dist.n_empty());
        Ok(dist)
    }
}
