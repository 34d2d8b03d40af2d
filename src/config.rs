use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs,
    ops::{Bound, RangeBounds},
    path::Path,
};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub population: PopulationConfig,
    pub corpus: CorpusConfig,
    pub dynamics: DynamicsConfig,
    pub output: OutputConfig,
}

/// Layout of the alveolus.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of cell types.
    pub n_types: usize,
    /// Initial number of slots occupied by each type.
    pub cells_per_type: usize,
    /// Total number of slots.
    pub n_slots: usize,
}

/// Gaussian sources of the training corpus.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Number of examples labeled as no response.
    pub n_no_response: usize,
    /// Number of examples labeled as positive response.
    pub n_positive: usize,
    /// Mean signal of the no response examples.
    pub mean_no_response: f64,
    /// Means of the two equally likely sources of positive examples.
    pub means_positive: [f64; 2],
    /// Standard deviation shared by all sources.
    pub std_dev: f64,
}

/// How the second response check is performed after a failed elimination.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Competition {
    /// Same-type competition only eliminates with probability `time_step`.
    Simple,
    /// A surviving cell is checked again and eliminated on a positive response.
    #[default]
    DoubleCheck,
}

/// Lifetime of the expected response while scanning the slots.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseScope {
    /// Every occupied slot starts from no response.
    #[default]
    PerSlot,
    /// A slot whose activation draw fails reuses the last resolved response.
    CarryOver,
}

/// Parameters of the update rule.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DynamicsConfig {
    /// Time step size, also the base interaction probability.
    pub time_step: f64,
    #[serde(default)]
    pub competition: Competition,
    #[serde(default)]
    pub response_scope: ResponseScope,
    /// Seed of the random number generator (OS entropy when absent).
    pub seed: Option<u64>,
}

/// Run length and export options.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Simulated time per run.
    pub total_time: f64,
    /// Number of steps per run, overriding `total_time / time_step`.
    pub n_steps: Option<usize>,
    /// Number of steps between progress reports and export flushes.
    pub steps_per_save: usize,
    /// Write the distribution of every step to a file.
    #[serde(default = "default_export")]
    pub export: bool,
}

fn default_export() -> bool {
    true
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Number of steps performed by each run.
    pub fn n_steps(&self) -> Result<usize> {
        if let Some(n_steps) = self.output.n_steps {
            return Ok(n_steps);
        }
        let time_step = self.dynamics.time_step;
        if time_step <= 0.0 {
            bail!("number of steps must be given when the time step is {time_step}");
        }
        Ok((self.output.total_time / time_step).floor() as usize)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_population()
            .context("invalid population parameters")?;
        self.validate_corpus()
            .context("invalid corpus parameters")?;

        check_num(self.dynamics.time_step, 0.0..=1.0).context("invalid time step")?;

        check_num(self.output.total_time, 0.0..1e9).context("invalid total time")?;
        let n_steps = self.n_steps()?;
        check_num(n_steps, 1..100_000_000).context("invalid number of steps")?;
        check_num(self.output.steps_per_save, 1..=n_steps)
            .context("invalid number of steps per save")?;

        Ok(())
    }

    fn validate_population(&self) -> Result<()> {
        let pop = &self.population;
        check_num(pop.n_types, 1..1_000).context("invalid number of types")?;
        check_num(pop.n_slots, 1..100_000_000).context("invalid number of slots")?;
        check_num(pop.cells_per_type, 0..=pop.n_slots)
            .context("invalid number of cells per type")?;
        let n_cells = pop.n_types * pop.cells_per_type;
        if n_cells > pop.n_slots {
            bail!("{n_cells} initial cells do not fit in {} slots", pop.n_slots);
        }
        Ok(())
    }

    fn validate_corpus(&self) -> Result<()> {
        let corpus = &self.corpus;
        check_num(corpus.n_no_response, 0..10_000_000)
            .context("invalid number of no response examples")?;
        check_num(corpus.n_positive, 0..10_000_000)
            .context("invalid number of positive examples")?;
        if corpus.n_no_response + corpus.n_positive == 0 {
            bail!("corpus must contain at least one example");
        }

        check_num(corpus.mean_no_response, -1e6..1e6).context("invalid no response mean")?;
        for &mean in &corpus.means_positive {
            check_num(mean, -1e6..1e6).context("invalid positive mean")?;
        }
        check_num(corpus.std_dev, (Bound::Excluded(0.0), Bound::Excluded(1e6)))
            .context("invalid standard deviation")?;
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
