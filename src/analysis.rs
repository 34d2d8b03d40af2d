use crate::config::Config;
use crate::model::EMPTY;
use anyhow::{Context, Result, bail};
use rmp_serde::encode;
use serde::Serialize;
use serde_value::Value;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

/// Exported row: step index and counts of every type, empty slots first.
pub struct Row {
    pub step: usize,
    pub counts: Vec<usize>,
}

impl Row {
    fn parse(line: &str, n_types: usize) -> Result<Self> {
        let mut vals = line.split(',').map(|val| {
            val.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid value {val:?}"))
        });
        let step = vals.next().context("missing step")??;
        let counts = vals.collect::<Result<Vec<_>>>()?;
        if counts.len() != n_types + 1 {
            bail!("row must have {} counts, but has {}", n_types + 1, counts.len());
        }
        Ok(Self { step, counts })
    }
}

pub trait Obs {
    fn update(&mut self, row: &Row) -> Result<()>;
    fn report(&self) -> Result<Value>;
}

/// Mean, range and final value of a per-step count.
#[derive(Debug, Default)]
pub struct CountSummary {
    n_steps: usize,
    sum: usize,
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub last: Option<usize>,
}

impl CountSummary {
    pub fn add(&mut self, count: usize) {
        self.n_steps += 1;
        self.sum += count;
        self.min = Some(self.min.map_or(count, |min| min.min(count)));
        self.max = Some(self.max.map_or(count, |max| max.max(count)));
        self.last = Some(count);
    }

    pub fn mean(&self) -> f64 {
        if self.n_steps == 0 {
            return f64::NAN;
        }
        self.sum as f64 / self.n_steps as f64
    }
}

#[derive(Debug, Serialize)]
struct CountReport {
    mean: f64,
    min: Option<usize>,
    max: Option<usize>,
    last: Option<usize>,
}

impl From<&CountSummary> for CountReport {
    fn from(summary: &CountSummary) -> Self {
        Self {
            mean: summary.mean(),
            min: summary.min,
            max: summary.max,
            last: summary.last,
        }
    }
}

/// Number of slots held by each type, empty slots first.
pub struct TypeCounts {
    summaries: Vec<CountSummary>,
}

impl TypeCounts {
    pub fn new(cfg: &Config) -> Self {
        let mut summaries = Vec::new();
        summaries.resize_with(cfg.population.n_types + 1, CountSummary::default);
        Self { summaries }
    }
}

impl Obs for TypeCounts {
    fn update(&mut self, row: &Row) -> Result<()> {
        for (summary, &count) in self.summaries.iter_mut().zip(&row.counts) {
            summary.add(count);
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        let reports: Vec<_> = self.summaries.iter().map(CountReport::from).collect();
        entry("type_counts", reports)
    }
}

/// Number of types with at least one cell.
pub struct NSurvivors {
    summary: CountSummary,
}

impl NSurvivors {
    pub fn new() -> Self {
        Self {
            summary: CountSummary::default(),
        }
    }
}

impl Obs for NSurvivors {
    fn update(&mut self, row: &Row) -> Result<()> {
        let n_alive = row.counts[EMPTY + 1..].iter().filter(|&&c| c > 0).count();
        self.summary.add(n_alive);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        entry("n_survivors", CountReport::from(&self.summary))
    }
}

/// First step at which each type was found extinct.
pub struct Extinction {
    first_steps: Vec<Option<usize>>,
}

impl Extinction {
    pub fn new(cfg: &Config) -> Self {
        Self {
            first_steps: vec![None; cfg.population.n_types],
        }
    }
}

impl Obs for Extinction {
    fn update(&mut self, row: &Row) -> Result<()> {
        for (first_step, &count) in self.first_steps.iter_mut().zip(&row.counts[EMPTY + 1..]) {
            if count == 0 && first_step.is_none() {
                *first_step = Some(row.step);
            }
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        entry("extinction_step", &self.first_steps)
    }
}

fn entry<T: Serialize>(key: &str, val: T) -> Result<Value> {
    let val = serde_value::to_value(val).context("failed to convert report")?;
    let mut map = std::collections::BTreeMap::new();
    map.insert(Value::String(key.to_string()), val);
    Ok(Value::Map(map))
}

pub struct Analyzer {
    cfg: Config,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
    n_rows: usize,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(TypeCounts::new(&cfg)));
        obs_ptr_vec.push(Box::new(NSurvivors::new()));
        obs_ptr_vec.push(Box::new(Extinction::new(&cfg)));
        Self {
            cfg,
            obs_ptr_vec,
            n_rows: 0,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        for (i_line, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = Row::parse(line, self.cfg.population.n_types)
                .with_context(|| format!("invalid row {i_line} of {file:?}"))?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&row).context("failed to update observable")?;
            }
            self.n_rows += 1;
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports = self
            .obs_ptr_vec
            .iter()
            .map(|obs| obs.report())
            .collect::<Result<Vec<_>>>()?;
        encode::write(&mut writer, &reports).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}
