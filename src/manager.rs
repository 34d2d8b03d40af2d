use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Runs stored under a simulation directory sharing one `config.toml`.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn create_run(&self) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let engine = Engine::generate_initial_condition(self.cfg.clone())
            .context("failed to generate initial condition")?;
        log::info!("initial distribution: {}", engine.population().distribution());

        self.run_engine(run_idx, engine)
    }

    pub fn resume_run(&self, run_idx: usize) -> Result<()> {
        let checkpoint_file = self.checkpoint_file(run_idx);
        let engine = Engine::load_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to load {checkpoint_file:?}"))?;
        if engine.cfg() != &self.cfg {
            bail!("checkpoint config differs from the current config");
        }
        log::info!("loaded {checkpoint_file:?} at step {}", engine.step());

        self.run_engine(run_idx, engine)
    }

    /// Files are named after the first step they hold, so a run retried from
    /// the same checkpoint overwrites its partial output.
    fn run_engine(&self, run_idx: usize, mut engine: Engine) -> Result<()> {
        let distribution_file = self
            .cfg
            .output
            .export
            .then(|| self.distribution_file(run_idx, engine.step()));

        engine
            .run_simulation(distribution_file)
            .context("failed to run simulation")?;

        engine
            .save_checkpoint(self.checkpoint_file(run_idx))
            .context("failed to save checkpoint")?;

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let mut analyzer = Analyzer::new(self.cfg.clone());

            let files = self
                .distribution_files(run_idx)
                .context("failed to list distribution files")?;
            if files.is_empty() {
                log::warn!("no distribution files in {:?}", self.run_dir(run_idx));
                continue;
            }
            for file in files {
                analyzer.add_file(file).context("failed to add file")?;
            }

            let results_file = self.results_file(run_idx);
            analyzer
                .save_results(&results_file)
                .context("failed to save results")?;
            log::info!("analyzed {} steps into {results_file:?}", analyzer.n_rows());
        }

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.run_dirs()? {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }
        Ok(())
    }

    fn run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        Ok(dirs)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        Ok(self.run_dirs()?.len())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    /// Distribution files of a run in step order.
    fn distribution_files(&self, run_idx: usize) -> Result<Vec<PathBuf>> {
        let pattern = self.run_dir(run_idx).join("distribution-*.csv");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut files: Vec<_> = glob(pattern)
            .context("failed to glob distribution files")?
            .filter_map(Result::ok)
            .collect();
        files.sort();
        Ok(files)
    }

    fn checkpoint_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("checkpoint.msgpack")
    }

    fn distribution_file(&self, run_idx: usize, first_step: usize) -> PathBuf {
        self.run_dir(run_idx)
            .join(format!("distribution-{first_step:010}.csv"))
    }

    fn results_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("results.msgpack")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn read_steps(file: &Path) -> Vec<usize> {
        fs::read_to_string(file)
            .unwrap()
            .lines()
            .map(|line| line.split(',').next().unwrap().parse().unwrap())
            .collect()
    }

    #[test]
    fn retried_resume_replaces_partial_file() {
        let sim_dir = std::env::temp_dir().join(format!("alveolus-mgr-{}", std::process::id()));
        fs::remove_dir_all(&sim_dir).ok();
        fs::create_dir_all(&sim_dir).unwrap();
        fs::write(sim_dir.join("config.toml"), config::tests::CONFIG_TOML).unwrap();

        let mgr = Manager::new(&sim_dir).unwrap();
        mgr.create_run().unwrap();

        // Leftover of a resume that failed after writing a few rows.
        let partial = mgr.distribution_file(0, 40);
        fs::write(&partial, "40,0,0,0,0,0,0,0,0,0,0,0,0,0\n41,0,0,0,0,0,0,0,0,0,0,0,0,0\n").unwrap();

        mgr.resume_run(0).unwrap();

        let files = mgr.distribution_files(0).unwrap();
        assert_eq!(files, [mgr.distribution_file(0, 0), partial.clone()]);
        let steps: Vec<_> = files.iter().flat_map(|file| read_steps(file)).collect();
        assert_eq!(steps, (0..80).collect::<Vec<_>>());

        mgr.analyze_sim().unwrap();
        assert!(mgr.results_file(0).is_file());

        fs::remove_dir_all(&sim_dir).ok();
    }
}
