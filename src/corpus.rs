use crate::config::CorpusConfig;
use crate::model::{CellType, Example, Label, response};
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::{Bernoulli, Normal};
use serde::{Deserialize, Serialize};

/// Immutable collection of labeled training signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    examples: Vec<Example>,
}

impl Corpus {
    /// Wrap a non-empty list of examples.
    pub fn new(examples: Vec<Example>) -> Result<Self> {
        if examples.is_empty() {
            bail!("corpus must contain at least one example");
        }
        Ok(Self { examples })
    }

    /// Draw the examples from the Gaussian sources described by `cfg`.
    ///
    /// No response examples come first, positive examples follow, each one
    /// drawn from either positive source with equal probability.
    pub fn generate<R: Rng>(cfg: &CorpusConfig, rng: &mut R) -> Result<Self> {
        let no_response_dist = Normal::new(cfg.mean_no_response, cfg.std_dev)?;
        let positive_dists = [
            Normal::new(cfg.means_positive[0], cfg.std_dev)?,
            Normal::new(cfg.means_positive[1], cfg.std_dev)?,
        ];
        let coin = Bernoulli::new(0.5)?;

        let mut examples = Vec::with_capacity(cfg.n_no_response + cfg.n_positive);
        for _ in 0..cfg.n_no_response {
            examples.push(Example {
                signal: no_response_dist.sample(rng),
                label: Label::NoResponse,
            });
        }
        for _ in 0..cfg.n_positive {
            let dist = &positive_dists[usize::from(coin.sample(rng))];
            examples.push(Example {
                signal: dist.sample(rng),
                label: Label::Positive,
            });
        }

        Self::new(examples)
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Whether some example can be accepted for `cell_type`.
    pub fn covers(&self, cell_type: CellType) -> bool {
        self.examples
            .iter()
            .any(|ex| response(ex.signal, cell_type) > 0.0)
    }

    /// Resolve the response of `cell_type` by rejection sampling.
    ///
    /// Examples are picked uniformly and accepted with probability equal to
    /// the cell response, so the label of the accepted one follows the class
    /// dominating around the preferred signal of the cell type.
    /// Only terminates if [`Corpus::covers`] holds for `cell_type`.
    pub fn resolve<R: Rng>(&self, cell_type: CellType, rng: &mut R) -> Label {
        loop {
            let ex = &self.examples[rng.random_range(0..self.examples.len())];
            let resp = response(ex.signal, cell_type);
            if rng.random::<f64>() <= resp {
                return ex.label;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn generates_ordered_classes() {
        let cfg = config::tests::config().corpus;
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let corpus = Corpus::generate(&cfg, &mut rng).unwrap();

        let examples = corpus.examples();
        assert_eq!(examples.len(), cfg.n_no_response + cfg.n_positive);
        let (no_response, positive) = examples.split_at(cfg.n_no_response);
        assert!(no_response.iter().all(|ex| ex.label == Label::NoResponse));
        assert!(positive.iter().all(|ex| ex.label == Label::Positive));

        let mean = no_response.iter().map(|ex| ex.signal).sum::<f64>() / no_response.len() as f64;
        assert!((mean - cfg.mean_no_response).abs() < 0.2);

        // Positive signals are bimodal around 3 and 9.
        let n_low = positive.iter().filter(|ex| ex.signal < 6.0).count();
        let n_mid = positive
            .iter()
            .filter(|ex| (ex.signal - 6.0).abs() < 0.25)
            .count();
        assert!(n_low > 800 && n_low < 1200);
        assert!(n_mid < 20);
    }

    #[test]
    fn same_seed_same_corpus() {
        let cfg = config::tests::config().corpus;
        let a = Corpus::generate(&cfg, &mut ChaCha12Rng::seed_from_u64(11)).unwrap();
        let b = Corpus::generate(&cfg, &mut ChaCha12Rng::seed_from_u64(11)).unwrap();
        assert_eq!(a.examples(), b.examples());
    }

    #[test]
    fn rejects_empty_corpus() {
        assert!(Corpus::new(Vec::new()).is_err());
    }

    #[test]
    fn resolves_single_example() {
        let corpus = Corpus::new(vec![Example {
            signal: 0.0,
            label: Label::Positive,
        }])
        .unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        assert!(corpus.covers(1));
        assert!(!corpus.covers(3));
        for _ in 0..100 {
            assert_eq!(corpus.resolve(1, &mut rng), Label::Positive);
        }
    }

    #[test]
    fn resolution_follows_nearby_class() {
        let corpus = Corpus::new(vec![
            Example {
                signal: 0.0,
                label: Label::Positive,
            },
            Example {
                signal: 5.0,
                label: Label::NoResponse,
            },
        ])
        .unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(corpus.resolve(1, &mut rng), Label::Positive);
            assert_eq!(corpus.resolve(6, &mut rng), Label::NoResponse);
        }
    }

    #[test]
    fn resolution_terminates_for_every_type() {
        let cfg = config::tests::config();
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let corpus = Corpus::generate(&cfg.corpus, &mut rng).unwrap();

        for cell_type in 1..=cfg.population.n_types {
            assert!(corpus.covers(cell_type));
            let n_positive = (0..10_000)
                .filter(|_| corpus.resolve(cell_type, &mut rng) == Label::Positive)
                .count();
            // Types tuned to the positive modes mostly see positive examples.
            if cell_type == 4 || cell_type == 10 {
                assert!(n_positive > 9_000);
            }
            if cell_type == 7 {
                assert!(n_positive < 1_000);
            }
        }
    }
}
