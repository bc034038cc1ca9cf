use std::collections::BTreeMap;

use itertools::iproduct;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    algos::{AlgorithmConfig, BaseAlgoTemplate},
    library::Value,
};

/// A named component of the experiment, such as the policy or the baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// The part of every experiment that does not change across the sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentBase {
    pub normalize_mdp: bool,
    pub policy: ComponentSpec,
    pub baseline: ComponentSpec,
    pub n_parallel: i64,
    pub snapshot_mode: String,
    pub plot: bool,
    pub algo: BaseAlgoTemplate,
}

impl Default for ExperimentBase {
    fn default() -> Self {
        Self {
            normalize_mdp: true,
            policy: ComponentSpec::new("mean_std_nn_policy").option("hidden_sizes", vec![32, 32]),
            baseline: ComponentSpec::new("linear_feature_baseline"),
            n_parallel: 8,
            snapshot_mode: "last".to_string(),
            plot: true,
            algo: BaseAlgoTemplate::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomSeeds {
    pub count: usize,
    pub seed: u64,
}

/// Either an explicit list of seeds or a reproducible draw of `count` seeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedAxis {
    List(Vec<i64>),
    Generated { random: RandomSeeds },
}

impl Default for SeedAxis {
    /// `i² · 5 + 23` for `i` in `1..=5`, i.e. `[28, 43, 68, 103, 148]`.
    fn default() -> Self {
        Self::List((1..=5).map(|i: i64| i * i * 5 + 23).collect())
    }
}

impl SeedAxis {
    pub fn resolve(&self) -> Vec<i64> {
        match self {
            Self::List(seeds) => seeds.clone(),
            Self::Generated { random } => {
                let mut rng = StdRng::seed_from_u64(random.seed);
                (0..random.count)
                    .map(|_| rng.gen_range(0..1_000_000))
                    .collect()
            }
        }
    }
}

/// One fully specified experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentConfig {
    /// Position in enumeration order, starting at 1.
    pub index: usize,
    pub exp_name: String,
    pub seed: i64,
    pub mdp: String,
    pub algo: AlgorithmConfig,
    pub base: ExperimentBase,
}

/// The axes of a sweep. Enumeration order is seed, then mdp, then algorithm,
/// with the algorithm varying fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweep {
    pub prefix: String,
    pub seeds: Vec<i64>,
    pub mdps: Vec<String>,
    pub algos: Vec<AlgorithmConfig>,
    pub base: ExperimentBase,
}

impl Sweep {
    pub fn new(
        prefix: impl Into<String>,
        seeds: Vec<i64>,
        mdps: Vec<String>,
        algos: Vec<AlgorithmConfig>,
        base: ExperimentBase,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            seeds,
            mdps,
            algos,
            base,
        }
    }

    pub fn len(&self) -> usize {
        self.seeds.len() * self.mdps.len() * self.algos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn experiments(&self) -> impl Iterator<Item = ExperimentConfig> + '_ {
        iproduct!(self.seeds.iter(), self.mdps.iter(), self.algos.iter())
            .enumerate()
            .map(move |(i, (seed, mdp, algo))| {
                let index = i + 1;
                ExperimentConfig {
                    index,
                    exp_name: format!("{}_{}", self.prefix, index),
                    seed: *seed,
                    mdp: mdp.clone(),
                    algo: algo.clone(),
                    base: self.base.clone(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algos::{expand_all, Algorithm, AlgorithmSweep};

    fn ppo() -> AlgorithmConfig {
        AlgorithmConfig::new(Algorithm::Ppo {
            step_size: 0.01.into(),
        })
    }

    #[test]
    fn produces_full_cross_product_with_contiguous_names() {
        let algos = expand_all(&[
            AlgorithmSweep::new("ppo").axis("step_size", vec![0.01, 0.1]),
            AlgorithmSweep::new("trpo").axis("step_size", vec![0.1]),
        ])
        .unwrap();
        let sweep = Sweep::new(
            "exp",
            vec![1, 2, 3],
            vec!["a_mdp".to_string(), "b_mdp".to_string()],
            algos,
            ExperimentBase::default(),
        );
        let experiments: Vec<_> = sweep.experiments().collect();
        assert_eq!(sweep.len(), 3 * 2 * 3);
        assert_eq!(experiments.len(), sweep.len());
        for (i, experiment) in experiments.iter().enumerate() {
            assert_eq!(experiment.index, i + 1);
            assert_eq!(experiment.exp_name, format!("exp_{}", i + 1));
        }
    }

    #[test]
    fn seed_is_outermost_and_algorithm_innermost() {
        let algos = expand_all(&[AlgorithmSweep::new("ppo").axis("step_size", vec![0.01, 0.1])])
            .unwrap();
        let sweep = Sweep::new(
            "exp",
            vec![28, 43],
            vec!["a_mdp".to_string(), "b_mdp".to_string()],
            algos,
            ExperimentBase::default(),
        );
        let order: Vec<_> = sweep
            .experiments()
            .map(|e| (e.seed, e.mdp, e.algo.algorithm))
            .collect();
        assert_eq!(order[0].0, 28);
        assert_eq!(order[1].0, 28);
        assert_eq!(order[0].1, "a_mdp");
        assert_eq!(order[1].1, "a_mdp");
        assert_eq!(order[2].1, "b_mdp");
        assert_eq!(order[0].2, Algorithm::Ppo { step_size: 0.01.into() });
        assert_eq!(order[1].2, Algorithm::Ppo { step_size: 0.1.into() });
        assert_eq!(order[4].0, 43);
    }

    #[test]
    fn two_seeds_one_mdp_one_algo() {
        let sweep = Sweep::new(
            "exp",
            vec![28, 43],
            vec!["hopper_mdp".to_string()],
            vec![ppo()],
            ExperimentBase::default(),
        );
        let experiments: Vec<_> = sweep.experiments().collect();
        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments[0].exp_name, "exp_1");
        assert_eq!(experiments[1].exp_name, "exp_2");
        assert_eq!(experiments[0].seed, 28);
        assert_eq!(experiments[1].seed, 43);
        assert!(experiments.iter().all(|e| e.mdp == "hopper_mdp"));
    }

    #[test]
    fn enumeration_is_deterministic() {
        let sweep = Sweep::new(
            "exp",
            SeedAxis::default().resolve(),
            vec!["hopper_mdp".to_string()],
            vec![ppo()],
            ExperimentBase::default(),
        );
        let first: Vec<_> = sweep.experiments().collect();
        let second: Vec<_> = sweep.clone().experiments().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_axis_yields_no_experiments() {
        let sweep = Sweep::new("exp", vec![1], Vec::new(), vec![ppo()], ExperimentBase::default());
        assert!(sweep.is_empty());
        assert_eq!(sweep.experiments().count(), 0);
    }

    #[test]
    fn seed_axes() {
        assert_eq!(SeedAxis::default().resolve(), vec![28, 43, 68, 103, 148]);

        let random = SeedAxis::Generated {
            random: RandomSeeds { count: 4, seed: 7 },
        };
        let seeds = random.resolve();
        assert_eq!(seeds.len(), 4);
        assert_eq!(seeds, random.resolve());

        let parsed: SeedAxis = serde_json::from_str(r#"{"random": {"count": 4, "seed": 7}}"#).unwrap();
        assert_eq!(parsed, random);
        let parsed: SeedAxis = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(parsed, SeedAxis::List(vec![1, 2]));
    }
}
