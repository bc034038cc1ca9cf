use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    algos::{default_sweeps, expand_all, AlgorithmSweep},
    errors::LaunchError,
    job::{ContainerTemplate, FailurePolicy, QueueSettings},
    render::DEFAULT_ENTRY_POINT,
    sweep::{ExperimentBase, SeedAxis, Sweep},
};

/// Everything a launch needs. Missing keys in a config file fall back to the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SweepConfig {
    pub exp_prefix: String,
    pub seeds: SeedAxis,
    pub mdps: Vec<String>,
    pub algos: Vec<AlgorithmSweep>,
    pub base: ExperimentBase,
    pub entry_point: String,
    pub container: ContainerTemplate,
    pub queue: QueueSettings,
    pub failure_policy: FailurePolicy,
    pub out_dir: PathBuf,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            exp_prefix: "mdp_fixed_0129_nn_pi_loco".to_string(),
            seeds: SeedAxis::default(),
            mdps: vec![
                "mujoco_1_22.full_cheetah_mdp".to_string(),
                "mujoco_1_22.hopper_mdp".to_string(),
            ],
            algos: default_sweeps(),
            base: ExperimentBase::default(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            container: ContainerTemplate::default(),
            queue: QueueSettings::default(),
            failure_policy: FailurePolicy::default(),
            out_dir: PathBuf::from("."),
        }
    }
}

impl SweepConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse config from {}", path.display()))
    }

    /// Resolves the seed axis and expands every algorithm sweep.
    pub fn sweep(&self) -> Result<Sweep, LaunchError> {
        Ok(Sweep::new(
            self.exp_prefix.clone(),
            self.seeds.resolve(),
            self.mdps.clone(),
            expand_all(&self.algos)?,
            self.base.clone(),
        ))
    }
}

pub struct ConfigBuilder {
    read_config_from: Option<PathBuf>,
    exp_prefix: Option<String>,
    seeds: Option<SeedAxis>,
    mdps: Option<Vec<String>>,
    algos: Option<Vec<AlgorithmSweep>>,
    base: Option<ExperimentBase>,
    failure_policy: Option<FailurePolicy>,
    out_dir: Option<PathBuf>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            read_config_from: None,
            exp_prefix: None,
            seeds: None,
            mdps: None,
            algos: None,
            base: None,
            failure_policy: None,
            out_dir: None,
        }
    }

    /// Starts from a config file instead of the defaults. Values set on the
    /// builder still take precedence.
    pub fn read_from_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_config_from = Some(path.into());
        self
    }

    pub fn exp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.exp_prefix = Some(prefix.into());
        self
    }

    pub fn seeds(mut self, seeds: Vec<i64>) -> Self {
        self.seeds = Some(SeedAxis::List(seeds));
        self
    }

    pub fn mdps<S: Into<String>>(mut self, mdps: impl IntoIterator<Item = S>) -> Self {
        self.mdps = Some(mdps.into_iter().map(Into::into).collect());
        self
    }

    pub fn algo(mut self, sweep: AlgorithmSweep) -> Self {
        self.algos.get_or_insert_with(Vec::new).push(sweep);
        self
    }

    pub fn base(mut self, base: ExperimentBase) -> Self {
        self.base = Some(base);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> anyhow::Result<SweepConfig> {
        let mut config = match self.read_config_from {
            Some(path) => SweepConfig::from_file(path)?,
            None => SweepConfig::default(),
        };
        if let Some(prefix) = self.exp_prefix {
            config.exp_prefix = prefix;
        }
        if let Some(seeds) = self.seeds {
            config.seeds = seeds;
        }
        if let Some(mdps) = self.mdps {
            config.mdps = mdps;
        }
        if let Some(algos) = self.algos {
            config.algos = algos;
        }
        if let Some(base) = self.base {
            config.base = base;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(dir) = self.out_dir {
            config.out_dir = dir;
        }
        Ok(config)
    }
}
