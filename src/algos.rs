use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    errors::LaunchError,
    library::{cartesian_product, Axis, Number, Params, Value},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    Adam,
    Sgd,
}

impl UpdateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adam => "adam",
            Self::Sgd => "sgd",
        }
    }
}

/// The option sets of the algorithm families the training entry point knows about.
#[derive(Clone, Debug, PartialEq)]
pub enum Algorithm {
    Erwr {
        best_quantile: Number,
        max_opt_itr: Option<i64>,
        positive_adv: Option<bool>,
    },
    Ppo {
        step_size: Number,
    },
    Trpo {
        step_size: Number,
        backtrack_ratio: Option<Number>,
    },
    Npg {
        step_size: Number,
        update_method: UpdateMethod,
        learning_rate: Number,
    },
    Vpg {
        update_method: UpdateMethod,
        learning_rate: Number,
    },
    Cem {
        n_samples: i64,
        best_frac: Number,
        extra_std: Option<Number>,
        extra_decay_time: Option<i64>,
    },
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Erwr { .. } => "erwr",
            Self::Ppo { .. } => "ppo",
            Self::Trpo { .. } => "trpo",
            Self::Npg { .. } => "npg",
            Self::Vpg { .. } => "vpg",
            Self::Cem { .. } => "cem",
        }
    }

    /// Algorithm specific options, in a fixed order. Unset optional knobs are left out.
    pub fn entries(&self) -> Vec<(&'static str, Value)> {
        let entries: Vec<(&'static str, Option<Value>)> = match self {
            Self::Erwr {
                best_quantile,
                max_opt_itr,
                positive_adv,
            } => vec![
                ("max_opt_itr", max_opt_itr.map(Value::from)),
                ("best_quantile", Some((*best_quantile).into())),
                ("positive_adv", positive_adv.map(Value::from)),
            ],
            Self::Ppo { step_size } => vec![("step_size", Some((*step_size).into()))],
            Self::Trpo {
                step_size,
                backtrack_ratio,
            } => vec![
                ("step_size", Some((*step_size).into())),
                ("backtrack_ratio", backtrack_ratio.map(Value::from)),
            ],
            Self::Npg {
                step_size,
                update_method,
                learning_rate,
            } => vec![
                ("step_size", Some((*step_size).into())),
                ("update_method", Some(update_method.as_str().into())),
                ("learning_rate", Some((*learning_rate).into())),
            ],
            Self::Vpg {
                update_method,
                learning_rate,
            } => vec![
                ("update_method", Some(update_method.as_str().into())),
                ("learning_rate", Some((*learning_rate).into())),
            ],
            Self::Cem {
                n_samples,
                best_frac,
                extra_std,
                extra_decay_time,
            } => vec![
                ("n_samples", Some((*n_samples).into())),
                ("best_frac", Some((*best_frac).into())),
                ("extra_std", extra_std.map(Value::from)),
                ("extra_decay_time", extra_decay_time.map(Value::from)),
            ],
        };
        entries
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }

    fn from_reader(reader: &mut OptionReader) -> Result<Self, LaunchError> {
        let algorithm = match reader.algorithm.as_str() {
            "erwr" => Self::Erwr {
                best_quantile: reader.number("best_quantile")?,
                max_opt_itr: reader.opt_i64("max_opt_itr")?,
                positive_adv: reader.opt_bool("positive_adv")?,
            },
            "ppo" => Self::Ppo {
                step_size: reader.number("step_size")?,
            },
            "trpo" => Self::Trpo {
                step_size: reader.number("step_size")?,
                backtrack_ratio: reader.opt_number("backtrack_ratio")?,
            },
            "npg" => Self::Npg {
                step_size: reader.number("step_size")?,
                update_method: reader.update_method("update_method")?,
                learning_rate: reader.number("learning_rate")?,
            },
            "vpg" => Self::Vpg {
                update_method: reader.update_method("update_method")?,
                learning_rate: reader.number("learning_rate")?,
            },
            "cem" => Self::Cem {
                n_samples: reader.i64("n_samples")?,
                best_frac: reader.number("best_frac")?,
                extra_std: reader.opt_number("extra_std")?,
                extra_decay_time: reader.opt_i64("extra_decay_time")?,
            },
            other => return Err(LaunchError::UnknownAlgorithm(other.to_string())),
        };
        Ok(algorithm)
    }
}

/// Keys of the base algorithm template an algorithm config may override.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BaseOverrides {
    pub whole_paths: Option<bool>,
    pub max_path_length: Option<i64>,
    pub n_itr: Option<i64>,
    pub discount: Option<f64>,
    pub plot: Option<bool>,
}

impl BaseOverrides {
    fn from_reader(reader: &mut OptionReader) -> Result<Self, LaunchError> {
        Ok(Self {
            whole_paths: reader.opt_bool("whole_paths")?,
            max_path_length: reader.opt_i64("max_path_length")?,
            n_itr: reader.opt_i64("n_itr")?,
            discount: reader.opt_number("discount")?.map(|n| n.to_f64()),
            plot: reader.opt_bool("plot")?,
        })
    }
}

/// Options shared by every algorithm run of a sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BaseAlgoTemplate {
    pub whole_paths: bool,
    pub max_path_length: i64,
    pub n_itr: i64,
    pub discount: f64,
    pub plot: bool,
}

impl Default for BaseAlgoTemplate {
    fn default() -> Self {
        Self {
            whole_paths: true,
            max_path_length: 100,
            n_itr: 1000,
            discount: 0.99,
            plot: true,
        }
    }
}

impl BaseAlgoTemplate {
    /// Applies per-algorithm overrides. A key set in `overrides` always wins over the template.
    pub fn merge(&self, overrides: &BaseOverrides) -> Self {
        Self {
            whole_paths: overrides.whole_paths.unwrap_or(self.whole_paths),
            max_path_length: overrides.max_path_length.unwrap_or(self.max_path_length),
            n_itr: overrides.n_itr.unwrap_or(self.n_itr),
            discount: overrides.discount.unwrap_or(self.discount),
            plot: overrides.plot.unwrap_or(self.plot),
        }
    }

    pub fn entries(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("whole_paths", self.whole_paths.into()),
            ("max_path_length", self.max_path_length.into()),
            ("n_itr", self.n_itr.into()),
            ("discount", self.discount.into()),
            ("plot", self.plot.into()),
        ]
    }
}

/// One concrete algorithm run: its typed options and any base template overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct AlgorithmConfig {
    pub algorithm: Algorithm,
    pub overrides: BaseOverrides,
}

impl AlgorithmConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            overrides: BaseOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: BaseOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Decodes an untyped option map. Every key has to be consumed by either
    /// the algorithm or the base overrides.
    pub fn from_params(algorithm: &str, params: Params) -> Result<Self, LaunchError> {
        let mut reader = OptionReader::new(algorithm, params);
        let overrides = BaseOverrides::from_reader(&mut reader)?;
        let algorithm = Algorithm::from_reader(&mut reader)?;
        reader.finish()?;
        Ok(Self {
            algorithm,
            overrides,
        })
    }

    /// The options passed to the trainer: the base template merged with the overrides,
    /// followed by the algorithm's own options.
    pub fn merged_entries(&self, base: &BaseAlgoTemplate) -> Vec<(&'static str, Value)> {
        let mut entries = base.merge(&self.overrides).entries();
        entries.extend(self.algorithm.entries());
        entries
    }
}

struct OptionReader {
    algorithm: String,
    params: Params,
}

impl OptionReader {
    fn new(algorithm: &str, params: Params) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            params,
        }
    }

    fn invalid(&self, key: &str, reason: String) -> LaunchError {
        LaunchError::InvalidOption {
            algorithm: self.algorithm.clone(),
            key: key.to_string(),
            reason,
        }
    }

    fn take<T>(
        &mut self,
        key: &str,
        expected: &str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<Option<T>, LaunchError> {
        match self.params.remove(key) {
            None => Ok(None),
            Some(value) => convert(&value).map(Some).ok_or_else(|| {
                self.invalid(
                    key,
                    format!("expected {}, received {}", expected, value.type_name()),
                )
            }),
        }
    }

    fn require<T>(&self, key: &str, value: Option<T>) -> Result<T, LaunchError> {
        value.ok_or_else(|| self.invalid(key, "missing required option".to_string()))
    }

    fn opt_number(&mut self, key: &str) -> Result<Option<Number>, LaunchError> {
        self.take(key, "a number", Value::as_number)
    }

    fn opt_i64(&mut self, key: &str) -> Result<Option<i64>, LaunchError> {
        self.take(key, "an integer", Value::as_i64)
    }

    fn opt_bool(&mut self, key: &str) -> Result<Option<bool>, LaunchError> {
        self.take(key, "a bool", Value::as_bool)
    }

    fn number(&mut self, key: &str) -> Result<Number, LaunchError> {
        let value = self.opt_number(key)?;
        self.require(key, value)
    }

    fn i64(&mut self, key: &str) -> Result<i64, LaunchError> {
        let value = self.opt_i64(key)?;
        self.require(key, value)
    }

    fn update_method(&mut self, key: &str) -> Result<UpdateMethod, LaunchError> {
        let value = self.take(key, "\"adam\" or \"sgd\"", |v| match v.as_str() {
            Some("adam") => Some(UpdateMethod::Adam),
            Some("sgd") => Some(UpdateMethod::Sgd),
            _ => None,
        })?;
        self.require(key, value)
    }

    fn finish(self) -> Result<(), LaunchError> {
        match self.params.keys().next() {
            Some(key) => Err(self.invalid(key, "unknown option".to_string())),
            None => Ok(()),
        }
    }
}

/// The nested sweep of one algorithm family: fixed options plus hyperparameter axes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmSweep {
    pub name: String,
    #[serde(default)]
    pub fixed: BTreeMap<String, Value>,
    #[serde(default)]
    pub axes: Vec<Axis>,
}

impl AlgorithmSweep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixed: BTreeMap::new(),
            axes: Vec::new(),
        }
    }

    pub fn fixed(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed.insert(key.into(), value.into());
        self
    }

    pub fn axis<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.axes.push(Axis::new(name, values));
        self
    }

    /// One config per combination of the axes. Axis values win over fixed options.
    pub fn expand(&self) -> Result<Vec<AlgorithmConfig>, LaunchError> {
        cartesian_product(&self.axes)
            .into_iter()
            .map(|mut params| {
                for (key, value) in &self.fixed {
                    params
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                AlgorithmConfig::from_params(&self.name, params)
            })
            .collect()
    }
}

/// Flattens several algorithm sweeps into one axis, in declaration order.
pub fn expand_all(sweeps: &[AlgorithmSweep]) -> Result<Vec<AlgorithmConfig>, LaunchError> {
    let mut configs = Vec::new();
    for sweep in sweeps {
        let expanded = sweep.expand()?;
        log::debug!("Algorithm {} expanded to {} configs", sweep.name, expanded.len());
        configs.extend(expanded);
    }
    Ok(configs)
}

/// The algorithm sweeps of the locomotion benchmark this launcher was first written for.
pub fn default_sweeps() -> Vec<AlgorithmSweep> {
    vec![
        AlgorithmSweep::new("erwr")
            .fixed("max_opt_itr", 50)
            .fixed("positive_adv", true)
            .axis("best_quantile", vec![Value::from(0.2), Value::from(1)]),
        AlgorithmSweep::new("ppo").axis("step_size", vec![0.01, 0.1]),
        AlgorithmSweep::new("trpo")
            .fixed("backtrack_ratio", 0.8)
            .axis("step_size", vec![Value::from(0.1), Value::from(1)]),
        AlgorithmSweep::new("npg")
            .axis("update_method", vec!["adam", "sgd"])
            .axis("step_size", vec![0.1, 0.01])
            .axis("learning_rate", vec![1e-1, 1e0, 1e-2]),
        AlgorithmSweep::new("vpg")
            .axis("update_method", vec!["adam", "sgd"])
            .axis("learning_rate", vec![1e-4, 1e-3, 1e-2, 1e-1]),
    ]
}
