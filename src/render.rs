use itertools::Itertools;

use crate::{errors::LaunchError, library::Value, sweep::ExperimentConfig};

/// Key under which a nested mapping carries the name of the component it configures.
pub const NAME_KEY: &str = "_name";

pub const DEFAULT_ENTRY_POINT: &str = "python scripts/run_experiment.py";

#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Value(Value),
    Tree(ParamTree),
}

/// An insertion ordered mapping of experiment parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamTree {
    entries: Vec<(String, Param)>,
}

impl ParamTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `param` under `key`. An existing entry is replaced in place.
    pub fn insert(&mut self, key: impl Into<String>, param: Param) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = param,
            None => self.entries.push((key, param)),
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, Param::Value(value.into()));
        self
    }

    pub fn tree(mut self, key: impl Into<String>, tree: ParamTree) -> Self {
        self.insert(key, Param::Tree(tree));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Param> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn named(name: &str) -> ParamTree {
    ParamTree::new().value(NAME_KEY, name)
}

/// The full parameter mapping handed to the trainer for one experiment.
pub fn experiment_params(experiment: &ExperimentConfig) -> ParamTree {
    let base = &experiment.base;

    let mut policy = named(&base.policy.name);
    for (key, value) in &base.policy.options {
        policy = policy.value(key.clone(), value.clone());
    }
    let mut baseline = named(&base.baseline.name);
    for (key, value) in &base.baseline.options {
        baseline = baseline.value(key.clone(), value.clone());
    }
    let mut algo = named(experiment.algo.name());
    for (key, value) in experiment.algo.merged_entries(&base.algo) {
        algo = algo.value(key, value);
    }

    ParamTree::new()
        .tree("mdp", named(&experiment.mdp))
        .value("normalize_mdp", base.normalize_mdp)
        .tree("policy", policy)
        .tree("baseline", baseline)
        .value("exp_name", experiment.exp_name.clone())
        .tree("algo", algo)
        .value("n_parallel", base.n_parallel)
        .value("snapshot_mode", base.snapshot_mode.clone())
        .value("seed", experiment.seed)
        .value("plot", base.plot)
}

/// Turns a parameter tree into a command line for the training entry point.
///
/// Scalars become `--key value`. A nested mapping under `key` contributes
/// `--key <_name>` and `--key_<sub> value` for its other entries.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandRenderer {
    entry_point: String,
}

impl Default for CommandRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_POINT)
    }
}

impl CommandRenderer {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
        }
    }

    pub fn render(&self, params: &ParamTree) -> Result<String, LaunchError> {
        let mut parts = vec![self.entry_point.clone()];
        push_flags(&mut parts, None, params)?;
        Ok(parts.join(" "))
    }

    pub fn render_experiment(
        &self,
        experiment: &ExperimentConfig,
    ) -> Result<String, LaunchError> {
        self.render(&experiment_params(experiment))
    }
}

fn push_flags(
    parts: &mut Vec<String>,
    prefix: Option<&str>,
    tree: &ParamTree,
) -> Result<(), LaunchError> {
    for (key, param) in tree.iter() {
        let flag = match prefix {
            Some(prefix) if key == NAME_KEY => prefix.to_string(),
            Some(prefix) => format!("{}_{}", prefix, key),
            None => key.to_string(),
        };
        match param {
            Param::Value(value) => {
                let token = token(value).map_err(|reason| LaunchError::Unrenderable {
                    flag: flag.clone(),
                    reason: reason.to_string(),
                })?;
                parts.push(format!("--{}", flag));
                parts.push(shell_quote(&token));
            }
            Param::Tree(sub) => push_flags(parts, Some(&flag), sub)?,
        }
    }
    Ok(())
}

fn scalar_token(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) => format!("{:?}", v),
        Value::Str(v) => v.clone(),
        Value::List(values) => values.iter().map(scalar_token).join(","),
    }
}

/// The textual form of a value as the trainer's argument parser expects it.
///
/// Lists are comma joined, so they must be flat and their strings must be
/// non-empty and free of commas for the token to split back unambiguously.
pub fn token(value: &Value) -> Result<String, &'static str> {
    let Value::List(values) = value else {
        return Ok(scalar_token(value));
    };
    for element in values {
        match element {
            Value::List(_) => return Err("nested lists cannot be comma joined"),
            Value::Str(s) if s.is_empty() => return Err("list element is an empty string"),
            Value::Str(s) if s.contains(',') => return Err("list element contains a comma"),
            _ => {}
        }
    }
    Ok(values.iter().map(scalar_token).join(","))
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_.,:/=+-".contains(c)
}

/// Single quotes `token` unless every character is safe to pass to a shell unquoted.
pub fn shell_quote(token: &str) -> String {
    if !token.is_empty() && token.chars().all(is_shell_safe) {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algos::{Algorithm, AlgorithmConfig, BaseOverrides},
        sweep::ExperimentBase,
    };

    fn experiment(algo: AlgorithmConfig) -> ExperimentConfig {
        ExperimentConfig {
            index: 1,
            exp_name: "exp_1".to_string(),
            seed: 28,
            mdp: "mujoco_1_22.hopper_mdp".to_string(),
            algo,
            base: ExperimentBase::default(),
        }
    }

    #[test]
    fn renders_nested_components_as_prefixed_flags() {
        let command = CommandRenderer::default()
            .render_experiment(&experiment(AlgorithmConfig::new(Algorithm::Trpo {
                step_size: 0.1.into(),
                backtrack_ratio: Some(0.8.into()),
            })))
            .unwrap();
        assert_eq!(
            command,
            "python scripts/run_experiment.py \
             --mdp mujoco_1_22.hopper_mdp \
             --normalize_mdp True \
             --policy mean_std_nn_policy \
             --policy_hidden_sizes 32,32 \
             --baseline linear_feature_baseline \
             --exp_name exp_1 \
             --algo trpo \
             --algo_whole_paths True \
             --algo_max_path_length 100 \
             --algo_n_itr 1000 \
             --algo_discount 0.99 \
             --algo_plot True \
             --algo_step_size 0.1 \
             --algo_backtrack_ratio 0.8 \
             --n_parallel 8 \
             --snapshot_mode last \
             --seed 28 \
             --plot True"
        );
    }

    #[test]
    fn override_replaces_base_flag() {
        let algo = AlgorithmConfig::new(Algorithm::Ppo { step_size: 0.01.into() })
            .with_overrides(BaseOverrides {
                plot: Some(false),
                ..BaseOverrides::default()
            });
        let params = experiment_params(&experiment(algo));
        let Some(Param::Tree(algo)) = params.get("algo") else {
            panic!("algo should be a nested mapping");
        };
        assert_eq!(algo.get("plot"), Some(&Param::Value(Value::Bool(false))));
        assert_eq!(params.get("plot"), Some(&Param::Value(Value::Bool(true))));

        let command = CommandRenderer::default().render(&params).unwrap();
        assert!(command.contains("--algo_plot False"));
        assert!(!command.contains("--algo_plot True"));
    }

    #[test]
    fn tokens_are_shell_safe() {
        assert_eq!(token(&Value::Float(1.0)).unwrap(), "1.0");
        assert_eq!(token(&Value::Integer(1)).unwrap(), "1");
        assert_eq!(token(&Value::Float(1e-4)).unwrap(), "0.0001");
        assert_eq!(token(&Value::from(vec![32, 64])).unwrap(), "32,64");
        assert_eq!(shell_quote("hopper_mdp"), "hopper_mdp");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn ambiguous_lists_are_rejected() {
        let nested = Value::List(vec![Value::from(vec![1, 2]), Value::from(vec![3])]);
        assert!(token(&nested).is_err());
        assert_eq!(token(&Value::from(vec![1, 2, 3])).unwrap(), "1,2,3");

        assert!(token(&Value::from(vec!["a,b", "c"])).is_err());
        assert_eq!(token(&Value::from(vec!["a", "b", "c"])).unwrap(), "a,b,c");
        assert!(token(&Value::from(vec!["", "c"])).is_err());

        let params = ParamTree::new().tree(
            "policy",
            ParamTree::new()
                .value(NAME_KEY, "mean_std_nn_policy")
                .value("hidden_sizes", nested),
        );
        let err = CommandRenderer::default().render(&params).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Unrenderable { ref flag, .. } if flag == "policy_hidden_sizes"
        ));
    }

    #[test]
    fn insert_replaces_in_place() {
        let tree = ParamTree::new()
            .value("a", 1)
            .value("b", 2)
            .value("a", 3);
        let keys: Vec<_> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(tree.get("a"), Some(&Param::Value(Value::Integer(3))));
    }
}
