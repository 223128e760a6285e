//! Name-to-constructor tables for models and problems.
//!
//! Names are resolved once, when the trainer is built.

use std::collections::BTreeMap;

use crate::config::ParamTree;
use crate::error::{Result, TrainerError};
use crate::model::Model;
use crate::nn::{Mlp, MlpConfig};
use crate::problem::{Problem, ProblemDefaults, ReverseRecall, ToyClassification};
use crate::trainer::RunContext;

/// Builds a model from its `model` section, sized for the problem.
pub type ModelFactory = fn(&ParamTree, ProblemDefaults, &RunContext) -> Result<Box<dyn Model>>;

/// Builds a problem from its `<training|validation>.problem` section.
pub type ProblemFactory = fn(&ParamTree, &RunContext) -> Result<Box<dyn Problem>>;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<String, ModelFactory>,
    problems: BTreeMap<String, ProblemFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `mlp`, `reverse_recall` and `toy_classification`.
    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        registry.register_model("mlp", build_mlp);
        registry.register_problem("reverse_recall", build_reverse_recall);
        registry.register_problem("toy_classification", build_toy_classification);
        registry
    }

    pub fn register_model(&mut self, name: &str, factory: ModelFactory) {
        self.models.insert(name.to_string(), factory);
    }

    pub fn register_problem(&mut self, name: &str, factory: ProblemFactory) {
        self.problems.insert(name.to_string(), factory);
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn problem_names(&self) -> Vec<&str> {
        self.problems.keys().map(String::as_str).collect()
    }

    pub fn build_model(
        &self,
        name: &str,
        section: &ParamTree,
        defaults: ProblemDefaults,
        context: &RunContext,
    ) -> Result<Box<dyn Model>> {
        let factory = self.models.get(name).ok_or_else(|| TrainerError::UnknownModel {
            name: name.to_string(),
            known: self.model_names().join(", "),
        })?;
        factory(section, defaults, context)
    }

    pub fn build_problem(&self, name: &str, section: &ParamTree, context: &RunContext) -> Result<Box<dyn Problem>> {
        let factory = self.problems.get(name).ok_or_else(|| TrainerError::UnknownProblem {
            name: name.to_string(),
            known: self.problem_names().join(", "),
        })?;
        factory(section, context)
    }
}

fn build_mlp(section: &ParamTree, defaults: ProblemDefaults, context: &RunContext) -> Result<Box<dyn Model>> {
    let config = MlpConfig::from_params(section)?;
    Ok(Box::new(Mlp::new(&config, defaults, context.seed)?))
}

fn build_reverse_recall(section: &ParamTree, _context: &RunContext) -> Result<Box<dyn Problem>> {
    Ok(Box::new(ReverseRecall::from_params(section)?))
}

fn build_toy_classification(section: &ParamTree, _context: &RunContext) -> Result<Box<dyn Problem>> {
    Ok(Box::new(ToyClassification::from_params(section)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.model_names(), vec!["mlp"]);
        assert_eq!(registry.problem_names(), vec!["reverse_recall", "toy_classification"]);
    }

    #[test]
    fn unknown_names_are_fatal() {
        let registry = Registry::with_builtins();
        let ctx = RunContext::default();
        let err = registry.build_problem("cog", &ParamTree::new(), &ctx).err().unwrap();
        assert!(matches!(err, TrainerError::UnknownProblem { ref name, .. } if name == "cog"));
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "unknown problem `cog` (registered: reverse_recall, toy_classification)");

        let defaults = ProblemDefaults { input_size: 2, output_size: 2 };
        assert!(matches!(
            registry.build_model("dnc", &ParamTree::new(), defaults, &ctx),
            Err(TrainerError::UnknownModel { ref known, .. }) if known == "mlp"
        ));
    }

    #[test]
    fn model_is_sized_from_problem_defaults() {
        let registry = Registry::with_builtins();
        let ctx = RunContext::default();
        let section = ParamTree::from_yaml_str("{ name: reverse_recall, data_bits: 2, max_sequence_length: 3 }").unwrap();
        let problem = registry.build_problem("reverse_recall", &section, &ctx).unwrap();
        let model = registry
            .build_model("mlp", &ParamTree::from_yaml_str("{ name: mlp }").unwrap(), problem.default_values(), &ctx)
            .unwrap();
        assert_eq!(model.parameters()[0].shape(), (2 * 3 * 4, 16));
    }
}
