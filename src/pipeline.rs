use crate::error::Result;
use crate::manifest::VariantSpec;
use std::error::Error as _;
use tracing::{debug, error};

/// One step of a pipeline over a shared context `C`.
pub trait Stage<C> {
    fn name(&self) -> &str;
    fn run(&self, ctx: &mut C) -> Result<()>;
}

/// Ordered stages; the first failure stops the run.
pub struct Pipeline<C> {
    stages: Vec<Box<dyn Stage<C>>>,
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Pipeline<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn add_stage<S: Stage<C> + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }

    pub fn with_stage<S: Stage<C> + 'static>(mut self, stage: S) -> Self {
        self.add_stage(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn execute(&self, ctx: &mut C) -> Result<()> {
        for stage in &self.stages {
            debug!(stage = stage.name(), "running stage");
            stage.run(ctx)?;
        }
        Ok(())
    }
}

/// Result of processing a single variant within a batch.
#[derive(Debug)]
pub struct VariantOutcome<T> {
    pub tag: String,
    pub result: Result<T>,
}

impl<T> VariantOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Applies `f` to every variant in order. Failures are logged with their
/// cause chain and collected; they never stop the remaining variants.
pub fn run_variants<T, F>(variants: &[VariantSpec], mut f: F) -> Vec<VariantOutcome<T>>
where
    F: FnMut(&VariantSpec) -> Result<T>,
{
    variants
        .iter()
        .map(|variant| {
            let result = f(variant);
            if let Err(err) = &result {
                let mut message = err.to_string();
                let mut cause = err.source();
                while let Some(c) = cause {
                    message.push_str(": ");
                    message.push_str(&c.to_string());
                    cause = c.source();
                }
                error!(variant = %variant.tag, "{}", message);
            }
            VariantOutcome { tag: variant.tag.clone(), result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::manifest::Manifest;

    struct Push(&'static str);

    impl Stage<Vec<String>> for Push {
        fn name(&self) -> &str {
            self.0
        }
        fn run(&self, ctx: &mut Vec<String>) -> Result<()> {
            if self.0 == "fail" {
                return Err(PipelineError::StageOrder(self.0.into()));
            }
            ctx.push(self.0.to_string());
            Ok(())
        }
    }

    #[test]
    fn stages_run_in_order_until_failure() {
        let pipeline = Pipeline::new().with_stage(Push("a")).with_stage(Push("fail")).with_stage(Push("b"));
        assert_eq!(pipeline.stage_names(), vec!["a", "fail", "b"]);
        let mut log = Vec::new();
        assert!(pipeline.execute(&mut log).is_err());
        assert_eq!(log, vec!["a"]);
    }

    #[test]
    fn batch_continues_past_failures() {
        let manifest = Manifest::default();
        let variants = vec![manifest.variant("missing"), manifest.variant("atto")];
        let outcomes = run_variants(&variants, |v| {
            if v.tag == "missing" {
                Err(PipelineError::MissingArtifact(v.source_graph.clone()))
            } else {
                Ok(v.tag.len())
            }
        });
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_ok());
        assert_eq!(outcomes[1].tag, "atto");
        assert!(matches!(outcomes[1].result, Ok(4)));
    }
}
