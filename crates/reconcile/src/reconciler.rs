//! Reconciler - plan, apply and destroy stacks against a state store

use crate::context::{CancelToken, ProgressCallback};
use crate::diff::{Plan, diff};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::provider::Provider;
use crate::scheduler::execute;
use crate::state::{StackState, StateStore, validate_stack_name};
use crate::types::{ExecuteOptions, ExecuteSummary, OperationOutcome, OutputDecl};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

/// What one apply or destroy did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stack: String,
    pub plan: Plan,
    /// One outcome per plan operation, in plan order
    pub outcomes: Vec<OperationOutcome>,
    /// State after the run
    pub state: StackState,
    /// Whether a new record was written
    pub saved: bool,
}

impl RunReport {
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for outcome in &self.outcomes {
            summary.add_outcome(outcome);
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(OperationOutcome::is_success)
    }

    /// Failed and skipped operations
    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Ties a state store and a provider together
pub struct Reconciler<S, V> {
    store: S,
    provider: V,
    options: ExecuteOptions,
    /// Declared stack outputs by name
    outputs: BTreeMap<String, OutputDecl>,
}

impl<S: StateStore, V: Provider> Reconciler<S, V> {
    pub fn new(store: S, provider: V) -> Self {
        Self {
            store,
            provider,
            options: ExecuteOptions::default(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Declare stack outputs resolved after every run
    pub fn with_outputs(mut self, outputs: BTreeMap<String, OutputDecl>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &V {
        &self.provider
    }

    /// Last applied state of a stack
    pub fn state(&self, stack: &str) -> Result<StackState> {
        validate_stack_name(stack)?;
        self.store.load(stack)
    }

    /// Compute what an apply would do without touching anything
    pub fn plan(&self, stack: &str, desired: &Graph) -> Result<Plan> {
        let previous = self.state(stack)?;
        Ok(diff(&previous, desired))
    }

    /// Converge a stack to `desired`
    ///
    /// Holds the stack lock for the whole run and saves at most once.
    /// Provider failures are reported in the returned [`RunReport`]; only
    /// lock, state and setup problems are returned as errors.
    pub fn apply<P: ProgressCallback>(
        &self,
        stack: &str,
        desired: &Graph,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<RunReport> {
        self.converge(stack, desired, None, cancel, progress)
    }

    /// Like [`Reconciler::apply`], but only if the plan computed under the
    /// lock is still `expected`
    ///
    /// Fails with `StateChanged` before any provider call otherwise, so a
    /// plan that was shown and confirmed is the plan that runs.
    pub fn apply_planned<P: ProgressCallback>(
        &self,
        stack: &str,
        desired: &Graph,
        expected: &Plan,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<RunReport> {
        self.converge(stack, desired, Some(expected), cancel, progress)
    }

    fn converge<P: ProgressCallback>(
        &self,
        stack: &str,
        desired: &Graph,
        expected: Option<&Plan>,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<RunReport> {
        validate_stack_name(stack)?;
        self.check_outputs(desired)?;

        let _lock = self.store.lock(stack)?;
        let previous = self.store.load(stack)?;
        let plan = diff(&previous, desired);
        if expected.is_some_and(|expected| *expected != plan) {
            return Err(Error::StateChanged {
                stack: stack.to_string(),
            });
        }
        log::info!(
            "Stack '{}': {} change(s) planned",
            stack,
            plan.summary().total()
        );

        let execution = execute(
            &plan,
            desired,
            &previous,
            &self.provider,
            &self.options,
            cancel,
            progress,
        )?;

        let mut state = previous.clone();
        state.resources = execution.resources;
        state.outputs = state.resolve_outputs(&self.outputs);
        state.output_declarations = self.outputs.clone();

        let saved = state != previous;
        if saved {
            state.serial = previous.serial + 1;
            state.updated_at = Some(Utc::now());
            self.store.save(&state)?;
            log::info!("Saved stack '{}' at serial {}", stack, state.serial);
        } else {
            log::debug!("Stack '{stack}' unchanged; state not rewritten");
        }

        Ok(RunReport {
            stack: stack.to_string(),
            plan,
            outcomes: execution.outcomes,
            state,
            saved,
        })
    }

    /// Delete every resource recorded for a stack
    pub fn destroy<P: ProgressCallback>(
        &self,
        stack: &str,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<RunReport> {
        validate_stack_name(stack)?;

        let _lock = self.store.lock(stack)?;
        let previous = self.store.load(stack)?;
        let empty = Graph::empty();
        let plan = diff(&previous, &empty);

        let execution = execute(
            &plan,
            &empty,
            &previous,
            &self.provider,
            &self.options,
            cancel,
            progress,
        )?;

        // Without declarations of its own, destroy keeps what the last apply declared
        let declarations = if self.outputs.is_empty() {
            previous.output_declarations.clone()
        } else {
            self.outputs.clone()
        };
        let mut state = previous.clone();
        state.resources = execution.resources;
        if state.resources.is_empty() {
            state.outputs.clear();
            state.output_declarations.clear();
        } else {
            state.outputs = state.resolve_outputs(&declarations);
            state.output_declarations = declarations;
        }

        let saved = state != previous;
        if saved {
            state.serial = previous.serial + 1;
            state.updated_at = Some(Utc::now());
            self.store.save(&state)?;
        }

        Ok(RunReport {
            stack: stack.to_string(),
            plan,
            outcomes: execution.outcomes,
            state,
            saved,
        })
    }

    /// Stack outputs recorded by the last apply
    pub fn outputs(&self, stack: &str) -> Result<BTreeMap<String, Value>> {
        Ok(self.state(stack)?.outputs)
    }

    /// Every output reference must point at a declared resource
    fn check_outputs(&self, desired: &Graph) -> Result<()> {
        self.outputs
            .values()
            .try_for_each(|declaration| declaration.check(|name| desired.contains(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::graph::GraphBuilder;
    use crate::mock::MockProvider;
    use crate::state::MemoryStateStore;
    use crate::types::Resource;

    fn graph() -> Graph {
        GraphBuilder::new()
            .declare(Resource::network("net"))
            .declare(Resource::image("img", "nginx:alpine"))
            .declare(Resource::container("web", "img").on_network("net"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_output_is_rejected_before_running() {
        let reconciler = Reconciler::new(MemoryStateStore::new(), MockProvider::new())
            .with_outputs(BTreeMap::from([("url".to_string(), "proxy.id".into())]));
        let result = reconciler.apply("dev", &graph(), &CancelToken::new(), &mut NoProgress);
        assert!(matches!(result, Err(Error::UnknownOutput { .. })));
        assert!(reconciler.provider().calls().is_empty());
    }

    #[test]
    fn test_apply_resolves_outputs() {
        let reconciler = Reconciler::new(MemoryStateStore::new(), MockProvider::new())
            .with_outputs(BTreeMap::from([
                ("web_id".to_string(), "web.id".into()),
                ("web_name".to_string(), "web.name".into()),
                ("web_port".to_string(), OutputDecl::literal(8081)),
            ]));
        let report = reconciler
            .apply("dev", &graph(), &CancelToken::new(), &mut NoProgress)
            .unwrap();
        assert!(report.is_success());
        let outputs = reconciler.outputs("dev").unwrap();
        assert_eq!(outputs["web_name"], Value::String("web".into()));
        assert!(outputs["web_id"].as_str().unwrap().starts_with("container-web-"));
        assert_eq!(outputs["web_port"], Value::from(8081));
    }

    #[test]
    fn test_apply_planned_rejects_a_stale_plan() {
        let store = MemoryStateStore::new();
        let reconciler = Reconciler::new(store.clone(), MockProvider::new());
        let shown = reconciler.plan("dev", &graph()).unwrap();

        // Another run lands between showing the plan and applying it
        Reconciler::new(store, MockProvider::new())
            .apply("dev", &graph(), &CancelToken::new(), &mut NoProgress)
            .unwrap();

        let result =
            reconciler.apply_planned("dev", &graph(), &shown, &CancelToken::new(), &mut NoProgress);
        assert!(matches!(result, Err(Error::StateChanged { stack }) if stack == "dev"));
        assert!(reconciler.provider().calls().is_empty());

        let current = reconciler.plan("dev", &graph()).unwrap();
        let report = reconciler
            .apply_planned("dev", &graph(), &current, &CancelToken::new(), &mut NoProgress)
            .unwrap();
        assert!(report.is_success());
        assert!(!report.saved);
    }

    #[test]
    fn test_unchanged_apply_does_not_save() {
        let reconciler = Reconciler::new(MemoryStateStore::new(), MockProvider::new());
        let first = reconciler
            .apply("dev", &graph(), &CancelToken::new(), &mut NoProgress)
            .unwrap();
        assert!(first.saved);
        assert_eq!(first.state.serial, 1);

        let second = reconciler
            .apply("dev", &graph(), &CancelToken::new(), &mut NoProgress)
            .unwrap();
        assert!(!second.saved);
        assert_eq!(reconciler.state("dev").unwrap().serial, 1);
    }
}
