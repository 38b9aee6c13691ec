//! Execution engine - runs a plan's provider calls in dependency order
//!
//! Every operation becomes one or two steps. Creates and updates are
//! forward steps, deletes are reverse steps, and a replace is a reverse
//! step followed by a forward step. Forward steps wait on the forward steps
//! of their desired dependencies; reverse steps wait on the reverse steps of
//! whatever depended on them in the previous state, and on the update of a
//! former dependent that drops the reference. Independent steps run
//! concurrently on a bounded rayon pool while the calling thread coordinates.

use crate::context::{CancelToken, ProgressCallback};
use crate::diff::{Operation, Plan};
use crate::error::{Error, ProviderError, Result};
use crate::graph::Graph;
use crate::provider::{Dependencies, Provider, id_from_outputs};
use crate::retry::{Attempted, RetryConfig, with_retry};
use crate::state::StackState;
use crate::types::{
    ExecuteOptions, ExecuteSummary, OperationKind, OperationOutcome, OperationStatus, Outputs,
    Resource, ResourceState,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;

/// Result of running a plan
#[derive(Debug, Clone)]
pub struct Execution {
    /// One outcome per plan operation, in plan order
    pub outcomes: Vec<OperationOutcome>,
    /// Resource entries after the run: succeeded operations applied,
    /// everything else as it was
    pub resources: BTreeMap<String, ResourceState>,
}

impl Execution {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Provider work handed to a worker thread
enum Work {
    Create {
        resource: Resource,
        deps: Dependencies,
    },
    Update {
        current: ResourceState,
        desired: Resource,
        deps: Dependencies,
    },
    Delete {
        current: ResourceState,
    },
}

struct WorkResult {
    attempts: u32,
    /// `Some` after a create or update, `None` after a delete
    result: std::result::Result<Option<ResourceState>, ProviderError>,
    /// An update fell back to delete and create
    replaced: bool,
    /// The old object is gone whatever `result` says
    removed: bool,
}

impl WorkResult {
    fn panicked() -> Self {
        Self {
            attempts: 1,
            result: Err(ProviderError::fatal("provider call panicked")),
            replaced: false,
            removed: false,
        }
    }
}

struct Step {
    op: usize,
    direction: Direction,
    work: Option<Work>,
    /// Unsettled steps this one waits on
    waiting: usize,
    unblocks: Vec<usize>,
    settled: bool,
}

/// Per-operation bookkeeping while its steps run
struct Track {
    kind: OperationKind,
    remaining: usize,
    started: bool,
    attempts: u32,
    status: Option<OperationStatus>,
    error: Option<String>,
}

/// Execute a plan against a provider
///
/// `previous` must be the state the plan was computed from. Provider
/// failures never abort the run: a failed operation's dependents are
/// skipped and everything independent of it still runs. The returned error
/// covers only setup problems (a plan that does not match the graph, a
/// thread pool that cannot be created).
pub fn execute<V, P>(
    plan: &Plan,
    desired: &Graph,
    previous: &StackState,
    provider: &V,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
    progress: &mut P,
) -> Result<Execution>
where
    V: Provider + ?Sized,
    P: ProgressCallback,
{
    let mut run = Run::new(plan.operations(), desired, previous)?;
    let jobs = opts.jobs.max(1);
    let retry = &opts.retry;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("reconcile-{i}"))
        .build()
        .map_err(|e| Error::Other(format!("failed to create thread pool: {e}")))?;

    let mut ready: VecDeque<usize> = run
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.waiting == 0)
        .map(|(i, _)| i)
        .collect();

    progress.on_run_start(run.changes());
    log::debug!("Executing {} steps with {} jobs", run.steps.len(), jobs);

    let (tx, rx) = mpsc::channel::<(usize, WorkResult)>();
    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;
        loop {
            while in_flight < jobs && !cancel.is_cancelled() {
                let Some(step) = ready.pop_front() else {
                    break;
                };
                let Some(work) = run.dispatch(step, progress) else {
                    continue;
                };
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = catch_unwind(AssertUnwindSafe(|| run_work(provider, retry, work)))
                        .unwrap_or_else(|_| WorkResult::panicked());
                    // The receiver outlives the scope
                    let _ = tx.send((step, result));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Ok((step, result)) = rx.recv() else {
                break;
            };
            in_flight -= 1;
            run.finish(step, result, &mut ready, progress);
        }
    });

    if cancel.is_cancelled() {
        log::warn!("Run cancelled; remaining operations skipped");
        run.skip_unsettled("run cancelled before this operation started", progress);
    } else {
        run.skip_unsettled("operation was never scheduled", progress);
    }
    progress.on_run_complete();

    Ok(run.into_execution())
}

struct Run<'a> {
    ops: &'a [Operation],
    desired: &'a Graph,
    steps: Vec<Step>,
    tracks: Vec<Track>,
    outcomes: Vec<Option<OperationOutcome>>,
    /// Outputs of every resource that currently exists, `id` included
    outputs: BTreeMap<String, Outputs>,
    resources: BTreeMap<String, ResourceState>,
}

impl<'a> Run<'a> {
    fn new(ops: &'a [Operation], desired: &'a Graph, previous: &StackState) -> Result<Self> {
        let mismatch = |op: &Operation, side: &str| {
            Error::Other(format!(
                "plan does not match {side}: no resource '{}' for {}",
                op.resource, op.kind
            ))
        };

        let mut steps = Vec::new();
        let mut tracks = Vec::with_capacity(ops.len());
        let mut outcomes = vec![None; ops.len()];
        let mut forward: HashMap<&str, usize> = HashMap::new();
        let mut reverse: HashMap<&str, usize> = HashMap::new();

        for (index, op) in ops.iter().enumerate() {
            let name = op.resource.as_str();
            let current = || {
                previous
                    .resources
                    .get(name)
                    .cloned()
                    .ok_or_else(|| mismatch(op, "the previous state"))
            };
            let wanted = || desired.get(name).cloned().ok_or_else(|| mismatch(op, "the graph"));

            let mut new_step = |direction, work| {
                steps.push(Step {
                    op: index,
                    direction,
                    work: Some(work),
                    waiting: 0,
                    unblocks: Vec::new(),
                    settled: false,
                });
                steps.len() - 1
            };

            let count = match op.kind {
                OperationKind::NoOp => {
                    outcomes[index] = Some(OperationOutcome {
                        resource: op.resource.clone(),
                        kind: OperationKind::NoOp,
                        status: OperationStatus::Succeeded,
                        attempts: 0,
                        error: None,
                    });
                    0
                }
                OperationKind::Create => {
                    let work = Work::Create {
                        resource: wanted()?,
                        deps: Dependencies::default(),
                    };
                    forward.insert(name, new_step(Direction::Forward, work));
                    1
                }
                OperationKind::Update => {
                    let work = Work::Update {
                        current: current()?,
                        desired: wanted()?,
                        deps: Dependencies::default(),
                    };
                    forward.insert(name, new_step(Direction::Forward, work));
                    1
                }
                OperationKind::Delete => {
                    let work = Work::Delete {
                        current: current()?,
                    };
                    reverse.insert(name, new_step(Direction::Reverse, work));
                    1
                }
                OperationKind::Replace => {
                    let delete = Work::Delete {
                        current: current()?,
                    };
                    let create = Work::Create {
                        resource: wanted()?,
                        deps: Dependencies::default(),
                    };
                    reverse.insert(name, new_step(Direction::Reverse, delete));
                    forward.insert(name, new_step(Direction::Forward, create));
                    2
                }
            };

            tracks.push(Track {
                kind: op.kind,
                remaining: count,
                started: false,
                attempts: 0,
                status: None,
                error: None,
            });
        }

        let mut edges = Vec::new();
        for (name, &step) in &forward {
            for dep in desired.dependencies(name) {
                if let Some(&before) = forward.get(dep.as_str()) {
                    edges.push((before, step));
                }
            }
            if let Some(&before) = reverse.get(name) {
                edges.push((before, step));
            }
        }
        for (name, &step) in &reverse {
            for (dependent, state) in &previous.resources {
                if state.resource.dependencies().contains(*name)
                    && let Some(&before) = reverse.get(dependent.as_str())
                {
                    edges.push((before, step));
                }
            }
        }
        edges.sort_unstable();
        for (before, after) in edges {
            steps[before].unblocks.push(after);
            steps[after].waiting += 1;
        }

        // A former dependent updated away from a resource still holds it
        // until its update lands, so the delete waits for that update
        let mut detaches = Vec::new();
        for (name, &step) in &reverse {
            for (dependent, state) in &previous.resources {
                if !state.resource.dependencies().contains(*name)
                    || reverse.contains_key(dependent.as_str())
                    || desired.dependencies(dependent).contains(*name)
                {
                    continue;
                }
                if let Some(&before) = forward.get(dependent.as_str()) {
                    detaches.push((before, step));
                }
            }
        }
        detaches.sort_unstable();
        for (before, after) in detaches {
            if reaches(&steps, after, before) {
                log::debug!(
                    "Not ordering delete of '{}' after update of '{}': would form a cycle",
                    ops[steps[after].op].resource,
                    ops[steps[before].op].resource
                );
                continue;
            }
            steps[before].unblocks.push(after);
            steps[after].waiting += 1;
        }

        let outputs = previous
            .resources
            .keys()
            .filter_map(|name| Some((name.clone(), previous.resource_outputs(name)?)))
            .collect();

        Ok(Self {
            ops,
            desired,
            steps,
            tracks,
            outcomes,
            outputs,
            resources: previous.resources.clone(),
        })
    }

    /// Number of operations that will call the provider
    fn changes(&self) -> usize {
        self.tracks.iter().filter(|t| t.remaining > 0).count()
    }

    /// Take a ready step's work, filling in its dependencies' current outputs
    fn dispatch<P: ProgressCallback>(&mut self, step: usize, progress: &mut P) -> Option<Work> {
        let mut work = self.steps[step].work.take()?;
        if let Work::Create { resource, deps } | Work::Update { desired: resource, deps, .. } =
            &mut work
        {
            *deps = self.dependencies_of(&resource.name);
        }

        let op = &self.ops[self.steps[step].op];
        let track = &mut self.tracks[self.steps[step].op];
        if !track.started {
            track.started = true;
            progress.on_operation_start(&op.resource, op.kind);
        }
        log::debug!(
            "Dispatching {:?} step for {} '{}'",
            self.steps[step].direction,
            op.kind,
            op.resource
        );
        Some(work)
    }

    fn dependencies_of(&self, name: &str) -> Dependencies {
        Dependencies::new(
            self.desired
                .dependencies(name)
                .into_iter()
                .filter_map(|dep| {
                    let outputs = self.outputs.get(&dep)?.clone();
                    Some((dep, outputs))
                })
                .collect(),
        )
    }

    fn finish<P: ProgressCallback>(
        &mut self,
        step: usize,
        result: WorkResult,
        ready: &mut VecDeque<usize>,
        progress: &mut P,
    ) {
        let op = self.steps[step].op;
        let name = self.ops[op].resource.clone();
        self.steps[step].settled = true;

        let track = &mut self.tracks[op];
        track.attempts += result.attempts;
        if result.replaced {
            track.kind = OperationKind::Replace;
        }
        if result.removed {
            self.resources.remove(&name);
            self.outputs.remove(&name);
        }

        match result.result {
            Ok(Some(state)) => {
                let mut outputs = state.outputs.clone();
                outputs.insert("id".to_string(), Value::String(state.id.clone()));
                self.outputs.insert(name.clone(), outputs);
                self.resources.insert(name, state);
                self.unblock(step, ready);
            }
            Ok(None) => {
                self.outputs.remove(&name);
                self.resources.remove(&name);
                self.unblock(step, ready);
            }
            Err(e) => {
                let track = &mut self.tracks[op];
                let error = e.into_error(&name, track.kind, result.attempts);
                log::error!("{error}");
                track.status = Some(OperationStatus::Failed);
                track.error = Some(error.to_string());
                self.skip_dependents(step, &name, progress);
            }
        }

        self.step_settled(op, progress);
    }

    fn unblock(&mut self, step: usize, ready: &mut VecDeque<usize>) {
        for next in self.steps[step].unblocks.clone() {
            let next_step = &mut self.steps[next];
            next_step.waiting = next_step.waiting.saturating_sub(1);
            if next_step.waiting == 0 && !next_step.settled {
                ready.push_back(next);
            }
        }
    }

    /// Settle every step reachable from a failed one as skipped
    fn skip_dependents<P: ProgressCallback>(&mut self, step: usize, failed: &str, progress: &mut P) {
        let mut queue: VecDeque<usize> = self.steps[step].unblocks.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if self.steps[next].settled {
                continue;
            }
            self.steps[next].settled = true;
            self.steps[next].work = None;
            queue.extend(self.steps[next].unblocks.iter().copied());

            let op = self.steps[next].op;
            let track = &mut self.tracks[op];
            if track.status.is_none() {
                log::warn!("Skipping '{}': '{}' failed", self.ops[op].resource, failed);
                track.status = Some(OperationStatus::Skipped);
                track.error = Some(format!("dependency '{failed}' failed"));
            }
            self.step_settled(op, progress);
        }
    }

    fn skip_unsettled<P: ProgressCallback>(&mut self, reason: &str, progress: &mut P) {
        for step in 0..self.steps.len() {
            if self.steps[step].settled {
                continue;
            }
            self.steps[step].settled = true;
            self.steps[step].work = None;
            let op = self.steps[step].op;
            let track = &mut self.tracks[op];
            if track.status.is_none() {
                track.status = Some(OperationStatus::Skipped);
                track.error = Some(reason.to_string());
            }
            self.step_settled(op, progress);
        }
    }

    fn step_settled<P: ProgressCallback>(&mut self, op: usize, progress: &mut P) {
        let track = &mut self.tracks[op];
        track.remaining = track.remaining.saturating_sub(1);
        if track.remaining > 0 {
            return;
        }

        let outcome = OperationOutcome {
            resource: self.ops[op].resource.clone(),
            kind: track.kind,
            status: track.status.unwrap_or(OperationStatus::Succeeded),
            attempts: track.attempts,
            error: track.error.take(),
        };
        log::debug!(
            "{} '{}' {} after {} attempt(s)",
            outcome.kind,
            outcome.resource,
            outcome.status,
            outcome.attempts
        );
        progress.on_operation_complete(&outcome);
        self.outcomes[op] = Some(outcome);
    }

    fn into_execution(self) -> Execution {
        Execution {
            outcomes: self.outcomes.into_iter().flatten().collect(),
            resources: self.resources,
        }
    }
}

/// Whether `to` is reachable from `from` along existing edges
fn reaches(steps: &[Step], from: usize, to: usize) -> bool {
    let mut seen = vec![false; steps.len()];
    let mut queue = VecDeque::from([from]);
    while let Some(step) = queue.pop_front() {
        if step == to {
            return true;
        }
        if std::mem::replace(&mut seen[step], true) {
            continue;
        }
        queue.extend(steps[step].unblocks.iter().copied());
    }
    false
}

/// Turn create/update outputs into a state entry
fn record(resource: Resource, mut outputs: Outputs) -> std::result::Result<ResourceState, ProviderError> {
    let id = id_from_outputs(&outputs)?;
    outputs.remove("id");
    Ok(ResourceState {
        resource,
        id,
        outputs,
    })
}

fn run_work<V: Provider + ?Sized>(provider: &V, retry: &RetryConfig, work: Work) -> WorkResult {
    match work {
        Work::Create { resource, deps } => {
            let label = format!("create {}", resource.name);
            let Attempted { result, attempts } =
                with_retry(retry, &label, || provider.create(&resource, &deps));
            WorkResult {
                attempts,
                result: result.and_then(|o| record(resource, o)).map(Some),
                replaced: false,
                removed: false,
            }
        }
        Work::Update {
            current,
            desired,
            deps,
        } => {
            let label = format!("update {}", desired.name);
            let updated = with_retry(retry, &label, || provider.update(&current, &desired, &deps));
            match updated.result {
                Err(ProviderError::ImmutableConflict { property }) => {
                    log::info!(
                        "'{}': '{}' cannot change in place, replacing",
                        desired.name,
                        property
                    );
                    replace_after_conflict(provider, retry, &current, desired, &deps, updated.attempts)
                }
                result => WorkResult {
                    attempts: updated.attempts,
                    result: result.and_then(|o| record(desired, o)).map(Some),
                    replaced: false,
                    removed: false,
                },
            }
        }
        Work::Delete { current } => {
            let label = format!("delete {}", current.name());
            let Attempted { result, attempts } =
                with_retry(retry, &label, || provider.delete(&current));
            WorkResult {
                attempts,
                result: result.map(|()| None),
                replaced: false,
                removed: false,
            }
        }
    }
}

fn replace_after_conflict<V: Provider + ?Sized>(
    provider: &V,
    retry: &RetryConfig,
    current: &ResourceState,
    desired: Resource,
    deps: &Dependencies,
    spent: u32,
) -> WorkResult {
    let deleted = with_retry(retry, &format!("delete {}", desired.name), || {
        provider.delete(current)
    });
    let mut attempts = spent + deleted.attempts;
    if let Err(e) = deleted.result {
        return WorkResult {
            attempts,
            result: Err(e),
            replaced: true,
            removed: false,
        };
    }

    let created = with_retry(retry, &format!("create {}", desired.name), || {
        provider.create(&desired, deps)
    });
    attempts += created.attempts;
    WorkResult {
        attempts,
        result: created.result.and_then(|o| record(desired, o)).map(Some),
        replaced: true,
        removed: true,
    }
}
