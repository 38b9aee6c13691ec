//! In-memory provider for tests
//!
//! Records every call with start/finish events, hands out sequential ids and
//! can be scripted to fail for specific resources.

use crate::error::ProviderError;
use crate::provider::{Dependencies, Provider};
use crate::types::{Outputs, Resource, ResourceState};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Provider method that was called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Create,
    Update,
    Delete,
}

/// A recorded call boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(CallKind, String),
    Finished(CallKind, String),
}

#[derive(Debug, Clone)]
struct Script {
    /// `None` fails forever
    remaining: Option<u32>,
    error: ProviderError,
}

/// Scriptable fake provider
#[derive(Debug, Default)]
pub struct MockProvider {
    events: Mutex<Vec<Event>>,
    scripts: Mutex<HashMap<(CallKind, String), Script>>,
    next_id: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Option<Duration>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every call (makes overlap observable)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every `kind` call for `resource`
    pub fn fail_always(self, kind: CallKind, resource: &str, error: ProviderError) -> Self {
        guard(&self.scripts).insert(
            (kind, resource.to_string()),
            Script {
                remaining: None,
                error,
            },
        );
        self
    }

    /// Fail the first `times` `kind` calls for `resource`
    pub fn fail_times(self, kind: CallKind, resource: &str, times: u32, error: ProviderError) -> Self {
        guard(&self.scripts).insert(
            (kind, resource.to_string()),
            Script {
                remaining: Some(times),
                error,
            },
        );
        self
    }

    pub fn events(&self) -> Vec<Event> {
        guard(&self.events).clone()
    }

    /// Started calls in order
    pub fn calls(&self) -> Vec<(CallKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(kind, name) => Some((kind, name)),
                Event::Finished(..) => None,
            })
            .collect()
    }

    /// Number of started `kind` calls for `resource`
    pub fn call_count(&self, kind: CallKind, resource: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(k, n)| *k == kind && n == resource)
            .count()
    }

    /// Whether the latest `first` call finished before the latest `then` call started
    pub fn finished_before_started(
        &self,
        first: (CallKind, &str),
        then: (CallKind, &str),
    ) -> bool {
        let events = self.events();
        let finished = events.iter().rposition(|e| {
            matches!(e, Event::Finished(k, n) if *k == first.0 && n == first.1)
        });
        let started = events
            .iter()
            .rposition(|e| matches!(e, Event::Started(k, n) if *k == then.0 && n == then.1));
        matches!((finished, started), (Some(f), Some(s)) if f < s)
    }

    /// Highest number of calls that overlapped
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn call<T>(
        &self,
        kind: CallKind,
        resource: &str,
        f: impl FnOnce() -> T,
    ) -> Result<T, ProviderError> {
        guard(&self.events).push(Event::Started(kind, resource.to_string()));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let scripted = {
            let mut scripts = guard(&self.scripts);
            match scripts.get_mut(&(kind, resource.to_string())) {
                Some(script) => match &mut script.remaining {
                    None => Some(script.error.clone()),
                    Some(0) => None,
                    Some(n) => {
                        *n -= 1;
                        Some(script.error.clone())
                    }
                },
                None => None,
            }
        };

        let result = match scripted {
            Some(error) => Err(error),
            None => Ok(f()),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        guard(&self.events).push(Event::Finished(kind, resource.to_string()));
        result
    }

    fn outputs_for(&self, resource: &Resource) -> Outputs {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Outputs::from([
            (
                "id".to_string(),
                Value::String(format!("{}-{}-{}", resource.kind(), resource.name, n)),
            ),
            (
                "name".to_string(),
                Value::String(resource.runtime_name().to_string()),
            ),
        ])
    }
}

impl Provider for MockProvider {
    fn create(&self, resource: &Resource, deps: &Dependencies) -> Result<Outputs, ProviderError> {
        for dep in resource.dependencies() {
            deps.id(&dep)?;
        }
        self.call(CallKind::Create, &resource.name, || self.outputs_for(resource))
    }

    fn update(
        &self,
        current: &ResourceState,
        desired: &Resource,
        _deps: &Dependencies,
    ) -> Result<Outputs, ProviderError> {
        self.call(CallKind::Update, &desired.name, || {
            let mut outputs = current.outputs.clone();
            outputs.insert("id".to_string(), Value::String(current.id.clone()));
            outputs.insert(
                "name".to_string(),
                Value::String(desired.runtime_name().to_string()),
            );
            outputs
        })
    }

    fn delete(&self, current: &ResourceState) -> Result<(), ProviderError> {
        self.call(CallKind::Delete, current.name(), || ())
    }
}
