//! Persisted stack state
//!
//! One versioned record per stack holds the last-applied resources with their
//! provider ids and outputs. Records are written atomically (temp file in the
//! same directory, fsync, rename) and carry a blake3 checksum that `load`
//! verifies before the record is used for a diff.

use crate::error::{Error, Result};
use crate::types::{OutputDecl, Outputs, ResourceState};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Current on-disk record version
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// State Structures
// ============================================================================

/// Last applied state of one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub version: u32,
    pub stack: String,
    /// Incremented on every save
    pub serial: u64,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Resolved stack outputs
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Declarations the outputs were resolved from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_declarations: BTreeMap<String, OutputDecl>,
}

/// On-disk form: the state plus its checksum
#[derive(Serialize, Deserialize)]
struct StateRecord {
    checksum: String,
    #[serde(flatten)]
    state: StackState,
}

impl StackState {
    /// State of a stack that was never applied
    pub fn empty(stack: &str) -> Self {
        Self {
            version: STATE_VERSION,
            stack: stack.to_string(),
            serial: 0,
            updated_at: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            output_declarations: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resolve declared outputs; references that cannot be resolved are left out
    pub fn resolve_outputs(
        &self,
        declarations: &BTreeMap<String, OutputDecl>,
    ) -> BTreeMap<String, Value> {
        let mut resolved = BTreeMap::new();
        for (name, declaration) in declarations {
            let value = match declaration {
                OutputDecl::Literal { value } => Ok(value.clone()),
                OutputDecl::Reference(reference) => self.resolve_output(reference),
            };
            match value {
                Ok(value) => {
                    resolved.insert(name.clone(), value);
                }
                Err(e) => log::warn!("Output '{name}' not available: {e}"),
            }
        }
        resolved
    }

    /// Resolve a `resource.key` reference against the recorded outputs
    pub fn resolve_output(&self, reference: &str) -> Result<Value> {
        let unknown = || Error::UnknownOutput {
            reference: reference.to_string(),
        };
        let (resource, key) = reference.split_once('.').ok_or_else(unknown)?;
        self.resources
            .get(resource)
            .and_then(|state| state.output(key))
            .ok_or_else(unknown)
    }

    /// Outputs of one resource, `id` included
    pub fn resource_outputs(&self, resource: &str) -> Option<Outputs> {
        self.resources.get(resource).map(|state| {
            let mut outputs = state.outputs.clone();
            outputs.insert("id".to_string(), Value::String(state.id.clone()));
            outputs
        })
    }

    fn checksum(&self) -> Result<String> {
        let payload = serde_json::to_vec(&(
            &self.resources,
            &self.outputs,
            &self.output_declarations,
        ))?;
        Ok(blake3::hash(&payload).to_hex().to_string())
    }

    fn verify(&self, stack: &str) -> Result<()> {
        let corrupt = |message: String| Error::StateCorrupt {
            stack: stack.to_string(),
            message,
        };

        if self.version != STATE_VERSION {
            return Err(corrupt(format!(
                "unsupported record version {} (expected {})",
                self.version, STATE_VERSION
            )));
        }
        if self.stack != stack {
            return Err(corrupt(format!("record belongs to stack '{}'", self.stack)));
        }
        if let Some((key, entry)) = self.resources.iter().find(|(k, v)| **k != v.resource.name) {
            return Err(corrupt(format!(
                "entry '{}' holds resource '{}'",
                key, entry.resource.name
            )));
        }
        Ok(())
    }
}

/// Reject stack names that are unsafe as file names
pub fn validate_stack_name(stack: &str) -> Result<()> {
    let valid = !stack.is_empty()
        && !stack.starts_with('.')
        && stack
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidStackName(stack.to_string()))
    }
}

// ============================================================================
// Store trait
// ============================================================================

enum LockGuard {
    File(File),
    Memory(Arc<Mutex<HashSet<String>>>),
}

/// Exclusive hold on one stack, released on drop
pub struct StackLock {
    stack: String,
    guard: LockGuard,
}

impl StackLock {
    pub fn stack(&self) -> &str {
        &self.stack
    }
}

impl Drop for StackLock {
    fn drop(&mut self) {
        match &self.guard {
            LockGuard::File(file) => {
                if let Err(e) = FileExt::unlock(file) {
                    log::warn!("Failed to release lock for stack {}: {}", self.stack, e);
                }
            }
            LockGuard::Memory(held) => {
                let mut held = match held.lock() {
                    Ok(held) => held,
                    Err(poisoned) => poisoned.into_inner(),
                };
                held.remove(&self.stack);
            }
        }
        log::debug!("Released lock for stack {}", self.stack);
    }
}

impl std::fmt::Debug for StackLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackLock").field("stack", &self.stack).finish()
    }
}

/// Persistence for stack state
pub trait StateStore: Send + Sync {
    /// Load the last applied state, or an empty state for a new stack
    fn load(&self, stack: &str) -> Result<StackState>;

    /// Persist the full state; either all of it lands or the prior record stays
    fn save(&self, state: &StackState) -> Result<()>;

    /// Take the exclusive per-stack lock
    fn lock(&self, stack: &str) -> Result<StackLock>;

    /// Stacks with a persisted record
    fn list(&self) -> Result<Vec<String>>;
}

// ============================================================================
// File store
// ============================================================================

/// One JSON record per stack under a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a stack's record
    pub fn state_file(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.json"))
    }

    fn lock_file(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.lock"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, stack: &str) -> Result<StackState> {
        validate_stack_name(stack)?;
        let path = self.state_file(stack);

        if !path.exists() {
            log::debug!("State file {} does not exist, using empty state", path.display());
            return Ok(StackState::empty(stack));
        }

        let content = fs::read(&path)?;
        let record: StateRecord =
            serde_json::from_slice(&content).map_err(|e| Error::StateCorrupt {
                stack: stack.to_string(),
                message: format!("failed to parse {}: {}", path.display(), e),
            })?;

        record.state.verify(stack)?;
        if record.state.checksum()? != record.checksum {
            return Err(Error::StateCorrupt {
                stack: stack.to_string(),
                message: "checksum mismatch".to_string(),
            });
        }

        log::debug!(
            "Loaded state for {} (serial {}) from {}",
            stack,
            record.state.serial,
            path.display()
        );
        Ok(record.state)
    }

    fn save(&self, state: &StackState) -> Result<()> {
        validate_stack_name(&state.stack)?;
        fs::create_dir_all(&self.dir)?;

        let record = StateRecord {
            checksum: state.checksum()?,
            state: state.clone(),
        };
        let content = serde_json::to_vec_pretty(&record)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;

        let path = self.state_file(&state.stack);
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        log::debug!("Saved state for {} to {}", state.stack, path.display());
        Ok(())
    }

    fn lock(&self, stack: &str) -> Result<StackLock> {
        validate_stack_name(stack)?;
        fs::create_dir_all(&self.dir)?;

        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_file(stack))?;

        if let Err(e) = file.try_lock_exclusive() {
            let contended = fs2::lock_contended_error();
            if e.kind() == contended.kind() || e.raw_os_error() == contended.raw_os_error() {
                return Err(Error::StateLocked {
                    stack: stack.to_string(),
                });
            }
            return Err(Error::Io(e));
        }

        log::debug!("Acquired lock for stack {}", stack);
        Ok(StackLock {
            stack: stack.to_string(),
            guard: LockGuard::File(file),
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut stacks: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        stacks.sort();
        Ok(stacks)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store that keeps records in memory (tests, dry runs)
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    states: Arc<Mutex<BTreeMap<String, StackState>>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a record
    pub fn with_state(self, state: StackState) -> Self {
        self.states_guard().insert(state.stack.clone(), state);
        self
    }

    fn states_guard(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StackState>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, stack: &str) -> Result<StackState> {
        validate_stack_name(stack)?;
        Ok(self
            .states_guard()
            .get(stack)
            .cloned()
            .unwrap_or_else(|| StackState::empty(stack)))
    }

    fn save(&self, state: &StackState) -> Result<()> {
        validate_stack_name(&state.stack)?;
        self.states_guard()
            .insert(state.stack.clone(), state.clone());
        Ok(())
    }

    fn lock(&self, stack: &str) -> Result<StackLock> {
        validate_stack_name(stack)?;
        let mut held = match self.locks.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(stack.to_string()) {
            return Err(Error::StateLocked {
                stack: stack.to_string(),
            });
        }
        Ok(StackLock {
            stack: stack.to_string(),
            guard: LockGuard::Memory(Arc::clone(&self.locks)),
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.states_guard().keys().cloned().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
