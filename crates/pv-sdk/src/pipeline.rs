use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use pv_crypto::ProtectionKeys;
use pv_store::VersionedRecord;
use pv_types::{KeyTriple, VersionKey, VersionedKey};

use crate::error::{SdkError, SdkResult};
use crate::manager::DataManager;

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// State shared by the steps of one pipeline run.
///
/// Steps record what they changed here so their compensation knows what to
/// undo.
pub struct StepContext {
    manager: Arc<DataManager>,
    written: HashMap<String, VersionedKey>,
    snapshots: HashMap<String, Vec<VersionedRecord>>,
}

impl StepContext {
    pub fn new(manager: Arc<DataManager>) -> Self {
        Self {
            manager,
            written: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }

    pub fn manager(&self) -> &Arc<DataManager> {
        &self.manager
    }

    /// The key a step wrote, if it wrote one.
    pub fn written(&self, step: &str) -> Option<VersionedKey> {
        self.written.get(step).copied()
    }
}

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// One unit of work in a [`Pipeline`], paired with the action that undoes it.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut StepContext) -> SdkResult<()>;

    /// Undo a successful [`execute`](Self::execute). Only called for steps
    /// that completed.
    async fn rollback(&self, ctx: &mut StepContext) -> SdkResult<()>;
}

// ---------------------------------------------------------------------------
// PutStep
// ---------------------------------------------------------------------------

/// Writes one revision; compensation withdraws it.
pub struct PutStep {
    name: String,
    key: VersionedKey,
    payload: Bytes,
    based_on: VersionKey,
    keys: Arc<ProtectionKeys>,
    ttl_secs: u64,
}

impl PutStep {
    pub fn new(
        name: impl Into<String>,
        key: VersionedKey,
        payload: impl Into<Bytes>,
        based_on: VersionKey,
        keys: Arc<ProtectionKeys>,
    ) -> Self {
        Self {
            name: name.into(),
            key,
            payload: payload.into(),
            based_on,
            keys,
            ttl_secs: 0,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }
}

#[async_trait]
impl Step for PutStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext) -> SdkResult<()> {
        let manager = Arc::clone(&ctx.manager);
        manager
            .put(
                self.key,
                self.payload.clone(),
                self.based_on,
                &self.keys,
                self.ttl_secs,
            )
            .await?
            .into_result()?;
        ctx.written.insert(self.name.clone(), self.key);
        Ok(())
    }

    async fn rollback(&self, ctx: &mut StepContext) -> SdkResult<()> {
        let Some(key) = ctx.written.remove(&self.name) else {
            return Ok(());
        };
        let manager = Arc::clone(&ctx.manager);
        manager
            .remove(key.triple, Some(key.version), &self.keys)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RemoveStep
// ---------------------------------------------------------------------------

/// Removes one revision or a whole triple; compensation writes the removed
/// revisions back.
pub struct RemoveStep {
    name: String,
    triple: KeyTriple,
    version: Option<VersionKey>,
    keys: Arc<ProtectionKeys>,
}

impl RemoveStep {
    pub fn new(
        name: impl Into<String>,
        triple: KeyTriple,
        version: Option<VersionKey>,
        keys: Arc<ProtectionKeys>,
    ) -> Self {
        Self {
            name: name.into(),
            triple,
            version,
            keys,
        }
    }

    /// Everything this step is about to delete, oldest first.
    async fn snapshot(&self, manager: &DataManager) -> SdkResult<Vec<VersionedRecord>> {
        if let Some(version) = self.version {
            return Ok(manager
                .get(&self.triple, Some(version))
                .await?
                .into_iter()
                .collect());
        }
        let digest = manager.coordinator().get_digest(&self.triple).await?;
        let mut records = Vec::with_capacity(digest.len());
        for (version, _) in digest.iter() {
            if let Some(record) = manager.get(&self.triple, Some(*version)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Step for RemoveStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext) -> SdkResult<()> {
        let manager = Arc::clone(&ctx.manager);
        let snapshot = self.snapshot(&manager).await?;
        manager
            .remove(self.triple, self.version, &self.keys)
            .await?;
        debug!(step = %self.name, saved = snapshot.len(), "removed");
        ctx.snapshots.insert(self.name.clone(), snapshot);
        Ok(())
    }

    async fn rollback(&self, ctx: &mut StepContext) -> SdkResult<()> {
        let Some(snapshot) = ctx.snapshots.remove(&self.name) else {
            return Ok(());
        };
        let manager = Arc::clone(&ctx.manager);
        for record in snapshot {
            let version = record.version;
            let verdict = manager.put_record(self.triple, record, &self.keys).await?;
            if !verdict.is_accepted() {
                warn!(step = %self.name, %version, ?verdict, "could not restore revision");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Outcome of a pipeline run that completed every step.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    /// Step names in execution order.
    pub completed: Vec<String>,
    pub elapsed: Duration,
}

/// An ordered list of steps with compensation.
///
/// Steps run in order. When one fails, the steps that already completed
/// are rolled back in reverse order and the failure is returned as
/// [`SdkError::StepFailed`].
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub async fn run(&self, ctx: &mut StepContext) -> SdkResult<PipelineReport> {
        let start = Instant::now();
        let mut completed: Vec<&dyn Step> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            match step.execute(ctx).await {
                Ok(()) => {
                    debug!(step = step.name(), "step completed");
                    completed.push(step.as_ref());
                }
                Err(error) => {
                    warn!(step = step.name(), %error, "step failed, rolling back");
                    let mut rolled_back = Vec::with_capacity(completed.len());
                    for done in completed.iter().rev() {
                        match done.rollback(ctx).await {
                            Ok(()) => rolled_back.push(done.name().to_string()),
                            Err(e) => {
                                warn!(step = done.name(), error = %e, "rollback failed")
                            }
                        }
                    }
                    return Err(SdkError::StepFailed {
                        step: step.name().to_string(),
                        source: Box::new(error),
                        rolled_back,
                    });
                }
            }
        }

        let report = PipelineReport {
            completed: completed.iter().map(|s| s.name().to_string()).collect(),
            elapsed: start.elapsed(),
        };
        info!(steps = report.completed.len(), "pipeline completed");
        Ok(report)
    }
}
