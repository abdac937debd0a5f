use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use pv_crypto::{ProtectionKeys, PublicKey};
use pv_store::{ChainDigest, PutOutcome, PutRequest, RemoveOutcome, RemoveRequest, VersionedRecord};
use pv_types::{KeyTriple, VersionKey, VersionedKey};

use crate::config::CoordinatorConfig;
use crate::error::{SyncError, SyncResult};
use crate::fork::{ForkDecision, ForkDetector};
use crate::routing::ReplicaRouter;
use crate::transport::ReplicaTransport;
use crate::types::{ForkInfo, PutReceipt, PutVerdict};

type Replica = Arc<dyn ReplicaTransport>;

/// How one fan-out round ended.
enum Attempt {
    Done(PutVerdict),
    Retry(String),
}

/// Per-attempt count of replica verdicts.
#[derive(Default)]
struct Tally {
    contacted: usize,
    accepted: Vec<Replica>,
    failed: usize,
    security: usize,
    not_absent: usize,
    conflicts: Vec<PutOutcome>,
}

impl Tally {
    fn collect(responses: Vec<(Replica, SyncResult<PutOutcome>)>) -> Self {
        let mut tally = Self {
            contacted: responses.len(),
            ..Self::default()
        };
        for (replica, result) in responses {
            match result {
                Ok(PutOutcome::Accepted) => tally.accepted.push(replica),
                Ok(PutOutcome::RejectedSecurity) => tally.security += 1,
                Ok(PutOutcome::RejectedNotAbsent) => tally.not_absent += 1,
                Ok(outcome) if outcome.is_version_conflict() => tally.conflicts.push(outcome),
                Ok(outcome) => debug!(peer = replica.peer(), %outcome, "put rejected"),
                Err(e) => {
                    debug!(peer = replica.peer(), error = %e, "put call failed");
                    tally.failed += 1;
                }
            }
        }
        tally
    }

    fn rejected(&self) -> usize {
        self.contacted - self.accepted.len()
    }

    /// Strictly fewer than half of the contacted replicas rejected.
    fn majority_accepted(&self) -> bool {
        self.rejected() * 2 < self.contacted
    }
}

/// Client-side coordinator for writes, reads and removals.
///
/// Each call fans out to every replica the router names, then reconciles
/// their independent verdicts: minority rejections are tolerated, majority
/// rejections are retried with backoff, and version conflicts go to the
/// [`ForkDetector`]. The coordinator keeps no state between calls and can
/// be shared across tasks.
pub struct PutCoordinator {
    router: Arc<dyn ReplicaRouter>,
    config: CoordinatorConfig,
    detector: ForkDetector,
}

impl PutCoordinator {
    pub fn new(router: Arc<dyn ReplicaRouter>, config: CoordinatorConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            router,
            config,
            detector: ForkDetector::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Write `record` under `key`, signed with `keys`.
    pub async fn put(
        &self,
        key: VersionedKey,
        record: VersionedRecord,
        keys: &ProtectionKeys,
    ) -> SyncResult<PutVerdict> {
        let request = PutRequest::signed(key, record, false, keys)?;
        self.submit(request, keys).await
    }

    /// Like [`put`](Self::put), but replicas that already hold this exact
    /// revision refuse it.
    pub async fn put_if_absent(
        &self,
        key: VersionedKey,
        record: VersionedRecord,
        keys: &ProtectionKeys,
    ) -> SyncResult<PutVerdict> {
        let request = PutRequest::signed(key, record, true, keys)?;
        self.submit(request, keys).await
    }

    /// Hand ownership of `triple` to `new_owner`. Version history is left
    /// untouched.
    pub async fn change_protection(
        &self,
        triple: KeyTriple,
        current: &ProtectionKeys,
        new_owner: PublicKey,
    ) -> SyncResult<PutVerdict> {
        let request = PutRequest::change_protection(triple, current, new_owner)?;
        self.submit(request, current).await
    }

    async fn submit(&self, request: PutRequest, keys: &ProtectionKeys) -> SyncResult<PutVerdict> {
        let op = Uuid::now_v7();
        let span = info_span!("put", %op, key = %request.key);
        let deadline = self.config.effective_deadline();
        let attempts = AtomicU32::new(0);

        match timeout(deadline, self.run_put(&request, keys, &attempts))
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(parent: &span, ?deadline, "put deadline exceeded");
                Ok(PutVerdict::Failed {
                    reason: format!("deadline of {deadline:?} exceeded"),
                    attempts: attempts.load(Ordering::Relaxed),
                })
            }
        }
    }

    async fn run_put(
        &self,
        request: &PutRequest,
        keys: &ProtectionKeys,
        attempts: &AtomicU32,
    ) -> SyncResult<PutVerdict> {
        let policy = &self.config.retry;
        let mut last_reason = String::from("no attempt was made");

        for attempt in 1..=policy.max_attempts() {
            if attempt > 1 {
                let delay = policy.delay_for(attempt - 2);
                debug!(attempt, ?delay, "backing off before retry");
                sleep(delay).await;
            }
            attempts.store(attempt, Ordering::Relaxed);

            match self.attempt_put(request, keys, attempt).await? {
                Attempt::Done(verdict) => return Ok(verdict),
                Attempt::Retry(reason) => {
                    warn!(attempt, %reason, "put attempt failed");
                    last_reason = reason;
                }
            }
        }

        warn!(attempts = policy.max_attempts(), "put retries exhausted");
        Ok(PutVerdict::Failed {
            reason: last_reason,
            attempts: policy.max_attempts(),
        })
    }

    async fn attempt_put(
        &self,
        request: &PutRequest,
        keys: &ProtectionKeys,
        attempt: u32,
    ) -> SyncResult<Attempt> {
        let key = request.key;
        let replicas = self.router.replicas_for(&key.triple);
        if replicas.is_empty() {
            return Ok(Attempt::Retry("no replicas are responsible for the key".into()));
        }

        let responses = self
            .fan_out(&replicas, |replica| {
                let request = request.clone();
                async move { replica.put(&request).await }
            })
            .await;
        let tally = Tally::collect(responses);
        debug!(
            attempt,
            contacted = tally.contacted,
            accepted = tally.accepted.len(),
            conflicts = tally.conflicts.len(),
            failed = tally.failed,
            "put fan-out complete"
        );

        if tally.failed == tally.contacted {
            return Ok(Attempt::Retry("no replica answered".into()));
        }

        let rekey = request.record.is_protection_change();
        if tally.security > 0 {
            if !rekey {
                self.withdraw(&tally.accepted, &key, keys).await;
            }
            return Err(SyncError::Unauthorized(key.triple.to_string()));
        }

        if rekey {
            return Ok(if tally.majority_accepted() {
                info!(accepted = tally.accepted.len(), "protection key changed");
                Attempt::Done(PutVerdict::Accepted(receipt(&key, &tally, attempt, false)))
            } else {
                Attempt::Retry(format!(
                    "{} of {} replicas refused the protection change",
                    tally.rejected(),
                    tally.contacted
                ))
            });
        }

        // A second root or an unversioned write over history is the
        // caller's mistake whatever its timestamp; no race to resolve.
        let malformed: Vec<PutOutcome> = tally
            .conflicts
            .iter()
            .copied()
            .filter(PutOutcome::is_malformed_version)
            .collect();
        if malformed.len() * 2 > tally.contacted {
            self.withdraw(&tally.accepted, &key, keys).await;
            let second_roots = malformed
                .iter()
                .filter(|o| **o == PutOutcome::VersionConflictMissingBasedOn)
                .count();
            let outcome = if second_roots * 2 > tally.contacted {
                PutOutcome::VersionConflictMissingBasedOn
            } else {
                malformed[0]
            };
            warn!(%outcome, rejected = malformed.len(), "malformed version reference");
            return Err(SyncError::MalformedVersion(outcome));
        }

        // A version conflict means a real concurrent writer exists.
        let mut fork = None;
        if !tally.conflicts.is_empty() {
            let decision = self.resolve_fork(&key, &request.record, &replicas).await;
            if decision.i_lose() {
                info!(rival = ?decision.rival, lose_votes = decision.lose_votes, "lost fork race");
                self.withdraw(&tally.accepted, &key, keys).await;
                return Ok(Attempt::Done(PutVerdict::Conflict(fork_info(
                    &key,
                    &request.record,
                    &decision,
                ))));
            }
            fork = Some(decision);
        }

        if tally.majority_accepted() {
            if !self.config.verify {
                info!(accepted = tally.accepted.len(), "put accepted");
                return Ok(Attempt::Done(PutVerdict::Accepted(receipt(
                    &key, &tally, attempt, false,
                ))));
            }
            return self.verify(request, keys, &replicas, &tally, attempt).await;
        }

        if tally.not_absent > 0 && tally.not_absent * 2 >= tally.contacted {
            return Ok(Attempt::Done(PutVerdict::Failed {
                reason: "revision already present".into(),
                attempts: attempt,
            }));
        }

        self.withdraw(&tally.accepted, &key, keys).await;

        // Retrying the same payload would only recreate the conflict.
        if !tally.conflicts.is_empty() && tally.conflicts.len() * 2 >= tally.contacted {
            if tally.conflicts.iter().all(PutOutcome::is_malformed_version) {
                return Err(SyncError::MalformedVersion(tally.conflicts[0]));
            }
            let decision = match fork {
                Some(decision) => decision,
                None => self.resolve_fork(&key, &request.record, &replicas).await,
            };
            info!(rival = ?decision.rival, "majority reported a version conflict");
            return Ok(Attempt::Done(PutVerdict::Conflict(fork_info(
                &key,
                &request.record,
                &decision,
            ))));
        }

        Ok(Attempt::Retry(format!(
            "{} of {} replicas rejected the write",
            tally.rejected(),
            tally.contacted
        )))
    }

    /// Re-read digests until the revision shows up at a majority.
    async fn verify(
        &self,
        request: &PutRequest,
        keys: &ProtectionKeys,
        replicas: &[Replica],
        tally: &Tally,
        attempt: u32,
    ) -> SyncResult<Attempt> {
        let key = request.key;
        for round in 1..=self.config.verify_attempts {
            sleep(self.config.settle_delay).await;
            let digests = self.collect_digests(replicas, &key.triple).await;

            let decision = self.detector.resolve(&request.record, &digests);
            if decision.i_lose() {
                info!(round, rival = ?decision.rival, "lost fork race during verification");
                self.withdraw(replicas, &key, keys).await;
                return Ok(Attempt::Done(PutVerdict::Conflict(fork_info(
                    &key,
                    &request.record,
                    &decision,
                ))));
            }

            let holders = digests.iter().filter(|d| d.contains(&key.version)).count();
            debug!(round, holders, "verification read");
            if holders * 2 > replicas.len() {
                info!(accepted = tally.accepted.len(), holders, "put accepted and verified");
                return Ok(Attempt::Done(PutVerdict::Accepted(receipt(
                    &key, tally, attempt, true,
                ))));
            }
        }

        self.withdraw(replicas, &key, keys).await;
        Ok(Attempt::Retry(format!(
            "revision not observed at a majority after {} verification reads",
            self.config.verify_attempts
        )))
    }

    async fn resolve_fork(
        &self,
        key: &VersionedKey,
        mine: &VersionedRecord,
        replicas: &[Replica],
    ) -> ForkDecision {
        let digests = self.collect_digests(replicas, &key.triple).await;
        self.detector.resolve(mine, &digests)
    }

    /// Best-effort removal of our own revision from `replicas`.
    async fn withdraw(&self, replicas: &[Replica], key: &VersionedKey, keys: &ProtectionKeys) {
        if replicas.is_empty() {
            return;
        }
        let request = match RemoveRequest::signed(key.triple, Some(key.version), keys) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "could not sign withdrawal");
                return;
            }
        };
        let responses = self
            .fan_out(replicas, |replica| {
                let request = request.clone();
                async move { replica.remove(&request).await }
            })
            .await;
        for (replica, result) in responses {
            match result {
                Ok(outcome) => debug!(peer = replica.peer(), ?outcome, "withdrew revision"),
                Err(e) => warn!(peer = replica.peer(), error = %e, "withdrawal failed"),
            }
        }
    }

    /// Read the newest revision, or a specific one, across all replicas.
    ///
    /// Returns the highest version any replica reports. `Ok(None)` means
    /// every replica that answered had nothing.
    pub async fn get(
        &self,
        triple: &KeyTriple,
        version: Option<VersionKey>,
    ) -> SyncResult<Option<VersionedRecord>> {
        let op = Uuid::now_v7();
        let triple = *triple;
        async move {
            let replicas = self.router.replicas_for(&triple);
            let responses = self
                .fan_out(&replicas, move |replica| async move {
                    replica.get(&triple, version).await
                })
                .await;

            let mut answered = 0;
            let mut best: Option<VersionedRecord> = None;
            for (replica, result) in responses {
                match result {
                    Ok(found) => {
                        answered += 1;
                        if let Some(record) = found {
                            if best.as_ref().map_or(true, |b| record.version > b.version) {
                                best = Some(record);
                            }
                        }
                    }
                    Err(e) => debug!(peer = replica.peer(), error = %e, "get failed"),
                }
            }
            if answered == 0 {
                return Err(SyncError::Unreachable(triple.to_string()));
            }
            debug!(answered, found = best.is_some(), "get complete");
            Ok(best)
        }
        .instrument(info_span!("get", %op, %triple))
        .await
    }

    /// Union of every reachable replica's chain digest.
    pub async fn get_digest(&self, triple: &KeyTriple) -> SyncResult<ChainDigest> {
        let replicas = self.router.replicas_for(triple);
        let digests = self.collect_digests(&replicas, triple).await;
        if digests.is_empty() {
            return Err(SyncError::Unreachable(triple.to_string()));
        }
        let mut merged = ChainDigest::new();
        for digest in &digests {
            merged.merge(digest);
        }
        Ok(merged)
    }

    /// Remove one revision, or the whole triple when `version` is `None`.
    ///
    /// Returns `true` if any replica actually deleted something.
    pub async fn remove(
        &self,
        triple: KeyTriple,
        version: Option<VersionKey>,
        keys: &ProtectionKeys,
    ) -> SyncResult<bool> {
        let op = Uuid::now_v7();
        let request = RemoveRequest::signed(triple, version, keys)?;
        let deadline = self.config.effective_deadline();
        let attempts = AtomicU32::new(0);

        match timeout(deadline, self.run_remove(&request, &attempts))
            .instrument(info_span!("remove", %op, %triple))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::RemoveFailed {
                reason: format!("deadline of {deadline:?} exceeded"),
                attempts: attempts.load(Ordering::Relaxed),
            }),
        }
    }

    async fn run_remove(&self, request: &RemoveRequest, attempts: &AtomicU32) -> SyncResult<bool> {
        let policy = &self.config.retry;
        let mut last_reason = String::from("no attempt was made");

        for attempt in 1..=policy.max_attempts() {
            if attempt > 1 {
                sleep(policy.delay_for(attempt - 2)).await;
            }
            attempts.store(attempt, Ordering::Relaxed);

            let replicas = self.router.replicas_for(&request.triple);
            if replicas.is_empty() {
                last_reason = "no replicas are responsible for the key".into();
                continue;
            }
            let responses = self
                .fan_out(&replicas, |replica| {
                    let request = request.clone();
                    async move { replica.remove(&request).await }
                })
                .await;

            let (mut removed, mut not_found, mut security) = (0, 0, 0);
            for (replica, result) in responses {
                match result {
                    Ok(RemoveOutcome::Removed) => removed += 1,
                    Ok(RemoveOutcome::NotFound) => not_found += 1,
                    Ok(RemoveOutcome::RejectedSecurity) => security += 1,
                    Err(e) => debug!(peer = replica.peer(), error = %e, "remove call failed"),
                }
            }

            if security > 0 {
                return Err(SyncError::Unauthorized(request.triple.to_string()));
            }
            if (removed + not_found) * 2 > replicas.len() {
                info!(removed, not_found, "remove complete");
                return Ok(removed > 0);
            }
            last_reason = format!(
                "only {} of {} replicas confirmed the removal",
                removed + not_found,
                replicas.len()
            );
            warn!(attempt, %last_reason, "remove attempt failed");
        }

        Err(SyncError::RemoveFailed {
            reason: last_reason,
            attempts: policy.max_attempts(),
        })
    }

    async fn collect_digests(&self, replicas: &[Replica], triple: &KeyTriple) -> Vec<ChainDigest> {
        let triple = *triple;
        self.fan_out(replicas, move |replica| async move {
            replica.digest(&triple).await
        })
        .await
        .into_iter()
        .filter_map(|(replica, result)| match result {
            Ok(digest) => Some(digest),
            Err(e) => {
                debug!(peer = replica.peer(), error = %e, "digest read failed");
                None
            }
        })
        .collect()
    }

    /// Run `call` against every replica concurrently, each under the
    /// per-replica timeout.
    async fn fan_out<T, F, Fut>(&self, replicas: &[Replica], call: F) -> Vec<(Replica, SyncResult<T>)>
    where
        T: Send + 'static,
        F: Fn(Replica) -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let call_timeout = self.config.replica_timeout;
        let mut tasks = JoinSet::new();
        for replica in replicas {
            let replica = Arc::clone(replica);
            let pending = call(Arc::clone(&replica));
            tasks.spawn(
                async move {
                    let result = match timeout(call_timeout, pending).await {
                        Ok(result) => result,
                        Err(_) => Err(SyncError::Timeout {
                            peer: replica.peer().to_string(),
                        }),
                    };
                    (replica, result)
                }
                .in_current_span(),
            );
        }

        let mut results = Vec::with_capacity(replicas.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => warn!(error = %e, "replica task aborted"),
            }
        }
        results
    }
}

impl std::fmt::Debug for PutCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn receipt(key: &VersionedKey, tally: &Tally, attempt: u32, verified: bool) -> PutReceipt {
    PutReceipt {
        key: *key,
        accepted_by: tally.accepted.len(),
        contacted: tally.contacted,
        attempts: attempt,
        verified,
    }
}

fn fork_info(key: &VersionedKey, mine: &VersionedRecord, decision: &ForkDecision) -> ForkInfo {
    ForkInfo {
        key: *key,
        based_on: mine.based_on,
        rival: decision.rival,
        lose_votes: decision.lose_votes,
        voters: decision.voters,
    }
}
