//! Completion workflow orchestrator.
//!
//! Sequences proof upload, AI verification, provisional-record creation,
//! user confirmation, detail capture, and final commit or rollback. The
//! decision logic itself lives in [`crate::machine`]; this module owns
//! the I/O and the per-attempt session registry.
//!
//! No durable row is written before the user accepts, so any failure or
//! abandonment up to that point leaves zero database rows. Exclusivity
//! for the finalize step comes from the store's partial unique index,
//! never from in-process locking, and no lock is held across a network
//! call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Days, NaiveDate, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::machine::{DecisionEvent, DecisionMachine, Step};
use crate::model::{
    CompletionDetails, CompletionStatus, PointsEntry, TaskCompletion, TaskKind,
    VerificationResult,
};
use crate::objects::{ObjectStore, ProofImage, proof_path};
use crate::store::CompletionStore;
use crate::streak::compute_streak;
use crate::verify::Verifier;
use crate::week::{WeeklyGoalEvaluator, compute_week, week_start_for};

/// One in-flight completion attempt.
struct Session {
    machine: DecisionMachine,
    user_id: String,
    family_id: String,
    task_kind: TaskKind,
    target_date: NaiveDate,
    proof_ref: Option<String>,
    pending_id: Option<Uuid>,
    /// Fired on abandon to cancel an in-flight verification call.
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Result of a submission step, handed back to the UI adapter.
#[derive(Debug, Clone)]
pub struct Submission {
    pub session_id: Uuid,
    /// What the caller should do next (present a decision, offer the
    /// degraded choice, and so on).
    pub step: Step,
}

/// Outcome of an accept call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Pending record created; proceed to detail capture.
    PendingCreated(Uuid),
    /// Target day is in the past; confirm before the record is created.
    NeedsBackdateConfirm,
    /// Review-mode accept: nothing to do.
    Closed,
}

/// Outcome of a reject call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectOutcome {
    /// A rejected record was created; no points, no detail capture.
    Rejected(Uuid),
    /// Review-mode reject: the verified record was removed.
    MarkedIncomplete,
}

/// Outcome of finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub completion_id: Uuid,
    pub points_awarded: i64,
    pub streak: u32,
    pub weekly_goal_achieved: bool,
}

/// The top-level completion workflow service.
pub struct CompletionWorkflow {
    store: Arc<dyn CompletionStore>,
    verifier: Arc<dyn Verifier>,
    objects: Arc<dyn ObjectStore>,
    config: EngineConfig,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl CompletionWorkflow {
    pub fn new(
        store: Arc<dyn CompletionStore>,
        verifier: Arc<dyn Verifier>,
        objects: Arc<dyn ObjectStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            objects,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn goal_evaluator(&self) -> WeeklyGoalEvaluator {
        WeeklyGoalEvaluator::new(
            Arc::clone(&self.store),
            self.config.weekly_goal_kind.clone(),
            self.config.weekly_goal,
            self.config.weekly_bonus,
            self.config.week_start,
        )
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Start a completion attempt. Uploads the proof image (if any),
    /// runs the verification call, and returns the session plus the next
    /// step for the caller. No database row is created yet.
    pub async fn submit_completion(
        &self,
        user_id: &str,
        family_id: &str,
        task_kind: TaskKind,
        target_date: NaiveDate,
        proof: Option<ProofImage>,
    ) -> Result<Submission, WorkflowError> {
        let spec = self
            .config
            .spec_for(&task_kind)
            .ok_or_else(|| WorkflowError::UnknownTaskKind(task_kind.clone()))?
            .clone();

        let session_id = Uuid::new_v4();
        let today = Utc::now().date_naive();
        let mut machine = DecisionMachine::new_submission(target_date, today);

        let Some(proof) = proof else {
            // Trust path: no judge involved.
            let step = machine.apply(DecisionEvent::NoEvidence)?;
            self.insert_session(session_id, Session {
                machine,
                user_id: user_id.to_string(),
                family_id: family_id.to_string(),
                task_kind,
                target_date,
                proof_ref: None,
                pending_id: None,
                cancel_tx: None,
            });
            debug!(session_id = %session_id, "No-evidence submission opened");
            return Ok(Submission { session_id, step });
        };

        let step = machine.apply(DecisionEvent::EvidenceAttached)?;
        debug_assert_eq!(step, Step::RequestJudgment);

        let path = proof_path(user_id, &proof.content_type)?;
        let proof_ref = self
            .objects
            .upload(&path, &proof.bytes, &proof.content_type)
            .await?;

        // Register the session before the verification await so the user
        // can abandon mid-call; the response for a dead session is dropped.
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.insert_session(session_id, Session {
            machine,
            user_id: user_id.to_string(),
            family_id: family_id.to_string(),
            task_kind: task_kind.clone(),
            target_date,
            proof_ref: Some(proof_ref.clone()),
            pending_id: None,
            cancel_tx: Some(cancel_tx),
        });

        let verdict = tokio::select! {
            result = self.verifier.verify(&proof_ref, &spec.verification_prompt) => Some(result),
            _ = &mut cancel_rx => None,
        };

        let Some(verdict) = verdict else {
            debug!(session_id = %session_id, "Verification call cancelled by abandon");
            return Ok(Submission {
                session_id,
                step: Step::Discard,
            });
        };

        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        let Some(session) = sessions.get_mut(&session_id) else {
            // Abandoned between the response arriving and this lock.
            return Ok(Submission {
                session_id,
                step: Step::Discard,
            });
        };
        session.cancel_tx = None;

        let step = match verdict {
            Ok(result) => {
                info!(
                    session_id = %session_id,
                    is_verified = result.is_verified,
                    confidence = result.confidence,
                    "Judgment received"
                );
                session.machine.apply(DecisionEvent::JudgmentReceived(result))?
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Verification service failed");
                session.machine.apply(DecisionEvent::JudgmentFailed)?
            }
        };

        Ok(Submission { session_id, step })
    }

    /// Continue past a failed judgment with the degraded manual-override
    /// result.
    pub async fn continue_degraded(&self, session_id: Uuid) -> Result<Submission, WorkflowError> {
        let step = self.with_session(session_id, |s| {
            s.machine.apply(DecisionEvent::ContinueDegraded)
        })??;
        Ok(Submission { session_id, step })
    }

    /// Abandon the attempt. Cancels any in-flight verification call and
    /// deletes the pending row if one was already created. Missing
    /// sessions are a benign no-op.
    pub async fn abandon(&self, session_id: Uuid) -> Result<(), WorkflowError> {
        let session = {
            let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
            sessions.remove(&session_id)
        };
        let Some(mut session) = session else {
            return Ok(());
        };

        if let Some(tx) = session.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(pending_id) = session.pending_id {
            self.cancel_pending_completion(pending_id).await?;
        }
        debug!(session_id = %session_id, "Workflow session abandoned");
        Ok(())
    }

    /// Accept the presented judgment.
    pub async fn accept(&self, session_id: Uuid) -> Result<AcceptOutcome, WorkflowError> {
        let step = self.with_session(session_id, |s| s.machine.apply(DecisionEvent::Accept))??;
        match step {
            Step::ConfirmBackdate => Ok(AcceptOutcome::NeedsBackdateConfirm),
            Step::CreatePending => {
                let pending_id = self.create_pending(session_id).await?;
                Ok(AcceptOutcome::PendingCreated(pending_id))
            }
            Step::NoopClose => {
                self.remove_session(session_id);
                Ok(AcceptOutcome::Closed)
            }
            step => unreachable_step(step),
        }
    }

    /// Confirm a backdated completion after the explicit prompt.
    pub async fn confirm_backdate(&self, session_id: Uuid) -> Result<AcceptOutcome, WorkflowError> {
        let step = self.with_session(session_id, |s| {
            s.machine.apply(DecisionEvent::ConfirmBackdate)
        })??;
        match step {
            Step::CreatePending => {
                let pending_id = self.create_pending(session_id).await?;
                Ok(AcceptOutcome::PendingCreated(pending_id))
            }
            step => unreachable_step(step),
        }
    }

    /// Reject the presented judgment.
    pub async fn reject(&self, session_id: Uuid) -> Result<RejectOutcome, WorkflowError> {
        let step = self.with_session(session_id, |s| s.machine.apply(DecisionEvent::Reject))??;
        match step {
            Step::CreateRejected => {
                let session = self
                    .remove_session(session_id)
                    .ok_or(WorkflowError::SessionNotFound { id: session_id })?;

                let mut completion = TaskCompletion::new_pending(
                    &session.user_id,
                    &session.family_id,
                    session.task_kind.clone(),
                    session.target_date,
                )
                .with_status(CompletionStatus::Rejected);
                completion.proof_ref = session.proof_ref.clone();
                completion.verification = session.machine.verification().cloned();

                self.store.insert_completion(&completion).await?;
                info!(
                    completion_id = %completion.id,
                    task_kind = %completion.task_kind,
                    "Completion rejected"
                );
                Ok(RejectOutcome::Rejected(completion.id))
            }
            Step::RouteToMarkIncomplete => {
                let session = self
                    .remove_session(session_id)
                    .ok_or(WorkflowError::SessionNotFound { id: session_id })?;
                self.mark_incomplete(&session.user_id, &session.task_kind, session.target_date)
                    .await?;
                Ok(RejectOutcome::MarkedIncomplete)
            }
            step => unreachable_step(step),
        }
    }

    /// Open a review session over an already-verified completion. Accept
    /// closes with no effect; reject routes to mark-incomplete.
    pub async fn review(&self, completion_id: Uuid) -> Result<Submission, WorkflowError> {
        let completion = self
            .store
            .get_completion(completion_id)
            .await?
            .ok_or(WorkflowError::NotFound { id: completion_id })?;
        if completion.status != CompletionStatus::Verified {
            return Err(WorkflowError::WrongStatus {
                id: completion_id,
                status: completion.status.to_string(),
                expected: CompletionStatus::Verified.to_string(),
            });
        }

        let verification = completion
            .verification
            .clone()
            .unwrap_or_else(VerificationResult::no_evidence);
        let machine = DecisionMachine::new_review(verification.clone());

        let session_id = Uuid::new_v4();
        self.insert_session(session_id, Session {
            machine,
            user_id: completion.user_id.clone(),
            family_id: completion.family_id.clone(),
            task_kind: completion.task_kind.clone(),
            target_date: completion.completed_date,
            proof_ref: completion.proof_ref.clone(),
            pending_id: None,
            cancel_tx: None,
        });

        Ok(Submission {
            session_id,
            step: Step::PresentDecision(verification),
        })
    }

    // ── Finalize / rollback ─────────────────────────────────────────

    /// Validate details, flip the pending record to `Verified`, grant
    /// points, and refresh derived state. Points are granted only on
    /// this transition.
    ///
    /// A missing record is a benign no-op (already cancelled elsewhere).
    pub async fn finalize_with_details(
        &self,
        pending_id: Uuid,
        details: CompletionDetails,
    ) -> Result<Option<Finalized>, WorkflowError> {
        let Some(completion) = self.store.get_completion(pending_id).await? else {
            debug!(completion_id = %pending_id, "Finalize target already gone");
            return Ok(None);
        };
        if completion.status != CompletionStatus::Pending {
            return Err(WorkflowError::WrongStatus {
                id: pending_id,
                status: completion.status.to_string(),
                expected: CompletionStatus::Pending.to_string(),
            });
        }

        let spec = self
            .config
            .spec_for(&completion.task_kind)
            .ok_or_else(|| WorkflowError::UnknownTaskKind(completion.task_kind.clone()))?
            .clone();
        // Validation failure preserves the pending row for correction.
        spec.validate_details(&details)?;

        self.store
            .update_completion_details(pending_id, &details)
            .await?;

        let verified_at = Utc::now();
        match self
            .store
            .update_completion_status(pending_id, CompletionStatus::Verified, Some(verified_at))
            .await
        {
            Ok(()) => {}
            Err(crate::error::StoreError::Constraint(_)) => {
                // Another attempt won the slot; discard the loser.
                self.store.delete_completion(pending_id).await?;
                self.close_session_for(pending_id);
                return Err(WorkflowError::Conflict {
                    user_id: completion.user_id,
                    task_kind: completion.task_kind,
                    date: completion.completed_date,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let entry = PointsEntry::new(
            &completion.user_id,
            &completion.family_id,
            spec.points_award,
            format!("{}:completed", completion.task_kind),
        )
        .for_completion(pending_id);
        self.store.insert_points_entry(&entry).await?;

        let streak = self.refresh_streak(&completion.user_id).await?;
        let weekly_goal_achieved = self
            .goal_evaluator()
            .check(
                &completion.user_id,
                &completion.family_id,
                completion.completed_date,
            )
            .await?;

        self.close_session_for(pending_id);

        info!(
            completion_id = %pending_id,
            task_kind = %completion.task_kind,
            date = %completion.completed_date,
            points = spec.points_award,
            streak = streak,
            "Completion finalized"
        );
        Ok(Some(Finalized {
            completion_id: pending_id,
            points_awarded: spec.points_award,
            streak,
            weekly_goal_achieved,
        }))
    }

    /// Delete a completion if and only if it is still pending. A missing
    /// row is a benign no-op; a verified row is never deleted by this
    /// path, even if finalize raced ahead of the cancel.
    pub async fn cancel_pending_completion(&self, pending_id: Uuid) -> Result<bool, WorkflowError> {
        let Some(completion) = self.store.get_completion(pending_id).await? else {
            return Ok(false);
        };
        if completion.status != CompletionStatus::Pending {
            warn!(
                completion_id = %pending_id,
                status = %completion.status,
                "Cancel skipped: record is no longer pending"
            );
            return Ok(false);
        }

        let deleted = self.store.delete_completion(pending_id).await?;
        self.close_session_for(pending_id);
        debug!(completion_id = %pending_id, "Pending completion cancelled");
        Ok(deleted)
    }

    /// Undo a finalized completion: delete the verified row, reverse
    /// exactly the points it earned, and refresh the streak cache. The
    /// day returns to "not attempted."
    pub async fn mark_incomplete(
        &self,
        user_id: &str,
        task_kind: &TaskKind,
        date: NaiveDate,
    ) -> Result<bool, WorkflowError> {
        let Some(completion) = self.store.find_verified(user_id, task_kind, date).await? else {
            return Ok(false);
        };

        self.store.delete_completion(completion.id).await?;
        let reversed = self
            .store
            .delete_points_for_completion(completion.id)
            .await?;
        let streak = self.refresh_streak(user_id).await?;

        info!(
            completion_id = %completion.id,
            task_kind = %task_kind,
            date = %date,
            points_entries_reversed = reversed,
            streak = streak,
            "Completion marked incomplete"
        );
        Ok(true)
    }

    /// Update details on an already-verified completion. Points and
    /// `verified_at` are untouched.
    pub async fn edit_details(
        &self,
        completion_id: Uuid,
        new_details: CompletionDetails,
    ) -> Result<(), WorkflowError> {
        let completion = self
            .store
            .get_completion(completion_id)
            .await?
            .ok_or(WorkflowError::NotFound { id: completion_id })?;
        if completion.status != CompletionStatus::Verified {
            return Err(WorkflowError::WrongStatus {
                id: completion_id,
                status: completion.status.to_string(),
                expected: CompletionStatus::Verified.to_string(),
            });
        }

        let spec = self
            .config
            .spec_for(&completion.task_kind)
            .ok_or_else(|| WorkflowError::UnknownTaskKind(completion.task_kind.clone()))?;
        spec.validate_details(&new_details)?;

        self.store
            .update_completion_details(completion_id, &new_details)
            .await?;
        debug!(completion_id = %completion_id, "Completion details edited");
        Ok(())
    }

    // ── Derived-state reads ─────────────────────────────────────────

    /// Recompute the user's streak from history and refresh the cache.
    pub async fn refresh_streak(&self, user_id: &str) -> Result<u32, WorkflowError> {
        let today = Utc::now().date_naive();
        let from = today - Days::new(self.config.lookback_days as u64);
        let verified = self
            .store
            .query_completions(user_id, from, today, Some(CompletionStatus::Verified))
            .await?;
        let history: Vec<(NaiveDate, TaskKind)> = verified
            .into_iter()
            .map(|c| (c.completed_date, c.task_kind))
            .collect();

        let streak = compute_streak(
            &history,
            &self.config.required_kinds,
            today,
            self.config.lookback_days,
        );
        self.store.upsert_streak_cache(user_id, streak).await?;
        Ok(streak)
    }

    /// Per-day completion booleans for the week containing `date`.
    pub async fn week_map(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<[bool; 7], WorkflowError> {
        let start = week_start_for(date, self.config.week_start);
        let end = start + Days::new(6);
        let verified = self
            .store
            .query_completions(user_id, start, end, Some(CompletionStatus::Verified))
            .await?;
        let history: Vec<(NaiveDate, TaskKind)> = verified
            .into_iter()
            .map(|c| (c.completed_date, c.task_kind))
            .collect();
        Ok(compute_week(&history, &self.config.required_kinds, start))
    }

    /// Current points total, replayed from the ledger.
    pub async fn total_points(&self, user_id: &str) -> Result<i64, WorkflowError> {
        Ok(self.store.sum_points(user_id).await?)
    }

    /// Ids of the currently open workflow sessions.
    pub fn active_sessions(&self) -> Vec<Uuid> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    // ── Session plumbing ────────────────────────────────────────────

    fn insert_session(&self, id: Uuid, session: Session) {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .insert(id, session);
    }

    fn remove_session(&self, id: Uuid) -> Option<Session> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .remove(&id)
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, WorkflowError> {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        let session = sessions
            .get_mut(&id)
            .ok_or(WorkflowError::SessionNotFound { id })?;
        Ok(f(session))
    }

    /// Drop the session owning a pending record, if any.
    fn close_session_for(&self, pending_id: Uuid) {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        sessions.retain(|_, s| s.pending_id != Some(pending_id));
    }

    /// Create the pending row for an accepted attempt and hand control
    /// to detail capture.
    async fn create_pending(&self, session_id: Uuid) -> Result<Uuid, WorkflowError> {
        let completion = self.with_session(session_id, |s| {
            let mut completion = TaskCompletion::new_pending(
                &s.user_id,
                &s.family_id,
                s.task_kind.clone(),
                s.target_date,
            );
            completion.proof_ref = s.proof_ref.clone();
            completion.verification = s.machine.verification().cloned();
            s.pending_id = Some(completion.id);
            completion
        })?;

        self.store.insert_completion(&completion).await?;
        debug!(
            session_id = %session_id,
            completion_id = %completion.id,
            "Pending completion created"
        );
        Ok(completion.id)
    }
}

fn unreachable_step<T>(step: Step) -> Result<T, WorkflowError> {
    // The machine only emits steps matching the event that produced
    // them; anything else is a programming error surfaced as a typed
    // transition failure rather than a panic.
    Err(WorkflowError::InvalidTransition {
        state: "orchestrator".into(),
        event: format!("{step:?}"),
    })
}
