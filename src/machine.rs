//! Verification decision state machine.
//!
//! Pure transition logic for one completion attempt: submission through
//! AI judgment to final acceptance, rejection, or cancellation. No I/O
//! happens here; each transition returns a [`Step`] telling the
//! orchestrator what to do next.

use chrono::NaiveDate;

use crate::error::WorkflowError;
use crate::model::VerificationResult;

/// Lifecycle state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionState {
    AwaitingEvidence,
    AwaitingJudgment,
    AwaitingUserDecision,
    Finalizing,
    Accepted,
    Rejected,
    Cancelled,
}

impl DecisionState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingEvidence => "awaiting_evidence",
            Self::AwaitingJudgment => "awaiting_judgment",
            Self::AwaitingUserDecision => "awaiting_user_decision",
            Self::Finalizing => "finalizing",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the machine can still move.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Cancelled)
    }
}

/// How the machine was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    /// Normal submission flow.
    Submit,
    /// Inspecting an already-verified record. Accept closes without effect;
    /// Reject routes to the mark-incomplete path instead of creating a
    /// rejection.
    Review,
}

/// Inputs the orchestrator (or UI adapter) feeds into the machine.
#[derive(Debug, Clone)]
pub enum DecisionEvent {
    /// Submission carries a proof image.
    EvidenceAttached,
    /// Submission carries no evidence; the task is marked done on trust.
    NoEvidence,
    /// The verification service answered.
    JudgmentReceived(VerificationResult),
    /// The verification service failed (network, non-2xx, malformed body).
    JudgmentFailed,
    /// User chose to continue despite the failed judgment.
    ContinueDegraded,
    /// User abandoned the flow.
    Abandon,
    /// User accepted the presented judgment.
    Accept,
    /// User confirmed completing a task for a past day.
    ConfirmBackdate,
    /// User rejected the presented judgment.
    Reject,
    /// Detail capture finished; the attempt is fully accepted.
    DetailsCaptured,
}

impl DecisionEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::EvidenceAttached => "evidence_attached",
            Self::NoEvidence => "no_evidence",
            Self::JudgmentReceived(_) => "judgment_received",
            Self::JudgmentFailed => "judgment_failed",
            Self::ContinueDegraded => "continue_degraded",
            Self::Abandon => "abandon",
            Self::Accept => "accept",
            Self::ConfirmBackdate => "confirm_backdate",
            Self::Reject => "reject",
            Self::DetailsCaptured => "details_captured",
        }
    }
}

/// What the orchestrator should do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Call the verification service with the proof image.
    RequestJudgment,
    /// Show the judgment to the user for accept/reject.
    PresentDecision(VerificationResult),
    /// Judge unavailable: offer abandon vs. degraded continue.
    OfferDegradedChoice,
    /// Prompt "you are completing a task for a past day" before proceeding.
    ConfirmBackdate,
    /// Create the pending record and open detail capture.
    CreatePending,
    /// Create a rejected record; no points, no detail capture.
    CreateRejected,
    /// Review-mode accept: close with no effect.
    NoopClose,
    /// Review-mode reject: delete the verified record via mark-incomplete.
    RouteToMarkIncomplete,
    /// Flow cancelled; clear all transient state, no durable record.
    Discard,
    /// Attempt fully accepted and finalized.
    Finished,
}

/// The decision state machine for one completion attempt.
#[derive(Debug, Clone)]
pub struct DecisionMachine {
    state: DecisionState,
    mode: DecisionMode,
    backdated: bool,
    backdate_confirmed: bool,
    verification: Option<VerificationResult>,
}

impl DecisionMachine {
    /// Start a submission flow targeting `target_date`.
    ///
    /// A target strictly before `today` marks the attempt as backdated;
    /// accepting it will demand an explicit confirmation first.
    pub fn new_submission(target_date: NaiveDate, today: NaiveDate) -> Self {
        Self {
            state: DecisionState::AwaitingEvidence,
            mode: DecisionMode::Submit,
            backdated: target_date < today,
            backdate_confirmed: false,
            verification: None,
        }
    }

    /// Start a review flow over an already-verified record's judgment.
    pub fn new_review(verification: VerificationResult) -> Self {
        Self {
            state: DecisionState::AwaitingUserDecision,
            mode: DecisionMode::Review,
            backdated: false,
            backdate_confirmed: false,
            verification: Some(verification),
        }
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn mode(&self) -> DecisionMode {
        self.mode
    }

    /// The judgment carried by this attempt, once one exists.
    pub fn verification(&self) -> Option<&VerificationResult> {
        self.verification.as_ref()
    }

    /// Apply an event, returning the next step for the orchestrator.
    pub fn apply(&mut self, event: DecisionEvent) -> Result<Step, WorkflowError> {
        use DecisionEvent as E;
        use DecisionState as S;

        // Abandon is valid from any non-terminal state.
        if matches!(event, E::Abandon) && !self.state.is_terminal() {
            self.state = S::Cancelled;
            return Ok(Step::Discard);
        }

        match (self.state, event) {
            (S::AwaitingEvidence, E::NoEvidence) => {
                // Evidence is optional by design; skip the judge entirely.
                self.verification = Some(VerificationResult::no_evidence());
                self.state = S::AwaitingUserDecision;
                Ok(Step::PresentDecision(VerificationResult::no_evidence()))
            }
            (S::AwaitingEvidence, E::EvidenceAttached) => {
                self.state = S::AwaitingJudgment;
                Ok(Step::RequestJudgment)
            }
            (S::AwaitingJudgment, E::JudgmentReceived(result)) => {
                self.verification = Some(result.clone());
                self.state = S::AwaitingUserDecision;
                Ok(Step::PresentDecision(result))
            }
            (S::AwaitingJudgment, E::JudgmentFailed) => {
                // A flaky judge must never permanently block a completion.
                Ok(Step::OfferDegradedChoice)
            }
            (S::AwaitingJudgment, E::ContinueDegraded) => {
                let result = VerificationResult::degraded();
                self.verification = Some(result.clone());
                self.state = S::AwaitingUserDecision;
                Ok(Step::PresentDecision(result))
            }
            (S::AwaitingUserDecision, E::Accept) => match self.mode {
                DecisionMode::Review => {
                    self.state = S::Accepted;
                    Ok(Step::NoopClose)
                }
                DecisionMode::Submit if self.backdated && !self.backdate_confirmed => {
                    Ok(Step::ConfirmBackdate)
                }
                DecisionMode::Submit => {
                    self.state = S::Finalizing;
                    Ok(Step::CreatePending)
                }
            },
            (S::AwaitingUserDecision, E::ConfirmBackdate) if self.backdated => {
                self.backdate_confirmed = true;
                self.state = S::Finalizing;
                Ok(Step::CreatePending)
            }
            (S::AwaitingUserDecision, E::Reject) => match self.mode {
                DecisionMode::Review => {
                    self.state = S::Rejected;
                    Ok(Step::RouteToMarkIncomplete)
                }
                DecisionMode::Submit => {
                    self.state = S::Rejected;
                    Ok(Step::CreateRejected)
                }
            },
            (S::Finalizing, E::DetailsCaptured) => {
                self.state = S::Accepted;
                Ok(Step::Finished)
            }
            (state, event) => Err(WorkflowError::InvalidTransition {
                state: state.name().to_string(),
                event: event.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        day(2024, 6, 15)
    }

    #[test]
    fn no_evidence_short_circuits_to_manual_result() {
        let mut m = DecisionMachine::new_submission(today(), today());
        let step = m.apply(DecisionEvent::NoEvidence).unwrap();
        match step {
            Step::PresentDecision(r) => {
                assert!(r.is_verified);
                assert_eq!(r.confidence, 1.0);
                assert_eq!(r.model, "manual");
            }
            other => panic!("unexpected step: {other:?}"),
        }
        assert_eq!(m.state(), DecisionState::AwaitingUserDecision);

        assert_eq!(m.apply(DecisionEvent::Accept).unwrap(), Step::CreatePending);
        assert_eq!(m.state(), DecisionState::Finalizing);
        assert_eq!(m.apply(DecisionEvent::DetailsCaptured).unwrap(), Step::Finished);
        assert_eq!(m.state(), DecisionState::Accepted);
    }

    #[test]
    fn evidence_goes_through_judgment() {
        let mut m = DecisionMachine::new_submission(today(), today());
        assert_eq!(
            m.apply(DecisionEvent::EvidenceAttached).unwrap(),
            Step::RequestJudgment
        );

        let result = VerificationResult::new(true, 0.92, "looks like a workout", "judge-v2");
        let step = m.apply(DecisionEvent::JudgmentReceived(result.clone())).unwrap();
        assert_eq!(step, Step::PresentDecision(result.clone()));
        assert_eq!(m.verification(), Some(&result));
    }

    #[test]
    fn judge_failure_offers_degraded_choice() {
        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::EvidenceAttached).unwrap();

        let step = m.apply(DecisionEvent::JudgmentFailed).unwrap();
        assert_eq!(step, Step::OfferDegradedChoice);
        // Still awaiting judgment; the user decides.
        assert_eq!(m.state(), DecisionState::AwaitingJudgment);

        let step = m.apply(DecisionEvent::ContinueDegraded).unwrap();
        match step {
            Step::PresentDecision(r) => {
                assert_eq!(r.model, "manual-override");
                assert_eq!(r.confidence, 0.0);
                assert!(r.is_verified);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn judge_failure_can_be_abandoned() {
        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::EvidenceAttached).unwrap();
        m.apply(DecisionEvent::JudgmentFailed).unwrap();

        assert_eq!(m.apply(DecisionEvent::Abandon).unwrap(), Step::Discard);
        assert_eq!(m.state(), DecisionState::Cancelled);
    }

    #[test]
    fn backdated_accept_requires_confirmation() {
        let mut m = DecisionMachine::new_submission(day(2024, 6, 10), today());
        m.apply(DecisionEvent::NoEvidence).unwrap();

        // First accept only prompts; no record yet.
        assert_eq!(m.apply(DecisionEvent::Accept).unwrap(), Step::ConfirmBackdate);
        assert_eq!(m.state(), DecisionState::AwaitingUserDecision);

        assert_eq!(
            m.apply(DecisionEvent::ConfirmBackdate).unwrap(),
            Step::CreatePending
        );
        assert_eq!(m.state(), DecisionState::Finalizing);
    }

    #[test]
    fn same_day_accept_needs_no_confirmation() {
        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::NoEvidence).unwrap();
        assert_eq!(m.apply(DecisionEvent::Accept).unwrap(), Step::CreatePending);
    }

    #[test]
    fn confirm_backdate_invalid_for_current_day() {
        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::NoEvidence).unwrap();
        assert!(m.apply(DecisionEvent::ConfirmBackdate).is_err());
    }

    #[test]
    fn reject_creates_rejection_in_submit_mode() {
        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::NoEvidence).unwrap();
        assert_eq!(m.apply(DecisionEvent::Reject).unwrap(), Step::CreateRejected);
        assert_eq!(m.state(), DecisionState::Rejected);
    }

    #[test]
    fn review_accept_is_noop_and_reject_routes_to_mark_incomplete() {
        let verification = VerificationResult::new(true, 0.8, "ok", "judge-v2");

        let mut m = DecisionMachine::new_review(verification.clone());
        assert_eq!(m.apply(DecisionEvent::Accept).unwrap(), Step::NoopClose);

        let mut m = DecisionMachine::new_review(verification);
        assert_eq!(
            m.apply(DecisionEvent::Reject).unwrap(),
            Step::RouteToMarkIncomplete
        );
    }

    #[test]
    fn abandon_works_from_any_live_state() {
        let mut m = DecisionMachine::new_submission(today(), today());
        assert_eq!(m.apply(DecisionEvent::Abandon).unwrap(), Step::Discard);

        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::NoEvidence).unwrap();
        m.apply(DecisionEvent::Accept).unwrap();
        assert_eq!(m.state(), DecisionState::Finalizing);
        assert_eq!(m.apply(DecisionEvent::Abandon).unwrap(), Step::Discard);
    }

    #[test]
    fn terminal_states_reject_further_events() {
        let mut m = DecisionMachine::new_submission(today(), today());
        m.apply(DecisionEvent::Abandon).unwrap();
        assert!(m.apply(DecisionEvent::Accept).is_err());
        assert!(m.apply(DecisionEvent::Abandon).is_err());
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let mut m = DecisionMachine::new_submission(today(), today());
        assert!(m.apply(DecisionEvent::Accept).is_err());
        assert!(m.apply(DecisionEvent::DetailsCaptured).is_err());

        let err = m.apply(DecisionEvent::ContinueDegraded).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }
}
