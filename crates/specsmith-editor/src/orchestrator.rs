//! The edit cycle: generate, validate, apply, with bounded retries.
//!
//! ```text
//! Idle -> Generating -> Validating -> Applying -> Done
//!            ^   |          |
//!            +---+----------+   (retry while attempts remain)
//!                |          |
//!                v          v
//!     Rejected(GenerationExhausted | ValidationExhausted)
//! ```
//!
//! A rejected patch is fed back to the oracle: the next attempt's request is
//! the original request rewritten through the configured feedback template
//! with the latest violation. An unparsable reply or oracle failure retries
//! with the request unchanged.

use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use specsmith_core::config::EditorConfig;
use specsmith_core::error::{Result, SpecsmithError};
use specsmith_core::traits::{BlockCatalog, Oracle};
use specsmith_core::types::Specification;

use crate::applier::{apply, verify_preservation, Applied};
use crate::generator::{ClarifyingQuestion, GenerationError, PatchGenerator, Proposal};
use crate::model::{validate, ValidationResult};
use crate::patch::{validate_patch, PatchViolation};

/// Why an edit cycle gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The last attempt produced no usable patch.
    GenerationExhausted,
    /// The last attempt produced a patch that failed validation.
    ValidationExhausted,
}

/// States of one edit cycle. Attempts are numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EditState {
    Idle,
    Generating { attempt: u32 },
    Validating { attempt: u32 },
    Applying { attempt: u32 },
    Done,
    NeedsClarification,
    Rejected { reason: RejectReason },
}

impl EditState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::NeedsClarification | Self::Rejected { .. }
        )
    }
}

/// The failure behind a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastFailure {
    Generation(GenerationError),
    Validation(PatchViolation),
}

impl std::fmt::Display for LastFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation(e) => write!(f, "{}", e),
            Self::Validation(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Done(Applied),
    /// The oracle asked questions instead of proposing a patch.
    NeedsClarification(Vec<ClarifyingQuestion>),
    Rejected {
        reason: RejectReason,
        last_failure: LastFailure,
    },
}

/// Record of one finished edit cycle.
#[derive(Debug, Clone)]
pub struct EditCycle {
    pub id: Uuid,
    pub outcome: EditOutcome,
    /// Oracle calls made.
    pub attempts: u32,
    /// Every state entered, starting with `Idle` and ending in a terminal.
    pub transitions: Vec<EditState>,
}

impl EditCycle {
    pub fn final_state(&self) -> &EditState {
        self.transitions.last().unwrap_or(&EditState::Idle)
    }

    /// The new specification, if the cycle reached `Done`.
    pub fn applied(&self) -> Option<&Applied> {
        match &self.outcome {
            EditOutcome::Done(applied) => Some(applied),
            _ => None,
        }
    }
}

struct Tracker {
    id: Uuid,
    transitions: Vec<EditState>,
}

impl Tracker {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            transitions: vec![EditState::Idle],
        }
    }

    fn enter(&mut self, state: EditState) {
        debug!(cycle = %self.id, state = ?state, "Edit state");
        self.transitions.push(state);
    }

    fn finish(self, outcome: EditOutcome, attempts: u32) -> EditCycle {
        EditCycle {
            id: self.id,
            outcome,
            attempts,
            transitions: self.transitions,
        }
    }
}

/// Drives edit cycles. Holds no per-cycle state, so one orchestrator can
/// serve concurrent cycles on different specifications.
pub struct EditOrchestrator {
    generator: PatchGenerator,
    config: EditorConfig,
}

impl EditOrchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, config: EditorConfig) -> Self {
        Self {
            generator: PatchGenerator::new(oracle, config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Run one edit cycle of `request` against `base`.
    ///
    /// `base` is only read. Rejections and clarification requests are normal
    /// outcomes; `Err` is reserved for a broken configuration or an applied
    /// result that fails the preservation check.
    pub async fn edit(
        &self,
        base: &Specification,
        request: &str,
        catalog: &dyn BlockCatalog,
    ) -> Result<EditCycle> {
        let mut tracker = Tracker::new();
        let max_attempts = self.config.max_attempts;

        info!(cycle = %tracker.id, max_attempts, "Starting edit cycle");
        if let ValidationResult::Invalid { violations } = validate(base, catalog) {
            warn!(
                cycle = %tracker.id,
                violations = violations.len(),
                "Base specification is already invalid"
            );
        }

        let mut current_request = request.to_string();
        let mut last_failure: Option<LastFailure> = None;

        for attempt in 1..=max_attempts {
            tracker.enter(EditState::Generating { attempt });

            let raw = match self
                .generator
                .propose_patch(base, &current_request, catalog)
                .await
            {
                Ok(Proposal::Patch(raw)) => raw,
                Ok(Proposal::Clarification(questions)) => {
                    info!(
                        cycle = %tracker.id,
                        questions = questions.len(),
                        "Oracle asked for clarification"
                    );
                    tracker.enter(EditState::NeedsClarification);
                    return Ok(tracker.finish(EditOutcome::NeedsClarification(questions), attempt));
                }
                Err(e) => {
                    warn!(cycle = %tracker.id, attempt, error = %e, "Patch generation failed");
                    last_failure = Some(LastFailure::Generation(e));
                    continue;
                }
            };

            tracker.enter(EditState::Validating { attempt });
            let patch = raw.into_patch();
            if let Err(violation) = validate_patch(base, &patch, catalog) {
                warn!(
                    cycle = %tracker.id,
                    attempt,
                    index = violation.index,
                    kind = %violation.kind,
                    reason = %violation.reason,
                    "Patch rejected"
                );
                current_request = render_feedback(
                    &self.config.feedback_template,
                    request,
                    attempt,
                    &violation,
                );
                last_failure = Some(LastFailure::Validation(violation));
                continue;
            }

            tracker.enter(EditState::Applying { attempt });
            let applied = apply(base, &patch);
            verify_preservation(base, &applied.spec, &patch).map_err(SpecsmithError::Preservation)?;

            tracker.enter(EditState::Done);
            info!(
                cycle = %tracker.id,
                attempt,
                operations = patch.len(),
                changes = %applied.report.summary(),
                "Edit applied"
            );
            return Ok(tracker.finish(EditOutcome::Done(applied), attempt));
        }

        let Some(last_failure) = last_failure else {
            return Err(SpecsmithError::Config(
                "editor.max_attempts must be at least 1".into(),
            ));
        };
        let reason = match last_failure {
            LastFailure::Generation(_) => RejectReason::GenerationExhausted,
            LastFailure::Validation(_) => RejectReason::ValidationExhausted,
        };
        tracker.enter(EditState::Rejected { reason });
        warn!(
            cycle = %tracker.id,
            reason = ?reason,
            last_failure = %last_failure,
            "Edit cycle rejected"
        );
        Ok(tracker.finish(
            EditOutcome::Rejected {
                reason,
                last_failure,
            },
            max_attempts,
        ))
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(request|attempt|violation)\}").expect("static regex is valid")
    })
}

/// Fill the feedback template's `{request}`, `{attempt}` and `{violation}`
/// placeholders in one pass. Substituted text is never rescanned.
pub fn render_feedback(
    template: &str,
    request: &str,
    attempt: u32,
    violation: &PatchViolation,
) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "request" => request.to_string(),
            "attempt" => attempt.to_string(),
            _ => violation.to_string(),
        })
        .into_owned()
}
