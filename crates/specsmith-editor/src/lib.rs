//! Patch-based specification editor.
//!
//! An edit cycle turns `(specification, change request)` into a new
//! specification by asking an oracle for a small structural patch, checking
//! that patch operation by operation against the block catalog, and applying
//! it to a copy. Everything the patch does not name survives unchanged.
//!
//! Pipeline: [`generator`] -> [`patch`] (validation) -> [`applier`], driven by
//! the retry-with-feedback state machine in [`orchestrator`].

pub mod applier;
pub mod extract;
pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod patch;

pub use applier::{apply, verify_preservation, Applied, DiffReport, NodeChange};
pub use generator::{
    build_prompt, parse_reply, ClarifyingQuestion, GenerationError, PatchGenerator, Proposal,
};
pub use model::{validate, Location, ValidationResult, Violation, ViolationKind};
pub use orchestrator::{EditCycle, EditOrchestrator, EditOutcome, EditState, LastFailure, RejectReason};
pub use patch::{
    validate_patch, Operation, Patch, PatchIntent, PatchValidationResult, PatchViolation, RawPatch,
};
