//! Resilience around fragile shared resources.
//!
//! Two distinct patterns live here:
//!
//! - **Output-lock resilience**: a requested final output name may already
//!   be occupied by a previous run, possibly held open by another process.
//!   [`ensure_writable_output`] reuses the name when it can, deletes the old
//!   dataset when allowed, and otherwise routes to a suffixed alternate with
//!   a warning. A locked output never fails the run.
//! - **Operation fallback chains**: [`erase_with_fallback`] runs an explicit
//!   ordered list of named strategies, stops at the first success, and
//!   records every attempt so an exhausted chain can report exactly what was
//!   tried.

use tracing::{info, warn};

use crate::engine::GeometryEngine;
use crate::error::{AlignError, AlignResult};
use crate::workspace::WorkspaceResolver;

/// Which fallback strategy produced the result, plus the failures that
/// preceded it.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    /// Name of the strategy that succeeded.
    pub strategy: &'static str,
    /// `"strategy: reason"` entries for every strategy that failed first.
    pub attempts: Vec<String>,
}

/// Pick a writable path for a final output named `base` in `workspace`.
///
/// - No prior dataset: the requested name is returned.
/// - Prior dataset, deletable: it is deleted and the name reused.
/// - Prior dataset, locked: a warning is emitted and a uniquely suffixed
///   alternate name is returned instead. Never an error.
pub fn ensure_writable_output<E: GeometryEngine>(
    engine: &mut E,
    resolver: &mut WorkspaceResolver,
    workspace: &str,
    base: &str,
) -> String {
    let requested = crate::workspace::dataset_path(workspace, base);
    if !engine.exists(&requested) {
        return requested;
    }

    match engine.delete(&requested) {
        Ok(()) => requested,
        Err(e) => {
            let alternate = resolver.unique_name(engine, base, workspace);
            warn!(
                target: "layer_snap::resilience",
                requested = requested.as_str(),
                alternate = alternate.as_str(),
                reason = %e,
                "Output is locked; writing to an alternate name"
            );
            alternate
        }
    }
}

/// Erase `eraser` from `subject` into `out`, trying three strategies in
/// order and stopping at the first success:
///
/// 1. `erase`: the engine's direct set-difference operation;
/// 2. `pairwise_erase`: an alternate implementation with the same semantics;
/// 3. `identity_filter`: a full overlay with contributor tagging, filtered
///    to the features contributed by `subject` alone (`FID_* = -1`).
///
/// # Errors
///
/// [`AlignError::FallbackExhausted`] when all three tiers fail, carrying the
/// per-strategy failure log. In particular, tier 3 is unrecoverable when the
/// overlay output has no `FID_*` tagging field: that means the overlay
/// operation's contract changed.
pub fn erase_with_fallback<E: GeometryEngine>(
    engine: &mut E,
    resolver: &mut WorkspaceResolver,
    subject: &str,
    eraser: &str,
    out: &str,
) -> AlignResult<FallbackOutcome> {
    let mut attempts = Vec::new();

    // A failed tier may leave a partial dataset at `out`.
    let clear_partial = |engine: &mut E| {
        if engine.exists(out) {
            let _ = engine.delete(out);
        }
    };

    match engine.erase(subject, eraser, out) {
        Ok(()) => return Ok(FallbackOutcome { strategy: "erase", attempts }),
        Err(e) => attempts.push(format!("erase: {e}")),
    }
    clear_partial(engine);

    match engine.pairwise_erase(subject, eraser, out) {
        Ok(()) => {
            info!(
                target: "layer_snap::resilience",
                subject = subject,
                "Direct erase failed; pairwise erase succeeded"
            );
            return Ok(FallbackOutcome { strategy: "pairwise_erase", attempts });
        }
        Err(e) => attempts.push(format!("pairwise_erase: {e}")),
    }
    clear_partial(engine);

    // Last resort: overlay with contributor tagging, then keep only the
    // features the eraser did not touch.
    let scratch = resolver.scratch_id().to_string();
    let overlay = resolver.unique_name(engine, "id_tmp", &scratch);
    if let Err(e) = engine.overlay_identity(subject, eraser, &overlay) {
        attempts.push(format!("identity_filter: {e}"));
        return Err(AlignError::fallback_exhausted("erase", attempts));
    }

    let fields = match engine.list_fields(&overlay) {
        Ok(fields) => fields,
        Err(e) => {
            attempts.push(format!("identity_filter: {e}"));
            return Err(AlignError::fallback_exhausted("erase", attempts));
        }
    };
    let fid_field = fields
        .iter()
        .find(|f| f.to_ascii_uppercase().starts_with("FID_"));
    let fid_field = match fid_field {
        Some(field) => field.clone(),
        None => {
            attempts.push("identity_filter: no FID_* contributor field on overlay output".into());
            return Err(AlignError::fallback_exhausted("erase", attempts));
        }
    };

    if let Err(e) = engine.select_copy(&overlay, &fid_field, -1, out) {
        attempts.push(format!("identity_filter: {e}"));
        return Err(AlignError::fallback_exhausted("erase", attempts));
    }

    info!(
        target: "layer_snap::resilience",
        subject = subject,
        field = fid_field.as_str(),
        "Erase recovered via identity overlay filter"
    );
    Ok(FallbackOutcome { strategy: "identity_filter", attempts })
}
