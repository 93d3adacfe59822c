//! Workspace selection and collision-free dataset naming.
//!
//! Intermediate datasets live in the fastest workspace that will take them:
//! candidates are probed in order (volatile in-memory store first, scratch
//! database next, durable output database last). Names never collide with
//! existing datasets; on collision a short random suffix is drawn and the
//! check repeats. Names already handed out by this resolver are also
//! avoided, so two calls with the same base name return distinct paths even
//! before anything is created.
//!
//! Nothing here deletes proactively: deleting intermediates mid-run is what
//! triggers lock contention in shared workspaces in the first place.

use hashbrown::HashSet;
use tracing::debug;

use crate::engine::{GeometryEngine, SpatialRef};
use crate::error::{AlignError, AlignResult};

/// How volatile a workspace is. Ordering in the candidate list matters more
/// than the kind itself; the kind exists for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    /// In-memory store; fastest, lost on exit.
    Volatile,
    /// Scratch database; survives the run, periodically cleaned.
    Scratch,
    /// Durable output database; where final outputs belong.
    Durable,
}

/// A named workspace candidate.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: String,
    pub kind: WorkspaceKind,
}

impl Workspace {
    pub fn volatile(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: WorkspaceKind::Volatile,
        }
    }

    pub fn scratch(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: WorkspaceKind::Scratch,
        }
    }

    pub fn durable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: WorkspaceKind::Durable,
        }
    }
}

/// Render a dataset path within a workspace.
pub fn dataset_path(workspace: &str, name: &str) -> String {
    format!("{workspace}/{name}")
}

/// The dataset name portion of a `workspace/name` path.
pub(crate) fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Six hex characters of a fresh v4 uuid.
pub(crate) fn short_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Maintains the ordered candidate workspaces and generates collision-free
/// names for intermediate datasets.
#[derive(Debug)]
pub struct WorkspaceResolver {
    candidates: Vec<Workspace>,
    issued: HashSet<String>,
}

impl WorkspaceResolver {
    /// Build a resolver over an ordered candidate list, most volatile first.
    ///
    /// The list must not be empty.
    pub fn new(candidates: Vec<Workspace>) -> Self {
        assert!(
            !candidates.is_empty(),
            "workspace resolver needs at least one candidate"
        );
        Self {
            candidates,
            issued: HashSet::new(),
        }
    }

    /// The conventional three-tier chain: volatile, scratch, durable.
    pub fn standard(
        volatile: impl Into<String>,
        scratch: impl Into<String>,
        durable: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Workspace::volatile(volatile),
            Workspace::scratch(scratch),
            Workspace::durable(durable),
        ])
    }

    /// The ordered candidate workspaces.
    pub fn candidates(&self) -> &[Workspace] {
        &self.candidates
    }

    /// The preferred workspace for intermediates (first candidate).
    pub fn scratch_id(&self) -> &str {
        &self.candidates[0].id
    }

    /// The durable workspace (last `Durable` candidate, else the last one).
    pub fn durable_id(&self) -> &str {
        self.candidates
            .iter()
            .rev()
            .find(|w| w.kind == WorkspaceKind::Durable)
            .unwrap_or(&self.candidates[self.candidates.len() - 1])
            .id
            .as_str()
    }

    /// Return `workspace/base_name` if free, otherwise keep appending short
    /// random suffixes until an unused name is found. Never returns a name
    /// that exists in the workspace or that this resolver already issued.
    pub fn unique_name<E: GeometryEngine>(
        &mut self,
        engine: &E,
        base_name: &str,
        workspace: &str,
    ) -> String {
        let mut candidate = dataset_path(workspace, base_name);
        while engine.exists(&candidate) || self.issued.contains(&candidate) {
            candidate = dataset_path(workspace, &format!("{base_name}_{}", short_token()));
        }
        self.issued.insert(candidate.clone());
        candidate
    }

    /// Copy (or reproject, when the spatial references differ) `source` into
    /// the first candidate workspace that accepts it, under a fresh name.
    ///
    /// Each candidate is probed with a result-returning attempt; a candidate
    /// is rejected when the engine call fails or the created dataset cannot
    /// be verified to exist. If every candidate rejects the write, the error
    /// lists all attempts with their rejection reasons.
    pub fn materialize_to_first_working<E: GeometryEngine>(
        &mut self,
        engine: &mut E,
        source: &str,
        target: Option<SpatialRef>,
    ) -> AlignResult<String> {
        let base = format!("{}_proj", base_name(source));
        let mut attempts = Vec::new();

        for workspace in self.candidates.clone() {
            let out = self.unique_name(engine, &base, &workspace.id);
            let needs_projection = match (target, engine.spatial_ref(source)) {
                (Some(t), Ok(current)) => current != t,
                (Some(_), Err(e)) => {
                    attempts.push(format!("{}: {e}", workspace.id));
                    continue;
                }
                (None, _) => false,
            };

            let result = if needs_projection {
                // target is Some here by construction
                engine.reproject(source, &out, target.expect("projection target"))
            } else {
                engine.copy(source, &out)
            };

            match result {
                Ok(()) if engine.exists(&out) => {
                    debug!(
                        target: "layer_snap::workspace",
                        source = source,
                        out = out.as_str(),
                        "Materialized layer"
                    );
                    return Ok(out);
                }
                Ok(()) => {
                    attempts.push(format!(
                        "{}: created dataset missing after write",
                        workspace.id
                    ));
                }
                Err(e) => {
                    attempts.push(format!("{}: {e}", workspace.id));
                }
            }
        }

        Err(AlignError::no_writable_workspace(source, attempts))
    }
}
