//! Loadable compiled artifact: kernels, plans, and embedded parameters.
//!
//! The artifact bundles everything the VM needs into one persisted unit:
//! a format version tag, per-device kernel blobs, an entry-function table
//! of execution plans, and the embedded parameter table. Parameters are
//! owned by the artifact and referenced by index from plan steps — they
//! are staged into device memory once at load, never copied per
//! invocation.

use crate::device::DeviceKind;
use crate::plan::{ExecutionPlan, KernelBlob, Operand, ParamEntry, PlanStep};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Current artifact format version. Bumped on incompatible layout changes.
pub const ARTIFACT_VERSION: u32 = 1;

/// A compiled, loadable artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Format version tag, checked on load.
    pub version: u32,

    /// Entry-function name -> ordered execution plan.
    pub entries: BTreeMap<String, ExecutionPlan>,

    /// Kernel blobs, one per compiled device partition.
    pub blobs: Vec<KernelBlob>,

    /// Embedded parameter table, indexed by `Operand::Param`.
    pub params: Vec<ParamEntry>,
}

impl Artifact {
    /// Every device kind the artifact references: kernel partitions,
    /// parameter placements, and value placements in every entry.
    pub fn device_kinds(&self) -> BTreeSet<DeviceKind> {
        let mut kinds: BTreeSet<DeviceKind> =
            self.blobs.iter().map(|blob| blob.device).collect();
        kinds.extend(self.params.iter().map(|p| p.device));
        for plan in self.entries.values() {
            kinds.extend(plan.values.iter().map(|v| v.device));
        }
        kinds
    }

    /// Check internal consistency: every kernel reference and parameter
    /// index resolves, and kernel steps point at a blob of the step's
    /// declared device.
    pub fn validate(&self) -> Result<()> {
        for (entry, plan) in &self.entries {
            for step in &plan.steps {
                if step.value().index() >= plan.values.len() {
                    return Err(Error::ArtifactLoad(format!(
                        "entry '{}': step value {} out of range",
                        entry,
                        step.value()
                    )));
                }
                let operands: &[Operand] = match step {
                    PlanStep::KernelCall { kernel, inputs, .. } => {
                        let blob = self.blobs.get(kernel.blob).ok_or_else(|| {
                            Error::ArtifactLoad(format!(
                                "entry '{}': kernel blob {} missing",
                                entry, kernel.blob
                            ))
                        })?;
                        if blob.kernels.get(kernel.kernel).is_none() {
                            return Err(Error::ArtifactLoad(format!(
                                "entry '{}': kernel {} missing from {} blob",
                                entry, kernel.kernel, blob.device
                            )));
                        }
                        inputs
                    }
                    PlanStep::Transfer { input, .. } => std::slice::from_ref(input),
                };
                for operand in operands {
                    match operand {
                        Operand::Value(id) if id.index() >= plan.values.len() => {
                            return Err(Error::ArtifactLoad(format!(
                                "entry '{}': operand {} out of range",
                                entry, id
                            )));
                        }
                        Operand::Param(index) if *index >= self.params.len() => {
                            return Err(Error::ArtifactLoad(format!(
                                "entry '{}': parameter index {} out of range",
                                entry, index
                            )));
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Persist the artifact to a file.
    pub fn export(&self, path: &Path) -> Result<()> {
        let encoded = bincode::serialize(self)
            .map_err(|e| Error::ArtifactLoad(format!("serialize failed: {}", e)))?;
        std::fs::write(path, encoded)
            .map_err(|e| Error::ArtifactLoad(format!("write {} failed: {}", path.display(), e)))?;
        Ok(())
    }

    /// Load an artifact from a file.
    ///
    /// Rejects version mismatches and internally inconsistent artifacts
    /// wholesale; there is no partial load.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| Error::ArtifactLoad(format!("read {} failed: {}", path.display(), e)))?;
        let artifact: Artifact = bincode::deserialize(&data)
            .map_err(|e| Error::ArtifactLoad(format!("deserialize failed: {}", e)))?;

        if artifact.version != ARTIFACT_VERSION {
            return Err(Error::ArtifactLoad(format!(
                "format version {} does not match supported version {}",
                artifact.version, ARTIFACT_VERSION
            )));
        }
        artifact.validate()?;

        Ok(artifact)
    }
}
