//! Compilation target descriptions.

use crate::device::DeviceKind;
use std::collections::BTreeMap;

/// Describes one compilation target: a device kind plus instruction-set
/// attributes, and optionally a cooperating host target for device kinds
/// whose kernels need host-side portions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub kind: DeviceKind,

    /// Free-form capability attributes, e.g. `vlen = "128"` for the
    /// vector extension.
    pub attrs: BTreeMap<String, String>,

    /// Host target for device kinds that require a cooperating host
    /// compilation unit.
    pub host: Option<Box<TargetSpec>>,
}

impl TargetSpec {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            attrs: BTreeMap::new(),
            host: None,
        }
    }

    /// Host CPU target.
    pub fn host() -> Self {
        Self::new(DeviceKind::Host)
    }

    /// Accelerator target with a cooperating host target attached.
    pub fn accel() -> Self {
        let mut spec = Self::new(DeviceKind::Accel);
        spec.host = Some(Box::new(Self::host()));
        spec
    }

    /// Set an attribute, chaining.
    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    /// Look up an attribute.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|s| s.as_str())
    }

    /// Parse an attribute as an integer, falling back to `default` when
    /// absent or malformed.
    pub fn attr_usize(&self, key: &str, default: usize) -> usize {
        self.attr(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}
