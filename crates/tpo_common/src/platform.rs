//! Immutable descriptions of build targets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a platform produces firmware for real hardware or a host executable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Cross-compiled firmware for a physical board.
    Hardware,
    /// Compiled and run on the host; needs the native compatibility shim.
    HostNative,
}

/// An immutable target configuration: a stable name plus opaque toolchain config.
///
/// The name is the identity key used in fingerprints, logs, and cache
/// namespacing. The config text is handed to the toolchain verbatim and is
/// never parsed here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    name: String,
    config: String,
    target: TargetKind,
}

impl PlatformDescriptor {
    /// Creates a descriptor, inferring the target kind from the name.
    ///
    /// Names equal to `native` or ending in `-native` / `_native` are treated
    /// as host-native; everything else targets hardware.
    pub fn new(name: impl Into<String>, config: impl Into<String>) -> Self {
        let name = name.into();
        let target = if is_native_name(&name) {
            TargetKind::HostNative
        } else {
            TargetKind::Hardware
        };
        Self {
            name,
            config: config.into(),
            target,
        }
    }

    /// Creates a descriptor that is explicitly host-native.
    pub fn host_native(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: config.into(),
            target: TargetKind::HostNative,
        }
    }

    /// Creates a descriptor that explicitly targets hardware.
    pub fn hardware(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: config.into(),
            target: TargetKind::Hardware,
        }
    }

    /// The platform's stable identity key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opaque toolchain configuration text.
    pub fn config(&self) -> &str {
        &self.config
    }

    /// The platform's target kind.
    pub fn target(&self) -> TargetKind {
        self.target
    }

    /// Returns `true` if builds run on the host and need the native shim.
    pub fn is_host_native(&self) -> bool {
        self.target == TargetKind::HostNative
    }

    /// Returns the name with filesystem-unsafe characters replaced by `_`.
    ///
    /// Used for work and cache directory names, never for fingerprints.
    pub fn safe_name(&self) -> String {
        self.name
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | ' ' | '<' | '>' | '"' | '|' | '?' | '*' => '_',
                c => c,
            })
            .collect()
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn is_native_name(name: &str) -> bool {
    name == "native" || name.ends_with("-native") || name.ends_with("_native")
}
