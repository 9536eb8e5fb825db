//! Import and call denylists
//!
//! The screen is a pure function over analysis data. Deployments may replace
//! the default lists through the policy file (see [`crate::config`]).

use serde::Deserialize;
use std::collections::BTreeSet;

/// Modules giving access to the OS, processes, files, network or native code
pub const DEFAULT_DISALLOWED_IMPORTS: &[&str] = &[
    "os",
    "subprocess",
    "shutil",
    "socket",
    "requests",
    "urllib",
    "http",
    "ctypes",
    "cffi",
    "multiprocessing",
    "threading",
];

/// Builtins that evaluate arbitrary code or open files
pub const DEFAULT_DISALLOWED_CALLS: &[&str] = &["eval", "exec", "open", "compile", "__import__"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecurityPolicy {
    pub disallowed_imports: BTreeSet<String>,
    pub disallowed_calls: BTreeSet<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            disallowed_imports: DEFAULT_DISALLOWED_IMPORTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            disallowed_calls: DEFAULT_DISALLOWED_CALLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SecurityPolicy {
    pub fn is_import_allowed(&self, module: &str) -> bool {
        !self.disallowed_imports.contains(top_level_module(module))
    }

    pub fn is_call_allowed(&self, name: &str) -> bool {
        !self.disallowed_calls.contains(name)
    }

    pub fn screen_imports<'a>(
        &self,
        imports: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        imports
            .into_iter()
            .filter(|m| !self.is_import_allowed(m))
            .cloned()
            .collect()
    }

    pub fn screen_calls<'a>(&self, calls: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        calls
            .into_iter()
            .filter(|c| !self.is_call_allowed(c))
            .cloned()
            .collect()
    }
}

/// `os.path` -> `os`
pub fn top_level_module(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}
