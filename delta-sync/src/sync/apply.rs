//! The remote apply step.
//!
//! All remote state changes of a sync happen in one shell invocation running
//! under `set -e`, so the first failing step stops the rest. The manifest
//! rename comes right after extraction: if extraction fails the previous
//! manifest stays in place.

use super::archive::ApplyPlan;
use super::RemoteNames;
use crate::config::SyncSettings;
use std::fmt;

/// One step of a remote script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStep {
    /// Extract a gzip compressed tar archive into the working directory
    Extract { archive: String },
    /// Remove a single file, ignoring a missing one
    Remove { path: String },
    /// Rename a file, replacing the target
    Rename { from: String, to: String },
    /// Remove every file listed (one per line) in `list`
    DeleteListed { list: String },
}

impl RemoteStep {
    fn render(&self) -> String {
        match self {
            RemoteStep::Extract { archive } => format!("tar -xzf {}", shell_quote(archive)),
            RemoteStep::Remove { path } => format!("rm -f -- {}", shell_quote(path)),
            RemoteStep::Rename { from, to } => {
                format!("mv -f -- {} {}", shell_quote(from), shell_quote(to))
            }
            RemoteStep::DeleteListed { list } => format!(
                "while IFS= read -r f; do rm -f -- \"$f\"; done < {}",
                shell_quote(list)
            ),
        }
    }
}

impl fmt::Display for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStep::Extract { archive } => write!(f, "extract {archive}"),
            RemoteStep::Remove { path } => write!(f, "remove {path}"),
            RemoteStep::Rename { from, to } => write!(f, "rename {from} -> {to}"),
            RemoteStep::DeleteListed { list } => write!(f, "delete files listed in {list}"),
        }
    }
}

/// Fail-fast sequence of steps executed as a single remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteScript {
    steps: Vec<RemoteStep>,
}

impl RemoteScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: RemoteStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[RemoteStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Shell text, `set -e` followed by every step.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.steps.len() + 1);
        parts.push("set -e".to_string());
        parts.extend(self.steps.iter().map(RemoteStep::render));
        parts.join("; ")
    }
}

/// Build the apply script for `plan`, or `None` when there is nothing to do.
pub fn apply_script(plan: &ApplyPlan, names: &RemoteNames, settings: &SyncSettings) -> Option<RemoteScript> {
    let mut script = RemoteScript::new();

    if plan.extract {
        script.push(RemoteStep::Extract { archive: names.archive() });
        if settings.remove_temp_files {
            script.push(RemoteStep::Remove { path: names.archive() });
        }
    }

    if plan.delete {
        if settings.remove_old_files {
            script.push(RemoteStep::DeleteListed { list: names.deletion_list() });
        }
        if settings.remove_temp_files {
            script.push(RemoteStep::Remove { path: names.deletion_list() });
        }
    }

    // Manifest goes last so that a failed step leaves the previous one in place
    if plan.replace_manifest {
        script.push(RemoteStep::Rename {
            from: names.manifest_tmp(),
            to: names.manifest(),
        });
    }

    (!script.is_empty()).then_some(script)
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
