//! Ambient configuration adapter.
//!
//! For clients that only read configuration from the process environment
//! (`aws_config::load_defaults` and friends). Patches are kept on a
//! process-wide stack: the value of each touched variable is always the
//! baseline captured before the first patch touched it, overlaid by the
//! patches still applied, in order. Restoring any patch, in any order,
//! therefore yields exactly what the remaining patches imply, and restoring
//! the last one brings back the baseline.
//!
//! Only clients constructed after a patch is applied see it. A client built
//! earlier keeps whatever configuration it resolved at construction time.

use errors::ConfigurationRestoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::env;
use std::sync::LazyLock;

/// `(variable, value)`; `None` unsets the variable while patched.
pub type EnvAssignment = (String, Option<String>);

#[derive(Default)]
struct PatchStack {
    next_id: u64,
    baseline: HashMap<String, Option<String>>,
    written: HashMap<String, Option<String>>,
    patches: Vec<(u64, Vec<EnvAssignment>)>
}

static STACK: LazyLock<Mutex<PatchStack>> = LazyLock::new(|| Mutex::new(PatchStack::default()));

impl PatchStack {
    fn effective(&self, variable: &str) -> Option<String> {
        self.patches
            .iter()
            .rev()
            .find_map(|(_, vars)| {
                vars.iter()
                    .rev()
                    .find(|(name, _)| name == variable)
                    .map(|(_, value)| value.clone())
            })
            .unwrap_or_else(|| self.baseline.get(variable).cloned().flatten())
    }

    fn write_all(&mut self) {
        let variables: Vec<String> = self.baseline.keys().cloned().collect();
        for variable in variables {
            let value = self.effective(&variable);
            set_env(&variable, value.as_deref());
            self.written.insert(variable, value);
        }
    }
}

fn set_env(variable: &str, value: Option<&str>) {
    // Environment mutation is serialized by the STACK lock.
    unsafe {
        match value {
            Some(value) => env::set_var(variable, value),
            None => env::remove_var(variable)
        }
    }
}

/// An applied environment patch. Restores on [`AmbientPatch::restore`] or
/// on drop.
#[derive(Debug)]
pub struct AmbientPatch {
    id: u64,
    variables: Vec<String>,
    restored: bool
}

impl AmbientPatch {
    pub fn apply(assignments: Vec<EnvAssignment>) -> Self {
        let mut stack = STACK.lock();
        for (variable, _) in &assignments {
            if !stack.baseline.contains_key(variable) {
                let current = env::var(variable).ok();
                stack.baseline.insert(variable.clone(), current);
            }
        }

        stack.next_id += 1;
        let id = stack.next_id;
        let variables = assignments.iter().map(|(name, _)| name.clone()).collect();
        stack.patches.push((id, assignments));
        stack.write_all();
        tracing::debug!("Applied ambient patch {} ({} patches active)", id, stack.patches.len());

        Self {
            id,
            variables,
            restored: false
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Remove this patch and rewrite the environment.
    ///
    /// The environment is rewritten even when a patched variable was changed
    /// by someone else in the meantime; that change is lost and reported.
    pub fn restore(mut self) -> Result<(), ConfigurationRestoreError> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<(), ConfigurationRestoreError> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        let mut stack = STACK.lock();
        let modified = self
            .variables
            .iter()
            .find(|variable| {
                stack
                    .written
                    .get(*variable)
                    .is_some_and(|written| *written != env::var(variable.as_str()).ok())
            })
            .cloned();

        stack.patches.retain(|(id, _)| *id != self.id);
        stack.write_all();
        if stack.patches.is_empty() {
            stack.baseline.clear();
            stack.written.clear();
        }
        tracing::debug!("Restored ambient patch {} ({} patches active)", self.id, stack.patches.len());

        match modified {
            Some(variable) => Err(ConfigurationRestoreError::Modified { variable }),
            None => Ok(())
        }
    }
}

impl Drop for AmbientPatch {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            tracing::warn!("Ambient configuration restore: {}", e);
        }
    }
}
