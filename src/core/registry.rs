// src/core/registry.rs

use crate::core::{
    context::BuildContext,
    task::{Hook, HookFn, Task, TaskError, TaskKind},
};
use std::collections::{BTreeMap, HashMap};

/// Fields of a task that a product configuration may replace. Any hook
/// supplied here is chained over the task's previous hook of the same role,
/// so the old behavior stays reachable through the base-hook accessors.
#[derive(Default)]
pub struct TaskOverride {
    pub desc: Option<String>,
    pub exec_hook: Option<HookFn>,
    pub pre_hook: Option<HookFn>,
    pub post_hook: Option<HookFn>,
}

/// Process-wide mapping from task name to task.
///
/// Built once at startup (default tasks first, then product configuration),
/// then only consulted. At most one entry per name: a strong entry is never
/// silently overwritten, a weak one is.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task. A same-name conflict with a strong (non-weak)
    /// existing entry warns and drops the new registration; a weak existing
    /// entry is replaced without a warning.
    pub fn register(&mut self, task: Task) {
        if let Some(existing) = self.tasks.get(&task.name) {
            if !existing.weak {
                log::warn!("register: duplicate entry: '{}'", task.name);
                return;
            }
        }
        self.tasks.insert(task.name.clone(), task);
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Replaces fields of a registered Alchemy task. Unknown names and
    /// non-Alchemy tasks warn and leave the registry untouched.
    pub fn override_alchemy_task(
        &mut self,
        name: &str,
        defargs: Option<Vec<String>>,
        ov: TaskOverride,
    ) {
        let Some(task) = self.tasks.get_mut(name) else {
            log::warn!("override_alchemy_task: unknown task: '{name}'");
            return;
        };
        let TaskKind::Alchemy { defargs: slot, .. } = &mut task.kind else {
            log::warn!("override_alchemy_task: invalid alchemy task: '{name}'");
            return;
        };
        if let Some(defargs) = defargs {
            *slot = Some(defargs);
        }
        apply_override(task, ov);
    }

    /// Replaces fields of a registered Meta task. Unknown names and
    /// non-Meta tasks warn and leave the registry untouched.
    pub fn override_meta_task(
        &mut self,
        name: &str,
        subtasks: Option<Vec<String>>,
        ov: TaskOverride,
    ) {
        let Some(task) = self.tasks.get_mut(name) else {
            log::warn!("override_meta_task: unknown task: '{name}'");
            return;
        };
        let TaskKind::Meta { subtasks: slot } = &mut task.kind else {
            log::warn!("override_meta_task: invalid meta task: '{name}'");
            return;
        };
        if let Some(subtasks) = subtasks {
            *slot = subtasks;
        }
        apply_override(task, ov);
    }

    /// Checks that every subtask referenced by a Meta task is registered.
    /// Missing references are warnings, not errors: a task may be invoked
    /// directly without ever running the Meta task that names it.
    /// Recursion is not detected.
    pub fn validate(&self) {
        for task in self.tasks.values() {
            let TaskKind::Meta { subtasks } = &task.kind else {
                continue;
            };
            for spec in subtasks {
                let Some(subtask_name) = spec.split_whitespace().next() else {
                    continue;
                };
                if !self.tasks.contains_key(subtask_name) {
                    log::warn!("Meta task '{}' uses unknown task '{}'", task.name, subtask_name);
                }
            }
        }
    }

    /// Removes every registered task, or all but the given keep-list.
    pub fn disable_default_tasks(&mut self, keep: Option<&[&str]>) {
        log::debug!("Disable default tasks");
        match keep {
            None => self.tasks.clear(),
            Some(keep) => self.tasks.retain(|name, _| keep.contains(&name.as_str())),
        }
    }

    /// Tasks for the `-t`/`-tt` listing, sorted by name. Hidden tasks
    /// (leading underscore) are always excluded; secondary tasks only show
    /// up when asked. The flag reports whether secondary tasks were hidden.
    pub fn listed_tasks(&self, include_secondary: bool) -> (Vec<&Task>, bool) {
        let mut has_secondary = false;
        let mut listed: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| !task.name.starts_with('_'))
            .filter(|task| {
                if task.secondary_help && !include_secondary {
                    has_secondary = true;
                    false
                } else {
                    true
                }
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        (listed, has_secondary)
    }

    /// All non-hidden task names, for shell completion.
    pub fn completion_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tasks
            .keys()
            .filter(|name| !name.starts_with('_'))
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Looks up and runs a task. The unknown-name failure is raised here so
    /// it is caught (and logged) by whatever invoked this name: the owning
    /// Meta task, or the top-level task loop.
    pub fn execute(
        &self,
        name: &str,
        args: &[String],
        extra_env: BTreeMap<String, String>,
        ctx: &BuildContext,
    ) -> Result<(), TaskError> {
        match self.tasks.get(name) {
            None => Err(TaskError::UnknownTask(name.to_string())),
            Some(task) => task.execute(self, ctx, args, extra_env),
        }
    }
}

fn apply_override(task: &mut Task, ov: TaskOverride) {
    if let Some(desc) = ov.desc {
        task.desc = desc;
    }
    // Chain new hooks over the previous ones.
    if let Some(func) = ov.exec_hook {
        task.exec_hook = Some(Hook::chained(func, task.exec_hook.take()));
    }
    if let Some(func) = ov.pre_hook {
        task.pre_hook = Some(Hook::chained(func, task.pre_hook.take()));
    }
    if let Some(func) = ov.post_hook {
        task.post_hook = Some(Hook::chained(func, task.post_hook.take()));
    }
}
