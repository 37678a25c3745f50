// src/core/config_loader.rs

use crate::{
    constants::BUILDCFG_FILENAME,
    core::{
        context::BuildContext,
        forall::{BatchHookFn, BatchHooks},
        registry::{TaskOverride, TaskRegistry},
        task::{HookFn, Task, TaskKind},
    },
    models::{ProductBuildConfig, TaskConfig},
    system::executor,
};
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Locates the product configuration file: the variant directory wins over
/// the product directory, so a variant can specialize its product's setup.
pub fn find_config(ctx: &BuildContext) -> Option<PathBuf> {
    [ctx.variant_dir.as_deref(), ctx.product_dir.as_deref()]
        .into_iter()
        .flatten()
        .map(|dir| dir.join(BUILDCFG_FILENAME))
        .find(|path| path.exists())
}

pub fn load(path: &Path) -> Result<ProductBuildConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing '{}'", path.display()))
}

/// Applies a product configuration to the registry, after the default tasks
/// have been registered: overrides first-class, new task declarations on top.
pub fn apply(cfg: &ProductBuildConfig, registry: &mut TaskRegistry) {
    for (name, task_cfg) in &cfg.tasks {
        match task_cfg.kind.as_deref() {
            None => apply_task_override(name, task_cfg, registry),
            Some("meta") => registry.register(declared_meta(name, task_cfg)),
            Some("product") => {
                if let Some(task) = declared_product(name, task_cfg) {
                    registry.register(task);
                }
            }
            Some(other) => {
                log::warn!("buildcfg: task '{name}': unknown kind '{other}'");
            }
        }
    }
}

/// Batch hooks for the forall fan-out, built from the `[forall]` table.
/// The requested task names and argument lists are exported to the hook
/// command through its environment.
pub fn batch_hooks(cfg: Option<&ProductBuildConfig>) -> BatchHooks {
    match cfg {
        Some(cfg) => BatchHooks {
            pre: cfg.forall.pre.as_deref().map(batch_command_hook),
            post: cfg.forall.post.as_deref().map(batch_command_hook),
        },
        None => BatchHooks::default(),
    }
}

fn apply_task_override(name: &str, task_cfg: &TaskConfig, registry: &mut TaskRegistry) {
    let ov = overrides_from(task_cfg);
    if task_cfg.subtasks.is_some() {
        registry.override_meta_task(name, task_cfg.subtasks.clone(), ov);
    } else if let Some(defargs) = &task_cfg.defargs {
        registry.override_alchemy_task(name, Some(split_args(defargs)), ov);
    } else {
        // Description/hooks only: route on the registered kind.
        match registry.get(name).map(|task| &task.kind) {
            Some(TaskKind::Meta { .. }) => registry.override_meta_task(name, None, ov),
            Some(TaskKind::Alchemy { .. }) => registry.override_alchemy_task(name, None, ov),
            Some(TaskKind::Product { .. }) => {
                log::warn!("buildcfg: cannot override product task: '{name}'");
            }
            None => log::warn!("buildcfg: unknown task: '{name}'"),
        }
    }
}

fn declared_meta(name: &str, task_cfg: &TaskConfig) -> Task {
    let mut task = Task {
        kind: TaskKind::Meta {
            subtasks: task_cfg.subtasks.clone().unwrap_or_default(),
        },
        ..Task::meta(name, task_cfg.desc.as_deref().unwrap_or(""), &[])
    };
    if task_cfg.secondary_help {
        task = task.secondary();
    }
    install_command_hooks(task, task_cfg)
}

fn declared_product(name: &str, task_cfg: &TaskConfig) -> Option<Task> {
    let (Some(product), Some(variant)) = (&task_cfg.product, &task_cfg.variant) else {
        log::warn!("buildcfg: product task '{name}' needs 'product' and 'variant'");
        return None;
    };
    let mut task = Task::product(
        name,
        task_cfg.desc.as_deref().unwrap_or(""),
        product,
        variant,
    );
    if let Some(defargs) = &task_cfg.defargs {
        let defargs: Vec<&str> = defargs.split_whitespace().collect();
        task = task.defargs(&defargs);
    }
    if task_cfg.secondary_help {
        task = task.secondary();
    }
    Some(install_command_hooks(task, task_cfg))
}

fn install_command_hooks(mut task: Task, task_cfg: &TaskConfig) -> Task {
    if let Some(command) = &task_cfg.pre {
        task.pre_hook = Some(crate::core::task::Hook::new(command_hook(command)));
    }
    if let Some(command) = &task_cfg.exec {
        task.exec_hook = Some(crate::core::task::Hook::new(command_hook(command)));
    }
    if let Some(command) = &task_cfg.post {
        task.post_hook = Some(crate::core::task::Hook::new(command_hook(command)));
    }
    task
}

fn overrides_from(task_cfg: &TaskConfig) -> TaskOverride {
    TaskOverride {
        desc: task_cfg.desc.clone(),
        pre_hook: task_cfg.pre.as_deref().map(command_hook),
        exec_hook: task_cfg.exec.as_deref().map(command_hook),
        post_hook: task_cfg.post.as_deref().map(command_hook),
    }
}

/// A hook that runs a configured command line in the workspace, with the
/// task's scratch environment. It does not call its base hook: a command
/// string has no way to decide when the previous behavior should run, so
/// layering a command hook shadows the default (which stays reachable from
/// code through the base-hook accessors).
fn command_hook(command: &str) -> HookFn {
    let command = command.to_string();
    Arc::new(move |_task, inv| {
        executor::exec_cmd(
            &command,
            Some(&inv.ctx.workspace_dir),
            &inv.extra_env,
            inv.ctx.opts.dry_run,
            None,
        )
    })
}

fn batch_command_hook(command: &str) -> BatchHookFn {
    let command = command.to_string();
    Arc::new(move |ctx, requests| {
        let mut env = BTreeMap::new();
        env.insert(
            "DRAGON_FORALL_TASKS".to_string(),
            requests
                .iter()
                .map(|request| request.name.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
        env.insert(
            "DRAGON_FORALL_TASK_ARGS".to_string(),
            requests
                .iter()
                .map(|request| request.args.join(" "))
                .collect::<Vec<_>>()
                .join(";"),
        );
        executor::exec_cmd(
            command.as_str(),
            Some(&ctx.workspace_dir),
            &env,
            ctx.opts.dry_run,
            None,
        )
    })
}

/// Splits a stored argument string the way the shell would.
fn split_args(args: &str) -> Vec<String> {
    shlex::split(args).unwrap_or_else(|| args.split_whitespace().map(str::to_string).collect())
}
