// src/core/task.rs

use crate::{
    constants::ALCHEMY_ENTRYPOINT,
    core::{context::BuildContext, registry::TaskRegistry},
    system::{executor, restart},
};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The single failure taxonomy of the task engine. Everything a task can
/// raise is one of these; there is no retry policy anywhere.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Unknown task: '{0}'")]
    UnknownTask(String),
    #[error("Command failed (returncode={0})")]
    CommandFailed(i32),
    #[error("Command '{command}' could not be executed: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Command interrupted")]
    Interrupted,
    #[error("{0}")]
    Failed(String),
    /// A failure already logged at the task that raised it, unwinding to a
    /// non-zero process exit. Outer frames pass it through without re-logging.
    #[error("stopping after task failure")]
    Halted,
}

/// Signature shared by all task hooks. The hook receives the task it is
/// attached to and the current invocation (arguments + scratch environment).
pub type HookFn = Arc<dyn Fn(&Task, &mut Invocation<'_>) -> Result<(), TaskError> + Send + Sync>;

/// A hook slot: the installed callable plus, when the hook was layered over a
/// previous registration of the same role, that previous hook.
///
/// Calling a hook never implicitly calls its base. The wrapping callable
/// decides whether and when to invoke it, through `Task::call_base_*_hook`.
pub struct Hook {
    func: HookFn,
    base: Option<Box<Hook>>,
}

impl Hook {
    pub fn new(func: HookFn) -> Self {
        Self { func, base: None }
    }

    /// Wraps `func` over a previously installed hook of the same role.
    pub fn chained(func: HookFn, base: Option<Self>) -> Self {
        Self {
            func,
            base: base.map(Box::new),
        }
    }

    pub fn call(&self, task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        (self.func)(task, inv)
    }

    /// Calls the wrapped base hook, if any. A no-op without one.
    pub fn call_base(&self, task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        match &self.base {
            Some(base) => base.call(task, inv),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("chained", &self.base.is_some())
            .finish()
    }
}

/// Execution state of one task invocation.
///
/// The scratch environment is reset to the caller-supplied overlay at the
/// start of every execution and owned exclusively by that execution: values
/// never leak between runs or to sibling tasks. `BTreeMap` keeps the keys
/// sorted for deterministic `KEY="value"` command prefixes.
pub struct Invocation<'a> {
    pub ctx: &'a BuildContext,
    pub registry: &'a TaskRegistry,
    pub args: Vec<String>,
    pub extra_env: BTreeMap<String, String>,
}

/// Variant-specific payload of a task.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Shells out to the Alchemy build tool with a composed environment.
    Alchemy {
        product: String,
        variant: String,
        defargs: Option<Vec<String>>,
        out_subdir: Option<String>,
    },
    /// Pure composition of other registered tasks. May be empty, in which
    /// case the task exists only to host hooks.
    Meta { subtasks: Vec<String> },
    /// Re-invokes the whole program against another product/variant.
    Product {
        product: String,
        variant: String,
        defargs: Option<Vec<String>>,
    },
}

/// A named, independently invocable unit of build work: a shared header
/// (name, description, hook slots, flags) plus a `TaskKind` payload.
pub struct Task {
    pub name: String,
    pub desc: String,
    /// Excluded from the default task listing.
    pub secondary_help: bool,
    /// A later registration of the same name may silently replace this task.
    pub weak: bool,
    pub pre_hook: Option<Hook>,
    pub exec_hook: Option<Hook>,
    pub post_hook: Option<Hook>,
    pub kind: TaskKind,
}

impl Task {
    pub fn alchemy(name: &str, desc: &str, product: &str, variant: &str) -> Self {
        Self::with_kind(
            name,
            desc,
            TaskKind::Alchemy {
                product: product.to_string(),
                variant: variant.to_string(),
                defargs: None,
                out_subdir: None,
            },
        )
    }

    pub fn meta(name: &str, desc: &str, subtasks: &[&str]) -> Self {
        Self::with_kind(
            name,
            desc,
            TaskKind::Meta {
                subtasks: subtasks.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn product(name: &str, desc: &str, product: &str, variant: &str) -> Self {
        Self::with_kind(
            name,
            desc,
            TaskKind::Product {
                product: product.to_string(),
                variant: variant.to_string(),
                defargs: None,
            },
        )
    }

    fn with_kind(name: &str, desc: &str, kind: TaskKind) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            secondary_help: false,
            weak: false,
            pre_hook: None,
            exec_hook: None,
            post_hook: None,
            kind,
        }
    }

    // --- Builder-style registration helpers ---

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    pub fn secondary(mut self) -> Self {
        self.secondary_help = true;
        self
    }

    pub fn defargs(mut self, args: &[&str]) -> Self {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        match &mut self.kind {
            TaskKind::Alchemy { defargs, .. } | TaskKind::Product { defargs, .. } => {
                *defargs = Some(args);
            }
            TaskKind::Meta { .. } => {
                log::warn!("defargs: meta task '{}' takes per-subtask arguments", self.name);
            }
        }
        self
    }

    pub fn out_subdir(mut self, subdir: &str) -> Self {
        if let TaskKind::Alchemy { out_subdir, .. } = &mut self.kind {
            *out_subdir = Some(subdir.to_string());
        }
        self
    }

    pub fn pre<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Self, &mut Invocation<'_>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        self.pre_hook = Some(Hook::new(Arc::new(hook)));
        self
    }

    pub fn exec<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Self, &mut Invocation<'_>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        self.exec_hook = Some(Hook::new(Arc::new(hook)));
        self
    }

    pub fn post<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Self, &mut Invocation<'_>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        self.post_hook = Some(Hook::new(Arc::new(hook)));
        self
    }

    // --- Base hook access for wrapping callables ---

    pub fn call_base_pre_hook(&self, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        match &self.pre_hook {
            Some(hook) => hook.call_base(self, inv),
            None => Ok(()),
        }
    }

    pub fn call_base_exec_hook(&self, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        match &self.exec_hook {
            Some(hook) => hook.call_base(self, inv),
            None => Ok(()),
        }
    }

    pub fn call_base_post_hook(&self, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        match &self.post_hook {
            Some(hook) => hook.call_base(self, inv),
            None => Ok(()),
        }
    }

    // --- Execution ---

    /// Runs the task: pre-hook, then exec-hook (or the kind's own body),
    /// then post-hook, strictly in that order, over a fresh scratch
    /// environment initialized from `extra_env`.
    ///
    /// A failure from any of those is logged here, at the invocation point,
    /// and then either swallowed (keep-going) or escalated to
    /// [`TaskError::Halted`], which unwinds to a non-zero process exit
    /// without being logged again.
    pub fn execute(
        &self,
        registry: &TaskRegistry,
        ctx: &BuildContext,
        args: &[String],
        extra_env: BTreeMap<String, String>,
    ) -> Result<(), TaskError> {
        let mut inv = Invocation {
            ctx,
            registry,
            args: args.to_vec(),
            extra_env,
        };

        if inv.args.is_empty() {
            log::info!("Starting task '{}'", self.name);
        } else {
            log::info!("Starting task '{}' with args: {}", self.name, inv.args.join(" "));
        }

        match self.run_hooks_and_body(&mut inv) {
            Ok(()) => {
                log::info!("Finished task '{}'", self.name);
                Ok(())
            }
            Err(TaskError::Halted) => Err(TaskError::Halted),
            Err(TaskError::Interrupted) => Err(TaskError::Interrupted),
            Err(err) => {
                log::error!("Task '{}' failed ({})", self.name, err);
                if ctx.opts.keep_going {
                    Ok(())
                } else {
                    Err(TaskError::Halted)
                }
            }
        }
    }

    fn run_hooks_and_body(&self, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        if let Some(hook) = &self.pre_hook {
            hook.call(self, inv)?;
        }
        if let Some(hook) = &self.exec_hook {
            hook.call(self, inv)?;
        } else {
            self.run_body(inv)?;
        }
        if let Some(hook) = &self.post_hook {
            hook.call(self, inv)?;
        }
        Ok(())
    }

    fn run_body(&self, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
        match &self.kind {
            TaskKind::Alchemy {
                product,
                variant,
                defargs,
                out_subdir,
            } => run_alchemy(inv, product, variant, defargs.as_deref(), out_subdir.as_deref()),
            TaskKind::Meta { subtasks } => run_meta(inv, subtasks),
            TaskKind::Product {
                product,
                variant,
                defargs,
            } => run_product(inv, product, variant, defargs.as_deref()),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("weak", &self.weak)
            .field("kind", &self.kind)
            .finish()
    }
}

// --- Alchemy task body ---

/// Paths derived from the output directory of an Alchemy task.
///
/// Computed at execution time, not registration time: the global output
/// directory is not final until the context has been fully constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlchemyPaths {
    pub fullname: String,
    pub out_dir: PathBuf,
    pub plf_path: PathBuf,
    pub build_prop_path: PathBuf,
    pub sdk_path: PathBuf,
    pub symbols_path: PathBuf,
}

impl AlchemyPaths {
    pub fn compute(
        ctx: &BuildContext,
        product: &str,
        variant: &str,
        out_subdir: Option<&str>,
    ) -> Self {
        let fullname = format!("{product}-{variant}");
        let out_dir = match out_subdir {
            Some(subdir) => ctx.out_dir.join(subdir),
            None => ctx.out_dir.clone(),
        };
        Self {
            plf_path: out_dir.join(format!("{fullname}.plf")),
            build_prop_path: out_dir.join("staging/etc/build.prop"),
            sdk_path: out_dir.join(format!("sdk-{fullname}.tar.gz")),
            symbols_path: out_dir.join(format!("symbols-{fullname}.tar")),
            fullname,
            out_dir,
        }
    }
}

fn run_alchemy(
    inv: &mut Invocation<'_>,
    product: &str,
    variant: &str,
    defargs: Option<&[String]>,
    out_subdir: Option<&str>,
) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    let paths = AlchemyPaths::compute(ctx, product, variant, out_subdir);
    setup_alchemy_env(inv, product, variant, &paths.out_dir);

    let mut cmd_args = vec![format!("-j{}", ctx.opts.jobs)];
    if ctx.opts.verbose {
        cmd_args.push("V=1".to_string());
    }

    // Task defaults apply when the caller gave nothing, or before the
    // caller's arguments when the append policy is active. Never both
    // otherwise.
    if let Some(defargs) = defargs {
        if inv.args.is_empty() || ctx.opts.append_args {
            cmd_args.extend(defargs.iter().cloned());
        }
    }
    cmd_args.extend(inv.args.iter().cloned());

    executor::exec_cmd(
        &format!(
            "{} {}",
            ctx.alchemy_home.join(ALCHEMY_ENTRYPOINT).display(),
            cmd_args.join(" ")
        ),
        Some(&ctx.workspace_dir),
        &inv.extra_env,
        ctx.opts.dry_run,
        None,
    )
}

fn setup_alchemy_env(inv: &mut Invocation<'_>, product: &str, variant: &str, out_dir: &Path) {
    let ctx = inv.ctx;
    let overlay = &mut inv.extra_env;

    for (name, value) in ctx.build_props.iter_set() {
        overlay.insert(name.to_string(), value.to_string());
    }

    overlay.insert("LANG".to_string(), "C".to_string());
    overlay.insert(
        "ALCHEMY_WORKSPACE_DIR".to_string(),
        ctx.workspace_dir.display().to_string(),
    );
    overlay.insert("ALCHEMY_TARGET_PRODUCT".to_string(), product.to_string());
    overlay.insert("ALCHEMY_TARGET_PRODUCT_VARIANT".to_string(), variant.to_string());
    overlay.insert("ALCHEMY_TARGET_OUT".to_string(), out_dir.display().to_string());
    overlay.insert(
        "ALCHEMY_TARGET_CONFIG_DIR".to_string(),
        ctx.workspace_dir
            .join(crate::constants::PRODUCTS_DIR)
            .join(product)
            .join(variant)
            .join("config")
            .display()
            .to_string(),
    );

    // Only scan the packages subdirectory; prune the workspace root itself.
    overlay.insert(
        "ALCHEMY_TARGET_SCAN_PRUNE_DIRS".to_string(),
        format!(
            "{} {}",
            env::var("ALCHEMY_TARGET_SCAN_PRUNE_DIRS").unwrap_or_default(),
            ctx.workspace_dir.display()
        ),
    );
    overlay.insert(
        "ALCHEMY_TARGET_SCAN_ADD_DIRS".to_string(),
        format!(
            "{} {}",
            env::var("ALCHEMY_TARGET_SCAN_ADD_DIRS").unwrap_or_default(),
            ctx.workspace_dir.join("packages").display()
        ),
    );

    // Use colors unless already decided by the environment (CI for example).
    if env::var("ALCHEMY_USE_COLORS").map(|v| v.is_empty()).unwrap_or(true) {
        overlay.insert(
            "ALCHEMY_USE_COLORS".to_string(),
            if ctx.opts.colors { "1" } else { "0" }.to_string(),
        );
    }
}

// --- Meta task body ---

fn run_meta(inv: &mut Invocation<'_>, subtasks: &[String]) -> Result<(), TaskError> {
    // Subtask list can be empty in case user was only interested in hooks.
    for spec in subtasks {
        let mut parts = spec.split_whitespace();
        let Some(subtask_name) = parts.next() else {
            continue;
        };
        let defargs: Vec<String> = parts.map(str::to_string).collect();

        let mut cmd_args = Vec::new();
        if !defargs.is_empty() && (inv.args.is_empty() || inv.ctx.opts.append_args) {
            cmd_args.extend(defargs);
        }
        cmd_args.extend(inv.args.iter().cloned());

        inv.registry
            .execute(subtask_name, &cmd_args, inv.extra_env.clone(), inv.ctx)?;
    }
    Ok(())
}

// --- Product task body ---

/// Turns positional task arguments into `-t <name>` selectors for a
/// re-invocation; arguments already starting with `-t` pass through.
fn extend_task_args(cmd_args: &mut Vec<String>, args: &[String]) {
    for arg in args {
        if arg.starts_with("-t") {
            cmd_args.push(arg.clone());
        } else {
            cmd_args.push(format!("-t {arg}"));
        }
    }
}

fn run_product(
    inv: &mut Invocation<'_>,
    product: &str,
    variant: &str,
    defargs: Option<&[String]>,
) -> Result<(), TaskError> {
    let mut cmd_args = Vec::new();

    if let Some(defargs) = defargs {
        if inv.args.is_empty() || inv.ctx.opts.append_args {
            extend_task_args(&mut cmd_args, defargs);
        }
    }
    extend_task_args(&mut cmd_args, &inv.args);

    // Deliberate process boundary: the other product/variant builds from a
    // clean, independently constructed context.
    restart::restart(&inv.ctx.opts, product, variant, &cmd_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::RunOptions;

    fn context() -> BuildContext {
        BuildContext::new(
            PathBuf::from("/ws"),
            "anafi",
            "classic",
            None,
            None,
            RunOptions {
                jobs: 4,
                colors: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn alchemy_paths_derive_from_out_dir() {
        let ctx = context();
        let paths = AlchemyPaths::compute(&ctx, "anafi", "classic", None);
        assert_eq!(paths.fullname, "anafi-classic");
        assert_eq!(paths.out_dir, ctx.out_dir);
        assert_eq!(paths.plf_path, ctx.out_dir.join("anafi-classic.plf"));
        assert_eq!(paths.build_prop_path, ctx.out_dir.join("staging/etc/build.prop"));
        assert_eq!(paths.sdk_path, ctx.out_dir.join("sdk-anafi-classic.tar.gz"));
        assert_eq!(paths.symbols_path, ctx.out_dir.join("symbols-anafi-classic.tar"));
    }

    #[test]
    fn alchemy_paths_honor_out_subdir() {
        let ctx = context();
        let paths = AlchemyPaths::compute(&ctx, "anafi", "classic", Some("pc"));
        assert_eq!(paths.out_dir, ctx.out_dir.join("pc"));
        assert_eq!(paths.plf_path, ctx.out_dir.join("pc/anafi-classic.plf"));
    }

    #[test]
    fn task_args_gain_selector_prefix() {
        let mut cmd_args = Vec::new();
        let args = vec!["build".to_string(), "-t images".to_string(), "clean".to_string()];
        extend_task_args(&mut cmd_args, &args);
        assert_eq!(cmd_args, vec!["-t build", "-t images", "-t clean"]);
    }

    #[test]
    fn base_hook_is_only_called_explicitly() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let base_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&base_calls);
        let base: HookFn = Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let wrapper: HookFn = Arc::new(|task, inv| {
            // The wrapper decides when the base runs.
            task.call_base_pre_hook(inv)?;
            task.call_base_pre_hook(inv)
        });

        let mut task = Task::meta("t", "test", &[]);
        task.pre_hook = Some(Hook::chained(wrapper, Some(Hook::new(base))));

        let ctx = context();
        let registry = TaskRegistry::new();
        let mut inv = Invocation {
            ctx: &ctx,
            registry: &registry,
            args: Vec::new(),
            extra_env: BTreeMap::new(),
        };

        let hook = task.pre_hook.as_ref().unwrap();
        hook.call(&task, &mut inv).unwrap();
        assert_eq!(base_calls.load(Ordering::SeqCst), 2);
    }
}
