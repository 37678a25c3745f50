// src/core/forall.rs

use crate::core::{context::BuildContext, task::TaskError};
use crate::models::TaskRequest;
use rayon::prelude::*;
use std::sync::Arc;

/// A batch hook bracketing a whole variant fan-out. It receives every task
/// requested for the batch, with its arguments, and runs exactly once.
pub type BatchHookFn =
    Arc<dyn Fn(&BuildContext, &[TaskRequest]) -> Result<(), TaskError> + Send + Sync>;

/// Optional pre/post hooks around a `forall` batch.
#[derive(Clone, Default)]
pub struct BatchHooks {
    pub pre: Option<BatchHookFn>,
    pub post: Option<BatchHookFn>,
}

/// Runs a request once per variant of the product.
///
/// The pre-batch hook runs exactly once before any variant starts and the
/// post-batch hook exactly once after all variants finished, in both
/// sequential and parallel mode. Each variant is an independent process
/// re-invocation (`run_variant`), writing to its own output directory, so
/// workers share nothing but the filesystem. Parallel mode uses one worker
/// per variant.
pub fn run_forall<R>(
    ctx: &BuildContext,
    variants: &[String],
    requests: &[TaskRequest],
    hooks: &BatchHooks,
    run_variant: R,
) -> Result<(), TaskError>
where
    R: Fn(&str) -> Result<(), TaskError> + Sync,
{
    if let Some(pre) = &hooks.pre {
        run_batch_hook(ctx, pre, requests, "pre")?;
    }

    if ctx.opts.parallel_variants && variants.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(variants.len())
            .build()
            .map_err(|err| TaskError::Failed(format!("variant worker pool: {err}")))?;

        let failures: Vec<(String, TaskError)> = pool.install(|| {
            variants
                .par_iter()
                .filter_map(|variant| {
                    run_variant(variant)
                        .err()
                        .map(|err| (variant.clone(), err))
                })
                .collect()
        });

        let mut failed = false;
        for (variant, err) in failures {
            failed = true;
            if !matches!(err, TaskError::Halted) {
                log::error!("Variant '{variant}' failed: {err}");
            }
        }
        if failed && !ctx.opts.keep_going {
            return Err(TaskError::Halted);
        }
    } else {
        for variant in variants {
            match run_variant(variant) {
                Ok(()) => {}
                Err(TaskError::Interrupted) => return Err(TaskError::Interrupted),
                Err(TaskError::Halted) => {
                    if !ctx.opts.keep_going {
                        return Err(TaskError::Halted);
                    }
                }
                Err(err) => {
                    log::error!("Variant '{variant}' failed: {err}");
                    if !ctx.opts.keep_going {
                        return Err(TaskError::Halted);
                    }
                }
            }
        }
    }

    if let Some(post) = &hooks.post {
        run_batch_hook(ctx, post, requests, "post")?;
    }
    Ok(())
}

fn run_batch_hook(
    ctx: &BuildContext,
    hook: &BatchHookFn,
    requests: &[TaskRequest],
    role: &str,
) -> Result<(), TaskError> {
    if let Err(err) = hook(ctx, requests) {
        log::error!("Forall {role}-batch hook failed ({err})");
        if !ctx.opts.keep_going {
            return Err(TaskError::Halted);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::RunOptions;
    use std::path::PathBuf;
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn context(parallel: bool, keep_going: bool) -> BuildContext {
        BuildContext::new(
            PathBuf::from("/ws"),
            "anafi",
            "forall",
            None,
            None,
            RunOptions {
                jobs: 1,
                colors: true,
                parallel_variants: parallel,
                keep_going,
                ..Default::default()
            },
        )
    }

    fn tracing_hooks(trace: &Trace) -> BatchHooks {
        let pre_trace = Arc::clone(trace);
        let post_trace = Arc::clone(trace);
        BatchHooks {
            pre: Some(Arc::new(move |_, _| {
                pre_trace.lock().unwrap().push("pre".to_string());
                Ok(())
            })),
            post: Some(Arc::new(move |_, _| {
                post_trace.lock().unwrap().push("post".to_string());
                Ok(())
            })),
        }
    }

    fn variants() -> Vec<String> {
        vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]
    }

    #[test]
    fn hooks_bracket_the_batch_in_sequential_mode() {
        let ctx = context(false, false);
        let trace: Trace = Trace::default();
        let hooks = tracing_hooks(&trace);
        let runner_trace = Arc::clone(&trace);

        run_forall(&ctx, &variants(), &[], &hooks, |variant| {
            runner_trace.lock().unwrap().push(variant.to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(
            trace.lock().unwrap().as_slice(),
            &["pre", "v1", "v2", "v3", "post"]
        );
    }

    #[test]
    fn hooks_run_exactly_once_in_parallel_mode() {
        let ctx = context(true, false);
        let trace: Trace = Trace::default();
        let hooks = tracing_hooks(&trace);
        let runner_trace = Arc::clone(&trace);

        run_forall(&ctx, &variants(), &[], &hooks, |variant| {
            runner_trace.lock().unwrap().push(variant.to_string());
            Ok(())
        })
        .unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(trace.len(), 5);
        assert_eq!(trace.first().map(String::as_str), Some("pre"));
        assert_eq!(trace.last().map(String::as_str), Some("post"));
        let mut middle: Vec<&str> = trace[1..4].iter().map(String::as_str).collect();
        middle.sort_unstable();
        assert_eq!(middle, ["v1", "v2", "v3"]);
    }

    #[test]
    fn failing_variant_halts_the_sequence_by_default() {
        let ctx = context(false, false);
        let trace: Trace = Trace::default();
        let runner_trace = Arc::clone(&trace);

        let result = run_forall(&ctx, &variants(), &[], &BatchHooks::default(), |variant| {
            runner_trace.lock().unwrap().push(variant.to_string());
            if variant == "v2" {
                Err(TaskError::CommandFailed(1))
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(TaskError::Halted)));
        assert_eq!(trace.lock().unwrap().as_slice(), &["v1", "v2"]);
    }

    #[test]
    fn keep_going_runs_every_variant_despite_failures() {
        let ctx = context(false, true);
        let trace: Trace = Trace::default();
        let hooks = tracing_hooks(&trace);
        let runner_trace = Arc::clone(&trace);

        run_forall(&ctx, &variants(), &[], &hooks, |variant| {
            runner_trace.lock().unwrap().push(variant.to_string());
            Err(TaskError::CommandFailed(1))
        })
        .unwrap();

        assert_eq!(
            trace.lock().unwrap().as_slice(),
            &["pre", "v1", "v2", "v3", "post"]
        );
    }

    #[test]
    fn failing_pre_hook_aborts_before_any_variant() {
        let ctx = context(false, false);
        let trace: Trace = Trace::default();
        let runner_trace = Arc::clone(&trace);
        let hooks = BatchHooks {
            pre: Some(Arc::new(|_, _| Err(TaskError::Failed("denied".to_string())))),
            post: None,
        };

        let result = run_forall(&ctx, &variants(), &[], &hooks, |variant| {
            runner_trace.lock().unwrap().push(variant.to_string());
            Ok(())
        });

        assert!(matches!(result, Err(TaskError::Halted)));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn batch_hooks_receive_the_requested_tasks() {
        let ctx = context(false, false);
        let seen: Trace = Trace::default();
        let seen_by_hook = Arc::clone(&seen);
        let hooks = BatchHooks {
            pre: Some(Arc::new(move |_, requests| {
                for request in requests {
                    seen_by_hook
                        .lock()
                        .unwrap()
                        .push(format!("{} [{}]", request.name, request.args.join(" ")));
                }
                Ok(())
            })),
            post: None,
        };
        let mut request = TaskRequest::new("build");
        request.args.push("all".to_string());

        run_forall(&ctx, &variants(), &[request], &hooks, |_| Ok(())).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &["build [all]"]);
    }
}
