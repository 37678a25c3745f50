// src/cli/mod.rs

use crate::{
    constants::{ENV_WORKSPACE_DIR, FORALL, PRODUCTS_DIR},
    core::{
        config_loader, context::BuildContext, forall, products, registry::TaskRegistry,
        task::TaskError,
    },
    models::TaskRequest,
    system::restart,
    tasks,
};
use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub mod args;

use args::Options;

pub const USAGE: &str = "\
Usage:
  dragon -h|--help
    -> Display this help message.
  dragon -l
    -> Display the list of available products/variants.
  dragon [-p <product>[-<variant>]] -t
    -> Display the list of available tasks. Use -tt to also show secondary tasks.
  dragon [-p <product>[-<variant>]] [<options>] -A [<args>...]
    -> Start alchemy build with given arguments.
  dragon [-p <product>[-<variant>]] [<options>] -t <task> [<taskargs>...]...
    -> Start a task and its sub tasks with given arguments.

 Multiple occurences of -A and -t <task> can be present in the same command line.

  <product> : Product to use. Can be omitted if only one available.
  <variant> : Variant of product. Can be omitted if only one available.
  <task>    : Name of the task to execute.
              sub tasks will also be executed.
  <args>    : Arguments to give to alchemy build system.
  <taskargs>: Extra arguments to give to a task and its sub tasks.
              They will overwrite arguments given in task registration
              unless -a is given.
  -j[<jobs>]: Number of concurrent jobs during build. Default is 1.
              If no value is provided, the maximum possible is used.
              It also accepts the special form /X where X shall be an even
              number, allowing using max/X.
  -v|v=1|V=1: Enable verbose mode.
  -n        : Dry run, don't execute commands, just print them.
  -a        : Append arguments of command line with default arguments
              given in task registration. Without this, command line
              arguments overwrite them.
  -b        : Specify a build id. Default is derived from the product
              next-version file if any.
  -k        : Keep going, don't stop if a task fails.
  --no-color: inhibits use of colors. (suited for CI logs)
  --parallel-variants: Build variants in parallel when variant is forall.
";

/// The whole surface is one raw argument stream; the actual grammar
/// (`-t <task> [args...]` groups, `v=1`, `-j/N`) is parsed by `cli::args`.
/// Clap's automatic help flag is disabled so `-h` after a task selection can
/// be forwarded to that task.
#[derive(Parser, Debug)]
#[command(author, disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Workspace root: environment override, or the current directory.
pub fn workspace_dir() -> PathBuf {
    env::var_os(ENV_WORKSPACE_DIR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Runs the program once options are parsed; returns the process exit code.
pub fn run(mut options: Options) -> Result<i32> {
    // Print help now if requested and no task given, otherwise help is
    // forwarded to the task.
    if options.help_asked && options.tasks.is_empty() {
        eprint!("{USAGE}");
        return Ok(0);
    }

    let workspace_dir = workspace_dir();

    if options.list_products {
        list_products(&workspace_dir);
        return Ok(0);
    }

    if !resolve_selection(&mut options, &workspace_dir) {
        return Ok(1);
    }
    let product = options.product.clone().unwrap_or_default();
    let variant = options.variant.clone().unwrap_or_default();

    let product_dir = (product != FORALL)
        .then(|| workspace_dir.join(PRODUCTS_DIR).join(&product));
    let variant_dir = (variant != FORALL)
        .then(|| product_dir.as_ref().map(|dir| dir.join(&variant)))
        .flatten();

    let ctx = BuildContext::new(
        workspace_dir.clone(),
        &product,
        &variant,
        product_dir,
        variant_dir,
        options.run_options(),
    );

    // Default tasks first, then the optional product configuration on top.
    let mut registry = TaskRegistry::new();
    tasks::register_defaults(&mut registry, &ctx);
    let product_cfg = match config_loader::find_config(&ctx) {
        Some(path) => Some(config_loader::load(&path)?),
        None => None,
    };
    if let Some(cfg) = &product_cfg {
        config_loader::apply(cfg, &mut registry);
    }
    registry.validate();

    if options.generate_completion {
        generate_completion(&ctx, &registry)?;
        return Ok(0);
    }

    if options.list_tasks {
        list_tasks(&ctx, &registry, options.list_secondary_tasks);
        return Ok(0);
    }

    if options.tasks.is_empty() {
        log::error!(
            "No task given ! Please use -t option to have a list of available tasks for your product."
        );
        return Ok(1);
    }

    if product == FORALL {
        return run_all_products(&ctx, &workspace_dir, &options.tasks);
    }
    if variant == FORALL {
        return run_all_variants(&ctx, &workspace_dir, &product, &options.tasks, product_cfg.as_ref());
    }
    run_tasks(&ctx, &registry, &options.tasks)
}

/// Fills in the default product/variant and validates the selection.
/// Returns `false` (after logging) when nothing sensible can be picked.
fn resolve_selection(options: &mut Options, workspace_dir: &Path) -> bool {
    check_product(options, workspace_dir) && check_variant(options, workspace_dir)
}

fn check_product(options: &mut Options, workspace_dir: &Path) -> bool {
    if options.product.is_none() {
        options.product = products::get_default_product(workspace_dir);
    }
    let Some(product) = options.product.clone() else {
        log::error!(
            "Missing product: {}",
            products::get_products(workspace_dir).join(" ")
        );
        return false;
    };
    if product == FORALL {
        return true;
    }

    let known = products::get_products(workspace_dir);
    if known.contains(&product) {
        return true;
    }

    // Could it be a variant of the default product?
    if options.variant.is_none() {
        if let Some(default) = products::get_default_product(workspace_dir) {
            if products::get_variants(workspace_dir, &default).contains(&product) {
                options.variant = Some(product);
                options.product = Some(default);
                return true;
            }
        }
    }

    log::error!("'{product}' is not a valid product");
    false
}

fn check_variant(options: &mut Options, workspace_dir: &Path) -> bool {
    let product = options.product.clone().unwrap_or_default();
    if options.variant.is_none() {
        options.variant = products::get_default_variant(workspace_dir, &product);
    }
    let Some(variant) = options.variant.clone() else {
        log::error!(
            "Missing variant: {}",
            products::get_variants(workspace_dir, &product).join(" ")
        );
        return false;
    };
    if variant == FORALL {
        return true;
    }
    if products::get_variants(workspace_dir, &product).contains(&variant) {
        return true;
    }
    log::error!("'{variant}' is not a valid variant");
    false
}

// --- Dispatch ---

fn run_tasks(ctx: &BuildContext, registry: &TaskRegistry, requests: &[TaskRequest]) -> Result<i32> {
    for request in requests {
        match registry.execute(&request.name, &request.args, BTreeMap::new(), ctx) {
            Ok(()) => {}
            Err(TaskError::Halted) => return Ok(1),
            Err(TaskError::Interrupted) => return Ok(130),
            Err(err) => {
                log::error!("{err}");
                if !ctx.opts.keep_going {
                    return Ok(1);
                }
            }
        }
    }
    Ok(0)
}

fn run_all_products(
    ctx: &BuildContext,
    workspace_dir: &Path,
    requests: &[TaskRequest],
) -> Result<i32> {
    let args = requests_to_args(requests);
    for product in products::get_products(workspace_dir) {
        match restart::restart(&ctx.opts, &product, FORALL, &args) {
            Ok(()) => {}
            Err(TaskError::Interrupted) => return Ok(130),
            Err(err) => {
                log::error!("{err}");
                if !ctx.opts.keep_going {
                    return Ok(1);
                }
            }
        }
    }
    Ok(0)
}

fn run_all_variants(
    ctx: &BuildContext,
    workspace_dir: &Path,
    product: &str,
    requests: &[TaskRequest],
    product_cfg: Option<&crate::models::ProductBuildConfig>,
) -> Result<i32> {
    let variants = products::get_variants(workspace_dir, product);
    let hooks = config_loader::batch_hooks(product_cfg);
    let args = requests_to_args(requests);

    let result = forall::run_forall(ctx, &variants, requests, &hooks, |variant| {
        restart::restart(&ctx.opts, product, variant, &args)
    });
    match result {
        Ok(()) => Ok(0),
        Err(TaskError::Interrupted) => Ok(130),
        Err(_) => Ok(1),
    }
}

/// Re-encodes task requests as restart arguments: one `-t <name>` selector
/// per task, followed by that task's own arguments.
fn requests_to_args(requests: &[TaskRequest]) -> Vec<String> {
    let mut args = Vec::new();
    for request in requests {
        args.push(format!("-t {}", request.name));
        args.extend(request.args.iter().cloned());
    }
    args
}

// --- Listings ---

fn list_products(workspace_dir: &Path) {
    for product in products::get_products(workspace_dir) {
        eprint!("{product}:");
        let default = products::get_default_variant(workspace_dir, &product);
        for variant in products::get_variants(workspace_dir, &product) {
            eprint!(" {variant}");
            if default.as_deref() == Some(variant.as_str()) {
                eprint!("*");
            }
        }
        eprintln!();
    }
    eprintln!("Default variant for each product is indicated with *");
}

fn list_tasks(ctx: &BuildContext, registry: &TaskRegistry, include_secondary: bool) {
    let (listed, has_secondary) = registry.listed_tasks(include_secondary);
    eprintln!(
        "Available tasks for {}-{} ({}):",
        ctx.product,
        ctx.variant,
        listed.len()
    );
    for task in listed {
        eprintln!("  {} : {}", task.name, task.desc.blue());
    }
    if has_secondary {
        eprintln!(
            "\nPlease use 'dragon -p {}-{} -tt' to list all available tasks.",
            ctx.product, ctx.variant
        );
    }
}

/// Writes a bash completion file for the product, listing non-hidden tasks.
fn generate_completion(ctx: &BuildContext, registry: &TaskRegistry) -> Result<()> {
    let Some(product_dir) = &ctx.product_dir else {
        log::warn!("gen-completion: no product directory for '{}'", ctx.product);
        return Ok(());
    };
    let path = product_dir.join(format!("{}_completion.bash", ctx.product));
    let names = registry.completion_names().join(" ");
    let contents = format!(
        "#!/bin/bash\n\n\
         # This file is automatically generated by dragon --gen-completion.\n\
         _{product}_completion () {{\n\
         \x20   local cur opts;\n\
         \x20   cur=\"${{COMP_WORDS[COMP_CWORD]}}\"\n\
         \x20   # Automatically generated list.\n\
         \x20   opts=\"{names}\"\n\
         \x20   COMPREPLY=( $(compgen -W \"${{opts}}\" -- ${{cur}}) )\n\
         \x20   return 0;\n\
         }}\n\n\
         # Note that no two completions for dragon can coexist.\n\
         complete -F _{product}_completion dragon\n\
         #END\n",
        product = ctx.product,
    );
    fs::write(&path, contents).with_context(|| format!("writing '{}'", path.display()))?;
    log::info!("Completion written to '{}'", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_become_selector_arguments() {
        let mut build = TaskRequest::new("build");
        build.args.push("all".to_string());
        let images = TaskRequest::new("images");
        assert_eq!(
            requests_to_args(&[build, images]),
            ["-t build", "all", "-t images"]
        );
    }

    #[test]
    fn selection_falls_back_to_defaults() {
        let ws = tempfile::tempdir().unwrap();
        fs::create_dir_all(ws.path().join("products/anafi/classic")).unwrap();

        let mut options = Options::default();
        assert!(resolve_selection(&mut options, ws.path()));
        assert_eq!(options.product.as_deref(), Some("anafi"));
        assert_eq!(options.variant.as_deref(), Some("classic"));
    }

    #[test]
    fn bare_variant_resolves_against_the_default_product() {
        let ws = tempfile::tempdir().unwrap();
        fs::create_dir_all(ws.path().join("products/anafi/classic")).unwrap();
        fs::create_dir_all(ws.path().join("products/anafi/hx")).unwrap();

        // `-p hx` with a single product means "variant hx of that product".
        let mut options = Options {
            product: Some("hx".to_string()),
            ..Default::default()
        };
        assert!(resolve_selection(&mut options, ws.path()));
        assert_eq!(options.product.as_deref(), Some("anafi"));
        assert_eq!(options.variant.as_deref(), Some("hx"));
    }

    #[test]
    fn invalid_selection_is_rejected() {
        let ws = tempfile::tempdir().unwrap();
        fs::create_dir_all(ws.path().join("products/anafi/classic")).unwrap();

        let mut options = Options {
            product: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(!resolve_selection(&mut options, ws.path()));

        let mut options = Options {
            product: Some("anafi".to_string()),
            variant: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(!resolve_selection(&mut options, ws.path()));
    }

    #[test]
    fn forall_selectors_pass_validation() {
        let ws = tempfile::tempdir().unwrap();
        fs::create_dir_all(ws.path().join("products/anafi/classic")).unwrap();

        let mut options = Options {
            product: Some(FORALL.to_string()),
            variant: Some(FORALL.to_string()),
            ..Default::default()
        };
        assert!(resolve_selection(&mut options, ws.path()));
    }
}
