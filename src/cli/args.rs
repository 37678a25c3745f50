// src/cli/args.rs

use crate::core::context::RunOptions;
use crate::models::TaskRequest;
use anyhow::{Result, bail};
use std::thread;

/// Everything the command line can express. The grammar is positional-group
/// based (`-t <task> [taskargs...]` may repeat, `v=1` is a valid flag), so it
/// is parsed by hand from the raw argument vector instead of being modeled
/// as clap options.
#[derive(Debug)]
pub struct Options {
    pub list_products: bool,
    pub list_tasks: bool,
    pub list_secondary_tasks: bool,
    pub product: Option<String>,
    pub variant: Option<String>,
    pub colors: bool,
    pub jobs: usize,
    pub verbose: bool,
    pub dry_run: bool,
    pub append_args: bool,
    pub build_id: Option<String>,
    pub help_asked: bool,
    pub keep_going: bool,
    pub license_scan: bool,
    pub license_packages: bool,
    pub generate_completion: bool,
    pub parallel_variants: bool,
    pub tasks: Vec<TaskRequest>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            list_products: false,
            list_tasks: false,
            list_secondary_tasks: false,
            product: None,
            variant: None,
            colors: true,
            jobs: 1,
            verbose: false,
            dry_run: false,
            append_args: false,
            build_id: None,
            help_asked: false,
            keep_going: false,
            license_scan: false,
            license_packages: false,
            generate_completion: false,
            parallel_variants: false,
            tasks: Vec::new(),
        }
    }
}

impl Options {
    pub fn parse(argv: &[String]) -> Result<Self> {
        Parser::new(argv).run()
    }

    /// The subset of options every component needs, detached from the
    /// parsing surface.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            jobs: self.jobs,
            verbose: self.verbose,
            dry_run: self.dry_run,
            append_args: self.append_args,
            keep_going: self.keep_going,
            colors: self.colors,
            parallel_variants: self.parallel_variants,
            build_id: self.build_id.clone(),
            license_scan: self.license_scan,
            license_packages: self.license_packages,
        }
    }
}

struct Parser<'a> {
    argv: &'a [String],
    index: usize,
    skip_next: bool,
    current_task: Option<usize>,
    options: Options,
}

impl<'a> Parser<'a> {
    fn new(argv: &'a [String]) -> Self {
        Self {
            argv,
            index: 0,
            skip_next: false,
            current_task: None,
            options: Options::default(),
        }
    }

    fn run(mut self) -> Result<Options> {
        while self.index < self.argv.len() {
            if self.skip_next {
                self.skip_next = false;
            } else {
                self.process_arg(&self.argv[self.index].clone())?;
            }
            self.index += 1;
        }
        Ok(self.options)
    }

    fn next_arg(&mut self) -> String {
        match self.argv.get(self.index + 1) {
            Some(arg) => {
                self.skip_next = true;
                arg.clone()
            }
            None => String::new(),
        }
    }

    /// Value of an option: attached (`-j4`), after an equals sign (`-b=id`),
    /// or in the next argument (`-b id`).
    fn opt_value(&mut self, arg: &str, opt: &str) -> String {
        let value = arg.strip_prefix(opt).unwrap_or("");
        if let Some(value) = value.strip_prefix('=') {
            value.to_string()
        } else if value.is_empty() {
            self.next_arg()
        } else {
            value.to_string()
        }
    }

    fn set_task(&mut self, name: &str) {
        self.current_task = Some(self.options.tasks.len());
        self.options.tasks.push(TaskRequest::new(name));
    }

    fn process_arg(&mut self, arg: &str) -> Result<()> {
        match arg {
            "-l" => self.options.list_products = true,
            "-A" => self.set_task("alchemy"),
            "-t" => {
                if self.index + 1 < self.argv.len() {
                    let name = self.opt_value(arg, "-t");
                    self.set_task(&name);
                } else {
                    // Last argument: simply list the tasks.
                    self.options.list_tasks = true;
                }
            }
            "-tt" => {
                self.options.list_tasks = true;
                self.options.list_secondary_tasks = true;
            }
            "-v" => self.options.verbose = true,
            "-n" => self.options.dry_run = true,
            "-a" => self.options.append_args = true,
            "-k" => self.options.keep_going = true,
            "--no-color" => self.options.colors = false,
            "--license-scan" => self.options.license_scan = true,
            "--license-packages" => self.options.license_packages = true,
            "--gen-completion" => self.options.generate_completion = true,
            "--parallel-variants" => self.options.parallel_variants = true,
            "-h" | "--help" => match self.current_task {
                // Help after a task selection is help about that task.
                Some(task) => self.options.tasks[task].args.push(arg.to_string()),
                None => self.options.help_asked = true,
            },
            _ if arg.starts_with("-b") => {
                let value = self.opt_value(arg, "-b");
                self.options.build_id = Some(value);
            }
            _ if arg.starts_with("-j") => self.parse_jobs(arg),
            _ if arg.starts_with("-p") => {
                let selector = self.opt_value(arg, "-p");
                match selector.rfind('-') {
                    Some(split) => {
                        self.options.variant = Some(selector[split + 1..].to_string());
                        self.options.product = Some(selector[..split].to_string());
                    }
                    None => {
                        if selector == crate::constants::FORALL {
                            self.options.variant = Some(selector.clone());
                        }
                        self.options.product = Some(selector);
                    }
                }
            }
            _ if arg.starts_with("v=") => {
                let value = self.opt_value(arg, "v=");
                self.options.verbose = value == "1";
            }
            _ if arg.starts_with("V=") => {
                let value = self.opt_value(arg, "V=");
                self.options.verbose = value == "1";
            }
            _ => match self.current_task {
                Some(task) => self.options.tasks[task].args.push(arg.to_string()),
                None => {
                    bail!("You shall not give arg without associated -t or -A option.")
                }
            },
        }
        Ok(())
    }

    /// `-j` grammar: `-jN`/`-j N` for an absolute count, a negative value for
    /// "all cores minus N" (floored at one), `/X` (attached or detached) for
    /// "all cores divided by X" rounded up, and a bare `-j` for all cores.
    fn parse_jobs(&mut self, arg: &str) {
        let max_jobs = thread::available_parallelism().map_or(1, usize::from);
        let jobs_arg = self.opt_value(arg, "-j");

        match jobs_arg.parse::<i64>() {
            Ok(jobs) if jobs >= 1 => {
                self.options.jobs = usize::try_from(jobs).unwrap_or(usize::MAX);
            }
            Ok(offset) => {
                // Negative or zero: relative to the maximum.
                let jobs = i64::try_from(max_jobs).unwrap_or(i64::MAX) + offset;
                self.options.jobs = usize::try_from(jobs.max(1)).unwrap_or(1);
            }
            Err(_) => {
                // Not a number: a divisor, or nothing at all. Either way the
                // next argument was not consumed as a value, unless it held
                // a detached divisor.
                self.skip_next = false;
                let divisor = match jobs_arg.strip_prefix('/') {
                    Some(rest) => {
                        if !arg.contains('/') {
                            self.skip_next = true;
                        }
                        rest.parse::<usize>().unwrap_or(1).max(1)
                    }
                    None => 1,
                };
                self.options.jobs = max_jobs.div_ceil(divisor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn parse(args: &[&str]) -> Options {
        Options::parse(&to_argv(args)).unwrap()
    }

    fn max_jobs() -> usize {
        thread::available_parallelism().map_or(1, usize::from)
    }

    #[test]
    fn task_groups_collect_their_own_arguments() {
        let opts = parse(&["-p", "anafi-classic", "-t", "build", "all", "-t", "images"]);
        assert_eq!(opts.product.as_deref(), Some("anafi"));
        assert_eq!(opts.variant.as_deref(), Some("classic"));
        assert_eq!(opts.tasks.len(), 2);
        assert_eq!(opts.tasks[0].name, "build");
        assert_eq!(opts.tasks[0].args, ["all"]);
        assert_eq!(opts.tasks[1].name, "images");
        assert!(opts.tasks[1].args.is_empty());
    }

    #[test]
    fn alchemy_shortcut_selects_the_alchemy_task() {
        let opts = parse(&["-A", "all", "final"]);
        assert_eq!(opts.tasks.len(), 1);
        assert_eq!(opts.tasks[0].name, "alchemy");
        assert_eq!(opts.tasks[0].args, ["all", "final"]);
    }

    #[test]
    fn argument_without_a_task_is_rejected() {
        assert!(Options::parse(&to_argv(&["stray"])).is_err());
    }

    #[test]
    fn product_selector_splits_on_the_last_dash() {
        let opts = parse(&["-p", "my-product-classic"]);
        assert_eq!(opts.product.as_deref(), Some("my-product"));
        assert_eq!(opts.variant.as_deref(), Some("classic"));

        let opts = parse(&["-p", "anafi"]);
        assert_eq!(opts.product.as_deref(), Some("anafi"));
        assert_eq!(opts.variant, None);

        let opts = parse(&["-p", "forall"]);
        assert_eq!(opts.product.as_deref(), Some("forall"));
        assert_eq!(opts.variant.as_deref(), Some("forall"));
    }

    #[test]
    fn jobs_accepts_every_historical_spelling() {
        assert_eq!(parse(&["-j4"]).jobs, 4);
        assert_eq!(parse(&["-j", "8"]).jobs, 8);
        assert_eq!(parse(&["-j"]).jobs, max_jobs());
        assert_eq!(parse(&["-j/2"]).jobs, max_jobs().div_ceil(2));
        assert_eq!(parse(&["-j", "/2"]).jobs, max_jobs().div_ceil(2));
        assert_eq!(parse(&["-j-1"]).jobs, (max_jobs() - 1).max(1));
    }

    #[test]
    fn bare_jobs_does_not_consume_the_next_argument() {
        let opts = parse(&["-j", "-t", "build"]);
        assert_eq!(opts.jobs, max_jobs());
        assert_eq!(opts.tasks.len(), 1);
        assert_eq!(opts.tasks[0].name, "build");
    }

    #[test]
    fn build_id_value_may_be_attached_or_detached() {
        assert_eq!(parse(&["-b123"]).build_id.as_deref(), Some("123"));
        assert_eq!(parse(&["-b=123"]).build_id.as_deref(), Some("123"));
        assert_eq!(parse(&["-b", "123"]).build_id.as_deref(), Some("123"));
    }

    #[test]
    fn verbose_spellings() {
        assert!(parse(&["-v"]).verbose);
        assert!(parse(&["v=1"]).verbose);
        assert!(parse(&["V=1"]).verbose);
        assert!(!parse(&["V=0"]).verbose);
    }

    #[test]
    fn global_flags() {
        let opts = parse(&["-n", "-a", "-k", "--no-color", "--parallel-variants", "--license-scan"]);
        assert!(opts.dry_run);
        assert!(opts.append_args);
        assert!(opts.keep_going);
        assert!(!opts.colors);
        assert!(opts.parallel_variants);
        assert!(opts.license_scan);
    }

    #[test]
    fn trailing_t_lists_tasks() {
        let opts = parse(&["-t"]);
        assert!(opts.list_tasks);
        assert!(!opts.list_secondary_tasks);
        assert!(opts.tasks.is_empty());

        let opts = parse(&["-tt"]);
        assert!(opts.list_tasks);
        assert!(opts.list_secondary_tasks);
    }

    #[test]
    fn help_after_a_task_belongs_to_the_task() {
        let opts = parse(&["-t", "build", "-h"]);
        assert!(!opts.help_asked);
        assert_eq!(opts.tasks[0].args, ["-h"]);

        let opts = parse(&["-h"]);
        assert!(opts.help_asked);
    }
}
