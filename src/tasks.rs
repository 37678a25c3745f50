// src/tasks.rs

//! Default task set, registered at startup before the product configuration
//! gets a chance to override it. Everything except the `alchemy`
//! pass-through is weak, so a product can replace a task wholesale by
//! re-registering its name.

use crate::{
    constants::GENPROJECT_SCRIPT,
    core::{
        context::BuildContext,
        registry::TaskRegistry,
        task::{AlchemyPaths, Invocation, Task, TaskError},
    },
    system::executor,
};
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

pub fn register_defaults(registry: &mut TaskRegistry, ctx: &BuildContext) {
    registry.register(Task::alchemy(
        "alchemy",
        "Directly pass commands to alchemy",
        &ctx.product,
        &ctx.variant,
    ));

    registry.register(
        Task::meta(
            "build",
            "Build everything and generate final directory",
            &["alchemy all final"],
        )
        .weak(),
    );

    registry.register(
        Task::meta("clean", "Clean everything", &["alchemy clobber"])
            .post(hook_post_clean)
            .weak(),
    );

    registry.register(
        Task::meta(
            "images",
            "Generate default images for product",
            &["alchemy image"],
        )
        .pre(hook_pre_images)
        .post(hook_post_images)
        .weak(),
    );
    registry.register(
        Task::meta(
            "images-all",
            "Generate all images for product",
            &["alchemy image"],
        )
        .pre(hook_pre_images)
        .post(hook_post_images)
        .weak(),
    );

    registry.register(
        Task::meta(
            "all",
            "Build and generate default images for product",
            &["build", "images"],
        )
        .weak(),
    );

    registry.register(
        Task::meta(
            "xconfig",
            "Modules configuration with graphical interface.",
            &["alchemy xconfig"],
        )
        .weak(),
    );
    registry.register(
        Task::meta(
            "menuconfig",
            "Modules configuration with ncurses interface.",
            &["alchemy menuconfig"],
        )
        .weak(),
    );

    let generators = [
        ("geneclipse", "Generate Eclipse CDT project"),
        ("genqtcreator", "Generate QtCreator project"),
        ("genvscode", "Generate VisualStudio Code project"),
        ("genjsondb", "Generate compile_commands.json"),
    ];
    for (name, desc) in generators {
        registry.register(Task::meta(name, desc, &[]).exec(hook_genproject).weak());
    }

    registry.register(
        Task::meta(
            "license-report",
            "Generate license report and add it in final tree",
            &[],
        )
        .exec(hook_license_report)
        .secondary()
        .weak(),
    );
    registry.register(
        Task::meta(
            "license-packages",
            "Generate license packages",
            &["alchemy oss-packages"],
        )
        .pre(hook_pre_license_packages)
        .secondary()
        .weak(),
    );

    registry.register(
        Task::meta("gen-release-archive", "Generate release package", &[])
            .pre(hook_pre_release)
            .exec(hook_gen_release_archive)
            .secondary()
            .weak(),
    );

    let mut release_subtasks = vec!["build"];
    if ctx.opts.license_scan {
        release_subtasks.push("license-report");
    }
    if ctx.opts.license_packages {
        release_subtasks.push("license-packages");
    }
    release_subtasks.extend([
        "images-all",
        "alchemy symbols-tar sdk dump-modules",
        "gen-release-archive",
    ]);
    registry.register(
        Task::meta(
            "release",
            "Build everything & generate a release archive",
            &release_subtasks,
        )
        .pre(hook_pre_release)
        .secondary()
        .weak(),
    );
}

// --- Hooks ---

fn run(inv: &Invocation<'_>, command: &str) -> Result<(), TaskError> {
    executor::exec_cmd(command, None, &inv.extra_env, inv.ctx.opts.dry_run, None)
}

fn hook_post_clean(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    run(inv, &format!("rm -rf {}", ctx.license_out_dir.display()))?;
    run(inv, &format!("rm -rf {}", ctx.images_dir.display()))?;
    run(inv, &format!("rm -rf {}/release-*", ctx.out_dir.display()))?;
    run(inv, &format!("rm -f {}", ctx.out_dir.join("build.prop").display()))?;
    run(inv, &format!("rm -f {}", ctx.out_dir.join("manifest.xml").display()))
}

/// Generates a `manifest.xml` through the repo tool. The target directory
/// must already exist.
fn gen_manifest_xml(inv: &Invocation<'_>, filepath: &Path) -> Result<(), TaskError> {
    if !filepath.parent().map(Path::exists).unwrap_or(false) {
        return Err(TaskError::Failed(
            "Cannot generate manifest as the directory does not exist.".to_string(),
        ));
    }
    let mut env = inv.extra_env.clone();
    env.insert("GIT_PAGER".to_string(), "cat".to_string());
    executor::exec_cmd(
        &format!(
            "repo manifest --revision-as-HEAD --suppress-upstream-revision -o {}",
            filepath.display()
        ),
        None,
        &env,
        inv.ctx.opts.dry_run,
        None,
    )
}

fn hook_pre_images(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;

    // Automatically generate a manifest.xml in final/etc (if it exists),
    // mirrored next to the output directory root.
    let manifest_path = ctx.final_dir.join("etc/manifest.xml");
    if manifest_path.parent().map(Path::exists).unwrap_or(false) {
        gen_manifest_xml(inv, &manifest_path)?;
        run(
            inv,
            &format!(
                "ln -sfr {} {}",
                manifest_path.display(),
                ctx.out_dir.join("manifest.xml").display()
            ),
        )?;
    }

    // Link final/etc/build.prop in out if it exists.
    let build_prop_path = ctx.final_dir.join("etc/build.prop");
    if build_prop_path.exists() {
        run(
            inv,
            &format!(
                "ln -sfr {} {}",
                build_prop_path.display(),
                ctx.out_dir.join("build.prop").display()
            ),
        )?;
    }
    Ok(())
}

fn hook_post_images(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    // Create the images directory so the release task is happy.
    fs::create_dir_all(&ctx.images_dir)
        .map_err(|err| TaskError::Failed(format!("{}: {err}", ctx.images_dir.display())))?;

    let paths = AlchemyPaths::compute(ctx, &ctx.product, &ctx.variant, None);
    if paths.plf_path.exists() {
        run(
            inv,
            &format!(
                "mv -f {} {}",
                paths.plf_path.display(),
                ctx.images_dir.display()
            ),
        )?;
    }
    Ok(())
}

/// Exec hook shared by the project generator tasks: delegates to the
/// genproject script of the build tool, named after the task itself.
fn hook_genproject(task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    let script = ctx.alchemy_home.join(GENPROJECT_SCRIPT);
    let generator = task.name.strip_prefix("gen").unwrap_or(&task.name);
    run(
        inv,
        &format!(
            "{} {} -b '-p {}-{} -A' {}",
            script.display(),
            generator,
            ctx.product,
            ctx.variant,
            inv.args.join(" ")
        ),
    )
}

fn hook_license_report(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    log::info!("License: report");
    run(
        inv,
        &format!(
            "{} --outdir {} --rootdir {} --builddir {} --finaldir {} {}",
            ctx.license_home.join("license-report").display(),
            ctx.license_out_dir.display(),
            ctx.workspace_dir.display(),
            ctx.out_dir.display(),
            ctx.final_dir.display(),
            if ctx.opts.verbose { "-v" } else { "" }
        ),
    )?;

    // Refresh the copy shipped in the final tree.
    let final_license_dir = ctx.final_dir.join("usr/share/license");
    run(inv, &format!("rm -rf {}", final_license_dir.display()))?;
    fs::create_dir_all(&final_license_dir)
        .map_err(|err| TaskError::Failed(format!("{}: {err}", final_license_dir.display())))?;
    run(
        inv,
        &format!(
            "cp -af {} {}",
            ctx.license_out_dir.join("license-notice.html").display(),
            final_license_dir.display()
        ),
    )
}

fn hook_pre_license_packages(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let report = inv.ctx.license_out_dir.join("package-license-module.txt");
    let packages = license_packages_from_report(&report)
        .map_err(|err| TaskError::Failed(format!("{}: {err}", report.display())))?;
    inv.extra_env.insert("OSS_PACKAGES".to_string(), packages);
    Ok(())
}

/// Package names from a license report: second field of each line, with any
/// `#`-suffixed detail stripped, first occurrence wins.
fn license_packages_from_report(path: &Path) -> io::Result<String> {
    let file = fs::File::open(path)?;
    let mut packages: Vec<String> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Some(package) = line.split(' ').nth(1) else {
            continue;
        };
        let package = package.split('#').next().unwrap_or(package).trim_end();
        if !package.is_empty() && !packages.iter().any(|known| known == package) {
            packages.push(package.to_string());
        }
    }
    Ok(packages.join(" "))
}

fn hook_pre_release(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    let uid = &ctx.build_props.uid;
    if uid.to_lowercase() != *uid {
        return Err(TaskError::Failed(
            "You shall provide a lowercase build_id".to_string(),
        ));
    }
    run(inv, &format!("rm -rf {}/release-*", ctx.out_dir.display()))?;
    fs::create_dir_all(&ctx.out_dir)
        .map_err(|err| TaskError::Failed(format!("{}: {err}", ctx.out_dir.display())))?;

    // Snapshot the host packages next to the artifacts.
    if cfg!(target_os = "linux") {
        executor::exec_cmd(
            "dpkg --list > os_packages.txt",
            Some(&ctx.out_dir),
            &inv.extra_env,
            ctx.opts.dry_run,
            None,
        )?;
    }
    Ok(())
}

fn hook_gen_release_archive(_task: &Task, inv: &mut Invocation<'_>) -> Result<(), TaskError> {
    let ctx = inv.ctx;
    let archive = ctx.out_dir.join(format!("{}.tar", ctx.build_props.uid));
    // The archive payload: generated images plus the build identity file.
    run(
        inv,
        &format!(
            "tar -C {} -hcf {} images staging/etc/build.prop",
            ctx.out_dir.display(),
            archive.display()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::RunOptions;
    use crate::core::registry::TaskRegistry;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::path::PathBuf;

    fn context(opts: RunOptions) -> BuildContext {
        BuildContext::new(PathBuf::from("/ws"), "anafi", "classic", None, None, opts)
    }

    fn default_opts() -> RunOptions {
        RunOptions {
            jobs: 1,
            colors: true,
            dry_run: true,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_cover_the_standard_task_set() {
        let ctx = context(default_opts());
        let mut registry = TaskRegistry::new();
        register_defaults(&mut registry, &ctx);

        for name in [
            "alchemy",
            "build",
            "clean",
            "images",
            "images-all",
            "all",
            "xconfig",
            "menuconfig",
            "geneclipse",
            "genjsondb",
            "license-report",
            "license-packages",
            "gen-release-archive",
            "release",
        ] {
            assert!(registry.get(name).is_some(), "missing default task '{name}'");
        }

        // Only the alchemy pass-through resists replacement.
        assert!(!registry.get("alchemy").unwrap().weak);
        assert!(registry.get("build").unwrap().weak);
        assert!(registry.get("release").unwrap().secondary_help);

        // Every default subtask reference must resolve.
        registry.validate();
    }

    #[test]
    fn release_includes_license_steps_only_when_asked() {
        let ctx = context(default_opts());
        let mut registry = TaskRegistry::new();
        register_defaults(&mut registry, &ctx);
        let crate::core::task::TaskKind::Meta { subtasks } =
            &registry.get("release").unwrap().kind
        else {
            panic!("expected meta task");
        };
        assert!(!subtasks.iter().any(|s| s.starts_with("license-")));

        let ctx = context(RunOptions {
            license_scan: true,
            license_packages: true,
            ..default_opts()
        });
        let mut registry = TaskRegistry::new();
        register_defaults(&mut registry, &ctx);
        let crate::core::task::TaskKind::Meta { subtasks } =
            &registry.get("release").unwrap().kind
        else {
            panic!("expected meta task");
        };
        assert_eq!(
            subtasks,
            &[
                "build",
                "license-report",
                "license-packages",
                "images-all",
                "alchemy symbols-tar sdk dump-modules",
                "gen-release-archive",
            ]
        );
    }

    #[test]
    fn license_report_parsing_dedupes_and_strips_details() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package-license-module.txt");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "libfoo pkg-a").unwrap();
        writeln!(file, "libbar pkg-b#gpl").unwrap();
        writeln!(file, "libbaz pkg-a").unwrap();
        writeln!(file, "empty").unwrap();
        drop(file);

        assert_eq!(license_packages_from_report(&path).unwrap(), "pkg-a pkg-b");
    }

    #[test]
    fn release_pre_hook_rejects_uppercase_build_ids() {
        let ctx = context(RunOptions {
            build_id: Some("ANAFI-7.1.0".to_string()),
            ..default_opts()
        });
        let registry = TaskRegistry::new();
        let mut inv = Invocation {
            ctx: &ctx,
            registry: &registry,
            args: Vec::new(),
            extra_env: BTreeMap::new(),
        };
        let task = Task::meta("release", "release", &[]);
        let result = hook_pre_release(&task, &mut inv);
        assert!(matches!(result, Err(TaskError::Failed(_))));
    }

    #[test]
    fn license_packages_hook_exports_the_package_list() {
        let ws = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(
            ws.path().to_path_buf(),
            "anafi",
            "classic",
            None,
            None,
            default_opts(),
        );
        fs::create_dir_all(&ctx.license_out_dir).unwrap();
        let mut file =
            fs::File::create(ctx.license_out_dir.join("package-license-module.txt")).unwrap();
        writeln!(file, "libfoo pkg-a").unwrap();
        drop(file);

        let registry = TaskRegistry::new();
        let mut inv = Invocation {
            ctx: &ctx,
            registry: &registry,
            args: Vec::new(),
            extra_env: BTreeMap::new(),
        };
        let task = Task::meta("license-packages", "", &[]);
        hook_pre_license_packages(&task, &mut inv).unwrap();
        assert_eq!(inv.extra_env.get("OSS_PACKAGES").map(String::as_str), Some("pkg-a"));
    }
}
