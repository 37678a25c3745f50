// src/core/context.rs

use crate::constants::{
    ENV_ALCHEMY_HOME, ENV_LICENSE_HOME, ENV_OUT_DIR, ENV_OUT_ROOT_DIR, NEXT_VERSION_FILENAME,
};
use chrono::Local;
use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

lazy_static! {
    /// Leading `MAJOR.MINOR.RELEASE` of a version string embedded in a build id.
    static ref VERSION_RE: Regex = Regex::new(r"\d+\.\d+\.\d+").expect("static regex");
}

/// Global flags of one program invocation, shared by every component.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub jobs: usize,
    pub verbose: bool,
    pub dry_run: bool,
    pub append_args: bool,
    pub keep_going: bool,
    pub colors: bool,
    pub parallel_variants: bool,
    pub build_id: Option<String>,
    pub license_scan: bool,
    pub license_packages: bool,
}

/// Build identity properties exported to the build tool environment.
/// An empty string means "not set"; only set properties are exported.
#[derive(Debug, Clone, Default)]
pub struct BuildProps {
    pub group: String,
    pub project: String,
    pub product: String,
    pub variant: String,
    pub region: String,
    pub uid: String,
    pub version: String,
}

impl BuildProps {
    /// Non-empty properties with their environment variable names.
    pub fn iter_set(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("PARROT_BUILD_PROP_GROUP", self.group.as_str()),
            ("PARROT_BUILD_PROP_PROJECT", self.project.as_str()),
            ("PARROT_BUILD_PROP_PRODUCT", self.product.as_str()),
            ("PARROT_BUILD_PROP_VARIANT", self.variant.as_str()),
            ("PARROT_BUILD_PROP_REGION", self.region.as_str()),
            ("PARROT_BUILD_PROP_UID", self.uid.as_str()),
            ("PARROT_BUILD_PROP_VERSION", self.version.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
    }
}

/// Immutable state of one program invocation: selected product/variant, the
/// output directory tree, tool locations, build identity and global options.
///
/// Constructed once at startup and passed by reference; the only mutable
/// execution state anywhere is the per-invocation scratch environment of the
/// task currently running.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub workspace_dir: PathBuf,
    pub product: String,
    pub variant: String,
    /// `None` when the selector is the `forall` wildcard.
    pub product_dir: Option<PathBuf>,
    pub variant_dir: Option<PathBuf>,
    pub out_root_dir: PathBuf,
    pub out_dir: PathBuf,
    pub build_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub final_dir: PathBuf,
    pub images_dir: PathBuf,
    pub alchemy_home: PathBuf,
    pub license_home: PathBuf,
    pub license_out_dir: PathBuf,
    pub build_props: BuildProps,
    pub opts: RunOptions,
}

impl BuildContext {
    /// Builds the context for a product/variant pair.
    ///
    /// `product_dir`/`variant_dir` are `None` when the corresponding selector
    /// is the `forall` wildcard. Environment variables (`DRAGON_OUT_DIR`,
    /// `ALCHEMY_HOME`, `PARROT_BUILD_PROP_*`, ...) take precedence over the
    /// derived defaults, so a re-invoked child ends up with the same view as
    /// its parent.
    pub fn new(
        workspace_dir: PathBuf,
        product: &str,
        variant: &str,
        product_dir: Option<PathBuf>,
        variant_dir: Option<PathBuf>,
        opts: RunOptions,
    ) -> Self {
        let build_props = Self::setup_build_props(product, variant, product_dir.as_deref(), &opts);

        let out_root_dir = env_path(ENV_OUT_ROOT_DIR).unwrap_or_else(|| workspace_dir.join("out"));
        let out_dir = env_path(ENV_OUT_DIR)
            .unwrap_or_else(|| out_root_dir.join(format!("{product}-{variant}")));

        let alchemy_home =
            env_path(ENV_ALCHEMY_HOME).unwrap_or_else(|| workspace_dir.join("build/alchemy"));
        if !alchemy_home.is_dir() {
            log::warn!("Alchemy not found at '{}'", alchemy_home.display());
        }
        let license_home =
            env_path(ENV_LICENSE_HOME).unwrap_or_else(|| workspace_dir.join("build/license"));

        Self {
            build_dir: out_dir.join("build"),
            staging_dir: out_dir.join("staging"),
            final_dir: out_dir.join("final"),
            images_dir: out_dir.join("images"),
            license_out_dir: out_dir.join("license"),
            workspace_dir,
            product: product.to_string(),
            variant: variant.to_string(),
            product_dir,
            variant_dir,
            out_root_dir,
            out_dir,
            alchemy_home,
            license_home,
            build_props,
            opts,
        }
    }

    /// Output directory of an arbitrary product/variant pair.
    pub fn out_dir_for(&self, product: &str, variant: &str) -> PathBuf {
        self.out_root_dir.join(format!("{product}-{variant}"))
    }

    /// Full `<product>-<variant>` selector of this invocation.
    pub fn fullname(&self) -> String {
        format!("{}-{}", self.product, self.variant)
    }

    fn setup_build_props(
        product: &str,
        variant: &str,
        product_dir: Option<&Path>,
        opts: &RunOptions,
    ) -> BuildProps {
        let mut props = BuildProps {
            group: env_or("PARROT_BUILD_PROP_GROUP", "drones"),
            project: env_or("PARROT_BUILD_PROP_PROJECT", ""),
            product: env_or("PARROT_BUILD_PROP_PRODUCT", product),
            variant: env_or("PARROT_BUILD_PROP_VARIANT", variant),
            region: env_or("PARROT_BUILD_PROP_REGION", ""),
            uid: env_or("PARROT_BUILD_PROP_UID", ""),
            version: env_or("PARROT_BUILD_PROP_VERSION", ""),
        };

        // A build id given on the command line always wins.
        if let Some(build_id) = &opts.build_id {
            props.uid = build_id.clone();
        }

        if props.version.is_empty() && props.uid.is_empty() {
            // Use the version indicated in next-version if available.
            props.version = product_dir
                .map(|dir| dir.join(NEXT_VERSION_FILENAME))
                .filter(|path| path.exists())
                .and_then(|path| fs::read_to_string(path).ok())
                .map(|contents| contents.trim_end_matches('\n').to_string())
                .unwrap_or_else(|| "0.0.0".to_string());
        }

        if props.version.is_empty() {
            // Recover the version part of the uid (MAJOR.MINOR.RELEASE[-detail]).
            match version_from_uid(&props.uid) {
                Some(version) => props.version = version.to_string(),
                None => {
                    log::warn!("Unable to extract version from UID ({})", props.uid);
                    props.version = "0.0.0".to_string();
                }
            }
        }

        if props.uid.is_empty() {
            props.uid = format!(
                "{}-{}-{}-{}",
                props.product,
                props.variant,
                props.version,
                Local::now().format("%Y%m%d-%H%M")
            );
        }

        if props.project.is_empty() {
            props.project = props.product.clone();
        }

        props
    }
}

/// Extracts the version suffix of a build uid, from the first
/// `MAJOR.MINOR.RELEASE` occurrence to the end of the string.
pub fn version_from_uid(uid: &str) -> Option<&str> {
    VERSION_RE.find(uid).map(|found| &uid[found.start()..])
}

fn env_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
