// src/models.rs

use serde::Deserialize;
use std::collections::BTreeMap;

/// A task selected on the command line: its name plus the extra arguments
/// given after the `-t <task>` (or `-A`) occurrence that selected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl TaskRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

// --- `buildcfg.toml` MODELS (what is read from the product configuration) ---

/// Deserialized structure of a product's `buildcfg.toml`.
///
/// Entries under `[tasks.<name>]` either override an already registered task
/// (no `kind` field) or declare a new one (`kind = "meta"` / `kind = "product"`).
/// A `BTreeMap` keeps the apply order deterministic.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProductBuildConfig {
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub forall: ForallConfig,
}

/// One `[tasks.<name>]` table.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TaskConfig {
    /// "meta" or "product"; absent means "override an existing task".
    pub kind: Option<String>,
    pub desc: Option<String>,
    /// Subtask specifications, each `"name arg1 arg2"`.
    pub subtasks: Option<Vec<String>>,
    /// Default arguments as a single string, split on whitespace.
    pub defargs: Option<String>,
    /// Target product/variant for `kind = "product"` declarations.
    pub product: Option<String>,
    pub variant: Option<String>,
    #[serde(default)]
    pub secondary_help: bool,
    /// Command hooks, run through the command runner with the task's
    /// scratch environment. Installing one chains over the previous hook.
    pub pre: Option<String>,
    pub exec: Option<String>,
    pub post: Option<String>,
}

/// `[forall]` table: batch hooks bracketing a whole variant fan-out.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ForallConfig {
    pub pre: Option<String>,
    pub post: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_buildcfg_overrides_and_declarations() {
        let cfg: ProductBuildConfig = toml::from_str(
            r#"
            [tasks.build]
            subtasks = ["alchemy all final", "sign"]
            post = "scripts/notify.sh"

            [tasks.sign]
            kind = "meta"
            desc = "Sign the final tree"
            subtasks = ["alchemy image-sign"]

            [tasks.companion]
            kind = "product"
            desc = "Build the companion product"
            product = "companion"
            variant = "classic"
            defargs = "build images"

            [forall]
            pre = "scripts/forall-setup.sh"
            "#,
        )
        .unwrap();

        let build = &cfg.tasks["build"];
        assert!(build.kind.is_none());
        assert_eq!(build.subtasks.as_deref().unwrap().len(), 2);
        assert_eq!(build.post.as_deref(), Some("scripts/notify.sh"));

        let sign = &cfg.tasks["sign"];
        assert_eq!(sign.kind.as_deref(), Some("meta"));

        let companion = &cfg.tasks["companion"];
        assert_eq!(companion.kind.as_deref(), Some("product"));
        assert_eq!(companion.defargs.as_deref(), Some("build images"));

        assert_eq!(cfg.forall.pre.as_deref(), Some("scripts/forall-setup.sh"));
        assert!(cfg.forall.post.is_none());
    }

    #[test]
    fn parse_empty_buildcfg() {
        let cfg: ProductBuildConfig = toml::from_str("").unwrap();
        assert!(cfg.tasks.is_empty());
        assert!(cfg.forall.pre.is_none());
    }
}
