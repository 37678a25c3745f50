// src/constants.rs

/// Directory under the workspace root that holds one subdirectory per product.
pub const PRODUCTS_DIR: &str = "products";

/// Marker file excluding a product/variant directory from discovery.
pub const IGNORE_MARKER: &str = ".dragonignore";

/// Name used for the "pick me by default" product/variant entry (or symlink).
pub const DEFAULT_ENTRY: &str = "default";

/// Wildcard product/variant selector meaning "once per known entry".
pub const FORALL: &str = "forall";

/// Product configuration file, searched in the variant then the product directory.
pub const BUILDCFG_FILENAME: &str = "buildcfg.toml";

/// File in the product directory holding the version of the next release.
pub const NEXT_VERSION_FILENAME: &str = "next-version";

/// Entry point of the Alchemy build tool, relative to its home directory.
pub const ALCHEMY_ENTRYPOINT: &str = "scripts/alchemake";

/// Project generator script of the Alchemy build tool, relative to its home.
pub const GENPROJECT_SCRIPT: &str = "scripts/genproject/genproject.py";

// Environment variables honored at startup.
pub const ENV_WORKSPACE_DIR: &str = "DRAGON_WORKSPACE_DIR";
pub const ENV_OUT_ROOT_DIR: &str = "DRAGON_OUT_ROOT_DIR";
pub const ENV_OUT_DIR: &str = "DRAGON_OUT_DIR";
pub const ENV_ALCHEMY_HOME: &str = "ALCHEMY_HOME";
pub const ENV_LICENSE_HOME: &str = "LICENSE_HOME";
