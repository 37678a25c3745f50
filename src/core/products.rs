// src/core/products.rs

use crate::constants::{DEFAULT_ENTRY, IGNORE_MARKER, PRODUCTS_DIR};
use std::fs;
use std::path::Path;

const PRODUCT_EXCLUDES: &[&str] = &[".git", "dragon_base"];
const VARIANT_EXCLUDES: &[&str] = &[".git", "common"];

fn list_entries(dir: &Path, excludes: &[&str]) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if excludes.contains(&name.as_str()) {
            continue;
        }
        if path.join(IGNORE_MARKER).exists() {
            continue;
        }
        // If 'default' is a link, only the target of the link is listed.
        if name == DEFAULT_ENTRY && path.is_symlink() {
            continue;
        }
        names.push(name);
    }
    names.sort_unstable();
    names
}

/// Buildable products under `<workspace>/products`.
pub fn get_products(workspace_dir: &Path) -> Vec<String> {
    list_entries(&workspace_dir.join(PRODUCTS_DIR), PRODUCT_EXCLUDES)
}

/// Variants of a product, excluding the shared `common` directory.
pub fn get_variants(workspace_dir: &Path, product: &str) -> Vec<String> {
    list_entries(
        &workspace_dir.join(PRODUCTS_DIR).join(product),
        VARIANT_EXCLUDES,
    )
}

/// The entry to pick when none was requested: the only one available, one
/// literally named `default`, or the target of a `default` symlink.
fn default_entry(dir: &Path, entries: &[String]) -> Option<String> {
    if entries.len() == 1 {
        return Some(entries[0].clone());
    }
    if entries.iter().any(|entry| entry == DEFAULT_ENTRY) {
        return Some(DEFAULT_ENTRY.to_string());
    }
    let link = dir.join(DEFAULT_ENTRY);
    if link.is_symlink() {
        if let Ok(target) = fs::read_link(&link) {
            let target = target.file_name()?.to_str()?.to_string();
            if entries.contains(&target) {
                return Some(target);
            }
        }
    }
    None
}

pub fn get_default_product(workspace_dir: &Path) -> Option<String> {
    default_entry(
        &workspace_dir.join(PRODUCTS_DIR),
        &get_products(workspace_dir),
    )
}

pub fn get_default_variant(workspace_dir: &Path, product: &str) -> Option<String> {
    default_entry(
        &workspace_dir.join(PRODUCTS_DIR).join(product),
        &get_variants(workspace_dir, product),
    )
}
