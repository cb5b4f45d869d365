//! Records the locked versions of the runtime libraries for `runtime-check`.

use std::collections::BTreeMap;
use std::path::Path;

const PROBED: [&str; 7] = ["ort", "candle-core", "ndarray", "image", "base64", "sha2", "regex"];

struct LockedPackage {
    name: String,
    version: String,
    dependencies: Vec<String>,
}

fn parse_lock(text: &str) -> Vec<LockedPackage> {
    let mut packages = Vec::new();
    let mut current: Option<LockedPackage> = None;
    let mut in_deps = false;

    for line in text.lines().map(str::trim) {
        if line == "[[package]]" {
            packages.extend(current.take());
            current = Some(LockedPackage {
                name: String::new(),
                version: String::new(),
                dependencies: Vec::new(),
            });
            in_deps = false;
            continue;
        }
        let Some(pkg) = current.as_mut() else {
            continue;
        };
        if in_deps {
            if line.starts_with(']') {
                in_deps = false;
            } else {
                pkg.dependencies.push(line.trim_end_matches(',').trim_matches('"').to_string());
            }
        } else if let Some(value) = line.strip_prefix("name = ") {
            pkg.name = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("version = ") {
            pkg.version = value.trim_matches('"').to_string();
        } else if line.starts_with("dependencies = [") {
            in_deps = !line.ends_with(']');
        }
    }
    packages.extend(current);
    packages
}

/// Versions of our direct dependencies; `"name version"` entries disambiguate duplicates
fn direct_versions(packages: &[LockedPackage], root: &str) -> BTreeMap<String, String> {
    let mut versions = BTreeMap::new();
    let Some(root) = packages.iter().find(|p| p.name == root) else {
        return versions;
    };
    for dep in &root.dependencies {
        let mut parts = dep.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        let version = match parts.next() {
            Some(v) => Some(v.to_string()),
            None => packages
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.version.clone()),
        };
        if let Some(version) = version {
            versions.insert(name.to_string(), version);
        }
    }
    versions
}

fn env_key(name: &str) -> String {
    format!(
        "LOCKED_VERSION_{}",
        name.to_ascii_uppercase().replace('-', "_")
    )
}

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let lock_path = Path::new(&manifest_dir).join("Cargo.lock");
    println!("cargo:rerun-if-changed={}", lock_path.display());

    let root = std::env::var("CARGO_PKG_NAME").unwrap_or_default();
    let versions = std::fs::read_to_string(&lock_path)
        .map(|text| direct_versions(&parse_lock(&text), &root))
        .unwrap_or_default();

    for name in PROBED {
        let version = versions.get(name).map_or("unknown", String::as_str);
        println!("cargo:rustc-env={}={}", env_key(name), version);
    }
}
