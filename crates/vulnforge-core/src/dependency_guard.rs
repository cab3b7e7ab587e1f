//! Dependency Guard (spec §4.5).
//!
//! Computes declared vs. required dependency sets for a candidate manifest
//! and turns any mismatch into a `DependencyViolation` value rather than an
//! exception, so the Synthesis Engine can iterate over candidates uniformly
//! (spec §9, "guard violations should be a value").
//!
//! Python import/alias handling mirrors the original generator's
//! `agents/generator/deps/python.py` + `synthesis.py` guard pass; the
//! Node/OS-package checks mirror `deps/node.py` and `deps/os_pkgs.py`.

use std::collections::BTreeSet;

use regex::Regex;

use crate::domain::manifest::{ContentEncoding, Manifest};

/// Import root -> PyPI distribution name, for normalising declared/required
/// sets onto the same vocabulary (spec §4.4 step 4, "alias map").
fn python_alias_map() -> &'static [(&'static str, &'static str)] {
    &[
        ("bs4", "beautifulsoup4"),
        ("pil", "pillow"),
        ("pillow", "pillow"),
        ("yaml", "pyyaml"),
        ("pyyaml", "pyyaml"),
        ("cv2", "opencv-python"),
        ("dateutil", "python-dateutil"),
        ("psycopg2", "psycopg2-binary"),
        ("psycopg2-binary", "psycopg2-binary"),
        ("sklearn", "scikit-learn"),
        ("lxml", "lxml"),
        ("pymysql", "pymysql"),
        ("mysqlclient", "mysqlclient"),
        ("sqlite3", "pysqlite3-binary"),
    ]
}

/// Pinned default version for a known package, consulted by `auto_patch`.
fn default_version_for(package: &str) -> Option<&'static str> {
    match package {
        "requests" => Some("2.32.2"),
        "pysqlite3-binary" => Some("0.5.2"),
        "flask" => Some("3.0.3"),
        "pyyaml" => Some("6.0.1"),
        "opencv-python" => Some("4.9.0.80"),
        "beautifulsoup4" => Some("4.12.3"),
        _ => None,
    }
}

/// Modules that are always part of the interpreter; never reported missing
/// and never auto-patched (spec §4.4 step 4, "stdlib denylist").
fn python_stdlib() -> &'static BTreeSet<&'static str> {
    use std::sync::OnceLock;
    static STDLIB: OnceLock<BTreeSet<&'static str>> = OnceLock::new();
    STDLIB.get_or_init(|| {
        [
            "abc", "argparse", "asyncio", "base64", "collections", "contextlib",
            "dataclasses", "datetime", "functools", "hashlib", "http", "json",
            "logging", "math", "os", "pathlib", "random", "re", "sqlite3", "ssl",
            "statistics", "subprocess", "sys", "threading", "typing", "unittest",
            "urllib", "uuid", "io", "time", "itertools", "socket", "string",
        ]
        .into_iter()
        .collect()
    })
}

/// Database driver distributions incompatible with a non-MySQL runtime DB
/// (spec §4.4 step 3, "skip known database drivers that are incompatible
/// with the configured runtime DB").
fn external_db_packages() -> &'static BTreeSet<&'static str> {
    use std::sync::OnceLock;
    static PKGS: OnceLock<BTreeSet<&'static str>> = OnceLock::new();
    PKGS.get_or_init(|| {
        [
            "pymysql",
            "mysqlclient",
            "mysql-connector",
            "mysql-connector-python",
            "psycopg2",
            "psycopg2-binary",
            "pg8000",
            "asyncpg",
        ]
        .into_iter()
        .collect()
    })
}

/// A single blocking or non-blocking guard finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyViolation {
    /// `required_static - declared_combined != ∅`.
    MissingDependency { package: String },
    /// `declared_from_deps - declared_from_requirements != ∅`.
    DeclaredNotInRequirements { package: String },
    /// `required_static - installed_from_build != ∅`.
    RequiredNotInstalled { package: String },
    /// Node analogue of `MissingDependency`.
    MissingNodeDependency { package: String },
    /// High-confidence LLM-inferred dependency not declared or auto-patched.
    LlmInferredMissing { package: String },
}

impl DependencyViolation {
    pub fn message(&self) -> String {
        match self {
            Self::MissingDependency { package } => {
                format!("missing dependency '{package}' required by manifest files")
            }
            Self::DeclaredNotInRequirements { package } => {
                format!("deps entry '{package}' missing from requirements files")
            }
            Self::RequiredNotInstalled { package } => {
                format!("dependency '{package}' required but not installed by build command")
            }
            Self::MissingNodeDependency { package } => {
                format!("missing node dependency '{package}' required by manifest files")
            }
            Self::LlmInferredMissing { package } => {
                format!("llm-inferred dependency '{package}' is missing and high-confidence")
            }
        }
    }
}

/// Non-blocking OS-level package findings (apt/apk/yum), recorded only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsPackages {
    pub apt: BTreeSet<String>,
    pub apk: BTreeSet<String>,
    pub yum: BTreeSet<String>,
}

/// Full guard evaluation for one candidate manifest.
#[derive(Debug, Clone, Default)]
pub struct GuardReport {
    pub declared_from_deps: BTreeSet<String>,
    pub declared_from_requirements: BTreeSet<String>,
    pub declared_combined: BTreeSet<String>,
    pub required_static: BTreeSet<String>,
    pub installed_from_build: BTreeSet<String>,
    pub node_required: BTreeSet<String>,
    pub node_declared: BTreeSet<String>,
    pub node_installed: BTreeSet<String>,
    pub os_packages: OsPackages,
    pub violations: Vec<DependencyViolation>,
    /// Entries auto-patched into `deps[]` this pass (spec §4.4 step 4).
    pub auto_patched: Vec<String>,
}

impl GuardReport {
    pub fn is_accepted(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Stateless evaluator: parses manifest files/deps/build strings and reports
/// violations as data (spec §9).
pub struct DependencyGuard;

impl DependencyGuard {
    /// Runs the full guard pass over a manifest. When `auto_patch` is set,
    /// missing static dependencies with a known default version are added to
    /// `manifest.deps` and a synthesised/updated `requirements.txt` entry,
    /// before violations are computed on the patched manifest (spec §4.4
    /// step 4 — deterministic, alias-table-driven).
    pub fn evaluate(manifest: &mut Manifest, auto_patch: bool, db_runtime: Option<&str>) -> GuardReport {
        let auto_patched = if auto_patch { Self::auto_patch(manifest, db_runtime) } else { Vec::new() };

        let declared_from_deps = Self::normalize_deps_field(&manifest.deps);
        let declared_from_requirements = Self::declared_from_requirements(manifest);
        let declared_combined: BTreeSet<String> = declared_from_deps
            .union(&declared_from_requirements)
            .cloned()
            .collect();

        let required_static = Self::required_static(manifest);
        let installed_from_build = Self::installed_from_build(manifest);
        let node_required = Self::node_required(manifest);
        let node_declared = Self::node_declared(manifest);
        let node_installed = Self::node_installed(manifest);
        let os_packages = Self::os_packages(manifest);

        let mut violations = Vec::new();

        for package in required_static.difference(&declared_combined) {
            violations.push(DependencyViolation::MissingDependency {
                package: package.clone(),
            });
        }

        if !declared_from_requirements.is_empty() {
            for package in declared_from_deps.difference(&declared_from_requirements) {
                violations.push(DependencyViolation::DeclaredNotInRequirements {
                    package: package.clone(),
                });
            }
        }

        if !installed_from_build.is_empty() {
            for package in required_static.difference(&installed_from_build) {
                if !violations.iter().any(|v| matches!(v, DependencyViolation::MissingDependency { package: p } if p == package))
                {
                    violations.push(DependencyViolation::RequiredNotInstalled {
                        package: package.clone(),
                    });
                }
            }
        }

        for package in node_required.difference(&node_declared) {
            violations.push(DependencyViolation::MissingNodeDependency {
                package: package.clone(),
            });
        }

        violations.sort_by(|a, b| a.message().cmp(&b.message()));

        GuardReport {
            declared_from_deps,
            declared_from_requirements,
            declared_combined,
            required_static,
            installed_from_build,
            node_required,
            node_declared,
            node_installed,
            os_packages,
            violations,
            auto_patched,
        }
    }

    /// De-duplicated (case-insensitive), alias-normalised `deps[]` entries,
    /// with version specifiers/extras/markers stripped.
    fn normalize_deps_field(deps: &[String]) -> BTreeSet<String> {
        deps.iter().map(|d| Self::normalize_package_name(d)).collect()
    }

    /// The runtime DB a driver distribution actually speaks, if any.
    fn db_driver_family(package: &str) -> Option<&'static str> {
        match package {
            "pymysql" | "mysqlclient" | "mysql-connector" | "mysql-connector-python" => Some("mysql"),
            "psycopg2" | "psycopg2-binary" | "pg8000" | "asyncpg" => Some("postgres"),
            _ => None,
        }
    }

    /// True when `package` is a database driver distribution incompatible
    /// with the configured runtime DB (spec §4.4 step 3: "skip known
    /// database drivers that are incompatible with the configured runtime
    /// DB"), e.g. a `psycopg2` user dependency when `runtime.database` is
    /// `mysql` (or unset).
    pub fn is_incompatible_db_driver(package: &str, db_runtime: Option<&str>) -> bool {
        match Self::db_driver_family(package) {
            Some(family) => db_runtime != Some(family),
            None => false,
        }
    }

    /// Strip version specifiers (`==`, `>=`, ...), extras (`[...]`), and
    /// environment markers (`; python_version ...`); lowercase; `_` -> `-`;
    /// apply the alias table.
    pub fn normalize_package_name(raw: &str) -> String {
        let without_marker = raw.split(';').next().unwrap_or(raw);
        let without_extras = match without_marker.find('[') {
            Some(idx) => &without_marker[..idx],
            None => without_marker,
        };
        let stop = without_extras
            .find(|c: char| "=<>!~ ".contains(c))
            .unwrap_or(without_extras.len());
        let name = without_extras[..stop].trim().to_lowercase().replace('_', "-");
        Self::apply_alias(&name)
    }

    fn apply_alias(name: &str) -> String {
        python_alias_map()
            .iter()
            .find(|(module, _)| *module == name)
            .map(|(_, package)| package.to_string())
            .unwrap_or_else(|| name.to_string())
    }

    fn declared_from_requirements(manifest: &Manifest) -> BTreeSet<String> {
        let mut declared = BTreeSet::new();
        for file in &manifest.files {
            let lower = file.path.to_lowercase();
            if lower == "requirements.txt" || (lower.starts_with("requirements") && lower.ends_with(".txt")) {
                let content = Self::decoded_content(file);
                declared.extend(Self::parse_requirements_txt(&content));
            } else if lower == "pyproject.toml" {
                let content = Self::decoded_content(file);
                declared.extend(Self::parse_pyproject(&content));
            } else if lower == "setup.cfg" {
                let content = Self::decoded_content(file);
                declared.extend(Self::parse_setup_cfg(&content));
            }
        }
        declared
    }

    fn parse_requirements_txt(content: &str) -> BTreeSet<String> {
        content
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
            .map(Self::normalize_package_name)
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Tolerant `[project].dependencies` / `[tool.poetry.dependencies]`
    /// extraction without a full TOML parser: a line-oriented scan of the
    /// bracketed list / table body is sufficient for generated manifests.
    fn parse_pyproject(content: &str) -> BTreeSet<String> {
        let mut declared = BTreeSet::new();
        if let Some(section_start) = content.find("dependencies") {
            let tail = &content[section_start..];
            if let Some(bracket_start) = tail.find('[') {
                if let Some(bracket_end) = tail[bracket_start..].find(']') {
                    let body = &tail[bracket_start + 1..bracket_start + bracket_end];
                    for item in body.split(',') {
                        let trimmed = item.trim().trim_matches('"').trim_matches('\'');
                        if !trimmed.is_empty() {
                            declared.insert(Self::normalize_package_name(trimmed));
                        }
                    }
                    return declared;
                }
            }
            // [tool.poetry.dependencies] style: `name = "^1.0"` lines.
            for line in tail.lines().skip(1) {
                let line = line.trim();
                if line.starts_with('[') || line.is_empty() {
                    break;
                }
                if let Some((name, _)) = line.split_once('=') {
                    let name = name.trim();
                    if name.eq_ignore_ascii_case("python") || name.is_empty() {
                        continue;
                    }
                    declared.insert(Self::normalize_package_name(name));
                }
            }
        }
        declared
    }

    fn parse_setup_cfg(content: &str) -> BTreeSet<String> {
        let mut declared = BTreeSet::new();
        if let Some(idx) = content.find("install_requires") {
            let tail = &content[idx..];
            for line in tail.lines().skip(1) {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !line.starts_with(' ') && !line.starts_with('\t') {
                    break;
                }
                declared.insert(Self::normalize_package_name(trimmed));
            }
        }
        declared
    }

    fn required_static(manifest: &Manifest) -> BTreeSet<String> {
        let stdlib = python_stdlib();
        let mut required = BTreeSet::new();
        for file in &manifest.files {
            let lower = file.path.to_lowercase();
            if !(lower.ends_with(".py") || lower.ends_with(".pyw")) {
                continue;
            }
            let content = Self::decoded_content(file);
            for root in Self::python_import_roots(&content) {
                if stdlib.contains(root.as_str()) {
                    continue;
                }
                required.insert(Self::apply_alias(&root));
            }
        }
        required
    }

    /// Tolerant line-based import scan (spec §4.5: "tolerant AST" — a full
    /// `ast` walk has no idiomatic Rust counterpart here, so this scans
    /// `import x` / `from x import y` at any indentation, which is what the
    /// guard actually needs: the import root, not full syntax validation).
    fn python_import_roots(source: &str) -> BTreeSet<String> {
        let mut roots = BTreeSet::new();
        for line in source.lines() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix("import ") {
                for part in rest.split(',') {
                    let name = part.split_whitespace().next().unwrap_or("");
                    if let Some(root) = name.split('.').next() {
                        if !root.is_empty() {
                            roots.insert(root.to_string());
                        }
                    }
                }
            } else if let Some(rest) = trimmed.strip_prefix("from ") {
                if let Some((module, _)) = rest.split_once(" import ") {
                    let module = module.trim();
                    if module.starts_with('.') {
                        continue;
                    }
                    if let Some(root) = module.split('.').next() {
                        if !root.is_empty() {
                            roots.insert(root.to_string());
                        }
                    }
                }
            }
        }
        roots
    }

    fn installed_from_build(manifest: &Manifest) -> BTreeSet<String> {
        let pip_re = Regex::new(r"(?i)pip3?\s+install([^&;|\n]*)").expect("valid regex");
        let mut installed = BTreeSet::new();
        let requirements_files = Self::requirements_file_map(manifest);

        let dockerfile = manifest
            .find_file("Dockerfile")
            .map(|f| Self::decoded_content(f))
            .unwrap_or_default();

        for text in [dockerfile.as_str(), manifest.build.command.as_str()] {
            for capture in pip_re.captures_iter(text) {
                let body = capture.get(1).map(|m| m.as_str()).unwrap_or("");
                for token in body.split_whitespace() {
                    if token.starts_with('-') {
                        continue;
                    }
                    if token == "-r" {
                        continue;
                    }
                    if let Some(stripped) = token.strip_prefix("-r") {
                        if let Some(set) = requirements_files.get(stripped) {
                            installed.extend(set.iter().cloned());
                        }
                        continue;
                    }
                    installed.insert(Self::normalize_package_name(token));
                }
                // handle `-r requirements.txt` as two tokens
                let tokens: Vec<&str> = body.split_whitespace().collect();
                for window in tokens.windows(2) {
                    if window[0] == "-r" {
                        if let Some(set) = requirements_files.get(window[1]) {
                            installed.extend(set.iter().cloned());
                        }
                    }
                }
            }
        }
        installed
    }

    fn requirements_file_map(manifest: &Manifest) -> std::collections::HashMap<String, BTreeSet<String>> {
        let mut map = std::collections::HashMap::new();
        for file in &manifest.files {
            let lower = file.path.to_lowercase();
            if lower.starts_with("requirements") && lower.ends_with(".txt") {
                let content = Self::decoded_content(file);
                map.insert(file.path.clone(), Self::parse_requirements_txt(&content));
            }
        }
        map
    }

    fn node_required(manifest: &Manifest) -> BTreeSet<String> {
        let import_re = Regex::new(r#"import\s+[^;]*?from\s+['"]([^'"]+)['"]"#).expect("valid regex");
        let require_re = Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex");
        let mut modules = BTreeSet::new();
        for file in &manifest.files {
            let lower = file.path.to_lowercase();
            if !(lower.ends_with(".js")
                || lower.ends_with(".jsx")
                || lower.ends_with(".ts")
                || lower.ends_with(".tsx")
                || lower.ends_with(".mjs")
                || lower.ends_with(".cjs"))
            {
                continue;
            }
            let content = Self::decoded_content(file);
            for cap in import_re.captures_iter(&content) {
                modules.insert(cap[1].to_string());
            }
            for cap in require_re.captures_iter(&content) {
                modules.insert(cap[1].to_string());
            }
        }
        modules
            .into_iter()
            .filter(|m| !m.starts_with('.') && !m.starts_with('/'))
            .collect()
    }

    fn node_declared(manifest: &Manifest) -> BTreeSet<String> {
        let mut declared = BTreeSet::new();
        if let Some(pkg_json) = manifest.find_file("package.json") {
            let content = Self::decoded_content(pkg_json);
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) {
                for section in ["dependencies", "devDependencies", "optionalDependencies"] {
                    if let Some(obj) = value.get(section).and_then(|v| v.as_object()) {
                        declared.extend(obj.keys().cloned());
                    }
                }
            }
        }
        declared
    }

    fn node_installed(manifest: &Manifest) -> BTreeSet<String> {
        let mut installed = BTreeSet::new();
        let dockerfile = manifest
            .find_file("Dockerfile")
            .map(|f| Self::decoded_content(f))
            .unwrap_or_default();
        for text in [dockerfile.as_str(), manifest.build.command.as_str()] {
            for line in text.replace("&&", " ").lines() {
                let trimmed = line.trim();
                if trimmed.contains("npm install")
                    || trimmed.contains("yarn add")
                    || trimmed.contains("pnpm add")
                {
                    let mut capture = false;
                    for token in trimmed.split_whitespace() {
                        match token {
                            "npm" | "yarn" | "pnpm" => capture = false,
                            "install" | "add" => capture = true,
                            t if capture && !t.starts_with('-') => {
                                installed.insert(t.to_string());
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        installed
    }

    fn os_packages(manifest: &Manifest) -> OsPackages {
        let apt_re = Regex::new(r"apt-get\s+install([^;&]+)").expect("valid regex");
        let apk_re = Regex::new(r"apk\s+add([^;&]+)").expect("valid regex");
        let yum_re = Regex::new(r"yum\s+install([^;&]+)").expect("valid regex");

        let dockerfile = manifest
            .find_file("Dockerfile")
            .map(|f| Self::decoded_content(f))
            .unwrap_or_default();
        let texts = [dockerfile.as_str(), manifest.build.command.as_str()];

        let parse = |pattern: &Regex| -> BTreeSet<String> {
            let mut packages = BTreeSet::new();
            for text in texts {
                for cap in pattern.captures_iter(text) {
                    let body = cap.get(1).map(|m| m.as_str()).unwrap_or("");
                    for token in body.split_whitespace() {
                        if !token.starts_with('-') {
                            packages.insert(token.to_string());
                        }
                    }
                }
            }
            packages
        };

        OsPackages {
            apt: parse(&apt_re),
            apk: parse(&apk_re),
            yum: parse(&yum_re),
        }
    }

    fn decoded_content(file: &crate::domain::manifest::FileEntry) -> String {
        match file.encoding {
            ContentEncoding::Plain => file.content.clone(),
            ContentEncoding::Base64 => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(&file.content)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or_default()
            }
        }
    }

    /// Deterministically adds missing static dependencies (with a known
    /// default version and not on the stdlib denylist) to `manifest.deps`
    /// and synchronises `requirements.txt` (spec §4.4 step 4). Returns the
    /// package names that were actually patched in, for `GuardReport::
    /// auto_patched`.
    fn auto_patch(manifest: &mut Manifest, db_runtime: Option<&str>) -> Vec<String> {
        let declared_from_deps = Self::normalize_deps_field(&manifest.deps);
        let declared_from_requirements = Self::declared_from_requirements(manifest);
        let declared: BTreeSet<String> = declared_from_deps.union(&declared_from_requirements).cloned().collect();
        let required = Self::required_static(manifest);

        let external_db = external_db_packages();
        let mut to_add: Vec<String> = required
            .difference(&declared)
            .filter(|pkg| python_stdlib().iter().all(|s| *s != pkg.as_str()))
            .filter(|pkg| {
                db_runtime.map(|db| db != "mysql").unwrap_or(true) || !external_db.contains(pkg.as_str())
            })
            .filter(|pkg| default_version_for(pkg).is_some())
            .cloned()
            .collect();
        to_add.sort();

        for package in &to_add {
            let version = default_version_for(package).unwrap_or("");
            manifest.deps.push(format!("{package}=={version}"));
        }

        if !to_add.is_empty() {
            Self::sync_requirements_txt(manifest, &to_add);
        }
        to_add
    }

    fn sync_requirements_txt(manifest: &mut Manifest, new_packages: &[String]) {
        use crate::domain::manifest::FileEntry;

        let existing_idx = manifest.files.iter().position(|f| f.path == "requirements.txt");
        let mut lines: Vec<String> = match existing_idx {
            Some(idx) => Self::decoded_content(&manifest.files[idx])
                .lines()
                .map(|l| l.to_string())
                .collect(),
            None => Vec::new(),
        };

        for package in new_packages {
            let version = default_version_for(package).unwrap_or("");
            let entry = format!("{package}=={version}");
            if !lines.iter().any(|l| Self::normalize_package_name(l) == *package) {
                lines.push(entry);
            }
        }

        let content = lines.join("\n") + "\n";
        match existing_idx {
            Some(idx) => manifest.files[idx].content = content,
            None => manifest.files.push(FileEntry {
                path: "requirements.txt".to_string(),
                content,
                encoding: ContentEncoding::Plain,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::{BuildSpec, FileEntry, PocSpec, RunSpec};

    fn manifest(files: Vec<FileEntry>, deps: Vec<&str>, build_command: &str) -> Manifest {
        Manifest {
            intent: "test".to_string(),
            pattern_tags: vec![],
            files,
            deps: deps.into_iter().map(String::from).collect(),
            build: BuildSpec {
                command: build_command.to_string(),
            },
            run: RunSpec {
                command: "python app.py".to_string(),
                port: 8080,
            },
            poc: PocSpec::default(),
            notes: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn py_file(path: &str, content: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            content: content.to_string(),
            encoding: ContentEncoding::Plain,
        }
    }

    #[test]
    fn normalize_strips_version_specifiers_and_applies_alias() {
        assert_eq!(DependencyGuard::normalize_package_name("PyYAML==6.0.1"), "pyyaml");
        assert_eq!(DependencyGuard::normalize_package_name("yaml"), "pyyaml");
        assert_eq!(DependencyGuard::normalize_package_name("Flask_Login[extra]; python_version<'4'"), "flask-login");
    }

    #[test]
    fn missing_dependency_is_reported_without_requirements_file() {
        let mut m = manifest(
            vec![py_file("poc.py", "import requests\n\nrequests.get('x')\n")],
            vec![],
            "",
        );
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, DependencyViolation::MissingDependency { package } if package == "requests")));
        assert!(!report.is_accepted());
    }

    #[test]
    fn declared_deps_satisfy_required_static() {
        let mut m = manifest(
            vec![py_file("poc.py", "import requests\n")],
            vec!["requests==2.32.2"],
            "",
        );
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report.is_accepted());
    }

    #[test]
    fn deps_field_entry_missing_from_requirements_is_flagged() {
        let mut m = manifest(
            vec![
                py_file("poc.py", "import requests\n"),
                FileEntry {
                    path: "requirements.txt".to_string(),
                    content: "flask==3.0.3\n".to_string(),
                    encoding: ContentEncoding::Plain,
                },
            ],
            vec!["requests"],
            "",
        );
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, DependencyViolation::DeclaredNotInRequirements { package } if package == "requests")));
    }

    #[test]
    fn required_not_installed_by_build_command_is_flagged() {
        let mut m = manifest(
            vec![py_file("poc.py", "import requests\n")],
            vec!["requests"],
            "pip install flask",
        );
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, DependencyViolation::RequiredNotInstalled { package } if package == "requests")));
    }

    #[test]
    fn stdlib_imports_never_violate() {
        let mut m = manifest(vec![py_file("app.py", "import os\nimport sys\nimport json\n")], vec![], "");
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report.is_accepted());
    }

    #[test]
    fn auto_patch_adds_missing_dependency_and_requirements_entry() {
        let mut m = manifest(vec![py_file("poc.py", "import requests\n")], vec![], "pip install -r requirements.txt");
        let report = DependencyGuard::evaluate(&mut m, true, None);
        assert!(m.deps.iter().any(|d| d.starts_with("requests==")));
        let req_file = m.find_file("requirements.txt").expect("requirements.txt synthesised");
        assert!(req_file.content.contains("requests=="));
        assert!(report.is_accepted());
        assert_eq!(report.auto_patched, vec!["requests".to_string()]);
    }

    #[test]
    fn auto_patched_is_empty_when_nothing_needed_patching() {
        let mut m = manifest(
            vec![py_file("poc.py", "import requests\n")],
            vec!["requests==2.32.2"],
            "pip install -r requirements.txt",
        );
        let report = DependencyGuard::evaluate(&mut m, true, None);
        assert!(report.auto_patched.is_empty());
    }

    #[test]
    fn node_require_and_import_are_detected_and_checked_against_package_json() {
        let mut m = manifest(
            vec![
                FileEntry {
                    path: "index.js".to_string(),
                    content: "const express = require('express');\nimport {z} from 'zod';\n".to_string(),
                    encoding: ContentEncoding::Plain,
                },
                FileEntry {
                    path: "package.json".to_string(),
                    content: r#"{"dependencies": {"express": "^4.18.0"}}"#.to_string(),
                    encoding: ContentEncoding::Plain,
                },
            ],
            vec![],
            "",
        );
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, DependencyViolation::MissingNodeDependency { package } if package == "zod")));
        assert!(!report
            .violations
            .iter()
            .any(|v| matches!(v, DependencyViolation::MissingNodeDependency { package } if package == "express")));
    }

    #[test]
    fn os_packages_are_recorded_non_blocking() {
        let mut m = manifest(
            vec![FileEntry {
                path: "Dockerfile".to_string(),
                content: "RUN apt-get install -y libpq-dev curl\n".to_string(),
                encoding: ContentEncoding::Plain,
            }],
            vec![],
            "",
        );
        let report = DependencyGuard::evaluate(&mut m, false, None);
        assert!(report.os_packages.apt.contains("libpq-dev"));
        assert!(report.os_packages.apt.contains("curl"));
        assert!(report.is_accepted());
    }
}
