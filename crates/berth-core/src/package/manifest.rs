//! Package manifest and in-memory package contents.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use super::error::{ResolveError, ResolveResult};

pub const MANIFEST_FILE: &str = "package.yaml";
pub const VALUES_FILE: &str = "values.yaml";
pub const TEMPLATES_DIR: &str = "templates";

/// `package.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(
        default,
        rename = "appVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_version: Option<String>,
}

impl PackageManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            app_version: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("manifest name is empty".to_string());
        }
        if !is_safe_segment(&self.name) {
            return Err(format!("manifest name '{}' is not a valid name", self.name));
        }
        if self.version.is_empty() {
            return Err("manifest version is empty".to_string());
        }
        if !is_safe_segment(&self.version) {
            return Err(format!("manifest version '{}' is not valid", self.version));
        }
        Ok(())
    }
}

/// A parsed package: manifest, default values and resource templates.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub manifest: PackageManifest,
    /// Template sources keyed by path relative to `templates/`
    pub templates: BTreeMap<String, String>,
    /// Default values; always a JSON object
    pub values: serde_json::Value,
}

impl Package {
    pub fn new(manifest: PackageManifest) -> Self {
        Self {
            manifest,
            templates: BTreeMap::new(),
            values: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(name.into(), source.into());
        self
    }

    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.values = values;
        self
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Load an unpacked package directory.
    pub fn load_dir(dir: &Path) -> ResolveResult<Self> {
        let origin = dir.display().to_string();
        let read = |path: &Path| {
            std::fs::read_to_string(path)
                .map_err(|e| ResolveError::malformed(&origin, format!("{}: {}", path.display(), e)))
        };

        let manifest = read(&dir.join(MANIFEST_FILE))?;
        let values_path = dir.join(VALUES_FILE);
        let values = if values_path.is_file() {
            Some(read(&values_path)?)
        } else {
            None
        };

        let mut templates = BTreeMap::new();
        let templates_dir = dir.join(TEMPLATES_DIR);
        if templates_dir.is_dir() {
            collect_templates(&templates_dir, &templates_dir, &mut templates)
                .map_err(|e| ResolveError::malformed(&origin, e))?;
        }

        Self::from_parts(&origin, &manifest, values.as_deref(), templates)
    }

    /// Assemble a package from raw file contents.
    pub(crate) fn from_parts(
        origin: &str,
        manifest: &str,
        values: Option<&str>,
        templates: BTreeMap<String, String>,
    ) -> ResolveResult<Self> {
        let manifest: PackageManifest = serde_yaml::from_str(manifest)
            .map_err(|e| ResolveError::malformed(origin, format!("{}: {}", MANIFEST_FILE, e)))?;
        manifest
            .validate()
            .map_err(|reason| ResolveError::malformed(origin, reason))?;

        let values = match values {
            Some(content) => parse_values(content)
                .map_err(|e| ResolveError::malformed(origin, format!("{}: {}", VALUES_FILE, e)))?,
            None => serde_json::Value::Object(Default::default()),
        };

        Ok(Self {
            manifest,
            templates,
            values,
        })
    }
}

/// Parse YAML values into a JSON object. An empty document is an empty object.
pub fn parse_values(content: &str) -> Result<serde_json::Value, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    let value = serde_json::to_value(yaml).map_err(|e| e.to_string())?;
    match value {
        serde_json::Value::Null => Ok(serde_json::Value::Object(Default::default())),
        serde_json::Value::Object(_) => Ok(value),
        _ => Err("values must be a mapping".to_string()),
    }
}

fn collect_templates(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, String>,
) -> Result<(), String> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| format!("{}: {}", dir.display(), e))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_templates(root, &path, out)?;
            continue;
        }
        let content =
            std::fs::read_to_string(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let relative = path
            .strip_prefix(root)
            .map_err(|e| e.to_string())?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.insert(relative, content);
    }
    Ok(())
}

/// A single path segment safe to embed in cache file names.
pub(crate) fn is_safe_segment(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !value.contains(['/', '\\'])
        && !value.chars().any(char::is_whitespace)
}
