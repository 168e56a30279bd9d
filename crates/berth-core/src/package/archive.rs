//! Package archives (`.tgz`).
//!
//! An archive is a gzip-compressed tar with a single top-level directory:
//!
//! ```text
//! echo/
//!   package.yaml
//!   values.yaml        (optional)
//!   templates/...
//! ```

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Component;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, Header};

use super::error::{ResolveError, ResolveResult};
use super::manifest::{MANIFEST_FILE, Package, TEMPLATES_DIR, VALUES_FILE};

/// Parse archive bytes into a package.
pub fn read_archive(bytes: &[u8], origin: &str) -> ResolveResult<Package> {
    let malformed = |reason: String| ResolveError::malformed(origin, reason);

    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| malformed(format!("not a gzip tar archive: {}", e)))?;

    let mut top: Option<String> = None;
    let mut manifest = None;
    let mut values = None;
    let mut templates = BTreeMap::new();

    for entry in entries {
        let mut entry = entry.map_err(|e| malformed(format!("corrupt archive entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| malformed(format!("invalid entry path: {}", e)))?
            .into_owned();

        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                Component::CurDir => {}
                _ => return Err(malformed(format!("unsafe entry path {}", path.display()))),
            }
        }
        let Some((first, rest)) = parts.split_first() else {
            continue;
        };

        match &top {
            Some(existing) if existing != first => {
                return Err(malformed(format!(
                    "more than one top-level directory ({} and {})",
                    existing, first
                )));
            }
            Some(_) => {}
            None => top = Some(first.clone()),
        }

        if entry.header().entry_type().is_dir() || rest.is_empty() {
            continue;
        }
        if !entry.header().entry_type().is_file() {
            return Err(malformed(format!(
                "unsupported entry type at {}",
                path.display()
            )));
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| malformed(format!("{}: {}", path.display(), e)))?;

        match rest {
            [file] if file == MANIFEST_FILE => manifest = Some(content),
            [file] if file == VALUES_FILE => values = Some(content),
            [dir, template @ ..] if dir == TEMPLATES_DIR && !template.is_empty() => {
                templates.insert(template.join("/"), content);
            }
            _ => tracing::debug!(path = %path.display(), "ignoring archive entry"),
        }
    }

    let manifest =
        manifest.ok_or_else(|| malformed(format!("archive has no {}", MANIFEST_FILE)))?;
    Package::from_parts(origin, &manifest, values.as_deref(), templates)
}

/// Pack a package into archive bytes, rooted at a directory named after it.
pub fn write_archive(package: &Package) -> std::io::Result<Vec<u8>> {
    let root = package.name();
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let manifest = serde_yaml::to_string(&package.manifest).map_err(std::io::Error::other)?;
    append_file(&mut builder, &format!("{}/{}", root, MANIFEST_FILE), &manifest)?;

    let values = serde_yaml::to_string(&package.values).map_err(std::io::Error::other)?;
    append_file(&mut builder, &format!("{}/{}", root, VALUES_FILE), &values)?;

    for (name, source) in &package.templates {
        append_file(
            &mut builder,
            &format!("{}/{}/{}", root, TEMPLATES_DIR, name),
            source,
        )?;
    }

    builder.into_inner()?.finish()
}

fn append_file<W: std::io::Write>(
    builder: &mut Builder<W>,
    path: &str,
    content: &str,
) -> std::io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content.as_bytes())
}
