//! Project archive handling.
//!
//! Two jobs: rebuild a ZIP from loose files uploaded with their relative paths,
//! and guess which Gradle version a project expects by looking at the build
//! manifests inside its archive.

use crate::{sanitize::sanitize_relative_path, validation::ValidationError};
use bytes::Bytes;
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, Cursor, Read, Seek, Write},
    sync::LazyLock,
};
use thiserror::Error;
use tracing::debug;
use zip::{
    CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions,
};

/// Manifests larger than this are not worth scanning.
const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

static WRAPPER_DISTRIBUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"distributionUrl\s*=\s*\S*gradle-(\d+(?:\.\d+){1,2}(?:-rc-\d+)?)-(?:bin|all)\.zip")
        .expect("valid regex")
});

static AGP_CLASSPATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"com\.android\.tools\.build:gradle:(\d+\.\d+(?:\.\d+)?)"#).expect("valid regex")
});

static AGP_PLUGIN_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"id\s*\(?\s*["']com\.android\.(?:application|library)["']\s*\)?\s*version\s*["'](\d+\.\d+(?:\.\d+)?)["']"#,
    )
    .expect("valid regex")
});

static AGP_VERSION_CATALOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*(?:agp|androidGradlePlugin|android-gradle-plugin|androidGradle)\s*=\s*["'](\d+\.\d+(?:\.\d+)?)["']"#,
    )
    .expect("valid regex")
});

/// Minimum Gradle release for each Android Gradle Plugin `major.minor`, newest first.
const AGP_TO_GRADLE: &[((u32, u32), &str)] = &[
    ((8, 7), "8.9"),
    ((8, 6), "8.7"),
    ((8, 5), "8.7"),
    ((8, 4), "8.6"),
    ((8, 3), "8.4"),
    ((8, 2), "8.2"),
    ((8, 1), "8.0"),
    ((8, 0), "8.0"),
    ((7, 4), "7.5"),
    ((7, 3), "7.4"),
    ((7, 2), "7.3.3"),
    ((7, 1), "7.2"),
    ((7, 0), "7.0"),
    ((4, 2), "6.7.1"),
];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("failed to write archive: {0}")]
    Write(#[from] ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A file uploaded individually as part of a folder upload.
#[derive(Debug, Clone)]
pub struct LooseFile {
    /// Relative path as sent by the client, e.g. `MyApp/app/build.gradle`.
    pub path: String,
    pub data: Bytes,
}

/// How a Gradle version was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// Read from `gradle-wrapper.properties`.
    Wrapper,
    /// Derived from the Android Gradle Plugin version.
    PluginMapping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildToolHint {
    pub gradle_version: String,
    pub source: DetectionSource,
    /// Archive entry the version was read from.
    pub manifest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ManifestKind {
    Wrapper,
    VersionCatalog,
    BuildScript,
}

/// Rebuild a ZIP archive from loose files, recreating their folder hierarchy.
pub fn assemble_archive(files: Vec<LooseFile>) -> Result<Bytes, ArchiveError> {
    let mut entries = BTreeMap::new();
    for file in files {
        let path = sanitize_relative_path(&file.path)?;
        if entries.insert(path.clone(), file.data).is_some() {
            return Err(ValidationError::DuplicatePath(path).into());
        }
    }

    let mut directories = BTreeSet::new();
    for path in entries.keys() {
        let mut parent = String::new();
        let components: Vec<&str> = path.split('/').collect();
        for component in &components[..components.len() - 1] {
            parent.push_str(component);
            parent.push('/');
            directories.insert(parent.clone());
        }
    }
    if let Some(dir) = directories.iter().find(|d| entries.contains_key(d.trim_end_matches('/'))) {
        return Err(ValidationError::DuplicatePath(dir.trim_end_matches('/').to_string()).into());
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for dir in &directories {
        writer.add_directory(dir.as_str(), options)?;
    }
    for (path, data) in &entries {
        writer.start_file(path.as_str(), options)?;
        writer.write_all(data)?;
    }
    let cursor = writer.finish()?;

    debug!(
        "assembled archive with {} files in {} directories",
        entries.len(),
        directories.len()
    );
    Ok(Bytes::from(cursor.into_inner()))
}

/// Guess the Gradle version a project needs from the manifests in its archive.
///
/// The wrapper properties win over plugin versions; shallower entries win over
/// nested ones. Returns `None` when nothing recognizable is found.
pub fn detect_build_tool<R: Read + Seek>(reader: R) -> Result<Option<BuildToolHint>, ArchiveError> {
    let mut archive = ZipArchive::new(reader).map_err(invalid_archive)?;

    let mut candidates: Vec<(ManifestKind, usize, usize, String)> = archive
        .file_names()
        .filter_map(|name| {
            classify(name).map(|kind| (kind, name.matches('/').count(), name.to_string()))
        })
        .enumerate()
        .map(|(order, (kind, depth, name))| (kind, depth, order, name))
        .collect();
    candidates.sort();

    for (kind, _, _, name) in candidates {
        let Some(text) = read_manifest(&mut archive, &name)? else {
            continue;
        };
        let hint = match kind {
            ManifestKind::Wrapper => {
                WRAPPER_DISTRIBUTION
                    .captures(&text)
                    .map(|caps| BuildToolHint {
                        gradle_version: caps[1].to_string(),
                        source: DetectionSource::Wrapper,
                        manifest: name.clone(),
                    })
            }
            ManifestKind::VersionCatalog => {
                plugin_hint(&AGP_VERSION_CATALOG, &text, &name)
            }
            ManifestKind::BuildScript => plugin_hint(&AGP_CLASSPATH, &text, &name)
                .or_else(|| plugin_hint(&AGP_PLUGIN_BLOCK, &text, &name)),
        };
        if let Some(hint) = hint {
            debug!(
                "detected gradle {} from {} ({:?})",
                hint.gradle_version, hint.manifest, hint.source
            );
            return Ok(Some(hint));
        }
    }
    Ok(None)
}

/// Map an Android Gradle Plugin version to the oldest Gradle release it supports.
pub fn gradle_for_plugin(agp_version: &str) -> Option<&'static str> {
    let mut parts = agp_version.split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;

    if let Some((_, gradle)) = AGP_TO_GRADLE.iter().find(|(v, _)| *v == (major, minor)) {
        return Some(*gradle);
    }
    // Newer than the table: the newest known requirement is the best guess.
    match AGP_TO_GRADLE.first() {
        Some((newest, gradle)) if (major, minor) > *newest => Some(*gradle),
        _ => None,
    }
}

fn plugin_hint(pattern: &Regex, text: &str, manifest: &str) -> Option<BuildToolHint> {
    let agp = pattern.captures(text)?;
    let gradle = gradle_for_plugin(&agp[1])?;
    Some(BuildToolHint {
        gradle_version: gradle.to_string(),
        source: DetectionSource::PluginMapping,
        manifest: manifest.to_string(),
    })
}

fn classify(name: &str) -> Option<ManifestKind> {
    if name.starts_with("__MACOSX/") || name.ends_with('/') {
        return None;
    }
    let lower = name.to_ascii_lowercase();
    if lower == "gradle/wrapper/gradle-wrapper.properties"
        || lower.ends_with("/gradle/wrapper/gradle-wrapper.properties")
    {
        return Some(ManifestKind::Wrapper);
    }
    let base = lower.rsplit('/').next().unwrap_or(&lower);
    match base {
        "libs.versions.toml" => Some(ManifestKind::VersionCatalog),
        "build.gradle" | "build.gradle.kts" | "settings.gradle" | "settings.gradle.kts" => {
            Some(ManifestKind::BuildScript)
        }
        _ => None,
    }
}

fn read_manifest<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, ArchiveError> {
    let entry = archive.by_name(name).map_err(invalid_archive)?;
    if entry.size() > MAX_MANIFEST_BYTES {
        debug!("skipping oversized manifest {} ({} bytes)", name, entry.size());
        return Ok(None);
    }
    let mut raw = Vec::with_capacity(entry.size() as usize);
    entry
        .take(MAX_MANIFEST_BYTES)
        .read_to_end(&mut raw)
        .map_err(|err| ValidationError::InvalidArchive(format!("unreadable entry {}: {}", name, err)))?;
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

fn invalid_archive(err: ZipError) -> ArchiveError {
    ValidationError::InvalidArchive(err.to_string()).into()
}
