//! Artifact Catalog
//!
//! Immutable signature tables consulted by the probes: filesystem paths,
//! URL schemes, library-name fragments, environment variables, process
//! names and loopback ports associated with jailbreak tooling or
//! instrumentation frameworks.
//!
//! The production tables ship as embedded JSON and are validated once at
//! startup. A catalog is never mutated after construction, so it can be
//! shared behind an `Arc` by probes running on any thread.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::error::CatalogError;

const EMBEDDED_CATALOG: &str = include_str!("catalog.json");

/// Signature categories, one per probe family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Paths,
    UrlSchemes,
    SymlinkPaths,
    LibraryFragments,
    Environment,
    ProcessNames,
    Ports,
    HandshakePorts,
    TempArtifactPrefixes,
}

/// An environment variable tied to tooling.
///
/// Without a marker, presence alone is a hit. With a marker, the value
/// must also contain it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvIndicator {
    pub name: String,
    #[serde(default)]
    pub marker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactCatalog {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    url_schemes: Vec<String>,
    #[serde(default = "default_write_probe_dir")]
    write_probe_dir: PathBuf,
    #[serde(default)]
    symlink_paths: Vec<String>,
    #[serde(default = "default_stock_prefix")]
    symlink_stock_prefix: String,
    #[serde(default)]
    library_fragments: Vec<String>,
    #[serde(default)]
    environment: Vec<EnvIndicator>,
    #[serde(default)]
    process_names: Vec<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    handshake_ports: Vec<u16>,
    #[serde(default = "default_temp_artifact_dir")]
    temp_artifact_dir: PathBuf,
    #[serde(default)]
    temp_artifact_prefixes: Vec<String>,
}

fn default_write_probe_dir() -> PathBuf {
    PathBuf::from("/private/")
}

fn default_stock_prefix() -> String {
    "/var/stash".to_string()
}

fn default_temp_artifact_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl ArtifactCatalog {
    /// Load the catalog compiled into the binary.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    /// Parse and validate a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut total = 0;
        for category in Category::iter() {
            let signatures = self.signatures(category);
            if signatures.iter().any(|s| s.trim().is_empty()) {
                return Err(CatalogError::BlankSignature { category });
            }
            total += signatures.len();
        }
        if total == 0 {
            return Err(CatalogError::Empty);
        }

        for (category, ports) in [
            (Category::Ports, &self.ports),
            (Category::HandshakePorts, &self.handshake_ports),
        ] {
            if ports.contains(&0) {
                return Err(CatalogError::InvalidPort { category });
            }
        }

        if let Some(bad) = self.url_schemes.iter().find(|s| !is_scheme_url(s)) {
            return Err(CatalogError::InvalidScheme {
                scheme: bad.clone(),
            });
        }
        Ok(())
    }

    /// Ordered signatures of one category, rendered as strings.
    pub fn signatures(&self, category: Category) -> Vec<String> {
        match category {
            Category::Paths => self.paths.clone(),
            Category::UrlSchemes => self.url_schemes.clone(),
            Category::SymlinkPaths => self.symlink_paths.clone(),
            Category::LibraryFragments => self.library_fragments.clone(),
            Category::Environment => self.environment.iter().map(|e| e.name.clone()).collect(),
            Category::ProcessNames => self.process_names.clone(),
            Category::Ports => self.ports.iter().map(u16::to_string).collect(),
            Category::HandshakePorts => self.handshake_ports.iter().map(u16::to_string).collect(),
            Category::TempArtifactPrefixes => self.temp_artifact_prefixes.clone(),
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn url_schemes(&self) -> &[String] {
        &self.url_schemes
    }

    /// System-protected directory the write probes try to write into.
    pub fn write_probe_dir(&self) -> &Path {
        &self.write_probe_dir
    }

    pub fn symlink_paths(&self) -> &[String] {
        &self.symlink_paths
    }

    /// Prefix a stock redirect of a symlinked system path resolves under.
    pub fn symlink_stock_prefix(&self) -> &str {
        &self.symlink_stock_prefix
    }

    pub fn library_fragments(&self) -> &[String] {
        &self.library_fragments
    }

    pub fn environment(&self) -> &[EnvIndicator] {
        &self.environment
    }

    pub fn process_names(&self) -> &[String] {
        &self.process_names
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn handshake_ports(&self) -> &[u16] {
        &self.handshake_ports
    }

    pub fn temp_artifact_dir(&self) -> &Path {
        &self.temp_artifact_dir
    }

    pub fn temp_artifact_prefixes(&self) -> &[String] {
        &self.temp_artifact_prefixes
    }
}

/// `scheme://` where the scheme starts with a letter and continues with
/// letters, digits, `+`, `-` or `.`.
pub(crate) fn is_scheme_url(candidate: &str) -> bool {
    let Some(scheme) = candidate.strip_suffix("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Incremental catalog construction, mostly for hosts that ship their own
/// tables and for tests.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    catalog: ArtifactCatalog,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self {
            catalog: ArtifactCatalog {
                paths: Vec::new(),
                url_schemes: Vec::new(),
                write_probe_dir: default_write_probe_dir(),
                symlink_paths: Vec::new(),
                symlink_stock_prefix: default_stock_prefix(),
                library_fragments: Vec::new(),
                environment: Vec::new(),
                process_names: Vec::new(),
                ports: Vec::new(),
                handshake_ports: Vec::new(),
                temp_artifact_dir: default_temp_artifact_dir(),
                temp_artifact_prefixes: Vec::new(),
            },
        }
    }
}

impl CatalogBuilder {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.catalog.paths.push(path.into());
        self
    }

    pub fn url_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.catalog.url_schemes.push(scheme.into());
        self
    }

    pub fn write_probe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.catalog.write_probe_dir = dir.into();
        self
    }

    pub fn symlink_path(mut self, path: impl Into<String>) -> Self {
        self.catalog.symlink_paths.push(path.into());
        self
    }

    pub fn symlink_stock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.catalog.symlink_stock_prefix = prefix.into();
        self
    }

    pub fn library_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.catalog.library_fragments.push(fragment.into());
        self
    }

    pub fn env_var(mut self, name: impl Into<String>) -> Self {
        self.catalog.environment.push(EnvIndicator {
            name: name.into(),
            marker: None,
        });
        self
    }

    pub fn env_marker(mut self, name: impl Into<String>, marker: impl Into<String>) -> Self {
        self.catalog.environment.push(EnvIndicator {
            name: name.into(),
            marker: Some(marker.into()),
        });
        self
    }

    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.catalog.process_names.push(name.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.catalog.ports.push(port);
        self
    }

    pub fn handshake_port(mut self, port: u16) -> Self {
        self.catalog.handshake_ports.push(port);
        self
    }

    pub fn temp_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.catalog.temp_artifact_dir = dir.into();
        self
    }

    pub fn temp_artifact_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.catalog.temp_artifact_prefixes.push(prefix.into());
        self
    }

    pub fn build(self) -> Result<ArtifactCatalog, CatalogError> {
        self.catalog.validate()?;
        Ok(self.catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalog_populates_every_category() {
        let catalog = ArtifactCatalog::embedded().expect("embedded catalog must load");
        for category in Category::iter() {
            assert!(
                !catalog.signatures(category).is_empty(),
                "category {category} is empty"
            );
        }
        assert_eq!(catalog.ports(), &[27042, 27043, 63521]);
        assert_eq!(catalog.symlink_stock_prefix(), "/var/stash");
        assert!(catalog
            .environment()
            .iter()
            .any(|e| e.name == "FRIDA_" && e.marker.as_deref() == Some("FRIDA")));
    }

    #[test]
    fn test_signatures_keep_declared_order() {
        let catalog = ArtifactCatalog::embedded().unwrap();
        let schemes = catalog.signatures(Category::UrlSchemes);
        assert_eq!(schemes, ["cydia://", "sileo://", "zbra://", "undecimus://"]);
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let err = ArtifactCatalog::from_json("{ \"paths\": [").unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));

        let err = ArtifactCatalog::from_json(r#"{ "pathz": [] }"#).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));
    }

    #[test]
    fn test_empty_catalog_is_fatal() {
        assert!(matches!(
            ArtifactCatalog::from_json("{}").unwrap_err(),
            CatalogError::Empty
        ));
        assert!(matches!(
            ArtifactCatalog::builder().build().unwrap_err(),
            CatalogError::Empty
        ));
    }

    #[test]
    fn test_blank_signature_rejected() {
        let err = ArtifactCatalog::builder()
            .path("/bin/bash")
            .library_fragment("  ")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::BlankSignature {
                category: Category::LibraryFragments
            }
        ));
    }

    #[test]
    fn test_port_zero_rejected() {
        let err = ArtifactCatalog::builder().port(0).build().unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidPort {
                category: Category::Ports
            }
        ));
    }

    #[test]
    fn test_scheme_validation() {
        assert!(is_scheme_url("cydia://"));
        assert!(is_scheme_url("x-callback+v1.2://"));
        assert!(!is_scheme_url("cydia"));
        assert!(!is_scheme_url("://"));
        assert!(!is_scheme_url("1cydia://"));
        assert!(!is_scheme_url("cy dia://"));

        let err = ArtifactCatalog::builder().url_scheme("cydia:").build().unwrap_err();
        assert!(matches!(err, CatalogError::InvalidScheme { .. }));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::LibraryFragments.to_string(), "library_fragments");
        assert_eq!(Category::Ports.to_string(), "ports");
    }
}
