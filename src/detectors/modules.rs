//! Loaded-module probe.
//!
//! Hooking frameworks and instrumentation agents are delivered as dynamic
//! libraries injected into the process. This probe walks the list of
//! mapped images and looks for catalog name fragments in their paths.
//!
//! # Platform Sources
//!
//! - **Darwin**: the dyld image list. The count is re-read before every
//!   index so images unloading mid-walk cannot push us out of range.
//! - **Linux/Android**: file-backed mappings in `/proc/self/maps`.

use tracing::trace;

use super::{settle, Probe};
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{ProbeId, ProbeResult};
use crate::error::ProbeError;

/// Source of loaded image paths.
pub trait ImageList: Send + Sync {
    fn image_names(&self) -> Result<Vec<String>, ProbeError>;
}

/// Images mapped into the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemImageList;

impl ImageList for SystemImageList {
    fn image_names(&self) -> Result<Vec<String>, ProbeError> {
        platform_image_names()
    }
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
fn platform_image_names() -> Result<Vec<String>, ProbeError> {
    use crate::ffi::{_dyld_get_image_name, _dyld_image_count};
    use std::ffi::CStr;

    let mut names = Vec::new();
    let mut index = 0u32;
    // SAFETY: both calls are thread-safe dyld queries; a null name means
    // the index went stale and is skipped, and the returned string is
    // owned by dyld and copied before the next call.
    unsafe {
        while index < _dyld_image_count() {
            let name = _dyld_get_image_name(index);
            if !name.is_null() {
                names.push(CStr::from_ptr(name).to_string_lossy().into_owned());
            }
            index += 1;
        }
    }
    Ok(names)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn platform_image_names() -> Result<Vec<String>, ProbeError> {
    let maps = std::fs::read_to_string("/proc/self/maps")
        .map_err(|err| ProbeError::io("read /proc/self/maps", err))?;
    Ok(parse_maps(&maps))
}

#[cfg(not(any(
    target_os = "ios",
    target_os = "macos",
    target_os = "linux",
    target_os = "android"
)))]
fn platform_image_names() -> Result<Vec<String>, ProbeError> {
    Err(ProbeError::Unsupported)
}

/// File-backed pathnames of a maps listing, first occurrence order.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn parse_maps(maps: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in maps.lines() {
        let Some(path) = maps_pathname(line) else {
            continue;
        };
        if path.starts_with('/') && !names.iter().any(|name| name == path) {
            names.push(path.to_string());
        }
    }
    names
}

/// Everything after the inode column, verbatim apart from the padding the
/// kernel puts in front of it.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn maps_pathname(line: &str) -> Option<&str> {
    // address perms offset dev inode pathname
    let mut rest = line;
    for _ in 0..5 {
        let (_, tail) = rest.trim_start().split_once(char::is_whitespace)?;
        rest = tail;
    }
    Some(rest.trim_start())
}

pub struct LoadedModuleProbe<L> {
    images: L,
}

impl<L: ImageList> LoadedModuleProbe<L> {
    pub fn new(images: L) -> Self {
        Self { images }
    }

    fn scan(&self, catalog: &ArtifactCatalog) -> Result<Option<String>, ProbeError> {
        let fragments: Vec<(String, &String)> = catalog
            .library_fragments()
            .iter()
            .map(|f| (f.to_lowercase(), f))
            .collect();
        if fragments.is_empty() {
            return Ok(None);
        }

        for image in self.images.image_names()? {
            let lowered = image.to_lowercase();
            if let Some((_, fragment)) = fragments.iter().find(|(f, _)| lowered.contains(f.as_str())) {
                trace!(image = %image, fragment = %fragment, "suspicious image");
                return Ok(Some(format!("{image} ({fragment})")));
            }
        }
        Ok(None)
    }
}

impl<L: ImageList> Probe for LoadedModuleProbe<L> {
    fn id(&self) -> ProbeId {
        ProbeId::LoadedModule
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        settle(self.id(), self.scan(catalog))
    }
}
