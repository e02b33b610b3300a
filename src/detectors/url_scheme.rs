//! URL-scheme probe.
//!
//! Package managers that only exist on jailbroken devices register URL
//! schemes (`cydia://`, `sileo://`, ...). Whether a handler exists can only
//! be answered by the host's UI framework, so the host supplies a
//! [`UrlSchemeHandler`]. Hosts without one simply leave this probe out of
//! the set.

use std::sync::Arc;

use tracing::trace;

use super::{settle, Probe};
use crate::engine::catalog::{is_scheme_url, ArtifactCatalog};
use crate::engine::policy::{ProbeId, ProbeResult};

/// Answers "is an app registered for this URL?".
pub trait UrlSchemeHandler: Send + Sync {
    fn can_open(&self, url: &str) -> bool;
}

pub struct UrlSchemeProbe {
    handler: Arc<dyn UrlSchemeHandler>,
}

impl UrlSchemeProbe {
    pub fn new(handler: Arc<dyn UrlSchemeHandler>) -> Self {
        Self { handler }
    }
}

impl Probe for UrlSchemeProbe {
    fn id(&self) -> ProbeId {
        ProbeId::UrlScheme
    }

    fn run(&self, catalog: &ArtifactCatalog) -> ProbeResult {
        let hit = catalog
            .url_schemes()
            .iter()
            // a scheme that does not form a URL cannot resolve
            .filter(|scheme| is_scheme_url(scheme))
            .find(|scheme| {
                trace!(scheme = %scheme, "querying URL handler");
                self.handler.can_open(scheme)
            })
            .cloned();
        settle(self.id(), Ok(hit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Registered {
        schemes: Vec<&'static str>,
        asked: Mutex<Vec<String>>,
    }

    impl UrlSchemeHandler for Registered {
        fn can_open(&self, url: &str) -> bool {
            self.asked.lock().unwrap().push(url.to_string());
            self.schemes.iter().any(|s| *s == url)
        }
    }

    fn handler(schemes: Vec<&'static str>) -> Arc<Registered> {
        Arc::new(Registered {
            schemes,
            asked: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_no_registered_scheme_is_negative() {
        let catalog = ArtifactCatalog::embedded().unwrap();
        let registered = handler(vec!["mailto://"]);
        let result = UrlSchemeProbe::new(registered.clone()).run(&catalog);
        assert!(!result.positive);
        assert_eq!(registered.asked.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_registered_scheme_is_positive() {
        let catalog = ArtifactCatalog::embedded().unwrap();
        let result = UrlSchemeProbe::new(handler(vec!["sileo://"])).run(&catalog);
        assert!(result.positive);
        assert_eq!(result.probe, ProbeId::UrlScheme);
        assert_eq!(result.detail.as_deref(), Some("sileo://"));
    }
}
