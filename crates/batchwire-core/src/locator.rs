//! Resource locator seam: canonical URLs for entity sets, instances and the
//! batch endpoint.

use url::Url;

use crate::error::BatchError;

/// Produces the URLs the coordinator embeds in operations. Embedded request
/// lines use service-relative paths; only the batch endpoint is absolute.
pub trait ResourceLocator: Send + Sync {
    /// Service-relative URL of an entity set, e.g. `"/Authors"`.
    fn collection_url(&self, entity_set: &str) -> Option<String>;

    /// Absolute URL of the batch endpoint.
    fn batch_url(&self) -> String;

    /// Host for the embedded `Host:` headers.
    fn host(&self) -> String;

    /// Turn an absolute instance URL into its service-relative form,
    /// keeping the leading slash. URLs outside the service root pass
    /// through unchanged.
    fn relativize(&self, absolute: &str) -> String;
}

/// Locator rooted at a service base URL, e.g. `https://host/odata/`.
#[derive(Debug, Clone)]
pub struct ServiceRoot {
    root: Url,
}

impl ServiceRoot {
    /// Parse the service root. A missing trailing slash is added so joins
    /// and relativization behave uniformly.
    pub fn parse(url: &str) -> Result<Self, BatchError> {
        let mut root =
            Url::parse(url).map_err(|e| BatchError::InvalidServiceRoot(e.to_string()))?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        Ok(Self { root })
    }

    /// The service root as a string, trailing slash included.
    pub fn as_str(&self) -> &str {
        self.root.as_str()
    }
}

impl ResourceLocator for ServiceRoot {
    fn collection_url(&self, entity_set: &str) -> Option<String> {
        if entity_set.is_empty() {
            None
        } else {
            Some(format!("/{entity_set}"))
        }
    }

    fn batch_url(&self) -> String {
        format!("{}$batch", self.root)
    }

    fn host(&self) -> String {
        match (self.root.host_str(), self.root.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => "localhost".to_string(),
        }
    }

    fn relativize(&self, absolute: &str) -> String {
        let base = self.root.as_str();
        if absolute.starts_with(base) {
            // keep the slash that ends the service root
            absolute[base.len() - 1..].to_string()
        } else {
            absolute.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        let a = ServiceRoot::parse("https://svc.example.com/odata").unwrap();
        let b = ServiceRoot::parse("https://svc.example.com/odata/").unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn batch_url_appends_batch_segment() {
        let root = ServiceRoot::parse("https://svc.example.com/odata/").unwrap();
        assert_eq!(root.batch_url(), "https://svc.example.com/odata/$batch");
    }

    #[test]
    fn host_includes_port_when_present() {
        let root = ServiceRoot::parse("http://localhost:8080/odata/").unwrap();
        assert_eq!(root.host(), "localhost:8080");
        let root = ServiceRoot::parse("https://svc.example.com/odata/").unwrap();
        assert_eq!(root.host(), "svc.example.com");
    }

    #[test]
    fn relativize_keeps_leading_slash() {
        let root = ServiceRoot::parse("https://svc.example.com/odata/").unwrap();
        assert_eq!(
            root.relativize("https://svc.example.com/odata/Authors(42)"),
            "/Authors(42)"
        );
        // foreign URLs pass through
        assert_eq!(
            root.relativize("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn collection_url_rejects_empty_set() {
        let root = ServiceRoot::parse("https://svc.example.com/odata/").unwrap();
        assert_eq!(root.collection_url("Authors").as_deref(), Some("/Authors"));
        assert!(root.collection_url("").is_none());
    }

    #[test]
    fn invalid_root_is_an_error() {
        assert!(matches!(
            ServiceRoot::parse("not a url"),
            Err(BatchError::InvalidServiceRoot(_))
        ));
    }
}
