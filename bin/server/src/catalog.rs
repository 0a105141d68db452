//! Loading and refreshing the catalog snapshot.
//!
//! Request handlers read the current [`Catalog`] through a [`CatalogHandle`];
//! the refresher builds a complete replacement and swaps it in. A failed
//! refresh leaves the previous snapshot in place.

use portcullis_access::{Catalog, CatalogError};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use url::Url;

use crate::config::CatalogConfig;

/// Shared, swappable catalog snapshot.
#[derive(Clone, Default)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Returns the current snapshot. The lock is released before returning.
    pub fn snapshot(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Publishes a new snapshot.
    pub fn replace(&self, catalog: Catalog) {
        let catalog = Arc::new(catalog);
        match self.current.write() {
            Ok(mut current) => *current = catalog,
            Err(poisoned) => *poisoned.into_inner() = catalog,
        }
    }
}

/// Where a catalog document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Http(Url),
    File(PathBuf),
}

impl Source {
    /// Interprets `http://` and `https://` locations as URLs and anything
    /// else as a file path.
    pub fn parse(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Http(url),
            _ => Self::File(PathBuf::from(location)),
        }
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<Vec<u8>, String> {
        match self {
            Self::Http(url) => {
                let response = client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| e.to_string())?;
                let bytes = response.bytes().await.map_err(|e| e.to_string())?;
                Ok(bytes.to_vec())
            }
            Self::File(path) => tokio::fs::read(path).await.map_err(|e| e.to_string()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Errors from loading the catalog.
#[derive(Debug)]
pub enum LoadError {
    /// A source could not be read.
    Fetch { source: String, reason: String },
    /// A source was read but its contents were rejected.
    Invalid(CatalogError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch { source, reason } => write!(f, "failed to read '{source}': {reason}"),
            Self::Invalid(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Reads the configured sources and builds catalogs from them.
pub struct CatalogLoader {
    allowlist: Option<Source>,
    routes: Option<Source>,
    tokens: Option<Source>,
    client: reqwest::Client,
}

impl CatalogLoader {
    pub fn new(config: &CatalogConfig, client: reqwest::Client) -> Self {
        let source = |location: &Option<String>| {
            location
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(Source::parse)
        };
        Self {
            allowlist: source(&config.allowlist),
            routes: source(&config.routes),
            tokens: source(&config.tokens),
            client,
        }
    }

    /// Reads every source and builds a complete catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured source is unreadable or invalid.
    #[tracing::instrument(skip_all)]
    pub async fn load(&self) -> Result<Catalog, LoadError> {
        let allowlist = self.read(self.allowlist.as_ref()).await?;
        let routes = self.read(self.routes.as_ref()).await?;
        let tokens = self.read(self.tokens.as_ref()).await?;

        let catalog =
            Catalog::from_documents(allowlist.as_deref(), routes.as_deref(), tokens.as_deref())
                .map_err(LoadError::Invalid)?;

        tracing::debug!(
            allow_listed = catalog.allow_listed_count(),
            routes = catalog.route_count(),
            tokens = catalog.token_count(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Loads a new catalog and publishes it on success.
    ///
    /// # Errors
    ///
    /// Returns the load error; `handle` keeps its previous snapshot.
    pub async fn refresh(&self, handle: &CatalogHandle) -> Result<(), LoadError> {
        let catalog = self.load().await?;
        handle.replace(catalog);
        Ok(())
    }

    async fn read(&self, source: Option<&Source>) -> Result<Option<Vec<u8>>, LoadError> {
        let Some(source) = source else {
            return Ok(None);
        };
        source
            .fetch(&self.client)
            .await
            .map(Some)
            .map_err(|reason| LoadError::Fetch {
                source: source.to_string(),
                reason,
            })
    }
}
