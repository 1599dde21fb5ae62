//! Archive location URIs.
//!
//! An archive only records where its content lives. Fetching is left to
//! whichever download registry the deployer is wired to; this module just
//! makes sure the location is one of the schemes that registry understands.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Location {
    /// OCI registry: oci://registry.example.com/releases/api:v1.4.0
    Oci { registry: String, repository: String, tag: String },
    /// HTTP(S): https://releases.example.com/api-1.4.0.tar.gz
    Http { url: String },
    /// S3: s3://bucket/releases/api-1.4.0.tar.gz
    S3 { bucket: String, key: String },
    /// Git: git://github.com/org/repo.git#ref
    Git { url: String, reference: String },
    /// Local file: file:///srv/releases/api.tar.gz or ./relative/path
    File { path: String },
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid location URI: {0}")]
    InvalidUri(String),
}

impl Location {
    pub fn parse(uri: &str) -> Result<Self, LocationError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(LocationError::InvalidUri(uri.to_string()));
        }

        if let Some(rest) = uri.strip_prefix("oci://") {
            let (repo_path, tag) = match rest.rsplit_once(':') {
                // A colon before the last slash is a registry port, not a tag.
                Some((path, tag)) if !tag.contains('/') => (path, tag),
                _ => (rest, "latest"),
            };
            let (registry, repository) = repo_path
                .split_once('/')
                .filter(|(registry, repository)| !registry.is_empty() && !repository.is_empty())
                .ok_or_else(|| LocationError::InvalidUri(uri.to_string()))?;
            Ok(Location::Oci {
                registry: registry.to_string(),
                repository: repository.to_string(),
                tag: tag.to_string(),
            })
        } else if uri.starts_with("https://") || uri.starts_with("http://") {
            Ok(Location::Http { url: uri.to_string() })
        } else if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
                .ok_or_else(|| LocationError::InvalidUri(uri.to_string()))?;
            Ok(Location::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        } else if uri.starts_with("git://") {
            let (url, reference) = uri.rsplit_once('#').unwrap_or((uri, "main"));
            Ok(Location::Git {
                url: url.to_string(),
                reference: reference.to_string(),
            })
        } else if let Some(path) = uri.strip_prefix("file://") {
            Ok(Location::File { path: path.to_string() })
        } else if uri.starts_with("./") || uri.starts_with('/') {
            Ok(Location::File { path: uri.to_string() })
        } else {
            Err(LocationError::UnsupportedScheme(uri.to_string()))
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Location::Oci { .. } => "oci",
            Location::Http { .. } => "http",
            Location::S3 { .. } => "s3",
            Location::Git { .. } => "git",
            Location::File { .. } => "file",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Oci { registry, repository, tag } => {
                write!(f, "oci://{registry}/{repository}:{tag}")
            }
            Location::Http { url } => f.write_str(url),
            Location::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            Location::Git { url, reference } => write!(f, "{url}#{reference}"),
            Location::File { path } => write!(f, "file://{path}"),
        }
    }
}

impl std::str::FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::parse(s)
    }
}
