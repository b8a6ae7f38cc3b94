use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::MetaError;

pub const CONTAINER_SUFFIX: &str = ".h5ad";
pub const S3_SCHEME: &str = "s3://";

/// Directory-listing heuristic for AnnData containers: either the canonical
/// suffix or no extension at all.
pub fn is_container_name(name: &str) -> bool {
    name.ends_with(CONTAINER_SUFFIX) || !name.contains('.')
}

pub fn is_s3_path(value: &str) -> bool {
    value.starts_with(S3_SCHEME)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixFormat {
    #[serde(rename = "CSR")]
    Csr,
    #[serde(rename = "CSC")]
    Csc,
    #[serde(rename = "dense")]
    Dense,
}

impl MatrixFormat {
    /// Normalises a stored sparse tag. Accepts `csr`, `CSC`, and the
    /// `csr_matrix` spelling used by the `encoding-type` attribute.
    pub fn from_sparse_tag(tag: &str) -> Option<Self> {
        let lowered = tag.trim().to_ascii_lowercase();
        match lowered.strip_suffix("_matrix").unwrap_or(&lowered) {
            "csr" => Some(MatrixFormat::Csr),
            "csc" => Some(MatrixFormat::Csc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixFormat::Csr => "CSR",
            MatrixFormat::Csc => "CSC",
            MatrixFormat::Dense => "dense",
        }
    }
}

impl fmt::Display for MatrixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Uri {
    bucket: String,
    key: String,
}

impl S3Uri {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when the URI can only name a prefix: the bucket root or a key
    /// with a trailing slash.
    pub fn is_prefix_like(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Key with a trailing slash, suitable as a listing prefix.
    pub fn as_prefix(&self) -> String {
        if self.is_prefix_like() {
            self.key.clone()
        } else {
            format!("{}/", self.key)
        }
    }

    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self::new(self.bucket.clone(), key)
    }

    pub fn file_name(&self) -> &str {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{S3_SCHEME}{}/{}", self.bucket, self.key)
    }
}

impl FromStr for S3Uri {
    type Err = MetaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let rest = trimmed
            .strip_prefix(S3_SCHEME)
            .ok_or_else(|| MetaError::InvalidUri(value.to_string()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        let bucket_valid = !bucket.is_empty()
            && bucket
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_'));
        if !bucket_valid {
            return Err(MetaError::InvalidUri(value.to_string()));
        }
        Ok(Self::new(bucket, key))
    }
}

/// Where the input path points, decided once before any extraction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
    LocalFile(Utf8PathBuf),
    LocalDir(Utf8PathBuf),
    RemoteObject(S3Uri),
    RemotePrefix(S3Uri),
}

impl InputLocation {
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            InputLocation::LocalDir(_) | InputLocation::RemotePrefix(_)
        )
    }
}
