use std::fs::{self, File};
use std::path::Path;

use s3::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use tracing::debug;

use crate::config::StorageConfig;
use crate::domain::S3Uri;
use crate::error::MetaError;

const DELIMITER: &str = "/";

pub trait ObjectStore: Send + Sync {
    /// Whether `uri` names a prefix holding further objects rather than a
    /// single object.
    fn is_prefix(&self, uri: &S3Uri) -> Result<bool, MetaError>;

    /// Objects directly under `prefix` (one level, no recursion).
    fn list(&self, prefix: &S3Uri) -> Result<Vec<S3Uri>, MetaError>;

    /// Streams the object into `destination`, returning the byte count.
    fn download(&self, uri: &S3Uri, destination: &Path) -> Result<u64, MetaError>;
}

/// S3 (or any S3-compatible service) through `rust-s3` in blocking mode.
/// Buckets are opened per request since every URI names its own bucket.
pub struct S3Store {
    config: StorageConfig,
    credentials: Credentials,
}

impl S3Store {
    pub fn new(config: StorageConfig) -> Result<Self, MetaError> {
        let credentials = resolve_credentials(&config)?;
        Ok(Self {
            config,
            credentials,
        })
    }

    fn region(&self) -> Result<Region, MetaError> {
        match &self.config.endpoint_url {
            Some(endpoint) => Ok(Region::Custom {
                region: self.config.region.clone(),
                endpoint: endpoint.clone(),
            }),
            None => self
                .config
                .region
                .parse()
                .map_err(|err| MetaError::RemoteAccess(format!("region {}: {err}", self.config.region))),
        }
    }

    /// Custom endpoints and dotted bucket names are addressed path-style;
    /// dotted names break the wildcard certificate on virtual hosts.
    fn path_style(&self, bucket: &str) -> bool {
        self.config.force_path_style || self.config.endpoint_url.is_some() || bucket.contains('.')
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, MetaError> {
        let bucket = Bucket::new(name, self.region()?, self.credentials.clone())
            .map_err(remote_error)?;
        if self.path_style(name) {
            Ok(bucket.with_path_style())
        } else {
            Ok(bucket)
        }
    }
}

impl ObjectStore for S3Store {
    fn is_prefix(&self, uri: &S3Uri) -> Result<bool, MetaError> {
        if uri.is_prefix_like() {
            return Ok(true);
        }
        let bucket = self.bucket(uri.bucket())?;
        let (page, _) = bucket
            .list_page(
                uri.as_prefix(),
                Some(DELIMITER.to_string()),
                None,
                None,
                Some(1),
            )
            .map_err(remote_error)?;
        let has_prefixes = page
            .common_prefixes
            .as_ref()
            .is_some_and(|prefixes| !prefixes.is_empty());
        Ok(!page.contents.is_empty() || has_prefixes)
    }

    fn list(&self, prefix: &S3Uri) -> Result<Vec<S3Uri>, MetaError> {
        let listing_prefix = prefix.as_prefix();
        let bucket = self.bucket(prefix.bucket())?;
        let pages = bucket
            .list(listing_prefix.clone(), Some(DELIMITER.to_string()))
            .map_err(remote_error)?;
        let objects = pages
            .into_iter()
            .flat_map(|page| page.contents)
            // The zero-byte placeholder some tools write for the prefix itself.
            .filter(|object| object.key != listing_prefix && !object.key.ends_with('/'))
            .map(|object| prefix.with_key(object.key))
            .collect::<Vec<_>>();
        debug!(prefix = %prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    fn download(&self, uri: &S3Uri, destination: &Path) -> Result<u64, MetaError> {
        let bucket = self.bucket(uri.bucket())?;
        let mut file = File::create(destination)
            .map_err(|err| MetaError::Filesystem(format!("{}: {err}", destination.display())))?;
        let status = bucket
            .get_object_to_writer(uri.key(), &mut file)
            .map_err(remote_error)?;
        if !(200..300).contains(&status) {
            return Err(MetaError::RemoteStatus {
                status,
                message: format!("GET {uri}"),
            });
        }
        fs::metadata(destination)
            .map(|metadata| metadata.len())
            .map_err(|err| MetaError::Filesystem(format!("{}: {err}", destination.display())))
    }
}

/// Environment first, then the shared credentials profile. With neither,
/// requests go out unsigned, which public buckets accept.
fn resolve_credentials(config: &StorageConfig) -> Result<Credentials, MetaError> {
    if config.anonymous {
        return Credentials::anonymous().map_err(credentials_error);
    }
    if let Ok(credentials) = Credentials::from_env() {
        return Ok(credentials);
    }
    match Credentials::from_profile(config.profile.as_deref()) {
        Ok(credentials) => Ok(credentials),
        Err(err) => {
            debug!(error = %err, "no object store credentials found; requests will be unsigned");
            Credentials::anonymous().map_err(credentials_error)
        }
    }
}

fn credentials_error(err: s3::creds::error::CredentialsError) -> MetaError {
    MetaError::RemoteAccess(format!("credentials: {err}"))
}

fn remote_error(err: S3Error) -> MetaError {
    match err {
        S3Error::HttpFailWithBody(status, body) => MetaError::RemoteStatus {
            status,
            message: body,
        },
        other => MetaError::RemoteAccess(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn anonymous(config: StorageConfig) -> S3Store {
        S3Store::new(StorageConfig {
            anonymous: true,
            ..config
        })
        .unwrap()
    }

    #[test]
    fn anonymous_store_sends_unsigned_requests() {
        let store = anonymous(StorageConfig::default());
        assert!(store.credentials.access_key.is_none());
        assert!(store.credentials.secret_key.is_none());
    }

    #[test]
    fn standard_region_uses_virtual_hosts() {
        let store = anonymous(StorageConfig {
            region: "eu-west-1".to_string(),
            ..StorageConfig::default()
        });
        assert_matches!(store.region().unwrap(), Region::EuWest1);
        assert!(!store.bucket("cellxgene").unwrap().is_path_style());
    }

    #[test]
    fn custom_endpoint_uses_path_style() {
        let store = anonymous(StorageConfig {
            endpoint_url: Some("http://localhost:9000".to_string()),
            ..StorageConfig::default()
        });
        assert_matches!(
            store.region().unwrap(),
            Region::Custom { endpoint, .. } if endpoint == "http://localhost:9000"
        );
        assert!(store.bucket("scratch").unwrap().is_path_style());
    }

    #[test]
    fn dotted_bucket_uses_path_style() {
        let store = anonymous(StorageConfig::default());
        assert!(store.bucket("lab.example.org").unwrap().is_path_style());
    }

    #[test]
    fn http_failures_keep_their_status() {
        assert_matches!(
            remote_error(S3Error::HttpFailWithBody(404, "NoSuchKey".to_string())),
            MetaError::RemoteStatus { status: 404, message } if message == "NoSuchKey"
        );
    }
}
