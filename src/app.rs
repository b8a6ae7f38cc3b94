use std::fmt;
use std::fs;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{InputLocation, S3Uri, is_container_name, is_s3_path};
use crate::error::MetaError;
use crate::extract::{AnnDataInfo, get_anndata_file_info, get_anndata_object_info};
use crate::remote::ObjectStore;

/// One container to run the extractor against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerSource {
    Local(Utf8PathBuf),
    Remote(S3Uri),
}

impl fmt::Display for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerSource::Local(path) => write!(f, "{path}"),
            ContainerSource::Remote(uri) => write!(f, "{uri}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Single(AnnDataInfo),
    Batch(Vec<AnnDataInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Processed { name: String },
    Failed { name: String, message: String },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// The stderr line for a file skipped during a batch run.
pub fn failure_line(name: &str, message: &str) -> String {
    format!("Error processing {name}: {message}")
}

/// Reports batch failures on stderr, one line per skipped file.
pub struct StderrSink;

impl ProgressSink for StderrSink {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Processed { name } => debug!(file = %name, "processed"),
            ProgressEvent::Failed { name, message } => {
                eprintln!("{}", failure_line(&name, &message));
            }
        }
    }
}

type Connector<S> = Box<dyn Fn() -> Result<S, MetaError>>;

pub struct App<S: ObjectStore> {
    store: OnceLock<S>,
    connect: Connector<S>,
}

impl<S: ObjectStore> App<S> {
    /// An app over an already connected store.
    pub fn new(store: S) -> Self {
        Self {
            store: OnceLock::from(store),
            connect: Box::new(unconfigured::<S>),
        }
    }

    /// Defers building the store until an `s3://` input needs it, so local
    /// runs never read storage configuration or credentials.
    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn() -> Result<S, MetaError> + 'static,
    {
        Self {
            store: OnceLock::new(),
            connect: Box::new(connect),
        }
    }

    pub fn store(&self) -> Result<&S, MetaError> {
        if let Some(store) = self.store.get() {
            return Ok(store);
        }
        let store = (self.connect)()?;
        debug!("object store connected");
        Ok(self.store.get_or_init(|| store))
    }

    /// Classifies the input once: local or remote, single container or a
    /// collection of them.
    pub fn resolve(&self, input: &str) -> Result<InputLocation, MetaError> {
        if is_s3_path(input) {
            let uri: S3Uri = input.parse()?;
            return if self.store()?.is_prefix(&uri)? {
                Ok(InputLocation::RemotePrefix(uri))
            } else {
                Ok(InputLocation::RemoteObject(uri))
            };
        }

        let path = Utf8PathBuf::from(input);
        let std_path = path.as_std_path();
        if std_path.is_dir() {
            Ok(InputLocation::LocalDir(path))
        } else if std_path.exists() {
            Ok(InputLocation::LocalFile(path))
        } else {
            Err(MetaError::FileNotFound(path.into_std_path_buf()))
        }
    }

    pub fn enumerate(&self, location: &InputLocation) -> Result<Vec<ContainerSource>, MetaError> {
        match location {
            InputLocation::LocalFile(path) => Ok(vec![ContainerSource::Local(path.clone())]),
            InputLocation::RemoteObject(uri) => Ok(vec![ContainerSource::Remote(uri.clone())]),
            InputLocation::LocalDir(dir) => Ok(list_local_files(dir)?
                .into_iter()
                .map(ContainerSource::Local)
                .collect()),
            InputLocation::RemotePrefix(prefix) => Ok(self
                .store()?
                .list(prefix)?
                .into_iter()
                .filter(|uri| is_container_name(uri.file_name()))
                .map(ContainerSource::Remote)
                .collect()),
        }
    }

    pub fn extract(&self, source: &ContainerSource) -> Result<AnnDataInfo, MetaError> {
        match source {
            ContainerSource::Local(path) => get_anndata_file_info(path),
            ContainerSource::Remote(uri) => get_anndata_object_info(self.store()?, uri),
        }
    }

    /// Extracts every source in order. A failing source is reported to the
    /// sink and skipped; it never aborts the rest of the batch.
    pub fn extract_batch(
        &self,
        sources: &[ContainerSource],
        sink: &dyn ProgressSink,
    ) -> Vec<AnnDataInfo> {
        let mut records = Vec::with_capacity(sources.len());
        for source in sources {
            let name = source.to_string();
            match self.extract(source) {
                Ok(mut record) => {
                    record.filename = Some(name.clone());
                    records.push(record);
                    sink.event(ProgressEvent::Processed { name });
                }
                Err(err) => {
                    sink.event(ProgressEvent::Failed {
                        name,
                        message: err.to_string(),
                    });
                }
            }
        }
        records
    }

    pub fn run(&self, input: &str, sink: &dyn ProgressSink) -> Result<RunResult, MetaError> {
        let location = self.resolve(input)?;
        info!(location = ?location, batch = location.is_batch(), "resolved input");
        match &location {
            InputLocation::LocalFile(path) => self
                .extract(&ContainerSource::Local(path.clone()))
                .map(RunResult::Single),
            InputLocation::RemoteObject(uri) => self
                .extract(&ContainerSource::Remote(uri.clone()))
                .map(RunResult::Single),
            InputLocation::LocalDir(_) | InputLocation::RemotePrefix(_) => {
                let sources = self.enumerate(&location)?;
                info!(count = sources.len(), "processing containers");
                Ok(RunResult::Batch(self.extract_batch(&sources, sink)))
            }
        }
    }
}

fn unconfigured<S>() -> Result<S, MetaError> {
    Err(MetaError::RemoteAccess(
        "no object store configured".to_string(),
    ))
}

/// Regular files in `dir` (not recursive) that pass the container name
/// heuristic, sorted by name.
pub fn list_local_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, MetaError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| MetaError::Filesystem(format!("read dir {dir}: {err}")))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| MetaError::Filesystem(err.to_string()))?;
        let path = match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(path) => path,
            Err(path) => {
                warn!(path = %path.display(), "skipping non UTF-8 file name");
                continue;
            }
        };
        let Some(name) = path.file_name() else {
            continue;
        };
        if path.as_std_path().is_file() && is_container_name(name) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
