#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use hdf5::types::{FixedAscii, FixedUnicode, VarLenUnicode};
use hdf5::{File, Group, Location};

use anndata_metadata::app::{ProgressEvent, ProgressSink};
use anndata_metadata::domain::S3Uri;
use anndata_metadata::error::MetaError;
use anndata_metadata::remote::ObjectStore;

pub fn unicode(value: &str) -> VarLenUnicode {
    VarLenUnicode::from_str(value).unwrap()
}

pub fn write_str_attr(location: &Location, name: &str, value: &str) {
    location
        .new_attr::<VarLenUnicode>()
        .create(name)
        .unwrap()
        .write_scalar(&unicode(value))
        .unwrap();
}

/// Fixed-length byte string attribute, as h5py writes `np.bytes_` values.
pub fn write_fixed_ascii_attr<const N: usize>(location: &Location, name: &str, value: &str) {
    location
        .new_attr::<FixedAscii<N>>()
        .create(name)
        .unwrap()
        .write_scalar(&FixedAscii::<N>::from_ascii(value.as_bytes()).unwrap())
        .unwrap();
}

pub fn write_fixed_unicode_attr<const N: usize>(location: &Location, name: &str, value: &str) {
    location
        .new_attr::<FixedUnicode<N>>()
        .create(name)
        .unwrap()
        .write_scalar(&FixedUnicode::<N>::from_str(value).unwrap())
        .unwrap();
}

pub fn write_names(group: &Group, name: &str, count: usize, stem: &str) {
    let names = (0..count)
        .map(|i| unicode(&format!("{stem}{i}")))
        .collect::<Vec<_>>();
    group
        .new_dataset_builder()
        .with_data(names.as_slice())
        .create(name)
        .unwrap();
}

fn write_csr_components(x: &Group, nnz: usize, n_obs: usize) {
    let data = (1..=nnz as i64).collect::<Vec<_>>();
    let indices = (0..nnz as i64).collect::<Vec<_>>();
    let indptr = (0..=n_obs as i64).map(|i| i.min(nnz as i64)).collect::<Vec<_>>();
    x.new_dataset_builder()
        .with_data(data.as_slice())
        .create("data")
        .unwrap();
    x.new_dataset_builder()
        .with_data(indices.as_slice())
        .create("indices")
        .unwrap();
    x.new_dataset_builder()
        .with_data(indptr.as_slice())
        .create("indptr")
        .unwrap();
}

/// The smallest h5py-style container: three cells, two genes, a CSR `X`
/// tagged with a 3-byte fixed-length `format` attribute, and empty
/// obsm/obsp/layers.
pub fn minimal_h5ad(path: &Path) {
    let file = File::create(path).unwrap();

    let obs = file.create_group("obs").unwrap();
    write_names(&obs, "cell_ids", 3, "cell");
    let var = file.create_group("var").unwrap();
    write_names(&var, "feature_name", 2, "gene");

    let x = file.create_group("X").unwrap();
    write_csr_components(&x, 3, 3);
    write_fixed_ascii_attr::<3>(&x, "format", "csr");

    file.create_group("obsm").unwrap();
    file.create_group("obsp").unwrap();
    file.create_group("layers").unwrap();
}

/// A container laid out the way current anndata writes it: `_index`
/// attributes on the axis groups, a categorical obs column, and a sparse
/// `X` described by `encoding-type` plus a `shape` attribute.
pub fn anndata_h5ad(path: &Path, n_obs: usize, n_var: usize, encoding: &str) {
    let file = File::create(path).unwrap();

    let obs = file.create_group("obs").unwrap();
    write_str_attr(&obs, "_index", "barcode");
    write_names(&obs, "barcode", n_obs, "AAACCTG-");
    let cell_type = obs.create_group("cell_type").unwrap();
    write_str_attr(&cell_type, "encoding-type", "categorical");
    let codes = vec![0i8; n_obs];
    cell_type
        .new_dataset_builder()
        .with_data(codes.as_slice())
        .create("codes")
        .unwrap();
    write_names(&cell_type, "categories", 1, "T cell ");

    let var = file.create_group("var").unwrap();
    write_str_attr(&var, "_index", "gene_ids");
    write_names(&var, "gene_ids", n_var, "ENSG");

    let x = file.create_group("X").unwrap();
    write_str_attr(&x, "encoding-type", encoding);
    write_str_attr(&x, "encoding-version", "0.1.0");
    x.new_attr_builder()
        .with_data(&[n_obs as i64, n_var as i64][..])
        .create("shape")
        .unwrap();
    let nnz = n_obs.min(n_var);
    let data = vec![1.5f32; nnz];
    x.new_dataset_builder()
        .with_data(data.as_slice())
        .create("data")
        .unwrap();
    let indices = (0..nnz as i32).collect::<Vec<_>>();
    x.new_dataset_builder()
        .with_data(indices.as_slice())
        .create("indices")
        .unwrap();
    let indptr = (0..=n_obs as i32)
        .map(|i| i.min(nnz as i32))
        .collect::<Vec<_>>();
    x.new_dataset_builder()
        .with_data(indptr.as_slice())
        .create("indptr")
        .unwrap();

    file.create_group("obsm").unwrap();
    file.create_group("uns").unwrap();
}

pub fn dense_h5ad(path: &Path, n_obs: usize, n_var: usize) {
    let file = File::create(path).unwrap();
    let obs = file.create_group("obs").unwrap();
    write_names(&obs, "_index", n_obs, "cell");
    let var = file.create_group("var").unwrap();
    write_names(&var, "_index", n_var, "gene");
    file.new_dataset::<f32>()
        .shape((n_obs, n_var))
        .create("X")
        .unwrap();
}

pub fn without_obs_h5ad(path: &Path) {
    let file = File::create(path).unwrap();
    let var = file.create_group("var").unwrap();
    write_names(&var, "_index", 2, "gene");
    let x = file.create_group("X").unwrap();
    write_str_attr(&x, "encoding-type", "csr_matrix");
    write_csr_components(&x, 1, 1);
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn failures(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Failed { name, message } => Some((name.clone(), message.clone())),
                ProgressEvent::Processed { .. } => None,
            })
            .collect()
    }

    pub fn processed(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, ProgressEvent::Processed { .. }))
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Serves local files as objects of a single in-memory bucket.
#[derive(Default)]
pub struct MockStore {
    objects: BTreeMap<String, PathBuf>,
}

impl MockStore {
    pub fn with_object(mut self, key: &str, source: &Path) -> Self {
        self.objects.insert(key.to_string(), source.to_path_buf());
        self
    }
}

impl ObjectStore for MockStore {
    fn is_prefix(&self, uri: &S3Uri) -> Result<bool, MetaError> {
        let prefix = uri.as_prefix();
        Ok(uri.is_prefix_like() || self.objects.keys().any(|key| key.starts_with(&prefix)))
    }

    fn list(&self, prefix: &S3Uri) -> Result<Vec<S3Uri>, MetaError> {
        let listing_prefix = prefix.as_prefix();
        Ok(self
            .objects
            .keys()
            .filter(|key| {
                key.strip_prefix(&listing_prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|key| prefix.with_key(key.clone()))
            .collect())
    }

    fn download(&self, uri: &S3Uri, destination: &Path) -> Result<u64, MetaError> {
        let source = self.objects.get(uri.key()).ok_or(MetaError::RemoteStatus {
            status: 404,
            message: "The specified key does not exist.".to_string(),
        })?;
        fs::copy(source, destination).map_err(|err| MetaError::Filesystem(err.to_string()))
    }
}
