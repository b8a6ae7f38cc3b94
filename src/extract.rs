//! Metadata extraction from AnnData `.h5ad` containers.
//!
//! Every function here works on an already-open HDF5 handle and touches only
//! object headers: link tables, dataspace shapes, datatypes and attributes.
//! No matrix payload is ever read, so extraction stays cheap even for files
//! holding millions of cells.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hdf5::types::{
    FixedAscii, FixedUnicode, FloatSize, IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode,
};
use hdf5::{Dataset, File, Group, Location};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{MatrixFormat, S3Uri};
use crate::error::MetaError;
use crate::remote::ObjectStore;

const OBS: &str = "obs";
const VAR: &str = "var";
const X: &str = "X";

/// Attributes that may carry the sparse layout tag, in lookup order.
const FORMAT_ATTRS: [&str; 3] = ["format", "h5sparse_format", "encoding-type"];
const SHAPE_ATTRS: [&str; 2] = ["shape", "h5sparse_shape"];

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Fixed-length string attributes are converted into this capacity on read.
const FIXED_STRING_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XStorage {
    pub format: MatrixFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nnz: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnDataInfo {
    pub cell_count: u64,
    pub gene_count: u64,
    pub main_groups: BTreeSet<String>,
    pub x_storage: XStorage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Number of observations (cells), read from the `obs` axis.
pub fn get_cell_count(file: &Group) -> Result<u64, MetaError> {
    axis_length(file, OBS)
}

/// Number of features (genes), read from the `var` axis.
pub fn get_gene_count(file: &Group) -> Result<u64, MetaError> {
    axis_length(file, VAR)
}

/// Storage layout of the primary matrix `X`.
pub fn get_sparse_matrix_format(file: &Group) -> Result<MatrixFormat, MetaError> {
    if !file.link_exists(X) {
        return Err(MetaError::MissingGroup(X.to_string()));
    }
    if file.dataset(X).is_ok() {
        return Ok(MatrixFormat::Dense);
    }
    let group = file.group(X)?;
    for name in FORMAT_ATTRS {
        if let Some(tag) = read_string_attr(&group, name)? {
            return MatrixFormat::from_sparse_tag(&tag).ok_or(MetaError::UnknownFormat(tag));
        }
    }
    Err(MetaError::UnknownFormat(
        "X is a group without a format attribute".to_string(),
    ))
}

pub fn get_x_storage(file: &Group) -> Result<XStorage, MetaError> {
    let format = get_sparse_matrix_format(file)?;
    let storage = match format {
        MatrixFormat::Dense => {
            let dataset = file.dataset(X)?;
            XStorage {
                format,
                shape: Some(dataset.shape().into_iter().map(|n| n as u64).collect()),
                dtype: dataset_dtype(&dataset),
                nnz: None,
            }
        }
        MatrixFormat::Csr | MatrixFormat::Csc => {
            let group = file.group(X)?;
            let data = group.dataset("data").ok();
            XStorage {
                format,
                shape: sparse_shape(&group),
                dtype: data.as_ref().and_then(dataset_dtype),
                nnz: data.as_ref().and_then(leading_dimension),
            }
        }
    };
    Ok(storage)
}

/// Composes the per-axis counts, the top-level inventory and the `X`
/// layout into one record.
pub fn get_anndata_info(file: &Group) -> Result<AnnDataInfo, MetaError> {
    let cell_count = get_cell_count(file)?;
    let gene_count = get_gene_count(file)?;
    let main_groups = file.member_names()?.into_iter().collect::<BTreeSet<_>>();
    let x_storage = get_x_storage(file)?;
    debug!(
        cell_count,
        gene_count,
        format = %x_storage.format,
        "extracted container metadata"
    );
    Ok(AnnDataInfo {
        cell_count,
        gene_count,
        main_groups,
        x_storage,
        file_size_gb: None,
        filename: None,
    })
}

pub fn get_anndata_file_info(path: impl AsRef<Path>) -> Result<AnnDataInfo, MetaError> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => MetaError::FileNotFound(path.to_path_buf()),
        _ => MetaError::Filesystem(format!("stat {}: {err}", path.display())),
    })?;
    if !metadata.is_file() {
        return Err(MetaError::InvalidContainer {
            path: path.to_path_buf(),
            message: "not a regular file".to_string(),
        });
    }

    let mut info = {
        let file = File::open(path).map_err(|err| MetaError::InvalidContainer {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        get_anndata_info(&file)?
    };
    info.file_size_gb = Some(metadata.len() as f64 / BYTES_PER_GB);
    Ok(info)
}

/// Same record as [`get_anndata_file_info`] for an object in S3. The object
/// is streamed into a temporary file that is removed when this returns.
pub fn get_anndata_object_info<S: ObjectStore + ?Sized>(
    store: &S,
    uri: &S3Uri,
) -> Result<AnnDataInfo, MetaError> {
    let staged = tempfile::Builder::new()
        .prefix("anndata-meta")
        .suffix(".h5ad")
        .tempfile()
        .map_err(|err| MetaError::Filesystem(err.to_string()))?;
    let bytes = store.download(uri, staged.path())?;
    debug!(uri = %uri, bytes, "staged remote object");

    let file = File::open(staged.path()).map_err(|err| MetaError::InvalidContainer {
        path: PathBuf::from(uri.to_string()),
        message: err.to_string(),
    })?;
    get_anndata_info(&file)
}

fn axis_length(file: &Group, name: &str) -> Result<u64, MetaError> {
    if !file.link_exists(name) {
        return Err(MetaError::MissingGroup(name.to_string()));
    }
    // Pre-0.7 AnnData wrote obs/var as a single compound dataset.
    if let Ok(table) = file.dataset(name) {
        return leading_dimension(&table).ok_or_else(|| MetaError::MalformedGroup {
            group: name.to_string(),
            reason: "table dataset is scalar".to_string(),
        });
    }

    let group = file.group(name)?;
    if let Some(index) = read_string_attr(&group, "_index")? {
        if let Some(length) = member_length(&group, &index) {
            return Ok(length);
        }
    }
    if let Some(length) = member_length(&group, "_index") {
        return Ok(length);
    }
    for member in group.member_names()? {
        if let Some(length) = member_length(&group, &member) {
            return Ok(length);
        }
    }

    Err(MetaError::MalformedGroup {
        group: name.to_string(),
        reason: "no member with a usable length".to_string(),
    })
}

fn member_length(group: &Group, name: &str) -> Option<u64> {
    if !group.link_exists(name) {
        return None;
    }
    if let Ok(dataset) = group.dataset(name) {
        return leading_dimension(&dataset);
    }
    // Categorical columns are sub-groups holding `codes` and `categories`.
    let column = group.group(name).ok()?;
    if !column.link_exists("codes") {
        return None;
    }
    column
        .dataset("codes")
        .ok()
        .as_ref()
        .and_then(leading_dimension)
}

fn leading_dimension(dataset: &Dataset) -> Option<u64> {
    dataset.shape().first().map(|&n| n as u64)
}

fn sparse_shape(group: &Group) -> Option<Vec<u64>> {
    SHAPE_ATTRS.iter().find_map(|name| {
        let attr = group.attr(name).ok()?;
        let values = attr.read_raw::<i64>().ok()?;
        values
            .into_iter()
            .map(|value| u64::try_from(value).ok())
            .collect()
    })
}

fn dataset_dtype(dataset: &Dataset) -> Option<String> {
    let descriptor = dataset.dtype().ok()?.to_descriptor().ok()?;
    Some(dtype_name(&descriptor))
}

fn dtype_name(descriptor: &TypeDescriptor) -> String {
    match descriptor {
        TypeDescriptor::Integer(size) => format!("int{}", int_bits(*size)),
        TypeDescriptor::Unsigned(size) => format!("uint{}", int_bits(*size)),
        TypeDescriptor::Float(FloatSize::U4) => "float32".to_string(),
        TypeDescriptor::Float(FloatSize::U8) => "float64".to_string(),
        TypeDescriptor::Boolean => "bool".to_string(),
        TypeDescriptor::VarLenUnicode | TypeDescriptor::VarLenAscii => "string".to_string(),
        other => format!("{other:?}"),
    }
}

fn int_bits(size: IntSize) -> u32 {
    match size {
        IntSize::U1 => 8,
        IntSize::U2 => 16,
        IntSize::U4 => 32,
        IntSize::U8 => 64,
    }
}

/// Reads a string attribute in any of the encodings h5py and anndata emit.
/// Returns `None` when the attribute is absent or not a string.
fn read_string_attr(location: &Location, name: &str) -> Result<Option<String>, MetaError> {
    if !location.attr_names()?.iter().any(|attr| attr == name) {
        return Ok(None);
    }
    let attr = location.attr(name)?;
    let value = match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::VarLenUnicode => attr
            .read_raw::<VarLenUnicode>()?
            .first()
            .map(|value| value.as_str().to_string()),
        TypeDescriptor::VarLenAscii => attr
            .read_raw::<VarLenAscii>()?
            .first()
            .map(|value| value.as_str().to_string()),
        TypeDescriptor::FixedAscii(_) => attr
            .read_raw::<FixedAscii<FIXED_STRING_CAPACITY>>()?
            .first()
            .map(|value| value.as_str().to_string()),
        TypeDescriptor::FixedUnicode(_) => attr
            .read_raw::<FixedUnicode<FIXED_STRING_CAPACITY>>()?
            .first()
            .map(|value| value.as_str().to_string()),
        _ => None,
    };
    Ok(value)
}
