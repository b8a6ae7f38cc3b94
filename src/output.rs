use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Array, ListArray, ListBuilder, StringArray, StringBuilder, StructArray,
    UInt64Array,
};
use arrow::datatypes::UInt64Type;
use arrow::record_batch::RecordBatch;
use camino::Utf8PathBuf;
use parquet::arrow::ArrowWriter;
use serde::Serialize;

use crate::app::RunResult;
use crate::error::MetaError;
use crate::extract::AnnDataInfo;

pub const STDOUT_TOKEN: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(Utf8PathBuf),
}

impl OutputTarget {
    pub fn from_arg(value: &str) -> Self {
        if value == STDOUT_TOKEN {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(Utf8PathBuf::from(value))
        }
    }

    fn write_bytes(&self, content: &[u8]) -> Result<(), MetaError> {
        match self {
            OutputTarget::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(content)
                    .and_then(|_| stdout.flush())
                    .map_err(|err| MetaError::Output(err.to_string()))
            }
            OutputTarget::File(path) => {
                let mut file = File::create(path.as_std_path())
                    .map_err(|err| MetaError::Output(format!("{path}: {err}")))?;
                file.write_all(content)
                    .map_err(|err| MetaError::Output(format!("{path}: {err}")))
            }
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn render<T: Serialize>(value: &T) -> Result<String, MetaError> {
        let mut json =
            serde_json::to_string_pretty(value).map_err(|err| MetaError::Output(err.to_string()))?;
        json.push('\n');
        Ok(json)
    }

    pub fn write(record: &AnnDataInfo, target: &OutputTarget) -> Result<(), MetaError> {
        target.write_bytes(Self::render(record)?.as_bytes())
    }
}

/// Columnar output for batch runs: one row per container, Parquet encoded.
pub struct TableOutput;

impl TableOutput {
    pub fn record_batch(records: &[AnnDataInfo]) -> Result<RecordBatch, MetaError> {
        let cell_count: UInt64Array = records.iter().map(|r| Some(r.cell_count)).collect();
        let gene_count: UInt64Array = records.iter().map(|r| Some(r.gene_count)).collect();

        let mut main_groups = ListBuilder::new(StringBuilder::new());
        for record in records {
            for group in &record.main_groups {
                main_groups.values().append_value(group);
            }
            main_groups.append(true);
        }

        let format: StringArray = records
            .iter()
            .map(|r| Some(r.x_storage.format.as_str()))
            .collect();
        let shape = ListArray::from_iter_primitive::<UInt64Type, _, _>(records.iter().map(|r| {
            r.x_storage
                .shape
                .as_ref()
                .map(|dims| dims.iter().map(|&dim| Some(dim)).collect::<Vec<_>>())
        }));
        let dtype: StringArray = records
            .iter()
            .map(|r| r.x_storage.dtype.as_deref())
            .collect();
        let nnz: UInt64Array = records.iter().map(|r| r.x_storage.nnz).collect();
        let x_storage = StructArray::try_from(vec![
            ("format", Arc::new(format) as ArrayRef),
            ("shape", Arc::new(shape) as ArrayRef),
            ("dtype", Arc::new(dtype) as ArrayRef),
            ("nnz", Arc::new(nnz) as ArrayRef),
        ])
        .map_err(|err| MetaError::Output(err.to_string()))?;

        let mut columns: Vec<(&str, ArrayRef)> = vec![
            ("cell_count", Arc::new(cell_count) as ArrayRef),
            ("gene_count", Arc::new(gene_count) as ArrayRef),
            ("main_groups", Arc::new(main_groups.finish()) as ArrayRef),
            ("x_storage", Arc::new(x_storage) as ArrayRef),
        ];
        if records.iter().any(|r| r.file_size_gb.is_some()) {
            let file_size_gb: Float64Array = records.iter().map(|r| r.file_size_gb).collect();
            columns.push(("file_size_gb", Arc::new(file_size_gb) as ArrayRef));
        }
        let filename: StringArray = records.iter().map(|r| r.filename.as_deref()).collect();
        columns.push(("filename", Arc::new(filename) as ArrayRef));

        RecordBatch::try_from_iter(columns).map_err(|err| MetaError::Output(err.to_string()))
    }

    pub fn to_parquet(records: &[AnnDataInfo]) -> Result<Vec<u8>, MetaError> {
        let batch = Self::record_batch(records)?;
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)
            .map_err(|err| MetaError::Output(err.to_string()))?;
        writer
            .write(&batch)
            .map_err(|err| MetaError::Output(err.to_string()))?;
        writer
            .close()
            .map_err(|err| MetaError::Output(err.to_string()))?;
        Ok(buffer)
    }

    pub fn write(records: &[AnnDataInfo], target: &OutputTarget) -> Result<(), MetaError> {
        target.write_bytes(&Self::to_parquet(records)?)
    }
}

pub fn write_result(result: &RunResult, target: &OutputTarget) -> Result<(), MetaError> {
    match result {
        RunResult::Single(record) => JsonOutput::write(record, target),
        RunResult::Batch(records) => TableOutput::write(records, target),
    }
}
