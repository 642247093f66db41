use std::path::PathBuf;
use std::sync::Arc;

use crate::record::RecordClass;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The stream ended part way through a record header.
    #[error("truncated record header at offset {offset}; got {actual} of {expected} bytes")]
    TruncatedHeader {
        offset: usize,
        actual: usize,
        expected: usize,
    },
    /// The stream ended before the number of bytes declared by a record header.
    #[error("truncated record at offset {offset}; got {actual} of {expected} payload bytes")]
    TruncatedRecord {
        offset: usize,
        actual: usize,
        expected: usize,
    },
    #[error("invalid record class {class} at offset {offset}")]
    InvalidRecordClass { offset: usize, class: u8 },
    #[error("invalid record size {size} at offset {offset}")]
    InvalidRecordSize { offset: usize, size: u32 },
    /// A known layout extends past the payload size declared by the record header.
    #[error("field {field} of {class}/{sub_class} needs {needed} bytes, record has {available}")]
    LayoutOverrun {
        class: RecordClass,
        sub_class: u8,
        field: String,
        needed: usize,
        available: usize,
    },

    #[error("too many {class}/{sub_class} sections")]
    DuplicateSection { class: RecordClass, sub_class: u8 },

    #[error("no matching value for {0}")]
    AttributeNotFound(String),
    #[error("invalid value for {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("calibration {calibration} is not supported for {dataset}")]
    UnsupportedCalibration {
        dataset: String,
        calibration: String,
    },
    #[error("can't load dataset {0}")]
    UnsupportedDataset(String),
    #[error("can't find any dataset matching {0}")]
    DatasetNotFound(String),

    #[error("no navigation file available for {0:?}")]
    MissingNavigation(PathBuf),
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("cannot merge datasets: {0}")]
    Merge(String),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("invalid schema: {0}")]
    Schema(String),
    #[error("invalid reader config: {0}")]
    Config(String),
    #[error("invalid file pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Failure decoding a file, shared by every dataset that required the file.
    #[error("failed to decode {path:?}: {source}")]
    File { path: PathBuf, source: Arc<Error> },
}

pub type Result<T> = std::result::Result<T, Error>;
