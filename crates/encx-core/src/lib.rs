pub mod atomic;
pub mod config;
pub mod error;
pub mod types;

pub use error::{CertRejection, EncxError, EncxResult, ErrorKind, IoResultExt};
pub use types::{Algorithm, CancelFlag, CustodyRecord, ProgressFn};
