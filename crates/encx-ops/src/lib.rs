//! encx-ops: the collaborator-facing API
//!
//! Wraps the streaming engine with custody-store policy:
//!   - `encrypt`: seal → save record (with duplicate check) → verify → delete source
//!   - `decrypt`: supplied key or store lookup → open → delete container / record
//!   - batch variants over a list of files
//!   - `authenticate`: chain validation followed by proof of possession

pub mod auth;
pub mod batch;
pub mod material;
pub mod pipeline;

pub use auth::authenticate;
pub use batch::BatchReport;
pub use material::{KeyMaterial, MaterialSource};
pub use pipeline::{DecryptOutcome, EncryptOutcome, Pipeline};

pub use encx_crypto::StreamHooks;
pub use encx_identity::{
    challenge_response, validate_cert_against_ca, Certificate, RootAuthority, SigningKey,
};
pub use encx_store::CustodyStore;
