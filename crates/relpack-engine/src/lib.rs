//! relpack engine - placeholder substitution for release artifacts
//!
//! This crate drives a release artifact from validation to an in-place,
//! substituted install directory:
//! - Chunked token scanning that never splits a token across reads
//! - Byte-exact substitution with atomic, permission-preserving writes
//! - Variable bindings with corrected file lists written back on commit
//! - Container image registry rewriting for deploy manifests
//! - A phase machine that refuses to write while any error is pending

pub mod binder;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod image;
pub mod pipeline;
pub mod stream;
pub mod substitute;
pub mod token;

pub use binder::{Bindings, VariableBinder};
pub use config::{PipelineConfig, RegistryRewrite};
pub use error::{EngineError, Result};
pub use image::ImageRewriter;
pub use pipeline::{FileReport, Phase, Pipeline, RunOutcome, RunSummary};
pub use stream::{Segment, SegmentStream};
pub use substitute::{Substitution, Substitutor, SubstitutorBuilder, WriteMode};
pub use token::{MarkerMode, TokenScanner};
