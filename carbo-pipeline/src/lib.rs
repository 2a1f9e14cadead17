//! CARBO Pipeline - Batch processing
//!
//! `BatchOrchestrator` takes a list of InChIKeys or SMILES strings through
//! known-failure skipping, concurrent resolution, chunked property retrieval
//! and classification, and returns a `BatchReport` with one record per input.

mod orchestrator;
mod report;

pub use orchestrator::BatchOrchestrator;
pub use report::{BatchReport, BatchSummary};
