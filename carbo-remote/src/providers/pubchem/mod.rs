//! PubChem compound provider

pub mod client;
pub mod types;

pub use client::PubChemClient;
