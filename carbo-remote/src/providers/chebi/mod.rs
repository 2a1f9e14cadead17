//! ChEBI ontology provider

pub mod client;
pub mod types;

pub use client::ChebiClient;
