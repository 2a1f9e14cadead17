//! CARBO Classify - Carbohydrate categories
//!
//! A compound is a carbohydrate when the top anchor
//! ("carbohydrates and carbohydrate derivatives") is among its ontology
//! ancestors. Its category is decided by which of the two roots below the
//! top anchor it descends from, and by how many children the branch under
//! that root has.

mod classifier;

pub use classifier::{Classification, Classifier};
