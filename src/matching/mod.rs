//! Matching module: similarity scoring, candidate assignment and classification

pub mod classifier;
pub mod matcher;
pub mod scorer;

pub use classifier::*;
pub use matcher::*;
pub use scorer::*;
