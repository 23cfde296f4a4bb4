//! Reconciliation module: link management, anomaly detection, integrity and
//! period closing

pub mod anomaly;
pub mod core;
pub mod integrity;
pub mod manager;
pub mod period;

pub use anomaly::*;
pub use core::*;
pub use integrity::*;
pub use manager::*;
pub use period::*;
