//! Utility modules: error taxonomy, filesystem helpers, logging, numeric conversions.
pub mod errors;
pub mod fsutil;
pub mod logger;
pub mod num;
