pub mod batchrelay;
pub mod error;
pub mod protocol;
