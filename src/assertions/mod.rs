//! Differential, structural and log assertions
//!
//! All checks return their findings instead of failing fast, so one run
//! reports every discrepancy.

pub mod delta;
pub mod logs;
pub mod structure;
pub mod violation;

pub use delta::compare;
pub use logs::{LogFailure, LogSource, check_error_logs};
pub use structure::check_data_streams;
pub use violation::{Side, Violation, ViolationKind};
