//! Transfer validation and gas quoting.

pub mod estimator;
pub mod quote;
pub mod validation;

pub use estimator::GasEstimator;
pub use quote::GasQuote;
pub use validation::{parse_recipient, validate_transfer, TransferRequest, ValidatedTransfer};
