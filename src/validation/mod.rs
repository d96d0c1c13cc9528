//! Rule-based structural and metadata validation of a draft (§4.5).

pub mod rules;
pub mod scorer;

pub use rules::{Finding, Severity};
pub use scorer::{DefaultScorer, Scorer, ValidationReport, validate_draft};
