//! Intent subsystem: decide whether a message asks for a nearby place, and
//! which kind.

pub mod category;
pub mod classifier;
pub mod oracle;

pub use category::{Category, CategoryRule, RuleSet};
pub use classifier::{ClassificationOrigin, ClassificationResult, ClassifierConfig, IntentClassifier};
pub use oracle::{FailoverOracle, HttpOracle, Oracle, OracleEndpoint, OracleError};
