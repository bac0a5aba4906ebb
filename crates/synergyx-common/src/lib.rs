//! Shared types for the synergyx workspace: the error taxonomy, feature
//! families and the fusion schema that ties feature tables to model widths.

pub mod error;
pub mod schema;

pub use error::{Result, SynergyError};
pub use schema::{FeatureFamily, FeatureSchema};
