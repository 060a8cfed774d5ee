//! Statement builder for the PostgreSQL document store: field names validated
//! as identifiers, values always bound as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
