//! Planning algorithms: curve mapping, decomposition, optimization and form validation.
//!
//! Everything here is synchronous and independent of any backend.

pub mod curve;
pub mod decompose;
pub mod mapper;
pub mod optimize;
pub mod validation;
