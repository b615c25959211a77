//! Stateless checks and transformations applied to individual events.

pub mod compressor;
pub mod validator;
