pub mod elements;
pub mod errors;
mod types;

pub use self::errors::DecodeError;
pub use self::types::*;
