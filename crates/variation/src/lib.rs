pub mod applicator;
pub mod source;

pub use applicator::apply_factors;
pub use source::{decode_envelope, HttpFactorSource};
