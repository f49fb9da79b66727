pub mod address_validator;
pub mod chain_normalizer;

pub use address_validator::AddressValidator;
