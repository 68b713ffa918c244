pub mod hasher;
pub mod validation;

pub use hasher::{CredentialHasher, Pbkdf2Hasher};
pub use validation::InputValidator;
