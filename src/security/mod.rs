pub mod credentials;
pub mod keyring;
