pub mod cipher;

pub use cipher::{DecryptionError, TokenCipher};
