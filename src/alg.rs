//! Implementations of token signing / verification algorithms.

mod rsa;

pub use self::rsa::{
    ModulusBits, ModulusBitsError, Rsa, RsaParseError, RsaPrivateKey, RsaPublicKey, RsaSignature,
};
