//! Key traits defined by the crate.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{de::DeserializeOwned, Serialize};

use std::{borrow::Cow, marker::PhantomData};

use crate::{
    token::CompleteHeader, Claims, CreationError, Header, Token, UntrustedToken, ValidationError,
};

/// Signature for a certain signing [`Algorithm`].
///
/// We require that signature can be restored from a byte slice,
/// and can be represented as a byte slice.
pub trait AlgorithmSignature: Sized {
    /// Byte lengths of signatures supported by the [`Algorithm`]. An empty slice means
    /// that the signature length is not checked.
    ///
    /// If this slice is non-empty, the signature will be first checked for its length
    /// during token verification. An [`InvalidSignatureLen`] error will be raised if the length
    /// is invalid. [`Self::try_from_slice()`] will thus always receive a slice with
    /// one of the expected lengths.
    ///
    /// [`InvalidSignatureLen`]: crate::ValidationError::InvalidSignatureLen
    const LENGTHS: &'static [usize] = &[];

    /// Attempts to restore a signature from a byte slice. This method may fail
    /// if the slice is malformed.
    fn try_from_slice(slice: &[u8]) -> anyhow::Result<Self>;

    /// Represents this signature as bytes.
    fn as_bytes(&self) -> Cow<'_, [u8]>;
}

/// Token signing algorithm.
pub trait Algorithm {
    /// Key used when issuing new tokens.
    type SigningKey;
    /// Key used when verifying tokens.
    type VerifyingKey;
    /// Signature produced by the algorithm.
    type Signature: AlgorithmSignature;

    /// Returns the name of this algorithm, as mentioned in the `alg` field of the token header.
    fn name(&self) -> Cow<'static, str>;

    /// Signs a `message` with the `signing_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing backend fails (e.g., because the key is too small
    /// for the chosen padding scheme).
    fn sign(&self, signing_key: &Self::SigningKey, message: &[u8])
        -> anyhow::Result<Self::Signature>;

    /// Verifies the `message` against the `signature` and `verifying_key`.
    ///
    /// Implementations must not leak information about the expected signature through
    /// timing; a mismatch must take the same time wherever it occurs.
    fn verify_signature(
        &self,
        signature: &Self::Signature,
        verifying_key: &Self::VerifyingKey,
        message: &[u8],
    ) -> bool;
}

/// Automatically implemented extensions of the `Algorithm` trait.
pub trait AlgorithmExt: Algorithm {
    /// Creates a new token and serializes it to string.
    fn token<T>(
        &self,
        header: &Header,
        claims: &Claims<T>,
        signing_key: &Self::SigningKey,
    ) -> Result<String, CreationError>
    where
        T: Serialize;

    /// Creates a validator for the specified verifying key and the claims type.
    /// The validator can then be used to validate one or more tokens.
    fn validator<'a, T>(&'a self, verifying_key: &'a Self::VerifyingKey) -> Validator<'a, Self, T>;
}

impl<A: Algorithm> AlgorithmExt for A {
    fn token<T>(
        &self,
        header: &Header,
        claims: &Claims<T>,
        signing_key: &Self::SigningKey,
    ) -> Result<String, CreationError>
    where
        T: Serialize,
    {
        let complete_header = CompleteHeader {
            algorithm: self.name(),
            content_type: None,
            inner: header,
        };
        let header = serde_json::to_string(&complete_header).map_err(CreationError::Header)?;
        let mut token = Base64UrlUnpadded::encode_string(header.as_bytes());

        if let Some(name) = claims
            .find_duplicate_claim()
            .map_err(CreationError::Claims)?
        {
            return Err(CreationError::DuplicateClaim(name));
        }
        let claims = serde_json::to_string(claims).map_err(CreationError::Claims)?;
        token.push('.');
        token.push_str(&Base64UrlUnpadded::encode_string(claims.as_bytes()));

        let signature = self
            .sign(signing_key, token.as_bytes())
            .map_err(CreationError::Signature)?;
        token.push('.');
        token.push_str(&Base64UrlUnpadded::encode_string(&signature.as_bytes()));
        Ok(token)
    }

    fn validator<'a, T>(&'a self, verifying_key: &'a Self::VerifyingKey) -> Validator<'a, Self, T> {
        Validator {
            algorithm: self,
            verifying_key,
            _claims: PhantomData,
        }
    }
}

/// Validator for a certain signing [`Algorithm`] associated with a specific verifying key
/// and a claims type. Produced by the [`AlgorithmExt::validator()`] method.
#[derive(Debug)]
pub struct Validator<'a, A: Algorithm + ?Sized, T> {
    algorithm: &'a A,
    verifying_key: &'a A::VerifyingKey,
    _claims: PhantomData<fn() -> T>,
}

impl<A: Algorithm + ?Sized, T> Clone for Validator<'_, A, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Algorithm + ?Sized, T> Copy for Validator<'_, A, T> {}

impl<A: Algorithm + ?Sized, T: DeserializeOwned> Validator<'_, A, T> {
    /// Validates the token integrity against a verifying key enclosed in this validator.
    ///
    /// The algorithm declared in the token header is compared with the algorithm
    /// of this validator before anything else, so that a token can never select
    /// the verification procedure applied to it. Temporal claims are **not** checked.
    pub fn validate(self, token: &UntrustedToken<'_>) -> Result<Token<T>, ValidationError> {
        let expected_alg = self.algorithm.name();
        if expected_alg != token.algorithm() {
            return Err(ValidationError::AlgorithmMismatch {
                expected: expected_alg.into_owned(),
                actual: token.algorithm().to_owned(),
            });
        }

        let signature = token.signature_bytes();
        let expected_lengths = A::Signature::LENGTHS;
        if !expected_lengths.is_empty() && !expected_lengths.contains(&signature.len()) {
            return Err(ValidationError::InvalidSignatureLen {
                expected: expected_lengths,
                actual: signature.len(),
            });
        }

        let signature =
            A::Signature::try_from_slice(signature).map_err(ValidationError::MalformedSignature)?;
        // We assume that parsing claims is less computationally demanding than
        // validating a signature.
        let claims = token.deserialize_claims::<T>()?;
        if !self
            .algorithm
            .verify_signature(&signature, self.verifying_key, token.signed_data)
        {
            return Err(ValidationError::InvalidSignature);
        }

        Ok(Token::new(token.header().clone(), claims))
    }
}
