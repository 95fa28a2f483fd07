//! Error handling.

use serde::{Serialize, Serializer};

use std::{fmt, io, path::PathBuf};

/// Stable error codes surfaced to callers of the crate.
///
/// Codes are serialized as their string names (e.g., `"ExpiredAuthToken"`), which is also
/// what [`Self::as_str()`] returns; the request-handling layer is expected to map them
/// to transport-level responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// Neither the token header nor the token cookie is present in a request.
    NoAuthToken,
    /// Token is malformed, uses an unexpected algorithm, or has an invalid signature.
    InvalidAuthToken,
    /// Token is well-formed and correctly signed, but is outside its validity period.
    ExpiredAuthToken,
    /// Token claims cannot be interpreted as a valid principal.
    InvalidClaims,
    /// Key material required by the process cannot be loaded.
    KeyLoadError,
}

impl ErrorCode {
    /// Returns the stable string representation of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAuthToken => "NoAuthToken",
            Self::InvalidAuthToken => "InvalidAuthToken",
            Self::ExpiredAuthToken => "ExpiredAuthToken",
            Self::InvalidClaims => "InvalidClaims",
            Self::KeyLoadError => "KeyLoadError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Errors that may occur during token parsing.
#[derive(Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// Token has invalid structure.
    ///
    /// Valid tokens must consist of 3 base64url-encoded parts (header, claims, and signature)
    /// separated by periods.
    InvalidTokenStructure,
    /// Cannot decode base64.
    InvalidBase64Encoding,
    /// Token header cannot be parsed.
    MalformedHeader(serde_json::Error),
    /// [Content type][cty] mentioned in the token header is not supported.
    ///
    /// Only JSON claims are supported.
    ///
    /// [cty]: https://tools.ietf.org/html/rfc7515#section-4.1.10
    UnsupportedContentType(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTokenStructure => formatter.write_str("invalid token structure"),
            Self::InvalidBase64Encoding => write!(formatter, "invalid base64 decoding"),
            Self::MalformedHeader(err) => write!(formatter, "malformed token header: {err}"),
            Self::UnsupportedContentType(ty) => {
                write!(formatter, "unsupported content type: {ty}")
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedHeader(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors that can occur during token validation.
#[derive(Debug)]
#[non_exhaustive]
pub enum ValidationError {
    /// Algorithm mentioned in the token header differs from invoked one.
    AlgorithmMismatch {
        /// Expected algorithm name.
        expected: String,
        /// Actual algorithm in the token.
        actual: String,
    },
    /// Token signature has invalid byte length.
    InvalidSignatureLen {
        /// Expected signature lengths in bytes.
        expected: &'static [usize],
        /// Actual signature length in bytes.
        actual: usize,
    },
    /// Token signature is malformed.
    MalformedSignature(anyhow::Error),
    /// Token signature has failed verification.
    InvalidSignature,
    /// Token claims cannot be deserialized from JSON.
    MalformedClaims(serde_json::Error),
    /// Claim requested during validation is not present in the token.
    NoClaim(Claim),
    /// Token has expired.
    Expired,
    /// Token is not yet valid as per `nbf` claim.
    NotMature,
}

/// Identifier of a claim in `Claims`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Claim {
    /// `exp` claim (expiration time).
    Expiration,
    /// `nbf` claim (valid not before).
    NotBefore,
}

impl fmt::Display for Claim {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Expiration => "exp",
            Self::NotBefore => "nbf",
        })
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlgorithmMismatch { expected, actual } => write!(
                formatter,
                "token algorithm ({actual}) differs from expected ({expected})"
            ),
            Self::InvalidSignatureLen { expected, actual } => write!(
                formatter,
                "invalid signature length: expected one of {expected:?} bytes, got {actual} bytes"
            ),
            Self::MalformedSignature(err) => write!(formatter, "malformed token signature: {err}"),
            Self::InvalidSignature => formatter.write_str("signature has failed verification"),
            Self::MalformedClaims(err) => write!(formatter, "cannot deserialize claims: {err}"),
            Self::NoClaim(claim) => write!(
                formatter,
                "claim `{claim}` requested during validation is not present in the token"
            ),
            Self::Expired => formatter.write_str("token has expired"),
            Self::NotMature => formatter.write_str("token is not yet ready"),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedSignature(err) => Some(err.as_ref()),
            Self::MalformedClaims(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors that can occur during token creation.
#[derive(Debug)]
#[non_exhaustive]
pub enum CreationError {
    /// Token header cannot be serialized.
    Header(serde_json::Error),
    /// Token claims cannot be serialized into JSON.
    Claims(serde_json::Error),
    /// Token payload cannot be serialized into JSON.
    Payload(serde_json::Error),
    /// Signing backend has failed.
    Signature(anyhow::Error),
    /// Custom claims contain a registered claim (e.g., `exp`) that is also set
    /// in the dedicated field of [`Claims`](crate::Claims).
    DuplicateClaim(&'static str),
}

impl fmt::Display for CreationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(err) => write!(formatter, "cannot serialize header: {err}"),
            Self::Claims(err) => write!(formatter, "cannot serialize claims: {err}"),
            Self::Payload(err) => write!(formatter, "cannot serialize payload: {err}"),
            Self::Signature(err) => write!(formatter, "cannot sign token: {err}"),
            Self::DuplicateClaim(name) => {
                write!(formatter, "claim `{name}` is set both in custom and registered claims")
            }
        }
    }
}

impl std::error::Error for CreationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Header(err) | Self::Claims(err) | Self::Payload(err) => Some(err),
            Self::Signature(err) => Some(err.as_ref()),
            Self::DuplicateClaim(_) => None,
        }
    }
}

/// Outcome of a failed token verification.
///
/// The three variants must be handled differently by callers: a structurally invalid token
/// means the token was corrupted or forged, while a temporal failure means that a correctly
/// signed token is used outside of its validity period (e.g., the user should log in again).
/// Temporal variants are only returned after the token signature has been verified.
#[derive(Debug)]
#[non_exhaustive]
pub enum VerifyError {
    /// Token is malformed, declares an unexpected algorithm, or its signature is invalid.
    Invalid(anyhow::Error),
    /// Token is correctly signed, but has expired.
    Expired,
    /// Token is correctly signed, but its `nbf` claim is in the future.
    NotYetValid,
}

impl VerifyError {
    /// Checks whether this error is caused by the token validity period rather than
    /// by its contents.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Expired | Self::NotYetValid)
    }

    /// Returns the error code corresponding to this error.
    pub fn code(&self) -> ErrorCode {
        if self.is_temporal() {
            ErrorCode::ExpiredAuthToken
        } else {
            ErrorCode::InvalidAuthToken
        }
    }
}

impl From<ParseError> for VerifyError {
    fn from(err: ParseError) -> Self {
        Self::Invalid(err.into())
    }
}

impl From<ValidationError> for VerifyError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Expired => Self::Expired,
            ValidationError::NotMature => Self::NotYetValid,
            other => Self::Invalid(other.into()),
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(err) => write!(formatter, "invalid token: {err}"),
            Self::Expired => formatter.write_str("token has expired"),
            Self::NotYetValid => formatter.write_str("token is not yet valid"),
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Role of a key in a key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Private key used to sign tokens.
    Signing,
    /// Public key used to verify tokens.
    Verifying,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Signing => "private",
            Self::Verifying => "public",
        })
    }
}

/// Errors that can occur when loading key material.
///
/// These errors are configuration errors: a process should not serve traffic
/// if it cannot load the keys it needs.
#[derive(Debug)]
#[non_exhaustive]
pub enum KeyLoadError {
    /// Key file cannot be read.
    Io {
        /// Role of the key.
        role: KeyRole,
        /// Path to the key file.
        path: PathBuf,
        /// I/O error.
        source: io::Error,
    },
    /// Key cannot be parsed from PEM.
    Parse {
        /// Role of the key.
        role: KeyRole,
        /// Parsing error.
        source: anyhow::Error,
    },
    /// RSA key has unsupported modulus bit length.
    UnsupportedKeyLength {
        /// Role of the key.
        role: KeyRole,
        /// Actual bit length of the key modulus.
        bits: usize,
    },
    /// Private and public keys do not form a key pair.
    KeyPairMismatch,
    /// Signing was requested, but no private key is loaded.
    MissingSigningKey,
    /// Verification was requested, but no public key is loaded.
    MissingVerifyingKey,
}

impl KeyLoadError {
    /// Returns the error code corresponding to this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::KeyLoadError
    }
}

impl fmt::Display for KeyLoadError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { role, path, source } => write!(
                formatter,
                "cannot read {role} key file {}: {source}",
                path.display()
            ),
            Self::Parse { role, source } => {
                write!(formatter, "cannot parse {role} key: {source}")
            }
            Self::UnsupportedKeyLength { role, bits } => write!(
                formatter,
                "unsupported bit length of {role} RSA key modulus ({bits}); \
                 only lengths 2048, 3072 and 4096 are supported"
            ),
            Self::KeyPairMismatch => {
                formatter.write_str("private and public keys do not form a key pair")
            }
            Self::MissingSigningKey => formatter.write_str("no private key is loaded"),
            Self::MissingVerifyingKey => formatter.write_str("no public key is loaded"),
        }
    }
}

impl std::error::Error for KeyLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
