//! Issuance and verification of session tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};

use std::sync::Arc;

use crate::{
    alg::Rsa, config::TokenConfig, AlgorithmExt, Claims, ClaimsCodec, CreationError, Header,
    KeyLoadError, KeyMaterial, Payload, SessionClaims, TimeOptions, UntrustedToken, VerifyError,
};

/// Signs claims into tokens with the private half of [`KeyMaterial`].
///
/// The algorithm recorded in the token header is always the one configured for the signer;
/// callers can never influence it.
///
/// # Examples
///
/// ```
/// # use chrono::Duration;
/// # use jwt_gate::{KeyMaterial, TokenConfig, TokenSigner, TokenVerifier};
/// # use std::sync::Arc;
/// # fn main() -> anyhow::Result<()> {
/// # let private_pem = include_str!("../tests/fixtures/rs256.key");
/// # let public_pem = include_str!("../tests/fixtures/rs256.key.pub");
/// let keys = Arc::new(KeyMaterial::from_pem(Some(private_pem), Some(public_pem))?);
/// let config = TokenConfig::default();
/// let signer = TokenSigner::new(keys.clone(), &config)?;
/// let verifier = TokenVerifier::new(keys, &config)?;
///
/// let token = signer.issue(b"opaque bytes", Duration::minutes(5))?;
/// assert_eq!(verifier.verify_payload(&token)?, b"opaque bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenSigner<F = fn() -> DateTime<Utc>> {
    keys: Arc<KeyMaterial>,
    algorithm: Rsa,
    header: Header,
    codec: ClaimsCodec<F>,
}

impl TokenSigner {
    /// Creates a signer.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError::MissingSigningKey`] if `keys` do not contain a private key.
    pub fn new(keys: Arc<KeyMaterial>, config: &TokenConfig) -> Result<Self, KeyLoadError> {
        if keys.signing_key().is_none() {
            return Err(KeyLoadError::MissingSigningKey);
        }

        let mut header = Header::default().with_token_type("JWT");
        if let Some(key_id) = &config.key_id {
            header = header.with_key_id(key_id.clone());
        }
        Ok(Self {
            keys,
            algorithm: config.algorithm,
            header,
            codec: config.claims_codec(),
        })
    }
}

impl<F: Fn() -> DateTime<Utc>> TokenSigner<F> {
    /// Replaces the time options used to fill in temporal claims.
    pub fn with_time_options<G>(self, options: TimeOptions<G>) -> TokenSigner<G>
    where
        G: Fn() -> DateTime<Utc>,
    {
        TokenSigner {
            keys: self.keys,
            algorithm: self.algorithm,
            header: self.header,
            codec: self.codec.with_time_options(options),
        }
    }

    /// Returns the claims codec used by [`Self::issue()`].
    pub fn codec(&self) -> &ClaimsCodec<F> {
        &self.codec
    }

    /// Signs the provided `claims`. Temporal claims are used as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be serialized or the signing backend fails.
    pub fn sign<T: Serialize>(&self, claims: &Claims<T>) -> Result<String, CreationError> {
        let signing_key = self.keys.signing_key().ok_or_else(|| {
            CreationError::Signature(anyhow::Error::new(KeyLoadError::MissingSigningKey))
        })?;
        self.algorithm.token(&self.header, claims, signing_key)
    }

    /// Issues a token carrying the opaque `payload` for `ttl` (the default lifetime
    /// is used if `ttl` is zero).
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue(&self, payload: &[u8], ttl: Duration) -> Result<String, CreationError> {
        let claims = self.codec.encode(payload, ttl, None);
        self.sign(&claims)
    }

    /// Serializes `payload` to JSON and issues a token carrying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or signing fails.
    pub fn issue_json<P: Serialize>(
        &self,
        payload: &P,
        ttl: Duration,
    ) -> Result<String, CreationError> {
        let payload = serde_json::to_vec(payload).map_err(CreationError::Payload)?;
        self.issue(&payload, ttl)
    }
}

/// Verifies tokens with the public half of [`KeyMaterial`].
///
/// Exactly one algorithm is accepted by a verifier; tokens declaring any other algorithm
/// are rejected before their signature is decoded. After the signature is checked,
/// the verifier requires `nbf <= now < exp` (subject to the configured leeway).
#[derive(Debug, Clone)]
pub struct TokenVerifier<F = fn() -> DateTime<Utc>> {
    keys: Arc<KeyMaterial>,
    algorithm: Rsa,
    time_options: TimeOptions<F>,
}

impl TokenVerifier {
    /// Creates a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError::MissingVerifyingKey`] if `keys` do not contain a public key.
    pub fn new(keys: Arc<KeyMaterial>, config: &TokenConfig) -> Result<Self, KeyLoadError> {
        if keys.verifying_key().is_none() {
            return Err(KeyLoadError::MissingVerifyingKey);
        }
        Ok(Self {
            keys,
            algorithm: config.algorithm,
            time_options: TimeOptions::from_leeway(config.leeway()),
        })
    }
}

impl<F: Fn() -> DateTime<Utc>> TokenVerifier<F> {
    /// Replaces the time options used to check temporal claims.
    pub fn with_time_options<G>(self, time_options: TimeOptions<G>) -> TokenVerifier<G>
    where
        G: Fn() -> DateTime<Utc>,
    {
        TokenVerifier {
            keys: self.keys,
            algorithm: self.algorithm,
            time_options,
        }
    }

    /// Returns the algorithm pinned by this verifier.
    pub fn algorithm(&self) -> Rsa {
        self.algorithm
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::Invalid`] if the token is malformed, declares a different algorithm,
    ///   has an invalid signature, or lacks `exp` / `nbf` claims.
    /// - [`VerifyError::Expired`] / [`VerifyError::NotYetValid`] if the token is correctly
    ///   signed, but is used outside its validity period.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<Claims<T>, VerifyError> {
        let claims = self.verify_integrity::<T>(token)?;
        claims
            .validate_expiration(&self.time_options)?
            .validate_maturity(&self.time_options)?;
        Ok(claims)
    }

    /// Verifies a third-party ticket (e.g., a claims map). Unlike [`Self::verify()`],
    /// the `nbf` claim is optional for tickets; it is checked only if present.
    /// The `exp` claim is still required.
    ///
    /// # Errors
    ///
    /// See [`Self::verify()`].
    pub fn verify_ticket<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<Claims<T>, VerifyError> {
        let claims = self.verify_integrity::<T>(token)?;
        claims.validate_expiration(&self.time_options)?;
        if claims.not_before.is_some() {
            claims.validate_maturity(&self.time_options)?;
        }
        Ok(claims)
    }

    fn verify_integrity<T: DeserializeOwned>(&self, token: &str) -> Result<Claims<T>, VerifyError> {
        let verifying_key = self
            .keys
            .verifying_key()
            .ok_or_else(|| VerifyError::Invalid(KeyLoadError::MissingVerifyingKey.into()))?;

        let token = UntrustedToken::new(token)?;
        let token = self.algorithm.validator::<T>(verifying_key).validate(&token)?;
        Ok(token.into_claims())
    }

    /// Verifies a session token carrying an opaque [`Payload`].
    ///
    /// # Errors
    ///
    /// See [`Self::verify()`].
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, VerifyError> {
        self.verify::<Payload>(token)
    }

    /// Verifies a token and returns its opaque payload.
    ///
    /// # Errors
    ///
    /// See [`Self::verify()`].
    pub fn verify_payload(&self, token: &str) -> Result<Vec<u8>, VerifyError> {
        self.verify_session(token)
            .map(|claims| claims.custom.into_bytes())
    }
}
