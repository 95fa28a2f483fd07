//! Request-facing authorization gate.
//!
//! [`AuthGate`] extracts a session token from a request (from the configured header,
//! or from the configured cookie if the header is absent), verifies it, interprets the verified
//! claims as a principal and attaches the principal to the request extensions.
//! Each failure is mapped to a stable [`ErrorCode`].

use chrono::{DateTime, Utc};
use http::{request::Parts, HeaderMap, HeaderName, Request};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    config::{ConfigError, TokenConfig},
    cookie::find_cookie,
    ErrorCode, SessionClaims, TokenVerifier,
};

/// Principal produced from verified claims.
pub trait Principal {
    /// Checks whether the principal identifies a valid subject. Invalid principals
    /// are rejected with [`ErrorCode::InvalidClaims`].
    fn is_valid(&self) -> bool;
}

/// Application-defined interpretation of verified session claims.
///
/// Implemented for closures `Fn(&SessionClaims) -> anyhow::Result<P>`.
pub trait ClaimsInterpreter<P> {
    /// Interprets `claims` as a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if claims do not describe a principal. The error is reported
    /// as [`ErrorCode::InvalidClaims`].
    fn interpret(&self, claims: &SessionClaims) -> anyhow::Result<P>;
}

impl<P, F> ClaimsInterpreter<P> for F
where
    F: Fn(&SessionClaims) -> anyhow::Result<P>,
{
    fn interpret(&self, claims: &SessionClaims) -> anyhow::Result<P> {
        self(claims)
    }
}

/// Interpreter parsing the token payload as a JSON-encoded principal.
pub struct JsonPrincipal<P>(PhantomData<fn() -> P>);

impl<P> fmt::Debug for JsonPrincipal<P> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("JsonPrincipal").finish()
    }
}

impl<P> Clone for JsonPrincipal<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for JsonPrincipal<P> {}

impl<P> Default for JsonPrincipal<P> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<P: DeserializeOwned> ClaimsInterpreter<P> for JsonPrincipal<P> {
    fn interpret(&self, claims: &SessionClaims) -> anyhow::Result<P> {
        Ok(claims.decode_json()?)
    }
}

/// Principal of a login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPrincipal {
    /// User ID; zero is never a valid user.
    #[serde(alias = "Uid")]
    pub uid: u64,
    /// Login identifier (e.g., a phone number or a username).
    #[serde(default, alias = "Identifier")]
    pub identifier: String,
    /// Kind of the identifier.
    #[serde(default, rename = "identityType", alias = "IdentityType")]
    pub identity_type: i32,
}

impl Principal for SessionPrincipal {
    fn is_valid(&self) -> bool {
        self.uid != 0
    }
}

/// Stage of request processing by [`AuthGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum GateStage {
    /// Token is being extracted from the request.
    ExtractingToken,
    /// Token signature and validity period are being checked.
    Verifying,
    /// Verified claims are being interpreted as a principal.
    InterpretingClaims,
    /// Principal is attached to the request.
    Authorized,
}

impl fmt::Display for GateStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::ExtractingToken => "extracting token",
            Self::Verifying => "verifying",
            Self::InterpretingClaims => "interpreting claims",
            Self::Authorized => "authorized",
        })
    }
}

/// Error returned by [`AuthGate`] when a request is not authorized.
#[derive(Debug)]
pub struct AuthError {
    code: ErrorCode,
    stage: GateStage,
    message: String,
}

impl AuthError {
    fn new(code: ErrorCode, stage: GateStage, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the stage at which processing was aborted.
    pub fn stage(&self) -> GateStage {
        self.stage
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{code} ({stage}): {message}",
            code = self.code,
            stage = self.stage,
            message = self.message
        )
    }
}

impl std::error::Error for AuthError {}

/// Authorization gate for HTTP requests.
///
/// The gate may be backed by a verifier with custom [`TimeOptions`](crate::TimeOptions);
/// `F` is the clock function of the verifier.
///
/// # Examples
///
/// ```
/// # use chrono::Duration;
/// # use http::Request;
/// # use jwt_gate::{
/// #     AuthGate, ErrorCode, KeyMaterial, SessionPrincipal, TokenConfig, TokenSigner, TokenVerifier,
/// # };
/// # use std::sync::Arc;
/// # fn main() -> anyhow::Result<()> {
/// # let private_pem = include_str!("../tests/fixtures/rs256.key");
/// # let public_pem = include_str!("../tests/fixtures/rs256.key.pub");
/// let keys = Arc::new(KeyMaterial::from_pem(Some(private_pem), Some(public_pem))?);
/// let config = TokenConfig::default();
/// let verifier = Arc::new(TokenVerifier::new(keys.clone(), &config)?);
/// let gate = AuthGate::<_, SessionPrincipal>::json(verifier, &config)?;
///
/// let principal = SessionPrincipal {
///     uid: 42,
///     identifier: "alice".to_owned(),
///     identity_type: 1,
/// };
/// let token = TokenSigner::new(keys, &config)?.issue_json(&principal, Duration::zero())?;
/// let mut request = Request::get("/").header("token", token).body(())?;
/// assert_eq!(gate.authorize(&mut request)?, principal);
/// assert!(request.extensions().get::<SessionPrincipal>().is_some());
///
/// let mut anonymous = Request::get("/").body(())?;
/// let err = gate.authorize(&mut anonymous).unwrap_err();
/// assert_eq!(err.code(), ErrorCode::NoAuthToken);
/// # Ok(())
/// # }
/// ```
pub struct AuthGate<I, P, F = fn() -> DateTime<Utc>> {
    verifier: Arc<TokenVerifier<F>>,
    header_name: HeaderName,
    cookie_name: String,
    interpreter: I,
    _principal: PhantomData<fn() -> P>,
}

impl<I: fmt::Debug, P, F> fmt::Debug for AuthGate<I, P, F>
where
    TokenVerifier<F>: fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthGate")
            .field("verifier", &self.verifier)
            .field("header_name", &self.header_name)
            .field("cookie_name", &self.cookie_name)
            .field("interpreter", &self.interpreter)
            .finish()
    }
}

impl<P, F> AuthGate<JsonPrincipal<P>, P, F>
where
    P: DeserializeOwned + Principal + Clone + Send + Sync + 'static,
    F: Fn() -> DateTime<Utc>,
{
    /// Creates a gate parsing token payloads as JSON-encoded principals.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured header name is invalid.
    pub fn json(
        verifier: Arc<TokenVerifier<F>>,
        config: &TokenConfig,
    ) -> Result<Self, ConfigError> {
        Self::new(verifier, config, JsonPrincipal::default())
    }
}

impl<I, P, F> AuthGate<I, P, F>
where
    I: ClaimsInterpreter<P>,
    P: Principal + Clone + Send + Sync + 'static,
    F: Fn() -> DateTime<Utc>,
{
    /// Creates a gate with the specified claims interpreter. Header and cookie names
    /// are taken from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured header name is invalid.
    pub fn new(
        verifier: Arc<TokenVerifier<F>>,
        config: &TokenConfig,
        interpreter: I,
    ) -> Result<Self, ConfigError> {
        let header_name =
            HeaderName::try_from(config.header_name.as_str()).map_err(|err| {
                ConfigError::Invalid {
                    field: "header_name",
                    message: err.to_string(),
                }
            })?;
        Ok(Self {
            verifier,
            header_name,
            cookie_name: config.cookie_name.clone(),
            interpreter,
            _principal: PhantomData,
        })
    }

    /// Authorizes a request. On success, the principal is inserted into request extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is not authorized.
    pub fn authorize<B>(&self, request: &mut Request<B>) -> Result<P, AuthError> {
        let principal = self.process(request.headers())?;
        request.extensions_mut().insert(principal.clone());
        Ok(principal)
    }

    /// Authorizes request parts. On success, the principal is inserted into the extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is not authorized.
    pub fn authorize_parts(&self, parts: &mut Parts) -> Result<P, AuthError> {
        let principal = self.process(&parts.headers)?;
        parts.extensions.insert(principal.clone());
        Ok(principal)
    }

    fn process(&self, headers: &HeaderMap) -> Result<P, AuthError> {
        let token = self.extract_token(headers)?;

        let claims = self
            .verifier
            .verify_session(token)
            .map_err(|err| Self::abort(err.code(), GateStage::Verifying, err.to_string()))?;

        let principal = self.interpreter.interpret(&claims).map_err(|err| {
            Self::abort(
                ErrorCode::InvalidClaims,
                GateStage::InterpretingClaims,
                format!("{err:#}"),
            )
        })?;
        if !principal.is_valid() {
            return Err(Self::abort(
                ErrorCode::InvalidClaims,
                GateStage::InterpretingClaims,
                "principal is not valid",
            ));
        }

        tracing::debug!(stage = %GateStage::Authorized, "Request authorized");
        Ok(principal)
    }

    fn extract_token<'a>(&self, headers: &'a HeaderMap) -> Result<&'a str, AuthError> {
        if let Some(value) = headers.get(&self.header_name) {
            // A header that is present, but cannot be read, still carries a token.
            let token = value.to_str().map_err(|_| {
                Self::abort(
                    ErrorCode::InvalidAuthToken,
                    GateStage::Verifying,
                    "token header contains non-ASCII characters",
                )
            })?;
            let token = token.trim();
            if !token.is_empty() {
                return Ok(token);
            }
        }

        find_cookie(headers, &self.cookie_name).ok_or_else(|| {
            Self::abort(
                ErrorCode::NoAuthToken,
                GateStage::ExtractingToken,
                "no auth token",
            )
        })
    }

    fn abort(code: ErrorCode, stage: GateStage, message: impl Into<String>) -> AuthError {
        let err = AuthError::new(code, stage, message);
        tracing::warn!(
            code = %err.code,
            stage = %err.stage,
            message = %err.message,
            "Request rejected"
        );
        err
    }
}
