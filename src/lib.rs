//! RSA-signed session tokens with pinned algorithms, short-lived CSRF tokens
//! and an authorization gate for HTTP requests.
//!
//! # Design choices
//!
//! - Token signature algorithms are expressed via the [`Algorithm`] trait, which uses fully
//!   typed keys and signatures. The only backend is [`Rsa`](alg::Rsa) (`RS*` and `PS*`).
//! - [Token header] is represented by the [`Header`] struct, which does not expose
//!   the [`alg` field]. `alg` is filled automatically during token creation and is compared
//!   to the algorithm pinned by [`TokenVerifier`] before the signature is even decoded.
//!   This eliminates [algorithm switching attacks][switching], including `none` tokens
//!   and `HS*` tokens keyed with the public RSA key.
//! - Tokens without `exp` or `nbf` claims are rejected. `exp` and `nbf` violations are
//!   reported separately from integrity failures (see [`VerifyError`]).
//! - Every failure observed by [`AuthGate`] is mapped to a stable [`ErrorCode`].
//!
//! # Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`KeyMaterial`] | Loads and checks PEM-encoded RSA keys |
//! | [`ClaimsCodec`] | Maps opaque payloads to [`SessionClaims`] and back |
//! | [`TokenSigner`] / [`TokenVerifier`] | Issue and verify session tokens |
//! | [`CsrfGuard`] | Issues and verifies encrypted, timestamped CSRF tokens |
//! | [`AuthGate`] | Authorizes HTTP requests carrying session tokens |
//! | [`Settings`] | YAML / environment configuration |
//!
//! [Token header]: https://tools.ietf.org/html/rfc7519#section-5
//! [`alg` field]: https://tools.ietf.org/html/rfc7515#section-4.1.1
//! [switching]: https://auth0.com/blog/critical-vulnerabilities-in-json-web-token-libraries/
//!
//! # Examples
//!
//! Session token lifecycle:
//!
//! ```
//! use chrono::Duration;
//! use jwt_gate::{prelude::*, KeyMaterial, TokenConfig, VerifyError};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Login {
//!     uid: u64,
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! # let private_pem = include_str!("../tests/fixtures/rs256.key");
//! # let public_pem = include_str!("../tests/fixtures/rs256.key.pub");
//! let keys = Arc::new(KeyMaterial::from_pem(Some(private_pem), Some(public_pem))?);
//! let config = TokenConfig::default();
//! let signer = TokenSigner::new(keys.clone(), &config)?;
//! let verifier = TokenVerifier::new(keys, &config)?;
//!
//! let token = signer.issue_json(&Login { uid: 1 }, Duration::hours(1))?;
//! let claims = verifier.verify_session(&token)?;
//! assert_eq!(claims.decode_json::<Login>()?, Login { uid: 1 });
//!
//! // Tokens issued with a negative lifetime are already expired.
//! let token = signer.issue(b"stale", Duration::seconds(-1))?;
//! assert!(matches!(verifier.verify_session(&token), Err(VerifyError::Expired)));
//! # Ok(())
//! # }
//! ```
//!
//! CSRF tokens:
//!
//! ```
//! use jwt_gate::{CsrfGuard, CsrfKey};
//!
//! # fn main() -> anyhow::Result<()> {
//! let guard = CsrfGuard::new(CsrfKey::new(b"0123456789abcdef")?);
//! let token = guard.issue()?;
//! assert!(guard.verify(&token));
//! assert!(!guard.verify("garbage"));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc(html_root_url = "https://docs.rs/jwt-gate/0.1.0")]
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

pub mod alg;
mod claims;
mod config;
mod cookie;
mod csrf;
mod error;
mod gate;
mod keys;
mod session;
mod token;
mod traits;

/// Prelude to neatly import all necessary stuff from the crate.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        AlgorithmExt as _, Claims, Header, SessionClaims, TimeOptions, Token, TokenSigner,
        TokenVerifier, UntrustedToken,
    };
}

pub use crate::{
    claims::{
        Claims, ClaimsCodec, Payload, SessionClaims, TimeOptions, DEFAULT_NOT_BEFORE_SKEW_SECS,
    },
    config::{
        ConfigError, CsrfConfig, Settings, TokenConfig, DEFAULT_EXPIRES_SECS, DEFAULT_TOKEN_NAME,
    },
    cookie::{find_cookie, SessionCookie},
    csrf::{
        issue_csrf_token, verify_csrf_token, CsrfError, CsrfGuard, CsrfKey, CsrfKeyError,
        DEFAULT_CSRF_WINDOW_SECS,
    },
    error::{
        Claim, CreationError, ErrorCode, KeyLoadError, KeyRole, ParseError, ValidationError,
        VerifyError,
    },
    gate::{
        AuthError, AuthGate, ClaimsInterpreter, GateStage, JsonPrincipal, Principal,
        SessionPrincipal,
    },
    keys::{KeyMaterial, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE},
    session::{TokenSigner, TokenVerifier},
    token::{Header, Token, UntrustedToken},
    traits::{Algorithm, AlgorithmExt, AlgorithmSignature, Validator},
};
