//! Short-lived anti-forgery (CSRF) tokens.
//!
//! A token is the string `csrf:<unix timestamp>` encrypted with AES-GCM under a symmetric key
//! and encoded with standard base64 (with padding). The random 96-bit nonce is prepended
//! to the ciphertext. A token is accepted while its timestamp is within the validity window
//! of the current time (in either direction).

use aes_gcm::{
    aead::{generic_array::typenum::Unsigned, Aead, AeadCore, KeyInit, Nonce, OsRng},
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Duration, Utc};

use std::fmt;

use crate::TimeOptions;

/// Default validity window of CSRF tokens in seconds.
pub const DEFAULT_CSRF_WINDOW_SECS: u64 = 600;

const TOKEN_PREFIX: &str = "csrf";

type Aes192Gcm = AesGcm<aes::Aes192, aes_gcm::aead::consts::U12>;

/// Error returned when creating a [`CsrfKey`] from bytes of unsupported length.
#[derive(Debug)]
#[non_exhaustive]
pub enum CsrfKeyError {
    /// Key has an unsupported length.
    InvalidLength(usize),
}

impl fmt::Display for CsrfKeyError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => write!(
                formatter,
                "invalid CSRF key length ({len} bytes); expected 16, 24 or 32 bytes"
            ),
        }
    }
}

impl std::error::Error for CsrfKeyError {}

/// Error that can occur when issuing a CSRF token.
#[derive(Debug)]
#[non_exhaustive]
pub enum CsrfError {
    /// Encryption backend has failed.
    Encryption,
}

impl fmt::Display for CsrfError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encryption => formatter.write_str("cannot encrypt CSRF token"),
        }
    }
}

impl std::error::Error for CsrfError {}

#[derive(Clone)]
enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

/// Symmetric key for CSRF tokens: AES-128, AES-192 or AES-256 depending on the key length.
#[derive(Clone)]
pub struct CsrfKey {
    cipher: Cipher,
}

impl fmt::Debug for CsrfKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CsrfKey")
            .field("bits", &self.bits())
            .finish()
    }
}

impl CsrfKey {
    /// Creates a key from 16, 24 or 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` have another length.
    pub fn new(bytes: &[u8]) -> Result<Self, CsrfKeyError> {
        let invalid_length = |_| CsrfKeyError::InvalidLength(bytes.len());
        let cipher = match bytes.len() {
            16 => Cipher::Aes128(Aes128Gcm::new_from_slice(bytes).map_err(invalid_length)?),
            24 => Cipher::Aes192(Aes192Gcm::new_from_slice(bytes).map_err(invalid_length)?),
            32 => Cipher::Aes256(Aes256Gcm::new_from_slice(bytes).map_err(invalid_length)?),
            len => return Err(CsrfKeyError::InvalidLength(len)),
        };
        Ok(Self { cipher })
    }

    /// Returns the key length in bits.
    pub fn bits(&self) -> usize {
        match self.cipher {
            Cipher::Aes128(_) => 128,
            Cipher::Aes192(_) => 192,
            Cipher::Aes256(_) => 256,
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CsrfError> {
        match &self.cipher {
            Cipher::Aes128(cipher) => seal(cipher, plaintext),
            Cipher::Aes192(cipher) => seal(cipher, plaintext),
            Cipher::Aes256(cipher) => seal(cipher, plaintext),
        }
    }

    fn open(&self, sealed: &[u8]) -> Option<Vec<u8>> {
        match &self.cipher {
            Cipher::Aes128(cipher) => open(cipher, sealed),
            Cipher::Aes192(cipher) => open(cipher, sealed),
            Cipher::Aes256(cipher) => open(cipher, sealed),
        }
    }
}

fn seal<C: Aead>(cipher: &C, plaintext: &[u8]) -> Result<Vec<u8>, CsrfError> {
    let nonce = C::generate_nonce(OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CsrfError::Encryption)?;
    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open<C: Aead>(cipher: &C, sealed: &[u8]) -> Option<Vec<u8>> {
    let nonce_len = <<C as AeadCore>::NonceSize as Unsigned>::USIZE;
    if sealed.len() < nonce_len {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(nonce_len);
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .ok()
}

/// Issuer and verifier of CSRF tokens.
///
/// # Examples
///
/// ```
/// # use chrono::Duration;
/// # use jwt_gate::{CsrfGuard, CsrfKey};
/// # fn main() -> anyhow::Result<()> {
/// let key = CsrfKey::new(b"0123456789abcdef")?;
/// let guard = CsrfGuard::new(key).with_window(Duration::minutes(5));
/// let token = guard.issue()?;
/// assert!(guard.verify(&token));
/// assert!(!guard.verify("garbage"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CsrfGuard<F = fn() -> DateTime<Utc>> {
    key: CsrfKey,
    window: Duration,
    time_options: TimeOptions<F>,
}

impl CsrfGuard {
    /// Creates a guard with the default validity window.
    pub fn new(key: CsrfKey) -> Self {
        Self {
            key,
            window: default_window(),
            time_options: TimeOptions::default(),
        }
    }
}

impl<F: Fn() -> DateTime<Utc>> CsrfGuard<F> {
    /// Sets the validity window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Replaces the clock source. The leeway of the options is ignored.
    pub fn with_time_options<G>(self, time_options: TimeOptions<G>) -> CsrfGuard<G>
    where
        G: Fn() -> DateTime<Utc>,
    {
        CsrfGuard {
            key: self.key,
            window: self.window,
            time_options,
        }
    }

    /// Returns the validity window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Issues a token for the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn issue(&self) -> Result<String, CsrfError> {
        let now = (self.time_options.clock_fn)().timestamp();
        let plaintext = format!("{TOKEN_PREFIX}:{now}");
        let sealed = self.key.seal(plaintext.as_bytes())?;
        Ok(Base64::encode_string(&sealed))
    }

    /// Checks a token. Every failure (malformed encoding, wrong key, tampering, unexpected
    /// plaintext, or a timestamp outside the window) results in `false`.
    pub fn verify(&self, token: &str) -> bool {
        match self.check(token) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(reason, "Rejected CSRF token");
                false
            }
        }
    }

    fn check(&self, token: &str) -> Result<(), &'static str> {
        let sealed = Base64::decode_vec(token).map_err(|_| "invalid base64 encoding")?;
        let plaintext = self.key.open(&sealed).ok_or("cannot decrypt token")?;
        let plaintext = std::str::from_utf8(&plaintext).map_err(|_| "plaintext is not UTF-8")?;

        let parts: Vec<_> = plaintext.split(':').collect();
        let [prefix, timestamp] = parts.as_slice() else {
            return Err("unexpected plaintext structure");
        };
        if *prefix != TOKEN_PREFIX {
            return Err("unexpected plaintext prefix");
        }
        let timestamp: i64 = timestamp.parse().map_err(|_| "invalid timestamp")?;

        let now = (self.time_options.clock_fn)().timestamp();
        let window = u64::try_from(self.window.num_seconds()).unwrap_or(0);
        if now.abs_diff(timestamp) < window {
            Ok(())
        } else {
            Err("timestamp is outside the validity window")
        }
    }
}

#[allow(clippy::cast_possible_wrap)] // the constant is small
fn default_window() -> Duration {
    Duration::seconds(DEFAULT_CSRF_WINDOW_SECS as i64)
}

/// Issues a CSRF token with the default settings.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn issue_csrf_token(key: &CsrfKey) -> Result<String, CsrfError> {
    CsrfGuard::new(key.clone()).issue()
}

/// Verifies a CSRF token with the default settings (600 seconds window).
pub fn verify_csrf_token(key: &CsrfKey, token: &str) -> bool {
    CsrfGuard::new(key.clone()).verify(token)
}
