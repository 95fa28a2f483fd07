//! Configuration of token issuance, verification and CSRF protection.

use chrono::Duration;
use http::HeaderName;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use crate::{
    alg::Rsa,
    claims::DEFAULT_NOT_BEFORE_SKEW_SECS,
    csrf::{CsrfGuard, CsrfKey, DEFAULT_CSRF_WINDOW_SECS},
    ClaimsCodec, CsrfKeyError, KeyLoadError, KeyMaterial,
};

/// Default token lifetime in seconds.
pub const DEFAULT_EXPIRES_SECS: u64 = 86_400;
/// Default name of the request header and cookie carrying the token.
pub const DEFAULT_TOKEN_NAME: &str = "token";

fn default_expires() -> u64 {
    DEFAULT_EXPIRES_SECS
}

fn default_token_name() -> String {
    DEFAULT_TOKEN_NAME.to_owned()
}

fn default_not_before_skew() -> u64 {
    DEFAULT_NOT_BEFORE_SKEW_SECS.unsigned_abs()
}

fn default_csrf_window() -> u64 {
    DEFAULT_CSRF_WINDOW_SECS
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Configuration file cannot be read.
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// I/O error.
        source: std::io::Error,
    },
    /// YAML configuration cannot be parsed.
    Yaml(serde_yaml::Error),
    /// Environment variable has an invalid value.
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// Parsing error.
        source: anyhow::Error,
    },
    /// Configuration value is invalid.
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable description of the problem.
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(
                formatter,
                "cannot read configuration file {}: {source}",
                path.display()
            ),
            Self::Yaml(err) => write!(formatter, "cannot parse YAML configuration: {err}"),
            Self::InvalidVar { name, source } => {
                write!(formatter, "invalid value of env variable {name}: {source}")
            }
            Self::Invalid { field, message } => {
                write!(formatter, "invalid configuration value `{field}`: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Yaml(err) => Some(err),
            Self::InvalidVar { source, .. } => Some(source.as_ref()),
            Self::Invalid { .. } => None,
        }
    }
}

/// Configuration of session tokens.
///
/// Durations are expressed in whole seconds. Legacy key spellings (`RS256KeyDir`,
/// `jwtexpires`, `jwtissuer`, `headername`, `cookiename`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenConfig {
    /// Directory containing `rs256.key` and / or `rs256.key.pub`.
    #[serde(default, alias = "RS256KeyDir")]
    pub key_dir: Option<PathBuf>,
    /// Explicit path to the private key. Takes precedence over `key_dir`.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Explicit path to the public key. Takes precedence over `key_dir`.
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    /// Default token lifetime.
    #[serde(default = "default_expires", alias = "jwtexpires")]
    pub expires: u64,
    /// Issuer recorded in the `iss` claim.
    #[serde(default, alias = "jwtissuer")]
    pub issuer: Option<String>,
    /// Name of the request header carrying the token.
    #[serde(default = "default_token_name", alias = "headername")]
    pub header_name: String,
    /// Name of the cookie carrying the token.
    #[serde(default = "default_token_name", alias = "cookiename")]
    pub cookie_name: String,
    /// Margin subtracted from the issuance time to produce the `nbf` claim.
    #[serde(default = "default_not_before_skew")]
    pub not_before_skew: u64,
    /// Leeway applied when checking `exp` and `nbf` claims.
    #[serde(default)]
    pub leeway: u64,
    /// Signing algorithm; the only algorithm accepted by verifiers.
    #[serde(default, with = "serde_alg")]
    pub algorithm: Rsa,
    /// Key identifier recorded in the `kid` header of issued tokens.
    #[serde(default)]
    pub key_id: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            key_dir: None,
            private_key_path: None,
            public_key_path: None,
            expires: DEFAULT_EXPIRES_SECS,
            issuer: None,
            header_name: default_token_name(),
            cookie_name: default_token_name(),
            not_before_skew: default_not_before_skew(),
            leeway: 0,
            algorithm: Rsa::default(),
            key_id: None,
        }
    }
}

impl TokenConfig {
    /// Reads configuration from `JWT_*` environment variables, falling back to defaults
    /// for unset variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `JWT_KEY_DIR` | `key_dir` |
    /// | `JWT_PRIVATE_KEY_PATH` | `private_key_path` |
    /// | `JWT_PUBLIC_KEY_PATH` | `public_key_path` |
    /// | `JWT_EXPIRES` | `expires` |
    /// | `JWT_ISSUER` | `issuer` |
    /// | `JWT_HEADER_NAME` | `header_name` |
    /// | `JWT_COOKIE_NAME` | `cookie_name` |
    /// | `JWT_NOT_BEFORE_SKEW` | `not_before_skew` |
    /// | `JWT_LEEWAY` | `leeway` |
    /// | `JWT_ALGORITHM` | `algorithm` |
    /// | `JWT_KEY_ID` | `key_id` |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting configuration
    /// is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Self::from_env()`], but with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting configuration
    /// is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
        where
            T: std::str::FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value.trim().parse().map_err(|err| ConfigError::InvalidVar {
                name,
                source: anyhow::Error::new(err),
            })
        }

        let mut config = Self::default();
        if let Some(dir) = lookup("JWT_KEY_DIR") {
            config.key_dir = Some(dir.into());
        }
        if let Some(path) = lookup("JWT_PRIVATE_KEY_PATH") {
            config.private_key_path = Some(path.into());
        }
        if let Some(path) = lookup("JWT_PUBLIC_KEY_PATH") {
            config.public_key_path = Some(path.into());
        }
        if let Some(value) = lookup("JWT_EXPIRES") {
            config.expires = parse("JWT_EXPIRES", &value)?;
        }
        if let Some(issuer) = lookup("JWT_ISSUER") {
            config.issuer = Some(issuer);
        }
        if let Some(name) = lookup("JWT_HEADER_NAME") {
            config.header_name = name;
        }
        if let Some(name) = lookup("JWT_COOKIE_NAME") {
            config.cookie_name = name;
        }
        if let Some(value) = lookup("JWT_NOT_BEFORE_SKEW") {
            config.not_before_skew = parse("JWT_NOT_BEFORE_SKEW", &value)?;
        }
        if let Some(value) = lookup("JWT_LEEWAY") {
            config.leeway = parse("JWT_LEEWAY", &value)?;
        }
        if let Some(value) = lookup("JWT_ALGORITHM") {
            config.algorithm = parse("JWT_ALGORITHM", &value)?;
        }
        if let Some(key_id) = lookup("JWT_KEY_ID") {
            config.key_id = Some(key_id);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if the token lifetime is zero, a duration overflows, or a header
    /// name is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expires == 0 {
            return Err(ConfigError::Invalid {
                field: "expires",
                message: "token lifetime must be positive".to_owned(),
            });
        }
        for (field, secs) in [
            ("expires", self.expires),
            ("not_before_skew", self.not_before_skew),
            ("leeway", self.leeway),
        ] {
            checked_secs(secs).ok_or_else(|| ConfigError::Invalid {
                field,
                message: format!("{secs} seconds is out of range"),
            })?;
        }

        HeaderName::try_from(self.header_name.as_str()).map_err(|err| ConfigError::Invalid {
            field: "header_name",
            message: err.to_string(),
        })?;
        if !is_cookie_name(&self.cookie_name) {
            return Err(ConfigError::Invalid {
                field: "cookie_name",
                message: format!("`{}` is not a valid cookie name", self.cookie_name),
            });
        }
        Ok(())
    }

    /// Returns the default token lifetime.
    pub fn expires(&self) -> Duration {
        checked_secs(self.expires).unwrap_or_else(|| Duration::days(1))
    }

    /// Returns the leeway for temporal claims.
    pub fn leeway(&self) -> Duration {
        checked_secs(self.leeway).unwrap_or_else(Duration::zero)
    }

    /// Returns the margin used for the `nbf` claim.
    pub fn not_before_skew(&self) -> Duration {
        checked_secs(self.not_before_skew).unwrap_or_else(Duration::zero)
    }

    /// Creates a claims codec according to this configuration.
    pub fn claims_codec(&self) -> ClaimsCodec {
        let codec =
            ClaimsCodec::new(self.expires()).with_not_before_skew(self.not_before_skew());
        match self.issuer.as_deref() {
            Some(issuer) if !issuer.is_empty() => codec.with_issuer(issuer),
            _ => codec,
        }
    }

    /// Loads keys according to this configuration. Explicit key paths take precedence;
    /// if neither path is specified, keys are loaded from `key_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be loaded.
    pub fn load_keys(&self) -> Result<KeyMaterial, KeyLoadError> {
        let has_explicit_paths = self.private_key_path.is_some() || self.public_key_path.is_some();
        match &self.key_dir {
            Some(dir) if !has_explicit_paths => KeyMaterial::from_dir(dir),
            _ => KeyMaterial::load(
                self.private_key_path.as_deref(),
                self.public_key_path.as_deref(),
            ),
        }
    }
}

/// Upper bound for configured durations (~100 years).
const MAX_DURATION_SECS: u64 = 100 * 365 * 86_400;

fn checked_secs(secs: u64) -> Option<Duration> {
    if secs > MAX_DURATION_SECS {
        None
    } else {
        i64::try_from(secs).ok().map(Duration::seconds)
    }
}

// See RFC 6265, section 4.1.1: `cookie-name` is an HTTP token.
fn is_cookie_name(name: &str) -> bool {
    const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={} \t";
    !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_graphic() && !SEPARATORS.contains(&byte))
}

/// Configuration of CSRF tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CsrfConfig {
    /// Symmetric key (16, 24 or 32 bytes) used to encrypt tokens.
    pub key: String,
    /// Validity window in seconds.
    #[serde(default = "default_csrf_window")]
    pub window: u64,
}

impl fmt::Debug for CsrfConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CsrfConfig")
            .field("key", &"_")
            .field("window", &self.window)
            .finish()
    }
}

impl CsrfConfig {
    /// Creates a configuration with the specified key and the default window.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            window: DEFAULT_CSRF_WINDOW_SECS,
        }
    }

    /// Creates a CSRF guard according to this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has an unsupported length.
    pub fn guard(&self) -> Result<CsrfGuard, CsrfKeyError> {
        let key_bytes = Zeroizing::new(self.key.as_bytes().to_vec());
        let key = CsrfKey::new(&key_bytes)?;
        let window = checked_secs(self.window).unwrap_or_else(Duration::zero);
        Ok(CsrfGuard::new(key).with_window(window))
    }
}

/// Complete configuration of the crate, usually loaded from a YAML file.
///
/// # Examples
///
/// ```
/// # use jwt_gate::Settings;
/// # fn main() -> anyhow::Result<()> {
/// let yaml = "
/// jwt:
///   RS256KeyDir: /etc/keys
///   jwtexpires: 3600
///   jwtissuer: auth-service
/// csrf:
///   key: 0123456789abcdef
/// ";
/// let settings = Settings::from_yaml_str(yaml)?;
/// assert_eq!(settings.jwt.expires, 3_600);
/// assert_eq!(settings.jwt.header_name, "token");
/// assert_eq!(settings.csrf.unwrap().window, 600);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Settings {
    /// Session token configuration.
    #[serde(default)]
    pub jwt: TokenConfig,
    /// CSRF token configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf: Option<CsrfConfig>,
}

impl Settings {
    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the configuration is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml).map_err(ConfigError::Yaml)?;
        settings.jwt.validate()?;
        Ok(settings)
    }

    /// Reads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or on any error from
    /// [`Self::from_yaml_str()`].
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let settings = Self::from_yaml_str(&yaml)?;
        tracing::info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }
}

mod serde_alg {
    use serde::{de::Error as DeError, Deserialize, Deserializer, Serializer};

    use crate::alg::Rsa;

    #[allow(clippy::trivially_copy_pass_by_ref)] // required by the `serde(with)` contract
    pub fn serialize<S: Serializer>(alg: &Rsa, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(alg)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Rsa, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(DeError::custom)
    }
}
