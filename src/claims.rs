//! Claims encoded in tokens and the codec producing session claims.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::ValidationError;

/// Default margin (in seconds) subtracted from the current time to produce the `nbf` claim.
/// It tolerates clock skew between the token issuer and the verifier.
pub const DEFAULT_NOT_BEFORE_SKEW_SECS: i64 = 3_600;

/// Time-related options for token creation and validation.
///
/// The clock function is a type param so that tests (or deterministic environments)
/// can substitute the clock source.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct TimeOptions<F = fn() -> DateTime<Utc>> {
    /// Leeway to use during validation.
    pub leeway: Duration,
    /// Source of the current timestamps.
    pub clock_fn: F,
}

impl<F: Fn() -> DateTime<Utc>> TimeOptions<F> {
    /// Creates options based on the specified time leeway and clock function.
    pub fn new(leeway: Duration, clock_fn: F) -> Self {
        Self { leeway, clock_fn }
    }

    /// Returns the current time according to the clock, truncated to whole seconds.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock_fn)().trunc_subsecs(0)
    }
}

impl TimeOptions {
    /// Creates options based on the specified time leeway. The clock source is [`Utc::now()`].
    pub fn from_leeway(leeway: Duration) -> Self {
        Self {
            leeway,
            clock_fn: Utc::now,
        }
    }
}

/// Zero leeway and [`Utc::now()`] as the clock source.
impl Default for TimeOptions {
    fn default() -> Self {
        Self::from_leeway(Duration::zero())
    }
}

/// Claims encoded in a token.
///
/// Claims are comprised of a "standard" part (`exp`, `nbf`, `iat` and `iss` claims as per
/// [RFC 7519]), and custom fields flattened into the same JSON object. Fields are serialized
/// in declaration order.
///
/// [RFC 7519]: https://tools.ietf.org/html/rfc7519#section-4.1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Claims<T> {
    /// Expiration time of the token.
    #[serde(
        rename = "exp",
        default,
        skip_serializing_if = "Option::is_none",
        with = "self::serde_timestamp"
    )]
    pub expiration: Option<DateTime<Utc>>,

    /// Minimum time at which token is valid.
    #[serde(
        rename = "nbf",
        default,
        skip_serializing_if = "Option::is_none",
        with = "self::serde_timestamp"
    )]
    pub not_before: Option<DateTime<Utc>>,

    /// Time of token issuance.
    #[serde(
        rename = "iat",
        default,
        skip_serializing_if = "Option::is_none",
        with = "self::serde_timestamp"
    )]
    pub issued_at: Option<DateTime<Utc>>,

    /// Token issuer.
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Custom claims.
    #[serde(flatten)]
    pub custom: T,
}

impl<T> Claims<T> {
    /// Creates a new instance with the provided custom claims.
    pub fn new(custom_claims: T) -> Self {
        Self {
            expiration: None,
            not_before: None,
            issued_at: None,
            issuer: None,
            custom: custom_claims,
        }
    }

    /// Sets the `expiration` claim so that the token has the specified `duration`.
    /// The current timestamp is taken from `options`.
    #[must_use]
    pub fn set_duration<F>(self, options: &TimeOptions<F>, duration: Duration) -> Self
    where
        F: Fn() -> DateTime<Utc>,
    {
        Self {
            expiration: Some(options.now() + duration),
            ..self
        }
    }

    /// Atomically sets `issued_at` and `expiration` claims: first to the current time
    /// (taken from `options`), and the second to match the specified `duration` of the token.
    #[must_use]
    pub fn set_duration_and_issuance<F>(self, options: &TimeOptions<F>, duration: Duration) -> Self
    where
        F: Fn() -> DateTime<Utc>,
    {
        let issued_at = options.now();
        Self {
            expiration: Some(issued_at + duration),
            issued_at: Some(issued_at),
            ..self
        }
    }

    /// Sets the `nbf` claim.
    #[must_use]
    pub fn set_not_before(self, moment: DateTime<Utc>) -> Self {
        Self {
            not_before: Some(moment),
            ..self
        }
    }

    /// Sets the `iss` claim.
    #[must_use]
    pub fn set_issuer(self, issuer: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    /// Validates the expiration claim.
    ///
    /// This method will return an error if the claims do not feature an expiration time,
    /// or if it is not in the future (subject to the provided `options`).
    pub fn validate_expiration<F>(&self, options: &TimeOptions<F>) -> Result<&Self, ValidationError>
    where
        F: Fn() -> DateTime<Utc>,
    {
        self.expiration.map_or(
            Err(ValidationError::NoClaim(crate::Claim::Expiration)),
            |expiration| {
                let expiration_time = expiration
                    .checked_add_signed(options.leeway)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if (options.clock_fn)() >= expiration_time {
                    Err(ValidationError::Expired)
                } else {
                    Ok(self)
                }
            },
        )
    }

    /// Validates the maturity time (`nbf` claim).
    ///
    /// This method will return an error if the claims do not feature a maturity time,
    /// or if it is in the future (subject to the provided `options`).
    pub fn validate_maturity<F>(&self, options: &TimeOptions<F>) -> Result<&Self, ValidationError>
    where
        F: Fn() -> DateTime<Utc>,
    {
        self.not_before.map_or(
            Err(ValidationError::NoClaim(crate::Claim::NotBefore)),
            |not_before| {
                let maturity_time = not_before
                    .checked_sub_signed(options.leeway)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                if (options.clock_fn)() < maturity_time {
                    Err(ValidationError::NotMature)
                } else {
                    Ok(self)
                }
            },
        )
    }
}

/// Registered claims with dedicated fields in [`Claims`], in declaration order.
const REGISTERED_CLAIMS: [&str; 4] = ["exp", "nbf", "iat", "iss"];

impl<T: Serialize> Claims<T> {
    /// Returns the name of the first registered claim that is set both in its dedicated field
    /// and in the custom claims. Such claims would be serialized twice.
    pub(crate) fn find_duplicate_claim(&self) -> serde_json::Result<Option<&'static str>> {
        let is_set = [
            self.expiration.is_some(),
            self.not_before.is_some(),
            self.issued_at.is_some(),
            self.issuer.is_some(),
        ];
        if !is_set.contains(&true) {
            return Ok(None);
        }

        let serde_json::Value::Object(custom) = serde_json::to_value(&self.custom)? else {
            return Ok(None);
        };
        let duplicate = REGISTERED_CLAIMS
            .into_iter()
            .zip(is_set)
            .find(|&(name, is_set)| is_set && custom.contains_key(name));
        Ok(duplicate.map(|(name, _)| name))
    }
}

/// Opaque payload of session tokens.
///
/// The payload is stored in the `data` claim as a base64-encoded string (standard alphabet
/// with padding). It is never interpreted by the crate; applications define their own
/// payload schema and parse it after the token is verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, with = "self::serde_base64")]
    data: Vec<u8>,
}

impl Payload {
    /// Creates a payload from the specified bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Returns payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Converts this payload into bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Claims of session tokens: standard claims with an opaque [`Payload`].
pub type SessionClaims = Claims<Payload>;

impl Claims<Payload> {
    /// Returns the opaque payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.custom.as_bytes()
    }

    /// Deserializes the payload from JSON. Callers should treat an error as an invalid
    /// session rather than as a system failure.
    pub fn decode_json<P: DeserializeOwned>(&self) -> serde_json::Result<P> {
        serde_json::from_slice(self.payload())
    }
}

/// Codec converting opaque payloads into session claims.
///
/// # Examples
///
/// ```
/// # use chrono::Duration;
/// # use jwt_gate::ClaimsCodec;
/// let codec = ClaimsCodec::new(Duration::hours(2)).with_issuer("auth-service");
/// let claims = codec.encode(&b"{\"uid\":1}"[..], Duration::zero(), None);
/// // Zero TTL is replaced by the default one.
/// let ttl = claims.expiration.unwrap() - claims.issued_at.unwrap();
/// assert_eq!(ttl, Duration::hours(2));
/// assert_eq!(claims.issuer.as_deref(), Some("auth-service"));
/// assert_eq!(codec.decode(&claims), b"{\"uid\":1}");
/// ```
#[derive(Debug, Clone)]
pub struct ClaimsCodec<F = fn() -> DateTime<Utc>> {
    default_ttl: Duration,
    not_before_skew: Duration,
    issuer: Option<String>,
    time_options: TimeOptions<F>,
}

impl ClaimsCodec {
    /// Creates a codec with the specified default token lifetime. The clock source
    /// is [`Utc::now()`].
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            not_before_skew: Duration::seconds(DEFAULT_NOT_BEFORE_SKEW_SECS),
            issuer: None,
            time_options: TimeOptions::default(),
        }
    }
}

impl<F: Fn() -> DateTime<Utc>> ClaimsCodec<F> {
    /// Replaces time options used by the codec.
    pub fn with_time_options<G>(self, time_options: TimeOptions<G>) -> ClaimsCodec<G>
    where
        G: Fn() -> DateTime<Utc>,
    {
        ClaimsCodec {
            default_ttl: self.default_ttl,
            not_before_skew: self.not_before_skew,
            issuer: self.issuer,
            time_options,
        }
    }

    /// Sets the margin subtracted from the current time to produce the `nbf` claim.
    #[must_use]
    pub fn with_not_before_skew(mut self, skew: Duration) -> Self {
        self.not_before_skew = skew;
        self
    }

    /// Sets the issuer used when no issuer is supplied to [`Self::encode()`].
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Returns the default token lifetime.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Encodes `payload` into claims valid for `ttl` (or the default lifetime if `ttl`
    /// is zero). A negative `ttl` produces already expired claims.
    pub fn encode(
        &self,
        payload: impl Into<Vec<u8>>,
        ttl: Duration,
        issuer: Option<String>,
    ) -> SessionClaims {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let now = self.time_options.now();
        let expiration = now.checked_add_signed(ttl).unwrap_or(if ttl < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        // `nbf <= exp` must hold even for negative TTLs.
        let not_before = now
            .checked_sub_signed(self.not_before_skew)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .min(expiration);

        Claims {
            expiration: Some(expiration),
            not_before: Some(not_before),
            issued_at: Some(now),
            issuer: issuer.or_else(|| self.issuer.clone()),
            custom: Payload::new(payload),
        }
    }

    /// Returns the opaque payload from `claims` unchanged.
    pub fn decode<'a>(&self, claims: &'a SessionClaims) -> &'a [u8] {
        claims.payload()
    }
}

mod serde_timestamp {
    use chrono::{offset::TimeZone, DateTime, Utc};
    use serde::{
        de::{Error as DeError, Visitor},
        Deserializer, Serializer,
    };

    use std::fmt;

    struct TimestampVisitor;

    impl TimestampVisitor {
        fn from_secs<E: DeError>(secs: i64) -> Result<DateTime<Utc>, E> {
            Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| E::custom("UTC timestamp overflow"))
        }
    }

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("UTC timestamp")
        }

        fn visit_i64<E: DeError>(self, value: i64) -> Result<Self::Value, E> {
            Self::from_secs(value)
        }

        fn visit_u64<E: DeError>(self, value: u64) -> Result<Self::Value, E> {
            let value = i64::try_from(value).map_err(DeError::custom)?;
            Self::from_secs(value)
        }

        // Some issuers encode timestamps as floating-point numbers.
        #[allow(clippy::cast_possible_truncation)]
        fn visit_f64<E: DeError>(self, value: f64) -> Result<Self::Value, E> {
            if !value.is_finite() || value.abs() >= i64::MAX as f64 {
                return Err(E::custom("UTC timestamp overflow"));
            }
            Self::from_secs(value.trunc() as i64)
        }
    }

    #[allow(clippy::trivially_copy_pass_by_ref)] // required by the `serde(with)` contract
    pub fn serialize<S: Serializer>(
        time: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_i64(time.timestamp()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        deserializer.deserialize_any(TimestampVisitor).map(Some)
    }
}

mod serde_base64 {
    use base64ct::{Base64, Encoding};
    use serde::{de::Error as DeError, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        // `null` is how an empty byte slice is encoded by some issuers.
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => Base64::decode_vec(&encoded).map_err(DeError::custom),
            None => Ok(Vec::new()),
        }
    }
}
