//! Token transport via cookies.

use chrono::Duration;
use http::{
    header::{self, InvalidHeaderValue},
    HeaderMap, HeaderValue,
};

use std::fmt::Write as _;

/// Finds the value of the cookie `name` in the `Cookie` header(s) of a request.
///
/// Empty values are treated as absent. Values are returned as-is, with surrounding
/// double quotes removed.
pub fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(cookie_name, _)| cookie_name.trim() == name)
        .map(|(_, value)| {
            let value = value.trim();
            value
                .strip_prefix('"')
                .and_then(|value| value.strip_suffix('"'))
                .unwrap_or(value)
        })
        .find(|value| !value.is_empty())
}

/// `Set-Cookie` template for issued tokens.
///
/// # Examples
///
/// ```
/// # use chrono::Duration;
/// # use jwt_gate::SessionCookie;
/// # fn main() -> anyhow::Result<()> {
/// let cookie = SessionCookie::new("token")
///     .with_max_age(Duration::hours(1))
///     .with_domain("example.com");
/// let header = cookie.header_value("abc.def.ghi")?;
/// assert_eq!(
///     header.to_str()?,
///     "token=abc.def.ghi; Max-Age=3600; Path=/; Domain=example.com; Secure; HttpOnly; SameSite=Lax"
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SessionCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie lifetime; a session cookie is produced if not set.
    pub max_age: Option<Duration>,
    /// Cookie path.
    pub path: String,
    /// Cookie domain.
    pub domain: Option<String>,
    /// Whether the cookie is only sent over HTTPS.
    pub secure: bool,
    /// Whether the cookie is hidden from scripts.
    pub http_only: bool,
}

impl SessionCookie {
    /// Creates a secure, HTTP-only cookie template with the root path.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_age: None,
            path: "/".to_owned(),
            domain: None,
            secure: true,
            http_only: true,
        }
    }

    /// Sets the cookie lifetime.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Sets the cookie path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the cookie domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the `Secure` flag.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the `HttpOnly` flag.
    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Renders a `Set-Cookie` header value carrying `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting value contains characters not allowed in headers.
    pub fn header_value(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render(token, self.max_age)
    }

    /// Renders a `Set-Cookie` header value removing the cookie on the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting value contains characters not allowed in headers.
    pub fn removal_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render("", Some(Duration::zero()))
    }

    fn render(&self, value: &str, max_age: Option<Duration>) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!("{}={value}", self.name);
        // Writing to a `String` is infallible.
        if let Some(max_age) = max_age {
            write!(cookie, "; Max-Age={}", max_age.num_seconds().max(0)).ok();
        }
        write!(cookie, "; Path={}", self.path).ok();
        if let Some(domain) = &self.domain {
            write!(cookie, "; Domain={domain}").ok();
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str("; SameSite=Lax");
        HeaderValue::from_str(&cookie)
    }
}
