//! Tests for CSRF tokens.

use base64ct::{Base64, Encoding};
use chrono::Duration;

mod shared;

use crate::shared::clock_at;
use jwt_gate::{issue_csrf_token, verify_csrf_token, CsrfConfig, CsrfGuard, CsrfKey, Settings};

const KEYS: [&[u8]; 3] = [
    b"0123456789abcdef",
    b"0123456789abcdef01234567",
    b"0123456789abcdef0123456789abcdef",
];

#[test]
fn issue_then_verify_for_all_key_lengths() {
    for key in KEYS {
        let key = CsrfKey::new(key).unwrap();
        let token = issue_csrf_token(&key).unwrap();
        assert!(verify_csrf_token(&key, &token), "key bits: {}", key.bits());
    }
}

#[test]
fn wrong_key_is_rejected() {
    let key = CsrfKey::new(KEYS[0]).unwrap();
    let other_key = CsrfKey::new(b"fedcba9876543210").unwrap();
    let token = issue_csrf_token(&key).unwrap();
    assert!(!verify_csrf_token(&other_key, &token));

    // Keys of different lengths never accept each other's tokens.
    let long_key = CsrfKey::new(KEYS[2]).unwrap();
    assert!(!verify_csrf_token(&long_key, &token));
}

#[test]
fn garbage_is_rejected() {
    let key = CsrfKey::new(KEYS[1]).unwrap();
    let garbage = [
        "",
        "garbage",
        "csrf:1700000000",
        "!!!not base64!!!",
        "AAAA",
        "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    ];
    for token in garbage {
        assert!(!verify_csrf_token(&key, token), "token: {token}");
    }
}

#[test]
fn tampered_token_is_rejected() {
    let key = CsrfKey::new(KEYS[0]).unwrap();
    let token = issue_csrf_token(&key).unwrap();
    let sealed = Base64::decode_vec(&token).unwrap();

    for i in 0..sealed.len() {
        let mut mangled = sealed.clone();
        mangled[i] ^= 1;
        let mangled = Base64::encode_string(&mangled);
        assert!(!verify_csrf_token(&key, &mangled), "mangled byte: {i}");
    }
}

#[test]
fn window_is_checked_in_both_directions() {
    let key = CsrfKey::new(KEYS[2]).unwrap();
    let token = CsrfGuard::new(key.clone())
        .with_time_options(clock_at(Duration::zero()))
        .issue()
        .unwrap();

    let guard_at = |offset: Duration| {
        CsrfGuard::new(key.clone()).with_time_options(clock_at(offset))
    };
    assert!(guard_at(Duration::seconds(599)).verify(&token));
    assert!(guard_at(Duration::seconds(-599)).verify(&token));
    assert!(!guard_at(Duration::seconds(600)).verify(&token));
    assert!(!guard_at(Duration::seconds(-600)).verify(&token));
    assert!(!guard_at(Duration::hours(1)).verify(&token));
}

#[test]
fn custom_window() {
    let key = CsrfKey::new(KEYS[0]).unwrap();
    let token = CsrfGuard::new(key.clone())
        .with_time_options(clock_at(Duration::zero()))
        .issue()
        .unwrap();

    let guard = CsrfGuard::new(key)
        .with_window(Duration::seconds(30))
        .with_time_options(clock_at(Duration::seconds(45)));
    assert_eq!(guard.window(), Duration::seconds(30));
    assert!(!guard.verify(&token));
}

#[test]
fn guard_from_settings() {
    let yaml = "
csrf:
  key: 0123456789abcdef0123456789abcdef
  window: 60
";
    let settings = Settings::from_yaml_str(yaml).unwrap();
    let guard = settings.csrf.unwrap().guard().unwrap();
    assert_eq!(guard.window(), Duration::minutes(1));
    let token = guard.issue().unwrap();
    assert!(guard.verify(&token));

    let err = CsrfConfig::new("short").guard().unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid CSRF key length (5 bytes); expected 16, 24 or 32 bytes"
    );
}
