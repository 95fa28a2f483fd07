//! Functionality shared by integration tests.

#![allow(dead_code)] // Not all helpers are used by every test crate.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jwt_gate::{KeyMaterial, TimeOptions, TokenConfig, TokenSigner, TokenVerifier};
use serde::{Deserialize, Serialize};

use std::sync::Arc;

pub const RSA_PRIVATE_KEY: &str = include_str!("../fixtures/rs256.key");
pub const RSA_PRIVATE_KEY_PKCS8: &str = include_str!("../fixtures/rs256.pk8");
pub const RSA_PUBLIC_KEY: &str = include_str!("../fixtures/rs256.key.pub");
/// Key pair unrelated to `RSA_PRIVATE_KEY`; the public key is PKCS#1-encoded.
pub const OTHER_PRIVATE_KEY: &str = include_str!("../fixtures/other.key");
pub const OTHER_PUBLIC_KEY: &str = include_str!("../fixtures/other.key.pub");
/// 1024-bit key, which is too short to be accepted.
pub const WEAK_PRIVATE_KEY: &str = include_str!("../fixtures/weak-1024.key");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleClaims {
    #[serde(rename = "sub")]
    pub subject: String,
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

pub fn key_material() -> Arc<KeyMaterial> {
    let keys = KeyMaterial::from_pem(Some(RSA_PRIVATE_KEY), Some(RSA_PUBLIC_KEY)).unwrap();
    Arc::new(keys)
}

pub fn other_key_material() -> Arc<KeyMaterial> {
    let keys = KeyMaterial::from_pem(Some(OTHER_PRIVATE_KEY), Some(OTHER_PUBLIC_KEY)).unwrap();
    Arc::new(keys)
}

pub fn signer_and_verifier(config: &TokenConfig) -> (TokenSigner, TokenVerifier) {
    let keys = key_material();
    let signer = TokenSigner::new(keys.clone(), config).unwrap();
    let verifier = TokenVerifier::new(keys, config).unwrap();
    (signer, verifier)
}

/// Fixed moment used by tests relying on a frozen clock.
pub fn frozen_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap()
}

pub fn clock_at(offset: Duration) -> TimeOptions<impl Fn() -> DateTime<Utc> + Clone> {
    let now = frozen_now() + offset;
    TimeOptions::new(Duration::zero(), move || now)
}
