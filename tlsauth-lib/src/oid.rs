//! OID string constants used by the verifier.
//!
//! Grouping them here avoids magic strings scattered across modules and gives
//! each OID a readable name.

// ── Distinguished Name attributes (RFC 4519 / X.520) ────────────────────

pub const COMMON_NAME: &str = "2.5.4.3";

// ── Signature algorithms ─────────────────────────────────────────────────

pub const MD5_WITH_RSA: &str = "1.2.840.113549.1.1.4";
pub const SHA1_WITH_RSA: &str = "1.2.840.113549.1.1.5";
pub const ECDSA_WITH_SHA1: &str = "1.2.840.10045.4.1";
pub const DSA_WITH_SHA1: &str = "1.2.840.10040.4.3";

// ── Public key types ─────────────────────────────────────────────────────

pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
pub const DSA: &str = "1.2.840.10040.4.1";

// ── Named curves ─────────────────────────────────────────────────────────

pub const CURVE_P192: &str = "1.2.840.10045.3.1.1";
