//! Well-known label, annotation and data keys on persisted records.

/// Label marking a record as owned by certpilot. Used as the list filter.
pub const MANAGED: &str = "certpilot.io/managed";

/// Annotation recording the domain a certificate was issued for.
pub const DOMAIN: &str = "certpilot.io/domain";

/// Data key holding the PEM-encoded certificate chain.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Data key holding the PEM-encoded private key.
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Type marker of TLS records.
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

/// Type marker of generic records.
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";
