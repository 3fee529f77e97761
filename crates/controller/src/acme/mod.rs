//! ACME certificate authority session
//!
//! Issues certificates from Let's Encrypt and compatible CAs. Single names
//! are validated over HTTP-01; wildcards over DNS-01 when a DNS provider is
//! configured.
//!
//! # Components
//!
//! - [`AcmeAuthority`] - [`CertificateAuthority`](crate::authority::CertificateAuthority)
//!   implementation wrapping `instant-acme`
//! - [`CredentialStore`] - persisted account credentials
//! - [`ChallengeManager`] - pending HTTP-01 tokens shared with the responder
//! - [`ChallengeServer`] - HTTP/1 responder for `/.well-known/acme-challenge/<token>`
//! - [`dns`] - TXT record publishing and propagation checks for DNS-01
//!
//! # Challenge Flow
//!
//! 1. [`AcmeAuthority`] creates an order for a single domain
//! 2. HTTP-01: the key authorization is registered with [`ChallengeManager`]
//!    and the CA fetches it from [`ChallengeServer`].
//!    DNS-01: its digest is published as `_acme-challenge.<domain>` and the
//!    authority waits until resolvers return it.
//! 3. The order is polled until ready, finalized with a fresh key and CSR,
//!    and polled again until the chain is available
//! 4. Tokens and TXT records are removed whatever the outcome

mod challenge;
mod client;
mod credentials;
pub mod dns;
mod server;

pub use challenge::{ChallengeManager, ACME_CHALLENGE_PREFIX};
pub use client::{AcmeAuthority, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use credentials::{CredentialError, CredentialStore};
pub use dns::Dns01Solver;
pub use server::ChallengeServer;
