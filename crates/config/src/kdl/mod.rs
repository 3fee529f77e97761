//! KDL configuration parsing.

mod helpers;
mod sections;

use anyhow::Result;
use tracing::{debug, warn};

use crate::Config;

/// Parse a KDL document into a [`Config`].
///
/// Unknown top-level sections are reported and ignored so that newer
/// configuration files still load on older controllers.
pub fn parse_kdl(content: &str) -> Result<Config> {
    let doc: kdl::KdlDocument = content
        .parse()
        .map_err(|e: kdl::KdlError| anyhow::anyhow!("KDL parse error: {}", e))?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "certificates" => config.certificates = sections::parse_certificates(node)?,
            "storage" => config.storage = sections::parse_storage(node)?,
            "challenge-server" => {
                config.challenge_server = sections::parse_challenge_server(node)?
            }
            "scheduler" => config.scheduler = sections::parse_scheduler(node)?,
            "dns-provider" => config.dns_provider = Some(sections::parse_dns_provider(node)?),
            other => warn!(section = %other, "Ignoring unknown configuration section"),
        }
    }

    debug!(
        lets_encrypt = %config.certificates.lets_encrypt,
        storage = %config.storage.path.display(),
        "Parsed KDL configuration"
    );

    Ok(config)
}
