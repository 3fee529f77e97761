//! Application instance view consumed by provisioning.
//!
//! Only the fields certificate provisioning reads or writes are modelled.
//! The JSON shape follows the platform's resource conventions so that
//! `certpilot provision --app app.json` accepts exported objects as-is.

use serde::{Deserialize, Serialize};

/// Transport protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Tcp,
    Udp,
    #[serde(other)]
    Other,
}

/// Protocol an endpoint is advertised with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishProtocol {
    Http,
    Https,
    Tcp,
    Udp,
    #[serde(other)]
    Other,
}

/// A published address of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub address: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_protocol: Option<PublishProtocol>,
}

/// A port exposed through a named service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    #[serde(default)]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstanceSpec {
    #[serde(default)]
    pub ports: Vec<PortBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstanceStatus {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// Identity of an application instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstanceMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

/// A deployed application as seen by ProvisionCerts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstance {
    pub metadata: AppInstanceMeta,
    #[serde(default)]
    pub spec: AppInstanceSpec,
    #[serde(default)]
    pub status: AppInstanceStatus,
}

impl AppInstance {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }
}
