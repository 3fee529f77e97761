use std::collections::HashSet;
use tracing::{debug, info, warn};

use certpilot_common::names;
use certpilot_common::{Domain, ObjectKey};
use certpilot_config::Config;

use super::{CertificateController, HandlerError};
use crate::model::{AppInstance, Protocol, PublishProtocol};
use crate::repository::ProvisionOutcome;

/// Why a candidate domain was not provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    NotFullyQualified,
    ReservedSuffix,
}

/// A domain handed to the repository during a provisioning pass
#[derive(Debug)]
pub struct ProvisionedDomain {
    pub domain: Domain,
    pub key: ObjectKey,
    pub outcome: ProvisionOutcome,
}

/// What a provisioning pass did, for callers that want more than `Ok`
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub provisioned: Vec<ProvisionedDomain>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl ProvisionReport {
    /// Number of background issuances launched
    pub fn issuing(&self) -> usize {
        self.provisioned
            .iter()
            .filter(|p| p.outcome.is_issuing())
            .count()
    }
}

/// Identity of the application being provisioned
struct AppRef<'a> {
    name: &'a str,
    namespace: &'a str,
    segment: &'a str,
}

impl CertificateController {
    /// Provision certificates for an application's HTTP endpoints and
    /// port bindings.
    ///
    /// HTTP endpoints are handled first and abort on the first error; each
    /// one that succeeds is republished as HTTPS in `app.status`. Port
    /// bindings not already covered are best-effort and their errors are
    /// returned together.
    pub async fn provision_certs(
        &self,
        app: &mut AppInstance,
    ) -> Result<ProvisionReport, HandlerError> {
        let config = self.config.current();
        let mut report = ProvisionReport::default();

        if !config.certificates.lets_encrypt.is_enabled() {
            debug!(app = %app.name(), "Certificate provisioning disabled");
            return Ok(report);
        }

        self.repository.authority().register_account_if_absent().await?;

        let name = app.metadata.name.clone();
        let namespace = app.metadata.namespace.clone();
        let segment = names::uid_segment(&app.metadata.uid).to_string();
        let app_ref = AppRef {
            name: &name,
            namespace: &namespace,
            segment: &segment,
        };

        let mut provisioned: HashSet<String> = HashSet::new();

        for endpoint in app.status.endpoints.iter_mut() {
            if endpoint.protocol != Protocol::Http {
                continue;
            }

            self.provision_domain(&config, &endpoint.address, &app_ref, &mut report)
                .await?;
            provisioned.insert(endpoint.address.clone());
            endpoint.publish_protocol = Some(PublishProtocol::Https);
        }

        let mut errors = Vec::new();
        for binding in &app.spec.ports {
            if provisioned.contains(&binding.service_name) {
                continue;
            }

            match self
                .provision_domain(&config, &binding.service_name, &app_ref, &mut report)
                .await
            {
                Ok(()) => {
                    provisioned.insert(binding.service_name.clone());
                }
                Err(e) => {
                    warn!(
                        app = %name,
                        domain = %binding.service_name,
                        error = %e,
                        "Failed to provision certificate for port binding"
                    );
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(report)
        } else {
            Err(HandlerError::Aggregate(errors))
        }
    }

    async fn provision_domain(
        &self,
        config: &Config,
        domain: &str,
        app: &AppRef<'_>,
        report: &mut ProvisionReport,
    ) -> Result<(), HandlerError> {
        if let Some(reason) = skip_reason(domain, &config.certificates.reserved_suffix) {
            warn!(domain = %domain, reason = ?reason, "Skipping certificate provisioning");
            report.skipped.push((domain.to_string(), reason));
            return Ok(());
        }

        let domain = Domain::new(domain);
        let secret_name = names::tls_secret_name(app.name, domain.as_str(), app.segment);

        let outcome = self
            .repository
            .provision_if_absent(&domain, app.namespace, &secret_name)
            .await
            .map_err(|source| HandlerError::Repository {
                domain: domain.clone(),
                source,
            })?;

        if outcome.is_issuing() {
            info!(
                domain = %domain,
                namespace = %app.namespace,
                name = %secret_name,
                "Started certificate issuance"
            );
        }

        report.provisioned.push(ProvisionedDomain {
            key: ObjectKey::new(app.namespace, &secret_name),
            domain,
            outcome,
        });
        Ok(())
    }
}

/// Domains that are never provisioned individually
pub(crate) fn skip_reason(domain: &str, reserved_suffix: &str) -> Option<SkipReason> {
    if domain.is_empty() {
        Some(SkipReason::Empty)
    } else if !names::is_fqdn(domain) {
        Some(SkipReason::NotFullyQualified)
    } else if !reserved_suffix.is_empty() && domain.ends_with(reserved_suffix) {
        Some(SkipReason::ReservedSuffix)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppInstanceMeta, AppInstanceSpec, AppInstanceStatus, Endpoint, PortBinding};
    use crate::repository::RepositoryError;
    use crate::store::{LabelSelector, MemoryStore, RecordStore, Secret, StoreError};
    use crate::test_support::{controller_over, controller_with, FakeAuthority};
    use async_trait::async_trait;
    use certpilot_config::LetsEncryptMode;
    use std::sync::Arc;
    use std::time::Duration;

    /// Store whose reads fail for any record name containing "bad"
    struct FailingReads {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl RecordStore for FailingReads {
        async fn get(&self, key: &ObjectKey) -> Result<Secret, StoreError> {
            if key.name.contains("bad") {
                return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
            }
            self.inner.get(key).await
        }

        async fn list(&self, selector: &LabelSelector) -> Result<Vec<Secret>, StoreError> {
            self.inner.list(selector).await
        }

        async fn create(&self, secret: Secret) -> Result<Secret, StoreError> {
            self.inner.create(secret).await
        }

        async fn update(&self, secret: Secret) -> Result<Secret, StoreError> {
            self.inner.update(secret).await
        }
    }

    fn controller_with_failing_reads(
        authority: Arc<FakeAuthority>,
    ) -> (CertificateController, Arc<MemoryStore>) {
        let inner = Arc::new(MemoryStore::new());
        let store = Arc::new(FailingReads {
            inner: Arc::clone(&inner),
        });
        (controller_over(Config::default(), authority, store), inner)
    }

    fn app(namespace: &str, endpoints: &[(&str, Protocol)], ports: &[&str]) -> AppInstance {
        AppInstance {
            metadata: AppInstanceMeta {
                name: "web".to_string(),
                namespace: namespace.to_string(),
                uid: "1f2e3d4c-aaaa-bbbb".to_string(),
            },
            spec: AppInstanceSpec {
                ports: ports
                    .iter()
                    .map(|service| PortBinding {
                        service_name: service.to_string(),
                        port: Some(443),
                        target_port: Some(8443),
                    })
                    .collect(),
            },
            status: AppInstanceStatus {
                endpoints: endpoints
                    .iter()
                    .map(|(address, protocol)| Endpoint {
                        address: address.to_string(),
                        protocol: *protocol,
                        publish_protocol: None,
                    })
                    .collect(),
            },
        }
    }

    #[tokio::test]
    async fn test_http_endpoint_is_issued_and_published_as_https() {
        let authority = Arc::new(FakeAuthority::new());
        let (controller, store) = controller_with(Config::default(), authority.clone());
        let mut app = app(
            "ns",
            &[("web.example.com", Protocol::Http), ("db.example.com", Protocol::Tcp)],
            &[],
        );

        let report = controller.provision_certs(&mut app).await.unwrap();
        assert_eq!(report.provisioned.len(), 1);
        assert_eq!(report.issuing(), 1);
        assert_eq!(
            report.provisioned[0].key,
            ObjectKey::new("ns", "web-tls-web.example.com-1f2e3d4c")
        );

        controller.repository().wait_for_background_tasks().await;
        store.get(&report.provisioned[0].key).await.unwrap();

        assert_eq!(
            app.status.endpoints[0].publish_protocol,
            Some(PublishProtocol::Https)
        );
        assert_eq!(app.status.endpoints[1].publish_protocol, None);
        assert_eq!(authority.requested(), vec![Domain::new("web.example.com")]);
        assert_eq!(authority.registrations(), 1);
    }

    #[tokio::test]
    async fn test_skipped_domains_never_reach_the_authority() {
        let authority = Arc::new(FakeAuthority::new());
        let (controller, store) = controller_with(Config::default(), authority.clone());
        let mut app = app(
            "ns",
            &[("localhost", Protocol::Http), ("web.on-acorn.io", Protocol::Http)],
            &[""],
        );

        let report = controller.provision_certs(&mut app).await.unwrap();
        assert!(report.provisioned.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(authority.calls(), 0);
        assert!(store.is_empty());

        // Skipped endpoints are still advertised as HTTPS
        assert!(app
            .status
            .endpoints
            .iter()
            .all(|e| e.publish_protocol == Some(PublishProtocol::Https)));
    }

    #[tokio::test]
    async fn test_port_binding_covered_by_endpoint_is_not_repeated() {
        let authority = Arc::new(FakeAuthority::new());
        let (controller, _store) = controller_with(Config::default(), authority.clone());
        let mut app = app(
            "ns",
            &[("web.example.com", Protocol::Http)],
            &["web.example.com", "api.example.com"],
        );

        let report = controller.provision_certs(&mut app).await.unwrap();
        let domains: Vec<&str> = report
            .provisioned
            .iter()
            .map(|p| p.domain.as_str())
            .collect();
        assert_eq!(domains, vec!["web.example.com", "api.example.com"]);

        controller.repository().wait_for_background_tasks().await;
        assert_eq!(authority.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_passes_issue_once() {
        let authority = Arc::new(FakeAuthority::new().with_delay(Duration::from_millis(100)));
        let (controller, store) = controller_with(Config::default(), authority.clone());
        let controller = Arc::new(controller);
        let template = app("ns", &[("web.example.com", Protocol::Http)], &[]);

        let mut passes = Vec::new();
        for _ in 0..8 {
            let controller = Arc::clone(&controller);
            let mut app = template.clone();
            passes.push(tokio::spawn(async move {
                controller.provision_certs(&mut app).await.map(|r| r.issuing())
            }));
        }

        let mut started = 0;
        for pass in passes {
            started += pass.await.unwrap().unwrap();
        }
        controller.repository().wait_for_background_tasks().await;

        assert_eq!(started, 1);
        assert_eq!(authority.calls(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_second_namespace_receives_a_copy() {
        let authority = Arc::new(FakeAuthority::new());
        let (controller, store) = controller_with(Config::default(), authority.clone());

        let mut first = app("team-a", &[("web.example.com", Protocol::Http)], &[]);
        controller.provision_certs(&mut first).await.unwrap();
        controller.repository().wait_for_background_tasks().await;

        let mut second = app("team-b", &[("web.example.com", Protocol::Http)], &[]);
        let report = controller.provision_certs(&mut second).await.unwrap();

        assert!(matches!(
            report.provisioned[0].outcome,
            ProvisionOutcome::Copied
        ));
        assert_eq!(authority.calls(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_endpoint_error_aborts_remaining_endpoints() {
        let authority = Arc::new(FakeAuthority::new());
        let (controller, store) = controller_with_failing_reads(authority.clone());
        let mut app = app(
            "ns",
            &[
                ("e1.example.com", Protocol::Http),
                ("bad-ep.example.com", Protocol::Http),
                ("e3.example.com", Protocol::Http),
            ],
            &["api.example.com"],
        );

        let err = controller.provision_certs(&mut app).await.unwrap_err();
        match err {
            HandlerError::Repository { domain, source } => {
                assert_eq!(domain, Domain::new("bad-ep.example.com"));
                assert!(matches!(source, RepositoryError::Store(StoreError::Io(_))));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let flips: Vec<_> = app
            .status
            .endpoints
            .iter()
            .map(|e| e.publish_protocol)
            .collect();
        assert_eq!(flips, vec![Some(PublishProtocol::Https), None, None]);

        // Port bindings are never reached
        controller.repository().wait_for_background_tasks().await;
        assert_eq!(authority.requested(), vec![Domain::new("e1.example.com")]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_port_binding_errors_are_collected() {
        let authority = Arc::new(FakeAuthority::new());
        let (controller, store) = controller_with_failing_reads(authority.clone());
        let mut app = app(
            "ns",
            &[],
            &["bad-a.example.com", "ok.example.com", "bad-b.example.com"],
        );

        let err = controller.provision_certs(&mut app).await.unwrap_err();
        match err {
            HandlerError::Aggregate(errors) => {
                let failed: Vec<String> = errors
                    .iter()
                    .map(|e| match e {
                        HandlerError::Repository { domain, .. } => domain.to_string(),
                        other => panic!("unexpected error: {:?}", other),
                    })
                    .collect();
                assert_eq!(failed, vec!["bad-a.example.com", "bad-b.example.com"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        controller.repository().wait_for_background_tasks().await;
        assert_eq!(authority.requested(), vec![Domain::new("ok.example.com")]);
        store
            .get(&ObjectKey::new("ns", "web-tls-ok.example.com-1f2e3d4c"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_is_a_no_op() {
        let mut config = Config::default();
        config.certificates.lets_encrypt = LetsEncryptMode::Disabled;
        let authority = Arc::new(FakeAuthority::new());
        let (controller, store) = controller_with(config, authority.clone());
        let mut app = app("ns", &[("web.example.com", Protocol::Http)], &["api.example.com"]);

        let report = controller.provision_certs(&mut app).await.unwrap();
        assert!(report.provisioned.is_empty());
        assert_eq!(authority.registrations(), 0);
        assert_eq!(authority.calls(), 0);
        assert!(store.is_empty());
        assert_eq!(app.status.endpoints[0].publish_protocol, None);
    }

    #[test]
    fn test_skip_reason() {
        assert_eq!(skip_reason("", "on-acorn.io"), Some(SkipReason::Empty));
        assert_eq!(
            skip_reason("localhost", "on-acorn.io"),
            Some(SkipReason::NotFullyQualified)
        );
        assert_eq!(
            skip_reason("Bad_Name.example.com", "on-acorn.io"),
            Some(SkipReason::NotFullyQualified)
        );
        assert_eq!(
            skip_reason("foo.bar.on-acorn.io", "on-acorn.io"),
            Some(SkipReason::ReservedSuffix)
        );
        assert_eq!(skip_reason("app.example.com", "on-acorn.io"), None);
        assert_eq!(skip_reason("app.on-acorn.io", ""), None);
    }
}
