//! Certpilot - Main entry point
//!
//! Certificate lifecycle controller for application endpoints.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certpilot::acme::{
    AcmeAuthority, ChallengeManager, ChallengeServer, CredentialStore, Dns01Solver,
};
use certpilot::locks::DomainLockRegistry;
use certpilot::model::AppInstance;
use certpilot::signals::{SignalManager, SignalType};
use certpilot::store::{FileStore, MemoryStore, RecordStore};
use certpilot::{
    CertificateController, CertificateRepository, ConfigManager, RequireTlsSecret,
    ResyncScheduler,
};
use certpilot_config::Config;

/// Certpilot - TLS certificate lifecycle controller
#[derive(Parser, Debug)]
#[command(name = "certpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTPILOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default)
    Run {
        /// Keep records in memory instead of the storage directory
        #[arg(long = "in-memory")]
        in_memory: bool,
    },
    /// Validate configuration file and exit
    Test,
    /// Run one provisioning pass for an application and print its status
    Provision {
        /// Application instance JSON file
        #[arg(long = "app")]
        app: PathBuf,

        /// Keep records in memory instead of the storage directory
        #[arg(long = "in-memory")]
        in_memory: bool,
    },
    /// Run one renewal pass over every managed record
    Renew {
        /// Keep records in memory instead of the storage directory
        #[arg(long = "in-memory")]
        in_memory: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or(Commands::Run { in_memory: false }) {
        Commands::Test => test_config(config_path),
        Commands::Run { in_memory } => block_on(run_controller(config_path, in_memory)),
        Commands::Provision { app, in_memory } => {
            block_on(provision_once(config_path, &app, in_memory))
        }
        Commands::Renew { in_memory } => block_on(renew_once(config_path, in_memory)),
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;
    runtime.block_on(future)
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Test configuration file and exit
fn test_config(config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            info!("Testing configuration file: {}", path.display());
            Config::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            info!("Testing embedded default configuration");
            Config::default_embedded().context("Failed to load embedded configuration")?
        }
    };

    config.validate().context("Configuration validation failed")?;

    info!("Configuration test successful:");
    info!("  - lets-encrypt: {}", config.certificates.lets_encrypt);
    info!("  - renew-before-days: {}", config.certificates.renew_before_days);
    info!("  - storage: {}", config.storage.path.display());

    if !config.challenge_server.enabled && config.certificates.lets_encrypt.is_enabled() {
        warn!("Challenge responder disabled; HTTP-01 validation must be served elsewhere");
    }

    println!(
        "certpilot: configuration file {} test is successful",
        config_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(embedded)".to_string())
    );

    Ok(())
}

/// Wired-up controller and the pieces the commands drive directly
struct Controller {
    config: Arc<ConfigManager>,
    store: Arc<dyn RecordStore>,
    challenges: ChallengeManager,
    controller: Arc<CertificateController>,
}

async fn build_controller(config_path: Option<&Path>, in_memory: bool) -> Result<Controller> {
    match config_path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("No configuration specified, using embedded default configuration"),
    }
    let config = Arc::new(ConfigManager::load(config_path)?);
    let current = config.current();

    let store: Arc<dyn RecordStore> = if in_memory {
        warn!("Using in-memory record store; records are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            FileStore::new(&current.storage.path)
                .await
                .context("Failed to open record storage")?,
        )
    };

    let challenges = ChallengeManager::new();
    let mut authority = AcmeAuthority::new(
        &current.certificates,
        CredentialStore::new(&current.storage.path),
        challenges.clone(),
    );
    match &current.dns_provider {
        Some(section) => {
            let solver =
                Dns01Solver::from_config(section).context("Failed to configure DNS provider")?;
            authority = authority.with_dns_solver(solver);
        }
        None => debug!("No DNS provider configured; wildcard certificates cannot be issued"),
    }
    info!(directory = %authority.directory_url(), "Configured certificate authority");

    let repository = Arc::new(CertificateRepository::new(
        Arc::clone(&store),
        Arc::new(authority),
        Arc::new(DomainLockRegistry::new()),
    ));
    let controller = Arc::new(CertificateController::new(Arc::clone(&config), repository));

    Ok(Controller {
        config,
        store,
        challenges,
        controller,
    })
}

/// Serve HTTP-01 challenges while `shutdown` is live, if enabled
async fn start_challenge_server(
    wired: &Controller,
    shutdown: &CancellationToken,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    let config = wired.config.current();
    if !config.challenge_server.enabled {
        return Ok(None);
    }

    let addr = config
        .challenge_server
        .address
        .parse()
        .context("Invalid challenge server address")?;
    let server = ChallengeServer::bind(addr, wired.challenges.clone())
        .await
        .with_context(|| format!("Failed to bind challenge server on {}", addr))?;
    Ok(Some(tokio::spawn(server.run(shutdown.clone()))))
}

/// Wait for the responder after cancellation; false if the task failed
async fn join_challenge_server(server: Option<tokio::task::JoinHandle<()>>) -> bool {
    let Some(server) = server else {
        return true;
    };
    match server.await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Challenge responder task failed");
            false
        }
    }
}

/// Run the controller until SIGTERM/SIGINT
async fn run_controller(config_path: Option<&Path>, in_memory: bool) -> Result<()> {
    let wired = build_controller(config_path, in_memory).await?;
    let shutdown = CancellationToken::new();

    let mut signals = SignalManager::new();
    signals
        .install()
        .context("Failed to register signal handlers")?;

    let server = start_challenge_server(&wired, &shutdown).await?;

    if let Some(platform_domain) = wired.config.current().certificates.platform_domain.clone() {
        match wired
            .controller
            .provision_wildcard_cert(&platform_domain)
            .await
        {
            Ok(outcome) => info!(domain = %platform_domain, outcome = ?outcome, "Platform wildcard certificate checked"),
            Err(e) => error!(domain = %platform_domain, error = %e, "Failed to provision platform wildcard certificate"),
        }
    }

    let interval = Duration::from_secs(wired.config.current().scheduler.resync_interval_secs);
    let scheduler = ResyncScheduler::new(
        Arc::clone(&wired.store),
        RequireTlsSecret::new(Arc::clone(&wired.controller)),
    )
    .with_interval(interval);
    let resync = tokio::spawn(scheduler.run(shutdown.clone()));

    info!("Certpilot controller started");
    info!("Configuration hot reload enabled (SIGHUP)");

    while let Some(signal) = signals.recv().await {
        match signal {
            SignalType::Reload => {
                if let Err(e) = wired.config.reload() {
                    warn!(error = %e, "Configuration reload failed");
                }
            }
            SignalType::Shutdown => {
                info!("Received shutdown signal, initiating graceful shutdown");
                break;
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = resync.await {
        error!(error = %e, "Resync scheduler task failed");
    }
    join_challenge_server(server).await;

    let in_flight = wired.controller.repository().background_tasks();
    if in_flight > 0 {
        warn!(in_flight, "Abandoning in-flight certificate requests");
    }
    wired.challenges.clear();

    info!("Certpilot controller stopped");
    Ok(())
}

/// One ProvisionCerts pass for the application in `app_path`
async fn provision_once(config_path: Option<&Path>, app_path: &Path, in_memory: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(app_path)
        .await
        .with_context(|| format!("Failed to read application file {}", app_path.display()))?;
    let mut app: AppInstance = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse application file {}", app_path.display()))?;

    let wired = build_controller(config_path, in_memory).await?;
    let shutdown = CancellationToken::new();
    let server = start_challenge_server(&wired, &shutdown).await?;

    let result = wired.controller.provision_certs(&mut app).await;
    if let Ok(report) = &result {
        info!(
            provisioned = report.provisioned.len(),
            skipped = report.skipped.len(),
            issuing = report.issuing(),
            "Provisioning pass complete"
        );
    }

    wired.controller.repository().wait_for_background_tasks().await;
    shutdown.cancel();
    join_challenge_server(server).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&app).context("Failed to serialize application")?
    );
    result.map(|_| ()).context("Provisioning failed")
}

/// One renewal resync pass
async fn renew_once(config_path: Option<&Path>, in_memory: bool) -> Result<()> {
    let wired = build_controller(config_path, in_memory).await?;
    let shutdown = CancellationToken::new();
    let server = start_challenge_server(&wired, &shutdown).await?;

    let scheduler = ResyncScheduler::new(
        Arc::clone(&wired.store),
        RequireTlsSecret::new(Arc::clone(&wired.controller)),
    );
    let summary = scheduler
        .resync_once()
        .await
        .context("Failed to list managed records")?;

    wired.controller.repository().wait_for_background_tasks().await;
    shutdown.cancel();
    join_challenge_server(server).await;

    println!(
        "certpilot: examined {} record(s), {} failed",
        summary.examined, summary.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(dir: &tempfile::TempDir, dns_provider: &str) -> PathBuf {
        let path = dir.path().join("certpilot.kdl");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
            storage {{
                path "{}"
            }}
            challenge-server {{
                enabled #false
            }}
            {}
            "#,
            dir.path().display(),
            dns_provider
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_failed_responder_task_is_reported() {
        assert!(join_challenge_server(None).await);
        assert!(join_challenge_server(Some(tokio::spawn(async {}))).await);

        let failing = tokio::spawn(async { panic!("responder crashed") });
        assert!(!join_challenge_server(Some(failing)).await);
    }

    #[tokio::test]
    async fn test_dns_provider_is_wired_into_authority() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = config_file(
            &dir,
            r#"dns-provider {
                url "https://dns.example.com/api"
                token "t"
            }"#,
        );
        assert!(build_controller(Some(&path), true).await.is_ok());

        let path = config_file(
            &dir,
            r#"dns-provider {
                url "https://dns.example.com/api"
                token-env "CERTPILOT_TEST_UNSET_DNS_TOKEN"
            }"#,
        );
        let err = build_controller(Some(&path), true).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to configure DNS provider"));
    }
}
