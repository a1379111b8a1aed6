//! The warden server binary.
//!
//! Wires the policy store, the reconciler, the gateway and the admin API
//! together, starts everything in the right order, and tears it down
//! gracefully on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use warden_connector::{ApiConnector, AvatarReader, MatrixConnector, SynapseConnector};
use warden_core::{SharedSecretAuthPasswordGenerator, UserId};
use warden_gateway::{GatewayState, InternalAuthSettings, UpstreamProxy, UserMappingResolver};
use warden_hook::{Executor, RestConsultant};
use warden_policy::provider::{LastSeenStoreProvider, PolicyProvider, StaticFileProvider};
use warden_policy::{PolicyStore, Validator};
use warden_reconciler::{Reconciler, StoreDrivenReconciler};
use warden_server::api::{self, AdminState};
use warden_server::config::WardenConfig;
use warden_userauth::Checker as UserAuthChecker;

/// Default deadline for consulting hook REST services.
const REST_CONSULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sizing for the token-to-user cache and the auth fallback cache.
const USER_MAPPING_CACHE_CAPACITY: u64 = 10_000;
const USER_MAPPING_CACHE_TTL: Duration = Duration::from_secs(300);
const AUTH_FALLBACK_CACHE_CAPACITY: u64 = 1_000;

/// Reconciliation and gateway program for Matrix homeservers.
#[derive(Parser, Debug)]
#[command(name = "warden-server", about = "Policy gateway and reconciliator for Matrix")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = WardenConfig::load(&cli.config)?;

    let default_level = if config.misc.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(config = %cli.config, "starting warden");

    // -- Connectivity to the homeserver --

    let matrix_timeout = Duration::from_millis(config.matrix.timeout_milliseconds);
    let password_generator = Arc::new(SharedSecretAuthPasswordGenerator::new(
        &config.matrix.auth_shared_secret,
    ));
    let reconciliator_user_id = UserId::new(&config.reconciliation.user_id);

    let api_connector = Arc::new(ApiConnector::new(
        &config.matrix.homeserver_api_endpoint,
        (*password_generator).clone(),
        matrix_timeout,
    ));
    let connector: Arc<dyn MatrixConnector> = Arc::new(SynapseConnector::new(
        api_connector,
        &config.matrix.registration_shared_secret,
        reconciliator_user_id.clone(),
    ));

    // -- Policy store and its consumers --

    let policy_store = Arc::new(PolicyStore::new(Validator::new(
        &config.matrix.homeserver_domain_name,
    )));

    let hook_executor = Arc::new(Executor::new(RestConsultant::new(REST_CONSULT_TIMEOUT)));
    let user_auth_checker = Arc::new(UserAuthChecker::with_standard_authenticators(
        AUTH_FALLBACK_CACHE_CAPACITY,
    ));

    let resolver = Arc::new(UserMappingResolver::new(
        &config.matrix.homeserver_api_endpoint,
        USER_MAPPING_CACHE_CAPACITY,
        USER_MAPPING_CACHE_TTL,
    ));
    let proxy = Arc::new(UpstreamProxy::new(
        &config.matrix.homeserver_api_endpoint,
        Duration::from_millis(config.gateway.timeout_milliseconds),
    ));

    let internal_auth = if config.gateway.internal_auth.enabled {
        match &config.gateway.internal_auth.ip_network_allowlist {
            Some(cidrs) => InternalAuthSettings::enabled_with_cidrs(cidrs)
                .map_err(|e| format!("bad internal-auth allowlist: {e}"))?,
            None => InternalAuthSettings::enabled_with_default_allowlist(),
        }
    } else {
        InternalAuthSettings::disabled()
    };

    let gateway_state = Arc::new(GatewayState::new(
        Arc::clone(&policy_store),
        Arc::clone(&hook_executor),
        Arc::clone(&user_auth_checker),
        Arc::clone(&password_generator),
        resolver,
        proxy,
        &config.matrix.homeserver_domain_name,
        internal_auth,
    ));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&connector),
        reconciliator_user_id,
        AvatarReader::new(),
    ));
    let store_driven_reconciler = Arc::new(StoreDrivenReconciler::new(
        Arc::clone(&policy_store),
        reconciler,
        Duration::from_millis(config.reconciliation.retry_interval_milliseconds),
    ));

    let policy_provider: Arc<dyn PolicyProvider> =
        match config.policy_provider.provider_type.as_str() {
            "static_file" => Arc::new(StaticFileProvider::new(
                Arc::clone(&policy_store),
                config
                    .policy_provider
                    .path
                    .as_deref()
                    .expect("validated at config load"),
            )),
            "last_seen_store_policy" => Arc::new(LastSeenStoreProvider::new(
                Arc::clone(&policy_store),
                config
                    .policy_provider
                    .cache_path
                    .as_deref()
                    .expect("validated at config load"),
            )),
            other => return Err(format!("unknown policy provider type `{other}`").into()),
        };

    // -- HTTP servers --

    let shutdown = CancellationToken::new();

    let gateway_router = warden_gateway::build_router(gateway_state);
    let gateway_handle = {
        let listen_address = config.gateway.listen_address.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = warden_gateway::serve(&listen_address, gateway_router, shutdown).await {
                error!(error = %e, "HTTP gateway server failed");
            }
        })
    };

    let admin_handle = if config.admin_api.enabled {
        let admin_state = Arc::new(AdminState {
            policy_store: Arc::clone(&policy_store),
            policy_provider: Arc::clone(&policy_provider),
            connector: Arc::clone(&connector),
            homeserver_domain_name: config.matrix.homeserver_domain_name.clone(),
            authorization_bearer_token: config.admin_api.authorization_bearer_token.clone(),
        });
        let admin_router = api::build_router(admin_state);
        let listen_address = config.admin_api.listen_address.clone();
        let shutdown = shutdown.clone();
        info!(listen_address, "starting admin API server");
        Some(tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&listen_address).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(error = %e, "admin API server failed to bind");
                    return;
                }
            };
            if let Err(e) = axum::serve(listener, admin_router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!(error = %e, "admin API server failed");
            }
        }))
    } else {
        info!("not starting admin API server: disabled by configuration");
        None
    };

    // The reconciler must be listening before the provider publishes its
    // first policy, or that policy would slip past it.
    store_driven_reconciler.start().await;
    policy_provider.start().await?;

    wait_for_shutdown_signal().await;
    info!("shutting down");

    // Stop producers first, then consumers, then connections.
    policy_provider.stop().await;
    store_driven_reconciler.stop().await;

    shutdown.cancel();
    let _ = gateway_handle.await;
    if let Some(admin_handle) = admin_handle {
        let _ = admin_handle.await;
    }

    connector.release().await;

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
