//! arxd, the Arx secrets service daemon. Serves the REST and gRPC
//! front-ends over one set of domain services.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use arx_config::ArxConfig;
use arx_core::{hash_password, ServiceLimits, Services};
use arx_crypto::{ChunkingOptions, CryptoEngine, CryptoOptions};
use arx_rbac::seed_roles;
use arx_server::pipeline::token_digest;
use arx_server::{admin, grpc, messages, rest, AppState};
use arx_store::{PoolOptions, Store};
use arx_types::RequestContext;

#[derive(Parser, Debug)]
#[command(name = "arxd")]
#[command(about = "Arx secrets service daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "arx.toml")]
    config: PathBuf,

    /// Override the HTTP port from the config
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the gRPC port from the config
    #[arg(long)]
    grpc_port: Option<u16>,
}

/// First start only: create an admin principal and print its bearer token
/// once. Token minting is otherwise an external concern.
fn bootstrap_admin(store: &Store) -> Result<()> {
    let ctx = RequestContext::anonymous();
    if !store.list_users(&ctx)?.is_empty() {
        return Ok(());
    }

    let password = uuid::Uuid::new_v4().to_string();
    let admin = store.create_user(&ctx, "admin", None, &hash_password(&password)?)?;
    let super_admin = store
        .get_role_by_name(&ctx, "super_admin")?
        .ok_or_else(|| anyhow::anyhow!("seed roles missing"))?;
    store.assign_role_to_user(&ctx, admin.id, super_admin.id, None)?;

    let token = format!(
        "arx_{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    store.insert_token(&ctx, &token_digest(&token), admin.id, None)?;

    // Printed to stdout exactly once; it is not recoverable afterwards.
    println!("bootstrap admin token (store it now, it will not be shown again):");
    println!("  {token}");
    info!(user = "admin", "bootstrap admin created");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ArxConfig::load(&args.config)?;
    if let Some(port) = args.http_port {
        config.server.http.port = port;
    }
    if let Some(port) = args.grpc_port {
        config.server.grpc.port = port;
    }
    config.validate()?;

    messages::install(&config.locale.language, &config.locale.fallback_language);

    if config.server.http.tls.enabled || config.server.grpc.tls.enabled {
        warn!("TLS termination is delegated to the fronting proxy in this build");
    }

    admin::check_key_files(&config)?;

    let crypto = CryptoEngine::open(CryptoOptions {
        enabled: config.storage.encryption.enabled,
        use_kek: config.storage.encryption.use_kek,
        kek_path: config.storage.encryption.kek_path.clone(),
        dek_path: config.storage.encryption.dek_path.clone(),
        chunking: ChunkingOptions {
            enabled: config.secrets.chunking.enabled,
            max_chunk_size_kb: config.secrets.chunking.max_chunk_size_kb as usize,
            max_chunks_per_secret: config.secrets.chunking.max_chunks_per_secret as usize,
        },
    })?;

    let store = Store::open(
        &config.storage.database.path,
        PoolOptions {
            max_open_conns: config.storage.database.max_open_conns,
            max_idle_conns: config.storage.database.max_idle_conns,
        },
    )?;
    seed_roles(&store)?;
    bootstrap_admin(&store)?;

    let services = Services::new(
        store,
        Arc::new(crypto),
        ServiceLimits {
            max_secrets_per_user: config.secrets.limits.max_secrets_per_user,
        },
    );
    let state = AppState::new(services, config.clone());

    let http_enabled = config.server.http.enabled;
    let grpc_enabled = config.server.grpc.enabled;
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.server.http.port));
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.server.grpc.port));

    let rest_state = state.clone();
    let rest_future = async move {
        if !http_enabled {
            futures::future::pending::<()>().await;
            return Ok(());
        }
        let app = rest::router(rest_state);
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        info!(addr = %http_addr, "REST server listening");
        axum::serve(listener, app).await?;
        Ok::<(), anyhow::Error>(())
    };

    let grpc_state = state.clone();
    let grpc_future = async move {
        if !grpc_enabled {
            futures::future::pending::<()>().await;
            return Ok(());
        }
        info!(addr = %grpc_addr, "gRPC server listening");
        grpc::build_server(grpc_state)
            .serve(grpc_addr)
            .await
            .map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
    };

    tokio::select! {
        result = rest_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "REST server exited");
            }
        }
        result = grpc_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server exited");
            }
        }
    }

    Ok(())
}
