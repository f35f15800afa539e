//! Primary sale host: entry point.
//!
//! Runs one sale manager for the configured project against an Ethereum
//! JSON-RPC node and the platform's GraphQL API, tracks submitted purchases
//! in SQLite and exposes a small Axum REST API to drive the sale.

use std::sync::Arc;

use reqwest::Client;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use primary_sale::api::{self, ApiState};
use primary_sale::clients::{ChainReader, WalletClient};
use primary_sale::config::Config;
use primary_sale::db;
use primary_sale::graphql::GraphQlProjectSource;
use primary_sale::persist::{self, SaleSnapshot};
use primary_sale::rpc::{EthRpcClient, EthRpcWallet};
use primary_sale::sale_manager::{spawn_sale_manager, SalePhase, SaleServices};
use primary_sale::tracker::PurchaseTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let rpc = EthRpcClient::new(client.clone(), config.rpc_url.clone());
    let chain: Arc<dyn ChainReader> = Arc::new(rpc.clone());
    let wallet: Option<Arc<dyn WalletClient>> = config.wallet_address.map(|account| {
        info!(%account, "Purchasing from node-managed account");
        Arc::new(EthRpcWallet::new(rpc.clone(), account)) as Arc<dyn WalletClient>
    });
    let source = Arc::new(GraphQlProjectSource::new(
        client,
        config.graphql_url.clone(),
        config.graphql_api_key.clone(),
    ));

    let cancel = CancellationToken::new();

    // ─── Purchase tracker ─────────────────────────────────
    let (tracker_tx, tracker_task) =
        PurchaseTracker::new(chain.clone(), pool.clone(), config.receipt_poll_interval())
            .spawn(cancel.child_token());

    // ─── Sale manager ─────────────────────────────────────
    let input = persist::restore_input(
        &pool,
        config.project_id.clone(),
        Some(chain.clone()),
        wallet.clone(),
    )
    .await?;
    let services = SaleServices {
        purchase_tracker: Some(tracker_tx),
        live_sale_poll_interval: config.live_sale_poll_interval(),
        ..SaleServices::new(source)
    };
    let sale = spawn_sale_manager(input, services);

    if let Some(project_id) = config.project_id.clone() {
        tokio::spawn(persist_snapshots(
            pool.clone(),
            project_id,
            sale.subscribe(),
            cancel.child_token(),
        ));
    }

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState {
        pool,
        sale,
        project_id: config.project_id.clone(),
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Err(e) = tracker_task.await {
        warn!("Purchase tracker ended abnormally: {e}");
    }
    info!("Shut down");
    Ok(())
}

async fn persist_snapshots(
    pool: SqlitePool,
    project_id: String,
    mut snapshots: watch::Receiver<SaleSnapshot>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.phase == SalePhase::FetchingProjectData {
                    continue;
                }
                if let Err(e) = db::save_snapshot(&pool, &project_id, &snapshot).await {
                    error!(%project_id, "Could not store sale snapshot: {e}");
                }
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Could not listen for shutdown signal: {e}");
            }
            info!("Shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
