//! `tollgated`: the TollGate gateway daemon binary. Loads configuration and
//! a signing identity, then supervises the Merchant (seller), USM (buyer),
//! and their shared Wallet Coordinator as long-lived tokio tasks until a
//! shutdown signal arrives.
//!
//! Grounded on the teacher's process-level structure (`lib.rs`'s
//! `TollGateService` construction, one long-lived service object wiring
//! wallet + network + protocol together at startup), generalized from a
//! Tauri app's `setup` hook into a plain `main` for a headless daemon.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tollgate_core::clock::system_clock;
use tollgate_core::config::Config;
use tollgate_core::error::AppError;
use tollgate_core::http::{self, LocalRelay, ServerState};
use tollgate_core::identity::Identity;
use tollgate_core::merchant::{EnforcementLoop, Merchant, SessionMap};
use tollgate_core::protocol;
use tollgate_core::usm::{GatewayMap, PollLoop, PurchaseAttempter, UpstreamSessionMap};
use tollgate_core::valve::{InMemoryGateControl, InMemoryStatsProbe, Valve};
use tollgate_core::wallet::backend::fake::FakeMintBackend;
use tollgate_core::wallet::{PassthroughResolver, PayoutConfig, PayoutLoop, PayoutRunner, WalletCoordinator};

/// The gateway's listen port, fixed by the outbound client contract (spec.md
/// §6: "Outbound client: GET {gateway_ip}:2121/...").
const GATEWAY_PORT: u16 = 2121;

#[derive(Parser, Debug)]
#[command(name = "tollgated", about = "TollGate gateway daemon")]
struct Cli {
    #[arg(long, default_value = "/etc/tollgate/config.toml")]
    config: PathBuf,

    #[arg(long, default_value = "/etc/tollgate/identity.key")]
    identity: PathBuf,

    #[arg(long, default_value_t = GATEWAY_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let identity = Arc::new(Identity::load_or_generate(&cli.identity)?);
    tracing::info!(pubkey = %identity.pubkey_hex(), "signing identity loaded");

    // No production `MintBackend`/`GateControl`/`StatsProbe` ships in this
    // repository (spec.md §1, §10.8, §10.9: the OS/mint-RPC bindings are
    // external collaborators whose contracts, not implementations, are in
    // scope). The daemon runs against the same in-memory implementations
    // the test suite does until an operator supplies real bindings.
    let mint_backend = Arc::new(FakeMintBackend::new(
        config.accepted_mints.iter().map(|m| m.url.clone()).collect(),
    ));
    let wallet = Arc::new(WalletCoordinator::new(
        mint_backend,
        system_clock(),
        config.allow_swap_untrusted_mints,
    ));
    let valve = Arc::new(Valve::new(
        Arc::new(InMemoryGateControl::new()),
        Arc::new(InMemoryStatsProbe::new()),
    ));

    let cancel = CancellationToken::new();

    spawn_merchant_side(&config, identity.clone(), wallet.clone(), valve.clone(), cli.port, &cancel).await?;
    spawn_usm_side(&config, identity.clone(), wallet.clone(), &cancel);
    spawn_payout_loops(&config, wallet, &cancel);

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining background tasks");
    cancel.cancel();

    Ok(())
}

async fn spawn_merchant_side<B, G, S>(
    config: &Config,
    identity: Arc<Identity>,
    wallet: Arc<WalletCoordinator<B>>,
    valve: Arc<Valve<G, S>>,
    port: u16,
    cancel: &CancellationToken,
) -> Result<(), AppError>
where
    B: tollgate_core::wallet::MintBackend + 'static,
    G: tollgate_core::valve::GateControl + 'static,
    S: tollgate_core::valve::StatsProbe + 'static,
{
    let sessions = Arc::new(SessionMap::new());
    let merchant = Arc::new(Merchant::new(
        config.clone(),
        identity.keys().clone(),
        wallet,
        valve.clone(),
        sessions.clone(),
    ));

    let pricing: Vec<protocol::PricePerStep> = config
        .accepted_mints
        .iter()
        .map(|m| protocol::PricePerStep {
            asset_type: "cashu".to_string(),
            price: m.price_per_step,
            unit: m.price_unit.clone(),
            mint_url: m.url.clone(),
            min_steps: m.min_purchase_steps,
        })
        .collect();
    let advertisement_event = protocol::build_advertisement_event(
        config.metric,
        config.step_size,
        &pricing,
        &[],
        identity.keys(),
    )
    .map_err(|e| AppError::ProtocolSelfCheck(e.to_string()))?;

    let state = ServerState {
        merchant: merchant.clone(),
        advertisement: Arc::new(tokio::sync::RwLock::new(advertisement_event)),
        relay: Arc::new(LocalRelay::new()),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = http::serve(addr, state) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "merchant http server exited with an error");
                }
            }
            _ = server_cancel.cancelled() => {
                tracing::info!("merchant http server shutting down");
            }
        }
    });

    let enforcement = EnforcementLoop::new(
        valve,
        sessions,
        std::time::Duration::from_secs(config.enforcement_interval_seconds),
    );
    let enforcement_cancel = cancel.clone();
    tokio::spawn(async move {
        enforcement.run(enforcement_cancel).await;
    });

    Ok(())
}

fn spawn_usm_side<B>(
    config: &Config,
    identity: Arc<Identity>,
    wallet: Arc<WalletCoordinator<B>>,
    cancel: &CancellationToken,
) where
    B: tollgate_core::wallet::MintBackend + 'static,
{
    let transport = Arc::new(http::GatewayClient::new());
    let gateways = Arc::new(GatewayMap::new());
    let sessions = Arc::new(UpstreamSessionMap::new());

    let attempter = Arc::new(PurchaseAttempter::new(
        config.clone(),
        identity,
        wallet,
        transport,
        sessions.clone(),
        system_clock(),
    ));

    let poll_loop = PollLoop::new(config.clone(), gateways, sessions, attempter);
    let poll_cancel = cancel.clone();
    tokio::spawn(async move {
        poll_loop.run(poll_cancel).await;
    });
}

/// One [`PayoutLoop`] per configured mint (spec.md §5: "Wallet per-mint
/// payout loops (periodic, one per configured mint)").
fn spawn_payout_loops<B>(config: &Config, wallet: Arc<WalletCoordinator<B>>, cancel: &CancellationToken)
where
    B: tollgate_core::wallet::MintBackend + 'static,
{
    for mint in &config.accepted_mints {
        let runner = PayoutRunner::new(
            wallet.clone(),
            Arc::new(PassthroughResolver),
            PayoutConfig {
                mint: mint.clone(),
                profit_share: config.profit_share.clone(),
            },
        );
        let payout_loop = PayoutLoop::new(runner, None);
        let payout_cancel = cancel.clone();
        tokio::spawn(async move {
            payout_loop.run(payout_cancel).await;
        });
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
