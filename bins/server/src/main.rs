//! Kopa API Server
//!
//! Main entry point for the loan and savings ledger service.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kopa_api::{AppState, create_router};
use kopa_core::credit::{CreditLimitConfig, CreditLimitPolicy};
use kopa_core::ledger::{LedgerConfig, RetryPolicy, TransactionLedger};
use kopa_core::{DomainEvent, EventPublisher};
use kopa_shared::{AppConfig, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kopa=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    let ledger_config = LedgerConfig::from_settings(&config.ledger);
    let credit = CreditLimitPolicy::new(CreditLimitConfig::from_settings(&config.credit));
    info!(
        currency = %ledger_config.currency,
        registration_fee = %ledger_config.registration_fee,
        clamp_scope = ?config.credit.clamp_scope,
        overpayment = ?config.ledger.overpayment,
        "Ledger configured"
    );

    // Downstream notifications are fed from this channel.
    let (events, receiver) = EventPublisher::channel();
    tokio::spawn(forward_events(receiver));

    let state = AppState {
        ledger: Arc::new(TransactionLedger::new(ledger_config, credit, events)),
        jwt_service: Arc::new(JwtService::new(&config.jwt)),
        retry: RetryPolicy::from_settings(&config.ledger),
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Drains domain events until every publisher is dropped.
async fn forward_events(mut receiver: UnboundedReceiver<DomainEvent>) {
    while let Some(event) = receiver.recv().await {
        info!(event = event.name(), payload = ?event, "Domain event");
    }
    info!("Event channel closed");
}
