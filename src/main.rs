//! Freight broker CLI binary

use chrono::Utc;
use clap::Parser;
use freightbroker::broadcast::OrderSummary;
use freightbroker::cli::{BrokerApp, Cli, Commands};
use freightbroker::config::{BrokerConfig, NegotiationSettings};
use freightbroker::negotiation::EvaluationOutcome;
use freightbroker::proposal::{PriceBreakdown, ProposalDraft, ServiceAddOns};
use freightbroker::reaper::Reaper;
use freightbroker::scoring;
use freightbroker::session::SessionStore;
use freightbroker::types::{CarrierId, OrderId, ShortlistEntry, Trigger};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { reference_price } => {
            run_demo(reference_price).await?;
        }

        Commands::Score {
            price,
            reference,
            quality,
        } => {
            let scores = scoring::score(price, reference, quality);
            tracing::info!(
                "Price {:.2} vs reference {:.2}: price score {:.2}, quality {:.2}, overall {:.2}",
                price,
                reference,
                scores.price,
                scores.quality,
                scores.overall
            );
        }

        Commands::Reap {
            threshold_hours,
            sessions,
        } => {
            run_reap_demo(threshold_hours, sessions).await?;
        }
    }

    Ok(())
}

/// Scripted end-to-end brokering session against simulated collaborators
async fn run_demo(reference_price: f64) -> freightbroker::Result<()> {
    let app = BrokerApp::new(BrokerConfig::default());

    let shortlist: Vec<ShortlistEntry> = [
        ("carrier_alpha", 88.0),
        ("carrier_beta", 74.0),
        ("carrier_gamma", 61.0),
    ]
    .iter()
    .map(|(id, score)| ShortlistEntry {
        carrier_id: CarrierId(id.to_string()),
        carrier_name: id.replace('_', " ").to_uppercase(),
        match_score: *score,
        estimated_price: None,
        contact_email: Some(format!("{}@example.test", id)),
    })
    .collect();

    let order = OrderSummary {
        order_id: OrderId("ORD-DEMO-1".to_string()),
        organization_id: "org-demo".to_string(),
        pickup_city: "Lyon".to_string(),
        delivery_city: "Nantes".to_string(),
        pickup_date: None,
        reference_price,
        goods_description: Some("16 pallets, 8.4t".to_string()),
    };

    tracing::info!("Opening brokering session for {}", order.order_id);
    let (session_id, report) = app
        .trigger_session(
            order,
            Trigger::manual("assigned carrier cancelled"),
            shortlist,
        )
        .await?;
    tracing::info!(
        "Session {} broadcasting: {} messages sent, {} failed",
        session_id,
        report.sent,
        report.failed
    );

    // Three proposals: one at reference, one worth countering, one too high
    for (carrier, price) in [
        ("carrier_alpha", reference_price),
        ("carrier_beta", reference_price * 1.10),
        ("carrier_gamma", reference_price * 1.40),
    ] {
        let draft = ProposalDraft {
            carrier_id: CarrierId(carrier.to_string()),
            carrier_name: carrier.replace('_', " ").to_uppercase(),
            proposed_price: price,
            price_breakdown: PriceBreakdown::default(),
            vehicle_type: Some("semi_trailer".to_string()),
            driver_name: None,
            services: ServiceAddOns::default(),
            estimated_pickup_date: None,
            estimated_delivery_date: None,
        };
        let (proposal, outcome) = app.submit_proposal(&session_id, draft).await?;
        tracing::info!(
            "{} proposed {:.2} (overall score {:.2}): {:?}",
            carrier,
            price,
            proposal.scores.overall,
            outcome
        );

        if let EvaluationOutcome::Countered { offer, round } = outcome {
            tracing::info!(
                "Round {}: countering {} at {:.2}",
                round,
                carrier,
                offer.counter_price
            );
            // The carrier concedes down to the reference price
            let answer = app
                .respond_to_counter(&session_id, &CarrierId(carrier.to_string()), reference_price)
                .await?;
            tracing::info!("{} answered the counter: {:?}", carrier, answer);
        }
    }

    for row in app.ranking(&session_id).await {
        tracing::info!(
            "#{} {} at {:.2} - overall {:.2} ({:?})",
            row.rank,
            row.carrier_name,
            row.proposed_price,
            row.scores.overall,
            row.status
        );
    }

    let selection = app.select_winner(&session_id).await?;
    tracing::info!(
        "Winner: {} at {:.2} ({})",
        selection.carrier_name,
        selection.price,
        selection.reason
    );

    let stats = app.campaign_stats(&session_id).await?;
    tracing::info!(
        "Campaign {:?}: {}/{} responded, engagement {:.1}%",
        stats.status,
        stats.stats.responded,
        stats.stats.sent,
        stats.engagement_rate
    );

    Ok(())
}

/// Seed stuck sessions and run a single reaper sweep over them
async fn run_reap_demo(threshold_hours: i64, sessions: u32) -> freightbroker::Result<()> {
    let store = Arc::new(SessionStore::new());

    for i in 0..sessions {
        let session = store
            .create(
                OrderId(format!("ORD-STUCK-{}", i + 1)),
                "org-demo".to_string(),
                Trigger::manual("assigned carrier cancelled"),
                Vec::new(),
                1000.0,
                NegotiationSettings::default(),
            )
            .await?;
        // Backdate past the threshold so the sweep picks it up
        store
            .update(&session.session_id, |s| {
                s.created_at = Utc::now() - chrono::Duration::hours(threshold_hours + 6);
                Ok(())
            })
            .await?;
        tracing::info!("Seeded stuck session {}", session.session_id);
    }

    let reaper = Reaper::new(store.clone(), threshold_hours, 300);
    let reaped = reaper.sweep(Utc::now()).await;
    tracing::info!("Sweep complete: {} of {} sessions reaped", reaped, sessions);

    for id in store.ids().await {
        let session = store.get(&id).await?;
        tracing::info!(
            "{}: {} ({})",
            id,
            session.status,
            session.closed_reason.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
