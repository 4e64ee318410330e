use std::time::Duration;

use aerobook_booking::ExpirySweep;
use aerobook_shared::DomainEvent;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Runs the payment expiry sweep forever on a fixed cadence.
pub async fn start_expiry_worker(sweep: ExpirySweep, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry worker started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;
        match sweep.run_once(Utc::now()).await {
            Ok(report) if report.failures > 0 => {
                warn!(failures = report.failures, "Expiry sweep left payments behind")
            }
            Ok(_) => {}
            Err(e) => error!("Expiry sweep failed: {}", e),
        }
    }
}

/// Logs every committed domain event. Stands in for an outbound notifier.
pub async fn start_event_logger(mut rx: broadcast::Receiver<DomainEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(payload) => info!(topic = event.topic(), key = event.key(), "{}", payload),
                Err(e) => error!("Could not serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, {} events skipped", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
