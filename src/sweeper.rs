use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::Ms;
use crate::observability::SWEPT_BOOKINGS_TOTAL;
use crate::rate_limit::RateLimiter;

/// Background task that deletes bookings ended more than `retention` ago.
/// Runs for the life of the process.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, retention: Ms) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let removed = engine.sweep_expired(retention).await;
        if removed > 0 {
            metrics::counter!(SWEPT_BOOKINGS_TOTAL).increment(removed as u64);
            info!("swept {removed} expired bookings");
        } else {
            debug!("sweep found nothing to remove");
        }
    }
}

/// Compact the WAL whenever more than `threshold` records were appended
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends <= threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

pub async fn run_limiter_pruner(limiter: Arc<RateLimiter>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        limiter.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::CheckoutLinks;
    use crate::clock::ManualClock;
    use crate::model::NewBooking;
    use crate::notify::{LogMailer, NotifyHub};
    use std::path::PathBuf;

    const H: Ms = 3_600_000;
    const DAY: Ms = 1_767_225_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_task_purges_on_tick() {
        let clock = Arc::new(ManualClock::new(DAY + 8 * H));
        let notify = Arc::new(NotifyHub::new(Arc::new(LogMailer), vec![]));
        let engine = Arc::new(
            Engine::new(
                test_wal_path("sweeper_tick.wal"),
                notify,
                clock.clone(),
                CheckoutLinks::new("http://localhost:8080"),
            )
            .unwrap(),
        );
        let room = engine
            .create_room("Ursa".into(), String::new(), 4)
            .await
            .unwrap();
        let booking = engine
            .create_booking(NewBooking {
                room_id: room.id,
                user_name: "Sari".into(),
                user_email: "sari@example.com".into(),
                purpose: "1:1".into(),
                attendees: 2,
                start: DAY + 9 * H,
                end: DAY + 10 * H,
            })
            .await
            .unwrap();

        clock.set(DAY + 13 * H);
        let task = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10), 2 * H));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while engine.get_booking(booking.id).await.is_ok() {
            assert!(tokio::time::Instant::now() < deadline, "sweeper never ran");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
    }

    #[tokio::test]
    async fn compactor_resets_append_count() {
        let clock = Arc::new(ManualClock::new(DAY));
        let notify = Arc::new(NotifyHub::new(Arc::new(LogMailer), vec![]));
        let engine = Arc::new(
            Engine::new(
                test_wal_path("compactor.wal"),
                notify,
                clock,
                CheckoutLinks::new("http://localhost:8080"),
            )
            .unwrap(),
        );
        for i in 0..3 {
            engine
                .create_room(format!("Room {i}"), String::new(), 2)
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        // First tick fires immediately.
        let task = tokio::spawn(run_compactor(engine.clone(), 2));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while engine.wal_appends_since_compact().await != 0 {
            assert!(tokio::time::Instant::now() < deadline, "compactor never ran");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
        assert_eq!(engine.store.room_count(), 3);
    }
}
