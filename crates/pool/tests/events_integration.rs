//! Integration tests for pool lifecycle events

use std::time::Duration;

use nebula_pool::{
    CloseReason, EventBus, Pool, PoolConfig, PoolConfigUpdate, PoolEvent, UtilizationLevel,
};
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn acquire_and_release_emit_in_order() {
    let pool = Pool::new(PoolConfig::default().with_max_resources(2)).unwrap();
    let mut rx = pool.subscribe();

    let handle = pool.acquire().await.unwrap();
    pool.release(handle);
    let again = pool.acquire().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 4, "unexpected events: {events:?}");
    assert_eq!(events[0], PoolEvent::Minted { handle: handle.id() });
    assert_eq!(
        events[1],
        PoolEvent::Acquired {
            handle: handle.id(),
            waited: Duration::ZERO,
            queued: 0,
        }
    );
    assert!(matches!(events[2], PoolEvent::Released { handle: h, .. } if h == handle.id()));
    assert!(matches!(events[3], PoolEvent::Acquired { handle: h, .. } if h == again.id()));
}

#[tokio::test(start_paused = true)]
async fn queue_and_timeout_events() {
    let pool = Pool::new(
        PoolConfig::default()
            .with_max_resources(1)
            .with_acquisition_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let _held = pool.acquire().await.unwrap();
    let mut rx = pool.subscribe();

    assert!(pool.acquire().await.is_err());

    let events = drain(&mut rx);
    assert_eq!(events[0], PoolEvent::Queued { queued: 1 });
    assert!(matches!(
        events[1],
        PoolEvent::TimedOut { waited, queued: 0 } if waited >= Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn invalid_release_and_force_close_events() {
    let pool = Pool::new(PoolConfig::default().with_max_resources(2)).unwrap();
    let handle = pool.acquire().await.unwrap();
    let mut rx = pool.subscribe();

    assert!(pool.force_close(handle.id()));
    pool.release(handle);

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            PoolEvent::Closed {
                handle: handle.id(),
                reason: CloseReason::Administrative,
            },
            PoolEvent::InvalidRelease {
                handle: handle.id()
            },
        ]
    );
}

#[tokio::test]
async fn reset_and_config_update_events() {
    let pool = Pool::new(PoolConfig::default().with_max_resources(2)).unwrap();
    let handle = pool.acquire().await.unwrap();
    let mut rx = pool.subscribe();

    pool.update_config(PoolConfigUpdate::max_resources(4)).unwrap();
    pool.reset();

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            PoolEvent::ConfigUpdated,
            PoolEvent::Closed {
                handle: handle.id(),
                reason: CloseReason::Reset,
            },
            PoolEvent::Reset { cancelled: 0 },
        ]
    );
}

#[tokio::test]
async fn shared_bus_reaches_external_subscribers() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();
    let pool = Pool::with_event_bus(PoolConfig::default(), bus).unwrap();
    assert_eq!(pool.events().subscriber_count(), 1);

    let guard = pool.acquire_guard().await.unwrap();
    drop(guard);

    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PoolEvent::Released { .. }))
    );
}

#[tokio::test]
async fn emergency_shed_reports_counts() {
    let pool = Pool::new(PoolConfig::default().with_max_resources(3)).unwrap();
    let a = pool.acquire().await.unwrap();
    let _b = pool.acquire().await.unwrap();
    pool.release(a);
    let mut rx = pool.subscribe();

    pool.emergency_shed();

    let events = drain(&mut rx);
    assert_eq!(
        events.last(),
        Some(&PoolEvent::EmergencyShed {
            force_closed: 1,
            idle_cleared: 1,
        })
    );
    let emergency_closes = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                PoolEvent::Closed {
                    reason: CloseReason::Emergency,
                    ..
                }
            )
        })
        .count();
    assert_eq!(emergency_closes, 2);
}

#[tokio::test]
async fn grant_and_health_check_report_queue_drain() {
    let pool = Pool::new(
        PoolConfig::default()
            .with_max_resources(1)
            .with_acquisition_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    let held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    while pool.stats().queued == 0 {
        tokio::task::yield_now().await;
    }
    let mut rx = pool.subscribe();

    pool.release(held);
    let granted = waiter.await.unwrap().unwrap();
    pool.release(granted);
    pool.run_health_check();

    let events = drain(&mut rx);
    assert!(matches!(
        events[1],
        PoolEvent::Acquired { queued: 0, .. }
    ));
    assert_eq!(
        events.last(),
        Some(&PoolEvent::HealthChecked {
            level: UtilizationLevel::Normal,
            utilization: 0.0,
            queued: 0,
        })
    );
}
