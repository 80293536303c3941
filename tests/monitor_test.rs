mod common;

use std::time::Duration;

use chrono::Utc;

#[tokio::test]
async fn p95_uses_nearest_rank_over_recorded_latencies() {
    let state = common::test_state();
    let monitor = &state.services.monitor;

    // 100 samples with latencies 1..=100 ms.
    let base = Utc::now() - chrono::Duration::seconds(10);
    for i in 1..=100i64 {
        monitor
            .record_message_latency(
                &format!("msg_{i}"),
                "session_1",
                base,
                base + chrono::Duration::milliseconds(i),
                64,
            )
            .await;
    }

    let metrics = monitor.get_session_metrics("session_1").await;
    assert_eq!(metrics.message_count, 100);
    // Ascending sort, index = floor(100 * 0.95) = 95 -> 96th value.
    assert_eq!(metrics.p95_latency, 96);
    assert_eq!(metrics.p99_latency, 100);
    assert!((metrics.average_latency - 50.5).abs() < 0.01);
    assert_eq!(metrics.total_bytes, 6400);
}

#[tokio::test]
async fn single_sample_is_its_own_percentile() {
    let state = common::test_state();
    let monitor = &state.services.monitor;

    let sent = Utc::now();
    monitor
        .record_message_latency("msg_1", "session_1", sent, sent + chrono::Duration::milliseconds(42), 10)
        .await;

    let metrics = monitor.get_session_metrics("session_1").await;
    assert_eq!(metrics.p95_latency, 42);
    assert_eq!(metrics.p99_latency, 42);
}

#[tokio::test]
async fn unknown_session_reads_as_zero_metrics() {
    let state = common::test_state();
    let metrics = state.services.monitor.get_session_metrics("session_none").await;
    assert_eq!(metrics.message_count, 0);
    assert_eq!(metrics.p95_latency, 0);
    assert_eq!(metrics.average_latency, 0.0);
}

#[tokio::test]
async fn global_metrics_fold_all_sessions() {
    let state = common::test_state();
    let monitor = &state.services.monitor;
    let sent = Utc::now();

    for (session, latency) in [("session_a", 10i64), ("session_b", 30)] {
        monitor
            .record_message_latency(
                "msg_x",
                session,
                sent,
                sent + chrono::Duration::milliseconds(latency),
                100,
            )
            .await;
    }

    let global = monitor.get_global_metrics().await;
    assert_eq!(global.message_count, 2);
    assert_eq!(global.total_bytes, 200);
    assert!((global.average_latency - 20.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn history_filters_by_session_and_range() {
    let state = common::test_state();
    let monitor = &state.services.monitor;

    let early = Utc::now() - chrono::Duration::seconds(100);
    let late = Utc::now();
    monitor
        .record_message_latency("msg_old", "session_1", early, early, 1)
        .await;
    monitor
        .record_message_latency("msg_new", "session_1", late, late, 1)
        .await;
    monitor
        .record_message_latency("msg_other", "session_2", late, late, 1)
        .await;

    let all = monitor.get_latency_history(None, None, None).await;
    assert_eq!(all.len(), 3);

    let mine = monitor.get_latency_history(Some("session_1"), None, None).await;
    assert_eq!(mine.len(), 2);

    let recent = monitor
        .get_latency_history(None, Some(Utc::now() - chrono::Duration::seconds(50)), None)
        .await;
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn slow_messages_come_back_slowest_first() {
    let state = common::test_state();
    let monitor = &state.services.monitor;
    let sent = Utc::now();

    for (id, latency) in [("msg_a", 100i64), ("msg_b", 500), ("msg_c", 300)] {
        monitor
            .record_message_latency(id, "session_1", sent, sent + chrono::Duration::milliseconds(latency), 1)
            .await;
    }

    let slow = monitor.get_slow_messages(Duration::from_millis(200)).await;
    let ids: Vec<&str> = slow.iter().map(|s| s.message_id.as_str()).collect();
    assert_eq!(ids, vec!["msg_b", "msg_c"]);
}

#[tokio::test]
async fn alert_scan_reports_recent_breaches() {
    let state = common::test_state();
    let monitor = &state.services.monitor;
    let sent = Utc::now();

    monitor
        .record_message_latency("msg_fast", "session_1", sent, sent + chrono::Duration::milliseconds(10), 1)
        .await;
    monitor
        .record_message_latency("msg_slow", "session_1", sent, sent + chrono::Duration::milliseconds(900), 1)
        .await;

    let breaches = monitor.alert_on_high_latency(Duration::from_millis(500)).await;
    assert_eq!(breaches.len(), 1);
    assert_eq!(breaches[0].message_id, "msg_slow");
}
