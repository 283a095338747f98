//! Tests for the pending request table

use super::*;
use serde_json::json;

const WINDOW: Duration = Duration::from_secs(30);

fn entry(
    table: &mut PendingTable,
    id: &str,
    command: &str,
    now: Instant,
) -> oneshot::Receiver<Result<Value, TransportError>> {
    let (tx, rx) = oneshot::channel();
    table.insert(
        id.to_string(),
        PendingRequest::new(command, tx, ProgressiveTimeout::new(WINDOW, 3, now), now),
    );
    rx
}

#[test]
fn test_settle_resolves_once() {
    let now = Instant::now();
    let mut table = PendingTable::new(16);
    let mut rx = entry(&mut table, "req-1", "ping", now);

    assert!(table.settle("req-1", Ok(json!("pong"))));
    assert_eq!(rx.try_recv().unwrap(), Ok(json!("pong")));

    // Second settlement is a no-op
    assert!(!table.settle("req-1", Ok(json!("again"))));
    assert!(table.is_empty());
    assert!(table.is_settled("req-1"));
}

#[test]
fn test_settle_unknown_id_is_noop() {
    let mut table = PendingTable::new(16);
    assert!(!table.settle("missing", Ok(json!(null))));
    assert!(!table.is_settled("missing"));
}

#[test]
fn test_settle_after_receiver_dropped() {
    let now = Instant::now();
    let mut table = PendingTable::new(16);
    let rx = entry(&mut table, "req-1", "ping", now);
    drop(rx);

    assert!(table.settle("req-1", Ok(json!("pong"))));
    assert!(table.is_empty());
}

#[test]
fn test_reject_all_empties_table() {
    let now = Instant::now();
    let mut table = PendingTable::new(16);
    let mut receivers: Vec<_> = (0..5)
        .map(|i| entry(&mut table, &format!("req-{}", i), "op", now))
        .collect();

    let rejected = table.reject_all(|_| TransportError::connection_closed(1006, "gone"));
    assert_eq!(rejected, 5);
    assert!(table.is_empty());

    for rx in receivers.iter_mut() {
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(TransportError::connection_closed(1006, "gone"))
        );
    }

    assert_eq!(table.reject_all(|_| TransportError::NotConnected), 0);
}

#[test]
fn test_touch_updates_activity_and_deadline() {
    let start = Instant::now();
    let mut table = PendingTable::new(16);
    let _rx = entry(&mut table, "req-1", "scan_text_nodes", start);

    let later = start + Duration::from_secs(20);
    assert!(table.touch("req-1", later));

    let views = table.views();
    assert_eq!(views[0].last_activity, later);
    assert!(matches!(
        table.poll_timeout("req-1", start + WINDOW),
        Some(TimeoutStep::Pending { .. })
    ));

    assert!(!table.touch("missing", later));
}

#[test]
fn test_poll_timeout_missing_entry() {
    let mut table = PendingTable::new(16);
    assert!(table.poll_timeout("missing", Instant::now()).is_none());
}

#[test]
fn test_sweep_stale_rejects_idle_entries_only() {
    let start = Instant::now();
    let mut table = PendingTable::new(16);
    let mut old_rx = entry(&mut table, "old", "export_node_as_image", start);
    let mut fresh_rx = entry(&mut table, "fresh", "get_selection", start);

    // Both deadlines lapsed at +30s; `fresh` saw progress at +330s
    let now = start + WINDOW + Duration::from_secs(301);
    table.touch("fresh", start + Duration::from_secs(330));

    let evicted = table.sweep_stale(now, Duration::from_secs(300));
    assert_eq!(
        evicted,
        vec![("old".to_string(), "export_node_as_image".to_string())]
    );
    assert!(matches!(
        old_rx.try_recv().unwrap(),
        Err(TransportError::Stale { .. })
    ));
    assert!(fresh_rx.try_recv().is_err());
    assert!(table.contains("fresh"));
}

#[test]
fn test_settled_history_is_bounded() {
    let now = Instant::now();
    let mut table = PendingTable::new(2);
    for id in ["a", "b", "c"] {
        let _rx = entry(&mut table, id, "op", now);
        table.settle(id, Ok(json!(null)));
    }

    assert!(!table.is_settled("a"));
    assert!(table.is_settled("b"));
    assert!(table.is_settled("c"));
}

#[test]
fn test_views_expose_command_names() {
    let now = Instant::now();
    let mut table = PendingTable::new(16);
    let _a = entry(&mut table, "a", "get_document_info", now);
    let _b = entry(&mut table, "b", "get_selection", now);

    let mut commands: Vec<&str> = table.views().iter().map(|v| v.command).collect();
    commands.sort();
    assert_eq!(commands, vec!["get_document_info", "get_selection"]);
}

#[test]
fn test_sweep_waits_for_running_timeout() {
    let start = Instant::now();
    let mut table = PendingTable::new(16);
    let mut rx = entry(&mut table, "slow", "scan_text_nodes", start);

    // Renewed twice without progress; the live deadline is now +90s
    assert!(matches!(
        table.poll_timeout("slow", start + WINDOW),
        Some(TimeoutStep::Extended { .. })
    ));
    assert!(matches!(
        table.poll_timeout("slow", start + WINDOW * 2),
        Some(TimeoutStep::Extended { .. })
    ));

    // Idle for 61s since the last activity, but the deadline is still ahead
    let stale_after = Duration::from_secs(60);
    assert!(table
        .sweep_stale(start + Duration::from_secs(61), stale_after)
        .is_empty());
    assert!(table.sweep_stale(start + WINDOW * 3, stale_after).is_empty());
    assert!(rx.try_recv().is_err());

    // Abandoned after its last deadline: stale once the threshold passes it
    let later = start + WINDOW * 3 + stale_after + Duration::from_secs(1);
    let evicted = table.sweep_stale(later, stale_after);
    assert_eq!(evicted.len(), 1);
    assert!(matches!(
        rx.try_recv().unwrap(),
        Err(TransportError::Stale { ref command, .. }) if command == "scan_text_nodes"
    ));
}
