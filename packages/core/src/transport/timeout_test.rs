//! Tests for the progressive timeout state machine

use super::*;

const WINDOW: Duration = Duration::from_millis(1000);

#[test]
fn test_starts_waiting_with_full_budget() {
    let now = Instant::now();
    let timeout = ProgressiveTimeout::new(WINDOW, 3, now);

    assert_eq!(timeout.state(), TimeoutState::Waiting { remaining: 3 });
    assert_eq!(timeout.deadline(), now + WINDOW);
    assert_eq!(timeout.window(), WINDOW);
}

#[test]
fn test_poll_before_deadline_is_pending() {
    let now = Instant::now();
    let mut timeout = ProgressiveTimeout::new(WINDOW, 3, now);

    let step = timeout.poll(now + Duration::from_millis(500));
    assert_eq!(
        step,
        TimeoutStep::Pending {
            deadline: now + WINDOW
        }
    );
    assert_eq!(timeout.state(), TimeoutState::Waiting { remaining: 3 });
}

#[test]
fn test_each_deadline_spends_one_extension() {
    let start = Instant::now();
    let mut timeout = ProgressiveTimeout::new(WINDOW, 3, start);

    let mut now = start;
    for expected_remaining in [2, 1, 0] {
        now += WINDOW;
        match timeout.poll(now) {
            TimeoutStep::Extended {
                deadline,
                remaining,
            } => {
                assert_eq!(remaining, expected_remaining);
                assert_eq!(deadline, now + WINDOW);
            }
            other => panic!("expected extension, got {:?}", other),
        }
    }

    now += WINDOW;
    match timeout.poll(now) {
        TimeoutStep::Expired { elapsed } => assert_eq!(elapsed, WINDOW * 4),
        other => panic!("expected expiry, got {:?}", other),
    }
    assert_eq!(timeout.state(), TimeoutState::Expired);
}

#[test]
fn test_total_wait_is_window_times_one_plus_extensions() {
    for extensions in 0..5u32 {
        let start = Instant::now();
        let mut timeout = ProgressiveTimeout::new(WINDOW, extensions, start);

        let elapsed = loop {
            let now = timeout.deadline();
            if let TimeoutStep::Expired { elapsed } = timeout.poll(now) {
                break elapsed;
            }
        };

        assert!(elapsed >= WINDOW * (1 + extensions));
    }
}

#[test]
fn test_zero_extensions_expires_on_first_deadline() {
    let now = Instant::now();
    let mut timeout = ProgressiveTimeout::new(WINDOW, 0, now);

    assert!(matches!(
        timeout.poll(now + WINDOW),
        TimeoutStep::Expired { .. }
    ));
}

#[test]
fn test_touch_pushes_deadline_without_refilling_budget() {
    let start = Instant::now();
    let mut timeout = ProgressiveTimeout::new(WINDOW, 1, start);

    let progress_at = start + Duration::from_millis(900);
    timeout.touch(progress_at);
    assert_eq!(timeout.deadline(), progress_at + WINDOW);

    // The original deadline has passed but progress moved it out
    assert!(matches!(
        timeout.poll(start + WINDOW),
        TimeoutStep::Pending { .. }
    ));
    assert_eq!(timeout.state(), TimeoutState::Waiting { remaining: 1 });
}

#[test]
fn test_touch_never_moves_deadline_backwards() {
    let start = Instant::now();
    let mut timeout = ProgressiveTimeout::new(WINDOW, 3, start);

    timeout.poll(start + WINDOW);
    let deadline = timeout.deadline();

    timeout.touch(start + Duration::from_millis(100));
    assert_eq!(timeout.deadline(), deadline);
}

#[test]
fn test_expired_stays_expired() {
    let now = Instant::now();
    let mut timeout = ProgressiveTimeout::new(WINDOW, 0, now);
    timeout.poll(now + WINDOW);

    timeout.touch(now + WINDOW * 2);
    assert_eq!(timeout.state(), TimeoutState::Expired);
    assert!(matches!(
        timeout.poll(now + WINDOW * 3),
        TimeoutStep::Expired { .. }
    ));
}
