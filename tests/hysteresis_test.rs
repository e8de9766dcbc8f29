use hesperus::hysteresis::{DEFAULT_MAX_COUNT, HysteresisDamper};

#[test]
fn opposite_run_of_max_count_is_held() {
    let mut damper = HysteresisDamper::new(DEFAULT_MAX_COUNT);
    assert_eq!(damper.stabilize(10), 10);

    for _ in 0..DEFAULT_MAX_COUNT {
        assert_eq!(damper.stabilize(-5), 10);
    }
    assert_eq!(damper.stabilize(-5), -5);
    assert_eq!(damper.last(), Some(-5));
}

#[test]
fn same_direction_changes_pass_immediately() {
    let mut damper = HysteresisDamper::default();
    damper.stabilize(6);
    assert_eq!(damper.stabilize(12), 12);
    assert_eq!(damper.stabilize(4), 4);
}

#[test]
fn interrupted_run_starts_over() {
    let mut damper = HysteresisDamper::new(2);
    damper.stabilize(8);
    assert_eq!(damper.stabilize(-3), 8);
    assert_eq!(damper.stabilize(-3), 8);
    // Back in the held direction: accepted and counters reset
    assert_eq!(damper.stabilize(9), 9);
    assert_eq!(damper.stabilize(-3), 9);
    assert_eq!(damper.stabilize(-3), 9);
    assert_eq!(damper.stabilize(-3), -3);
}

#[test]
fn idle_needs_the_same_persistence() {
    let mut damper = HysteresisDamper::new(1);
    damper.stabilize(0);
    assert_eq!(damper.stabilize(7), 0);
    assert_eq!(damper.stabilize(7), 7);
    assert_eq!(damper.stabilize(0), 7);
    assert_eq!(damper.stabilize(0), 0);
}
