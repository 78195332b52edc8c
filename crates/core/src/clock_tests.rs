// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_epoch_is_nonzero() {
    let clock = SystemClock;
    assert!(clock.epoch_ms() > 0);
}

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::new();
    let start = clock.now();
    let start_ms = clock.epoch_ms();
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now().duration_since(start), Duration::from_secs(2));
    assert_eq!(clock.epoch_ms(), start_ms + 2_000);
}

#[test]
fn fake_clock_set_epoch() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}
