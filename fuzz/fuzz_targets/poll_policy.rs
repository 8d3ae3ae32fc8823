#![no_main]

use std::time::Duration;

use consign_retry::{poll_until, PollOutcome, PollPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u16, u8, u8, bool)| {
    let (interval_ms, max_attempts, ready_at, interrupt) = data;
    let policy = PollPolicy::new(Duration::from_millis(u64::from(interval_ms)), u32::from(max_attempts));

    let mut checks = 0u32;
    let mut sleeps = Vec::new();
    let outcome = poll_until(
        &policy,
        |delay| {
            sleeps.push(delay);
            !interrupt
        },
        |attempt| {
            checks += 1;
            assert_eq!(attempt, checks);
            Ok::<_, ()>((attempt == u32::from(ready_at)).then_some(attempt))
        },
    )
    .expect("check never fails");

    assert_eq!(outcome.attempts(), checks);
    assert!(checks <= policy.max_attempts);
    assert!(sleeps.iter().all(|d| *d == policy.interval));
    match outcome {
        PollOutcome::Ready { value, attempts } => assert_eq!(value, attempts),
        PollOutcome::Exhausted { attempts } => assert_eq!(attempts, policy.max_attempts),
        PollOutcome::Interrupted { attempts } => assert!(interrupt && attempts == 1),
    }
});
