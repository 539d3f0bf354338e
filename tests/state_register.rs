// tests/state_register.rs

use std::sync::Arc;
use std::thread;

use procstream::state::{StateRegister, flags};

#[test]
fn set_and_unset_are_bitwise() {
    let state = StateRegister::new(flags::NONE);

    state.set(flags::RUNNING | flags::DONE);
    assert!(state.is(flags::RUNNING));
    assert!(state.is(flags::RUNNING | flags::DONE));
    assert!(!state.is(flags::DISPOSED));

    state.unset(flags::RUNNING);
    assert_eq!(state.get(), flags::DONE);

    state.clear(flags::NONE);
    assert_eq!(state.get(), flags::NONE);
}

#[test]
fn compare_and_set_respects_mask() {
    let state = StateRegister::new(flags::DONE | flags::DISPOSED);

    // DONE/DISPOSED are outside the mask, so starting is allowed.
    assert!(state.compare_and_set(
        flags::NONE,
        flags::INITIALIZING | flags::RUNNING,
        flags::INITIALIZING
    ));
    assert!(state.is(flags::INITIALIZING));

    // Now INITIALIZING is set; a second attempt fails silently.
    assert!(!state.compare_and_set(
        flags::NONE,
        flags::INITIALIZING | flags::RUNNING,
        flags::INITIALIZING
    ));
    assert_eq!(
        state.get(),
        flags::DONE | flags::DISPOSED | flags::INITIALIZING
    );
}

#[test]
fn compare_and_unset_only_when_guard_holds() {
    let state = StateRegister::new(flags::DONE);
    assert!(!state.compare_and_unset(flags::RUNNING, flags::RUNNING, flags::RUNNING));
    assert_eq!(state.get(), flags::DONE);

    state.set(flags::RUNNING);
    assert!(state.compare_and_unset(flags::RUNNING, flags::RUNNING, flags::RUNNING));
    assert_eq!(state.get(), flags::DONE);
}

#[test]
fn is_masked_compares_exactly() {
    let state = StateRegister::new(flags::RUNNING | flags::DONE);
    assert!(state.is_masked(flags::RUNNING, flags::RUNNING | flags::INITIALIZING));
    assert!(!state.is_masked(flags::NONE, flags::RUNNING));
}

#[test]
fn only_one_thread_wins_the_start_transition() {
    let state = Arc::new(StateRegister::new(flags::NONE));

    let winners: usize = (0..16)
        .map(|_| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                state.compare_and_set(
                    flags::NONE,
                    flags::INITIALIZING | flags::RUNNING,
                    flags::INITIALIZING,
                )
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();

    assert_eq!(winners, 1);
    assert_eq!(state.get(), flags::INITIALIZING);
}

#[test]
fn concurrent_sets_never_lose_bits() {
    let state = Arc::new(StateRegister::new(flags::NONE));
    let bits = [flags::INITIALIZING, flags::RUNNING, flags::DONE, flags::DISPOSED];

    let handles: Vec<_> = bits
        .iter()
        .map(|&bit| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..1000 {
                    state.set(bit);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        state.get(),
        flags::INITIALIZING | flags::RUNNING | flags::DONE | flags::DISPOSED
    );
}

#[test]
fn compare_and_replace_drops_other_bits() {
    let state = StateRegister::new(flags::DONE | flags::DISPOSED);

    assert!(state.compare_and_replace(
        flags::NONE,
        flags::INITIALIZING | flags::RUNNING,
        flags::INITIALIZING
    ));
    assert_eq!(state.get(), flags::INITIALIZING);

    // The guard no longer holds, so nothing changes.
    assert!(!state.compare_and_replace(
        flags::NONE,
        flags::INITIALIZING | flags::RUNNING,
        flags::NONE
    ));
    assert_eq!(state.get(), flags::INITIALIZING);
}
