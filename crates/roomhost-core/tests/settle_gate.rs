//! Settle-once properties exercised through the public API.

use std::time::Duration;

use roomhost_core::{FailureReason, Outcome, SettleGate};

fn outcome_for(step: usize) -> Outcome {
    match step % 4 {
        0 => Outcome::Success(format!("https://rooms.example/play?c={step}")),
        1 => Outcome::Failure(FailureReason::Timeout),
        2 => Outcome::Failure(FailureReason::SanityCheckFailed),
        _ => Outcome::Failure(FailureReason::BackendError(format!("error {step}"))),
    }
}

#[tokio::test]
async fn test_any_sequence_propagates_only_the_first_outcome() {
    for n in 1..=16 {
        for offset in 0..4 {
            let (gate, settlement) = SettleGate::new();
            let sequence: Vec<Outcome> = (0..n).map(|i| outcome_for(i + offset)).collect();

            let accepted: Vec<bool> = sequence.iter().cloned().map(|o| gate.settle(o)).collect();

            assert!(accepted[0]);
            assert!(accepted[1..].iter().all(|won| !won));
            assert_eq!(settlement.wait().await, Some(sequence[0].clone()));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_timer_racing_success_leaves_success_in_place() {
    let (gate, settlement) = SettleGate::new();

    let timer_gate = gate.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        timer_gate.settle(Outcome::Failure(FailureReason::Timeout))
    });
    gate.register_cancel(timer.abort_handle());

    assert!(gate.settle(Outcome::Success("https://rooms.example/play?c=ok".into())));
    assert!(timer.await.unwrap_err().is_cancelled());
    assert_eq!(
        settlement.wait().await,
        Some(Outcome::Success("https://rooms.example/play?c=ok".into()))
    );
}
