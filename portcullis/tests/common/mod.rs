#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use portcullis::{
    AttemptOutcome, Decision, DenyReason, OutcomeReport, Portcullis, ProtectionGuard,
    StorageBackend,
};

pub const ALICE: &str = "alice@example.com";
pub const ALICE_ADDRESS: &str = "10.0.0.1";
pub const ATTACKER: &str = "203.0.113.5";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub async fn fail<S: StorageBackend>(
    guard: &ProtectionGuard<S>,
    account: &str,
    address: &str,
    at: DateTime<Utc>,
) -> OutcomeReport {
    guard
        .record_outcome(account, address, at, AttemptOutcome::Failure)
        .await
        .unwrap()
}

pub async fn account_lockout<S: StorageBackend>(portcullis: &Portcullis<S>) {
    let guard = portcullis.guard();

    // Five failures within a minute
    for i in 0..5 {
        let at = t0() + Duration::seconds(i * 10);
        assert_eq!(
            guard.check_allowed(ALICE, ALICE_ADDRESS, at).await.unwrap(),
            Decision::Allowed
        );
        fail(guard, ALICE, ALICE_ADDRESS, at).await;
    }

    // The sixth is rejected before the password is looked at
    let sixth = t0() + Duration::seconds(40);
    match guard.check_allowed(ALICE, ALICE_ADDRESS, sixth).await.unwrap() {
        Decision::Denied(reason @ DenyReason::AccountLocked { remaining }) => {
            assert_eq!(remaining, Duration::minutes(15));
            assert_eq!(reason.retry_after_seconds(), Some(900));
        }
        other => panic!("expected account lock, got {other:?}"),
    }

    // Still locked one second before the lock lifts
    let locked_at = t0() + Duration::seconds(40);
    let almost = locked_at + Duration::minutes(15) - Duration::seconds(1);
    assert!(!guard.check_allowed(ALICE, ALICE_ADDRESS, almost).await.unwrap().is_allowed());

    let later = locked_at + Duration::minutes(15);
    assert_eq!(
        guard.check_allowed(ALICE, ALICE_ADDRESS, later).await.unwrap(),
        Decision::Allowed
    );

    let report = guard
        .record_outcome(ALICE, ALICE_ADDRESS, later, AttemptOutcome::Success)
        .await
        .unwrap();
    assert!(matches!(report, OutcomeReport::Succeeded(_)));

    let status = guard.account_status(ALICE).await.unwrap();
    assert_eq!(status.failed_count, 0);
    assert_eq!(status.locked_until, None);

    // Address failures are not forgiven by a successful login
    let address = guard.address_status(ALICE_ADDRESS).await.unwrap();
    assert_eq!(address.failed_count, 5);
}

pub async fn success_resets_account<S: StorageBackend>(portcullis: &Portcullis<S>) {
    let guard = portcullis.guard();

    for i in 0..4 {
        fail(guard, ALICE, ALICE_ADDRESS, t0() + Duration::seconds(i)).await;
    }
    guard
        .record_outcome(ALICE, ALICE_ADDRESS, t0() + Duration::seconds(5), AttemptOutcome::Success)
        .await
        .unwrap();

    // Four more failures after the reset stay under the threshold
    for i in 0..4 {
        fail(guard, ALICE, ALICE_ADDRESS, t0() + Duration::seconds(10 + i)).await;
    }

    let now = t0() + Duration::seconds(20);
    assert!(guard.check_allowed(ALICE, ALICE_ADDRESS, now).await.unwrap().is_allowed());
    assert_eq!(guard.account_status(ALICE).await.unwrap().failed_count, 4);
}

pub async fn address_block<S: StorageBackend>(portcullis: &Portcullis<S>) {
    let guard = portcullis.guard();

    // Ten accounts, ten failures each. Failures count toward the address
    // whether or not the account has already locked.
    let mut reports = Vec::new();
    for n in 0..10 {
        let account = format!("user{n}@example.com");
        for i in 0..10 {
            let at = t0() + Duration::seconds(n * 10 + i);
            reports.push(fail(guard, &account, ATTACKER, at).await);
        }
    }

    let blocked_by: Vec<usize> = reports
        .iter()
        .enumerate()
        .filter_map(|(i, report)| match report {
            OutcomeReport::Failed(outcome) if outcome.address_blocked => Some(i),
            _ => None,
        })
        .collect();
    assert_eq!(blocked_by, vec![99]);

    let now = t0() + Duration::minutes(5);
    let stranger = "user10@example.com";
    assert_eq!(
        guard.check_allowed(stranger, ATTACKER, now).await.unwrap(),
        Decision::Denied(DenyReason::AddressBlocked)
    );
    assert_eq!(
        guard.check_allowed(stranger, "198.51.100.20", now).await.unwrap(),
        Decision::Allowed
    );

    // No expiry by default
    let next_year = now + Duration::days(365);
    assert_eq!(
        guard.check_allowed(stranger, ATTACKER, next_year).await.unwrap(),
        Decision::Denied(DenyReason::AddressBlocked)
    );

    assert!(guard.unblock_address(ATTACKER, next_year).await.unwrap());
    assert!(guard.check_allowed(stranger, ATTACKER, next_year).await.unwrap().is_allowed());
}

pub async fn address_threshold_boundary<S: StorageBackend>(portcullis: &Portcullis<S>) {
    let guard = portcullis.guard();

    // Spread across many accounts so no account lock gets in the way
    for i in 0..99 {
        let account = format!("victim{}@example.com", i % 33);
        fail(guard, &account, ATTACKER, t0() + Duration::seconds(i)).await;
    }

    let now = t0() + Duration::minutes(2);
    assert!(guard.check_allowed("new@example.com", ATTACKER, now).await.unwrap().is_allowed());

    fail(guard, "new@example.com", ATTACKER, now).await;
    assert_eq!(
        guard.check_allowed("other@example.com", ATTACKER, now).await.unwrap(),
        Decision::Denied(DenyReason::AddressBlocked)
    );

    let status = guard.address_status(ATTACKER).await.unwrap();
    assert_eq!(status.failed_count, 100);
    assert!(status.blocked);
    assert_eq!(status.blocked_until, None);
}

pub async fn concurrent_failures<S: StorageBackend>(portcullis: &Portcullis<S>, attempts: u32) {
    let guard = Arc::new(portcullis.guard().clone());
    let now = t0();

    let mut handles = Vec::new();
    for i in 0..attempts {
        let guard = Arc::clone(&guard);
        handles.push(tokio::spawn(async move {
            let address = format!("10.1.0.{}", i % 200 + 1);
            guard
                .record_outcome(ALICE, &address, now, AttemptOutcome::Failure)
                .await
                .unwrap()
        }));
    }

    let mut locks = 0;
    for handle in handles {
        if let OutcomeReport::Failed(outcome) = handle.await.unwrap() {
            if outcome.account_locked {
                locks += 1;
            }
        }
    }

    assert_eq!(locks, 1);
    let status = guard.account_status(ALICE).await.unwrap();
    assert_eq!(status.failed_count, attempts);
    assert_eq!(status.locked_until, Some(now + Duration::minutes(15)));
}
