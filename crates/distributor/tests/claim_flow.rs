//! End-to-end claim flow: ledger -> epoch -> commitment -> claim.

use std::sync::Arc;

use async_trait::async_trait;

use claimcraft_aggregator::{MemoryLedger, SqliteLedger, PAID_STATUS};
use claimcraft_core::{hash_from_hex, ClaimStatus, WalletAddress};
use claimcraft_distributor::config::DEFAULT_BUILD_LOCK_KEY;
use claimcraft_distributor::{
    BuildOutcome, ClaimStart, Distributor, DistributorConfig, DistributorError, SkipReason,
};
use claimcraft_prover::{claim_leaf_hash, MerkleTree};
use claimcraft_settlement::{
    ClaimTxVerifier, CommitmentBridge, SettlementClient, SettlementConfig, SettlementError,
    TxVerdict,
};
use claimcraft_store::{BuildLock, MemoryStore, SqliteStore};

const PERIOD: &str = "2026-01-19";

struct Harness {
    ledger: MemoryLedger,
    store: Arc<MemoryStore>,
    chain: Arc<SettlementClient>,
    dist: Distributor,
}

fn wallet(seed: u8) -> WalletAddress {
    WalletAddress::new([seed; 32])
}

fn harness_with(config: DistributorConfig) -> Harness {
    let ledger = MemoryLedger::new();
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(SettlementClient::new(SettlementConfig::mock()));
    let shared = Arc::new(ledger.clone());
    let dist = Distributor::new(&config, store.clone(), shared.clone(), shared, chain.clone())
        .unwrap();
    Harness {
        ledger,
        store,
        chain,
        dist,
    }
}

fn harness() -> Harness {
    harness_with(DistributorConfig::default())
}

/// U1 earns 12.5 and U2 earns 7.0 (6-decimal ledger units) in `PERIOD`.
fn seed_two_users(ledger: &MemoryLedger) {
    ledger.set_wallet("U1", &wallet(1).to_base58());
    ledger.set_wallet("U2", &wallet(2).to_base58());
    ledger.credit("U1", PERIOD, 12_500000, "watch");
    ledger.credit("U2", PERIOD, 7_000000, "watch");
}

async fn build_and_commit(h: &Harness, period: &str) -> u64 {
    let outcome = h.dist.build_epoch(period).await.unwrap();
    let epoch_number = outcome.summary().unwrap().epoch_number;
    h.dist.commit_root(epoch_number).await.unwrap();
    epoch_number
}

#[tokio::test]
async fn test_two_user_scenario() {
    let h = harness();
    seed_two_users(&h.ledger);

    let summary = match h.dist.build_epoch(PERIOD).await.unwrap() {
        BuildOutcome::Built(s) => s,
        other => panic!("expected Built, got {:?}", other),
    };
    assert_eq!(summary.epoch_number, 1);
    assert_eq!(summary.leaf_count, 2);
    assert_eq!(summary.total_atomic, 12_500000000 + 7_000000000);
    assert!(!summary.committed_on_chain);

    let err = h.dist.prepare_claim("U1", 1u64).await.unwrap_err();
    assert!(matches!(err, DistributorError::EpochNotYetCommitted(1)));
    assert!(err.is_retryable());

    // Recording before the root is on-chain is refused
    let err = h.dist.mark_committed(1, Some("sig".into())).await.unwrap_err();
    assert!(matches!(err, DistributorError::RootNotCommitted(1)));

    let root = hash_from_hex(&summary.root_hex).unwrap();
    let tx = h.chain.commit_root(1, &root).await.unwrap();
    let epoch = h.dist.mark_committed(1, Some(tx.clone())).await.unwrap();
    assert!(epoch.is_committed());
    assert_eq!(epoch.on_chain_tx_ref(), Some(tx.as_str()));

    let payload = h.dist.prepare_claim("U1", 1u64).await.unwrap();
    assert_eq!(payload.amount_atomic, 12_500000000);
    assert_eq!(payload.root_hex, summary.root_hex);
    assert_eq!(payload.proof.len(), 1);

    let proof: Vec<_> = payload.proof.iter().map(|p| hash_from_hex(p).unwrap()).collect();
    let leaf = claim_leaf_hash(&payload.wallet, 1, payload.amount_atomic, payload.leaf_index);
    assert!(MerkleTree::verify(&root, &leaf, &proof));

    // Any single field change breaks the proof
    let bumped = claim_leaf_hash(&payload.wallet, 1, payload.amount_atomic + 1, payload.leaf_index);
    assert!(!MerkleTree::verify(&root, &bumped, &proof));
    let moved = claim_leaf_hash(&payload.wallet, 1, payload.amount_atomic, payload.leaf_index ^ 1);
    assert!(!MerkleTree::verify(&root, &moved, &proof));
    let other = claim_leaf_hash(&wallet(9), 1, payload.amount_atomic, payload.leaf_index);
    assert!(!MerkleTree::verify(&root, &other, &proof));

    // Same answer by period key
    assert_eq!(h.dist.prepare_claim("U1", PERIOD).await.unwrap(), payload);
}

#[tokio::test]
async fn test_build_is_idempotent() {
    let h = harness();
    seed_two_users(&h.ledger);

    let first = h.dist.build_epoch(PERIOD).await.unwrap();
    let second = h.dist.build_epoch(PERIOD).await.unwrap();

    let (first, second) = match (first, second) {
        (BuildOutcome::Built(a), BuildOutcome::AlreadyExists(b)) => (a, b),
        other => panic!("unexpected outcomes {:?}", other),
    };
    assert_eq!(first.root_hex, second.root_hex);
    assert_eq!(first.epoch_number, second.epoch_number);
    assert_eq!(h.dist.latest_epoch().await.unwrap().unwrap().epoch_number, 1);
}

#[tokio::test]
async fn test_no_claimables_creates_nothing() {
    let h = harness();
    seed_two_users(&h.ledger);

    let err = h.dist.build_epoch("2026-01-26").await.unwrap_err();
    assert!(matches!(err, DistributorError::NoClaimables(ref p) if p == "2026-01-26"));
    assert!(!err.is_retryable());
    assert!(h.dist.latest_epoch().await.unwrap().is_none());

    // The lock was released: a real build still goes through
    assert!(matches!(
        h.dist.build_epoch(PERIOD).await.unwrap(),
        BuildOutcome::Built(_)
    ));
}

#[tokio::test]
async fn test_lock_busy_skips_build() {
    let h = harness();
    seed_two_users(&h.ledger);

    assert!(h.store.try_acquire(DEFAULT_BUILD_LOCK_KEY).await.unwrap());
    let outcome = h.dist.build_epoch(PERIOD).await.unwrap();
    assert_eq!(
        outcome,
        BuildOutcome::Skipped {
            reason: SkipReason::LockBusy
        }
    );
    assert!(h.dist.latest_epoch().await.unwrap().is_none());

    h.store.release(DEFAULT_BUILD_LOCK_KEY).await.unwrap();
    assert!(matches!(
        h.dist.build_epoch(PERIOD).await.unwrap(),
        BuildOutcome::Built(_)
    ));
}

#[tokio::test]
async fn test_epoch_numbers_are_monotonic() {
    let h = harness();
    seed_two_users(&h.ledger);
    h.ledger.credit("U1", "2026-01-26", 1_000000, "watch");

    let a = h.dist.build_epoch(PERIOD).await.unwrap();
    let b = h.dist.build_epoch("2026-01-26").await.unwrap();
    assert_eq!(a.summary().unwrap().epoch_number, 1);
    assert_eq!(b.summary().unwrap().epoch_number, 2);
    assert_eq!(h.dist.epoch("2026-01-26").await.unwrap().epoch_number, 2);
}

#[tokio::test]
async fn test_build_latest() {
    let h = harness();
    assert_eq!(
        h.dist.build_latest().await.unwrap(),
        BuildOutcome::Skipped {
            reason: SkipReason::NoPayablePeriod
        }
    );

    seed_two_users(&h.ledger);
    h.ledger.credit("U2", "2026-01-26", 3_000000, "watch");

    let outcome = h.dist.build_latest().await.unwrap();
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.period_key, "2026-01-26");
    assert_eq!(summary.leaf_count, 1);
}

#[tokio::test]
async fn test_default_categories_filter_build() {
    let config = DistributorConfig {
        default_categories: Some(vec!["watch".to_string()]),
        ..Default::default()
    };
    let h = harness_with(config);
    seed_two_users(&h.ledger);
    h.ledger.credit("U1", PERIOD, 100_000000, "raffle");

    let outcome = h.dist.build_epoch(PERIOD).await.unwrap();
    assert_eq!(outcome.summary().unwrap().total_atomic, 19_500000000);
}

#[tokio::test]
async fn test_claim_is_idempotent() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;

    let started = h.dist.start_claim("U1", n).await.unwrap();
    let attempt = match &started {
        ClaimStart::Ready { attempt, payload } => {
            assert_eq!(payload.amount_atomic, 12_500000000);
            attempt.clone()
        }
        other => panic!("expected Ready, got {:?}", other),
    };
    assert_eq!(attempt.status, ClaimStatus::Processing);

    let tx = h.chain.mock_claim_signature().unwrap();
    let claimed = h.dist.complete_claim("U1", n, &tx).await.unwrap();
    assert_eq!(claimed.status, ClaimStatus::Claimed);
    assert_eq!(claimed.on_chain_tx_ref.as_deref(), Some(tx.as_str()));
    assert!(claimed.claimed_at.is_some());

    match h.dist.start_claim("U1", n).await.unwrap() {
        ClaimStart::AlreadyClaimed { attempt } => assert_eq!(attempt, claimed),
        other => panic!("expected AlreadyClaimed, got {:?}", other),
    }

    // Completing again with the same tx is a no-op
    assert_eq!(h.dist.complete_claim("U1", n, &tx).await.unwrap(), claimed);

    // ...with a different tx it is not
    let other_tx = h.chain.mock_claim_signature().unwrap();
    let err = h.dist.complete_claim("U1", n, &other_tx).await.unwrap_err();
    assert!(matches!(err, DistributorError::InvalidTransition { .. }));

    assert_eq!(h.dist.claims_for_user("U1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replayed_tx_rejected() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;

    h.dist.start_claim("U1", n).await.unwrap();
    h.dist.start_claim("U2", n).await.unwrap();

    let tx = h.chain.mock_claim_signature().unwrap();
    h.dist.complete_claim("U1", n, &tx).await.unwrap();

    let err = h.dist.complete_claim("U2", n, &tx).await.unwrap_err();
    assert!(matches!(err, DistributorError::TxAlreadyUsed(ref t) if *t == tx));
    assert!(!err.is_retryable());

    let u2 = h.dist.claims_for_user("U2").await.unwrap();
    assert_eq!(u2[0].status, ClaimStatus::Processing);
    assert_eq!(u2[0].on_chain_tx_ref, None);
}

#[tokio::test]
async fn test_failed_claim_can_be_retried() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;

    h.dist.start_claim("U2", n).await.unwrap();
    let failed = h.dist.fail_claim("U2", n, "wallet rejected").await.unwrap();
    assert_eq!(failed.status, ClaimStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("wallet rejected"));

    let tx = h.chain.mock_claim_signature().unwrap();
    let err = h.dist.complete_claim("U2", n, &tx).await.unwrap_err();
    assert!(matches!(
        err,
        DistributorError::InvalidTransition {
            from: ClaimStatus::Failed,
            to: ClaimStatus::Claimed
        }
    ));

    let retried = h.dist.start_claim("U2", n).await.unwrap();
    let attempt = retried.attempt();
    assert_eq!(attempt.status, ClaimStatus::Processing);
    assert_eq!(attempt.last_error, None);
    assert_eq!(attempt.id, failed.id);
    assert_eq!(attempt.amount_atomic, 7_000000000);

    let claimed = h.dist.complete_claim("U2", n, &tx).await.unwrap();
    assert_eq!(claimed.status, ClaimStatus::Claimed);

    let err = h.dist.fail_claim("U2", n, "late").await.unwrap_err();
    assert!(matches!(err, DistributorError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_claim_preconditions() {
    let h = harness();
    seed_two_users(&h.ledger);

    let err = h.dist.start_claim("U1", 7u64).await.unwrap_err();
    assert!(matches!(err, DistributorError::EpochNotFound(_)));

    let n = build_and_commit(&h, PERIOD).await;
    let err = h.dist.prepare_claim("nobody", n).await.unwrap_err();
    assert!(matches!(err, DistributorError::NoEntitlement { .. }));

    let err = h.dist.complete_claim("U1", n, "sig").await.unwrap_err();
    assert!(matches!(err, DistributorError::ClaimNotFound { .. }));

    h.dist.start_claim("U1", n).await.unwrap();
    let err = h.dist.complete_claim("U1", n, "   ").await.unwrap_err();
    assert!(matches!(err, DistributorError::MissingTxRef));
}

#[tokio::test]
async fn test_concurrent_starts_converge() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;

    let (a, b) = tokio::join!(h.dist.start_claim("U1", n), h.dist.start_claim("U1", n));
    assert_eq!(a.unwrap().attempt().id, b.unwrap().attempt().id);
    assert_eq!(h.dist.claims_for_user("U1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_verifier_rejection_marks_failed() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;
    let dist = Distributor::new(
        &DistributorConfig::default(),
        h.store.clone(),
        Arc::new(h.ledger.clone()),
        Arc::new(h.ledger.clone()),
        h.chain.clone(),
    )
    .unwrap()
    .with_verifier(h.chain.clone());

    dist.start_claim("U1", n).await.unwrap();
    let bad = h.chain.mock_claim_signature().unwrap();
    h.chain.reject_mock_tx(&bad, TxVerdict::FAILED).unwrap();

    let err = dist.complete_claim("U1", n, &bad).await.unwrap_err();
    assert!(matches!(err, DistributorError::ClaimTxRejected { ref reason, .. } if reason == "TX_FAILED"));

    let attempt = &dist.claims_for_user("U1").await.unwrap()[0];
    assert_eq!(attempt.status, ClaimStatus::Failed);
    assert_eq!(attempt.last_error.as_deref(), Some("TX_FAILED"));
    assert_eq!(attempt.on_chain_tx_ref, None);

    let err = dist.complete_claim("U1", n, "garbage").await.unwrap_err();
    assert!(matches!(err, DistributorError::InvalidTransition { .. }));

    dist.start_claim("U1", n).await.unwrap();
    let good = h.chain.mock_claim_signature().unwrap();
    assert_eq!(
        dist.complete_claim("U1", n, &good).await.unwrap().status,
        ClaimStatus::Claimed
    );
}

#[tokio::test]
async fn test_claim_tx_must_invoke_claim_program() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;

    let program = [0x42; 32];
    let verifier = Arc::new(SettlementClient::new(SettlementConfig {
        claim_program_id: Some(program),
        ..SettlementConfig::mock()
    }));
    let dist = Distributor::new(
        &DistributorConfig::default(),
        h.store.clone(),
        Arc::new(h.ledger.clone()),
        Arc::new(h.ledger.clone()),
        h.chain.clone(),
    )
    .unwrap()
    .with_verifier(verifier.clone());

    dist.start_claim("U1", n).await.unwrap();
    let transfer = verifier.mock_tx_with_programs(&[[0x07; 32]]).unwrap();
    let err = dist.complete_claim("U1", n, &transfer).await.unwrap_err();
    assert!(matches!(
        err,
        DistributorError::ClaimTxRejected { ref reason, .. } if reason == "TX_WRONG_PROGRAM"
    ));
    assert_eq!(dist.claims_for_user("U1").await.unwrap()[0].status, ClaimStatus::Failed);

    dist.start_claim("U1", n).await.unwrap();
    let claim = verifier.mock_claim_signature().unwrap();
    let claimed = dist.complete_claim("U1", n, &claim).await.unwrap();
    assert_eq!(claimed.on_chain_tx_ref.as_deref(), Some(claim.as_str()));
}

struct UnreachableChain;

#[async_trait]
impl ClaimTxVerifier for UnreachableChain {
    async fn verify_claim_tx(&self, _tx_ref: &str) -> claimcraft_settlement::Result<TxVerdict> {
        Err(SettlementError::RpcError("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_verifier_outage_leaves_attempt_processing() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;
    let dist = Distributor::new(
        &DistributorConfig::default(),
        h.store.clone(),
        Arc::new(h.ledger.clone()),
        Arc::new(h.ledger.clone()),
        h.chain.clone(),
    )
    .unwrap()
    .with_verifier(Arc::new(UnreachableChain));

    dist.start_claim("U1", n).await.unwrap();
    let tx = h.chain.mock_claim_signature().unwrap();
    let err = dist.complete_claim("U1", n, &tx).await.unwrap_err();
    assert!(err.is_retryable());

    let attempt = &dist.claims_for_user("U1").await.unwrap()[0];
    assert_eq!(attempt.status, ClaimStatus::Processing);
}

#[tokio::test]
async fn test_root_mismatch_not_recorded() {
    let h = harness();
    seed_two_users(&h.ledger);
    h.dist.build_epoch(PERIOD).await.unwrap();

    h.chain.set_mock_root(1, [0u8; 32]).unwrap();
    let err = h.dist.mark_committed(1, None).await.unwrap_err();
    assert!(matches!(err, DistributorError::RootMismatch { epoch_number: 1, .. }));
    assert!(!h.dist.epoch(1u64).await.unwrap().committed_on_chain);
    assert!(h.dist.reconcile_commitments().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mark_committed_is_idempotent() {
    let h = harness();
    seed_two_users(&h.ledger);
    let n = build_and_commit(&h, PERIOD).await;

    let first = h.dist.epoch(n).await.unwrap();
    let again = h.dist.mark_committed(n, Some("other".into())).await.unwrap();
    assert_eq!(again.on_chain_tx_ref(), first.on_chain_tx_ref.as_deref());
    assert!(first.on_chain_tx_ref.is_some());
}

#[tokio::test]
async fn test_reconcile_and_probe() {
    let h = harness();
    seed_two_users(&h.ledger);
    h.ledger.credit("U1", "2026-01-26", 1_000000, "watch");
    h.ledger.credit("U1", "2026-02-02", 1_000000, "watch");
    for period in [PERIOD, "2026-01-26", "2026-02-02"] {
        h.dist.build_epoch(period).await.unwrap();
    }
    assert_eq!(h.dist.find_latest_committed_epoch().await.unwrap(), 0);

    // Roots published out of band for epochs 1 and 2 only
    for n in [1u64, 2] {
        let root = hash_from_hex(&h.dist.epoch(n).await.unwrap().root_hex).unwrap();
        h.chain.commit_root(n, &root).await.unwrap();
    }

    assert_eq!(h.dist.reconcile_commitments().await.unwrap(), vec![1, 2]);
    assert!(h.dist.reconcile_commitments().await.unwrap().is_empty());
    assert!(!h.dist.epoch(3u64).await.unwrap().committed_on_chain);
    assert_eq!(h.dist.find_latest_committed_epoch().await.unwrap(), 2);
}

#[tokio::test]
async fn test_audit_and_wallet_lookup() {
    let h = harness();
    seed_two_users(&h.ledger);
    h.dist.build_epoch(PERIOD).await.unwrap();

    let audit = h.dist.audit_epoch(PERIOD).await.unwrap();
    assert!(audit.is_clean());
    assert_eq!(audit.leaves_checked, 2);

    let leaf = h.dist.leaf_for_wallet(1u64, &wallet(2)).await.unwrap().unwrap();
    assert_eq!(leaf.user_id, "U2");
    assert!(h.dist.leaf_for_wallet(1u64, &wallet(3)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("claims.db");

    let ledger = Arc::new(SqliteLedger::open(dir.path().join("ledger.db")).unwrap());
    ledger.upsert_user("U1", Some(&wallet(1).to_base58()), None).unwrap();
    ledger.upsert_user("U2", None, Some(&wallet(2).to_base58())).unwrap();
    ledger.insert_event("U1", PERIOD, 12_500000, "watch", PAID_STATUS).unwrap();
    ledger.insert_event("U2", PERIOD, 7_000000, "watch", PAID_STATUS).unwrap();

    let chain = Arc::new(SettlementClient::new(SettlementConfig::mock()));
    let config = DistributorConfig {
        database_path: Some(db.clone()),
        ..Default::default()
    };

    let root_hex = {
        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let dist = Distributor::new(&config, store, ledger.clone(), ledger.clone(), chain.clone())
            .unwrap();
        let outcome = dist.build_epoch(PERIOD).await.unwrap();
        dist.commit_root(1).await.unwrap();
        dist.start_claim("U1", 1u64).await.unwrap();
        outcome.summary().unwrap().root_hex.clone()
    };

    // Reopen: epoch, commitment and the open attempt survive
    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let dist = Distributor::new(&config, store, ledger.clone(), ledger, chain.clone()).unwrap();

    let summary = dist.epoch(1u64).await.unwrap();
    assert_eq!(summary.root_hex, root_hex);
    assert!(summary.committed_on_chain);
    assert!(matches!(
        dist.build_epoch(PERIOD).await.unwrap(),
        BuildOutcome::AlreadyExists(_)
    ));

    let tx = chain.mock_claim_signature().unwrap();
    let claimed = dist.complete_claim("U1", 1u64, &tx).await.unwrap();
    assert_eq!(claimed.status, ClaimStatus::Claimed);
    assert!(dist.audit_epoch(1u64).await.unwrap().is_clean());
}
