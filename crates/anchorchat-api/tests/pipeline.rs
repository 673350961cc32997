mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use uuid::Uuid;

use anchorchat_api::ErrorKind;
use anchorchat_api::pipeline::{ZERO_ADDRESS, fingerprint};
use anchorchat_types::models::AnchorStatus;

use common::{
    ALICE_WALLET, BOB_WALLET, CountingChain, FailingChain, FakeWallet, OversizedGasChain, open_db, seed_group, session,
};

#[tokio::test]
async fn anchored_send_with_simulator() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice, Uuid::new_v4()]);
    let chain = Arc::new(CountingChain::default());
    let s = session(db.clone(), alice, chain.clone(), Some(FakeWallet::new(ALICE_WALLET, "10.0")));
    s.connection().connect().await.unwrap();

    let message = s.send(conv, "hello").await.unwrap();

    assert_eq!(chain.submits(), 1);
    let hash = message.chain_hash.clone().unwrap();
    assert_eq!(hash.len(), 66);
    assert!(message.chain_verified);
    assert_eq!(message.anchor_status, AnchorStatus::Anchored);
    let gas = message.gas_used.unwrap();
    assert!((21_000..71_000).contains(&gas), "gas {gas} out of range");
    assert!(message.fee_native.is_some());

    let stored = db.get_message(&message.id.to_string()).unwrap().unwrap();
    assert_eq!(stored.chain_hash.as_deref(), Some(hash.as_str()));
    assert!(stored.chain_verified);
    assert_eq!(stored.content, "hello");
}

#[tokio::test]
async fn failing_chain_never_blocks_delivery() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let chain = Arc::new(FailingChain::default());
    let s = session(db.clone(), alice, chain.clone(), Some(FakeWallet::new(ALICE_WALLET, "10.0")));
    s.connection().connect().await.unwrap();

    let message = s.send(conv, "hi").await.unwrap();

    assert_eq!(chain.submits.load(Ordering::SeqCst), 1);
    assert!(!message.chain_verified);
    assert_eq!(message.anchor_status, AnchorStatus::Fingerprint);
    assert!(message.chain_hash.is_some());
    assert!(message.gas_used.is_none());

    let rows = db.get_messages(&conv.to_string(), 50, None).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].chain_verified);
}

#[tokio::test]
async fn disconnected_wallet_never_submits() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let chain = Arc::new(CountingChain::default());
    let s = session(db.clone(), alice, chain.clone(), Some(FakeWallet::new(ALICE_WALLET, "10.0")));

    let message = s.send(conv, "hi").await.unwrap();

    assert_eq!(chain.submits(), 0);
    // Wallet installed but not connected: still gets a provisional fingerprint
    assert_eq!(message.anchor_status, AnchorStatus::Fingerprint);
    assert_eq!(
        message.chain_hash.as_deref(),
        Some(fingerprint("hi", alice, message.created_at.timestamp_millis()).as_str())
    );
    assert!(!message.chain_verified);
}

#[tokio::test]
async fn receipt_gas_beyond_store_range_fails_the_send() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let s = session(db.clone(), alice, Arc::new(OversizedGasChain), Some(FakeWallet::new(ALICE_WALLET, "10.0")));
    s.connection().connect().await.unwrap();

    let err = s.send(conv, "hi").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistFailed);
    assert!(err.is_retryable());
    assert!(db.get_messages(&conv.to_string(), 50, None).unwrap().is_empty());
}

#[tokio::test]
async fn zero_balance_never_submits() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let chain = Arc::new(CountingChain::default());
    let s = session(db.clone(), alice, chain.clone(), Some(FakeWallet::new(ALICE_WALLET, "0")));
    s.connection().connect().await.unwrap();

    let message = s.send(conv, "hi").await.unwrap();

    assert_eq!(chain.submits(), 0);
    // Connected wallet without funds: provisional fingerprint for later reconciliation
    assert_eq!(message.anchor_status, AnchorStatus::Fingerprint);
    assert!(!message.chain_verified);
}

#[tokio::test]
async fn no_wallet_sends_unanchored() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let chain = Arc::new(CountingChain::default());
    let s = session(db, alice, chain.clone(), None);

    let message = s.send(conv, "plain").await.unwrap();

    assert_eq!(chain.submits(), 0);
    assert_eq!(message.anchor_status, AnchorStatus::Unanchored);
    assert!(message.chain_hash.is_none());
}

#[tokio::test]
async fn blank_content_is_rejected_before_io() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let chain = Arc::new(CountingChain::default());
    let s = session(db.clone(), alice, chain.clone(), Some(FakeWallet::new(ALICE_WALLET, "1.0")));
    s.connection().connect().await.unwrap();

    let err = s.send(conv, "  \n\t ").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(chain.submits(), 0);
    assert!(db.get_messages(&conv.to_string(), 50, None).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_or_foreign_conversation_is_rejected() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let foreign = seed_group(&db, &[Uuid::new_v4()]);
    let s = session(db, alice, Arc::new(CountingChain::default()), None);

    assert_eq!(s.send(Uuid::new_v4(), "hi").await.unwrap_err().kind(), ErrorKind::InvalidInput);
    assert_eq!(s.send(foreign, "hi").await.unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn direct_message_is_anchored_to_peer_wallet() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    db.upsert_profile(&bob.to_string(), "bob", None, Some(BOB_WALLET)).unwrap();

    let chain = Arc::new(CountingChain::default());
    let s = session(db.clone(), alice, chain.clone(), Some(FakeWallet::new(ALICE_WALLET, "1.0")));
    s.connection().connect().await.unwrap();

    let with_bob = s.get_or_create_direct(bob).await.unwrap();
    let with_carol = s.get_or_create_direct(carol).await.unwrap();
    s.send(with_bob, "to bob").await.unwrap();
    s.send(with_carol, "to carol").await.unwrap();

    let recipients = chain.recipients.lock().unwrap().clone();
    assert_eq!(recipients, vec![BOB_WALLET.to_string(), ZERO_ADDRESS.to_string()]);
}

#[tokio::test]
async fn store_failure_is_retryable_persist_error() {
    let (dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);

    let raw = rusqlite::Connection::open(dir.path().join("chat.db")).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER reject_messages BEFORE INSERT ON messages
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .unwrap();

    let s = session(db, alice, Arc::new(CountingChain::default()), None);
    let err = s.send(conv, "hi").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistFailed);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn balance_is_refreshed_after_anchoring() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let wallet = FakeWallet::new(ALICE_WALLET, "1.0");
    let s = session(db, alice, Arc::new(CountingChain::default()), Some(wallet.clone()));
    s.connection().connect().await.unwrap();

    wallet.with(|st| st.balance = Some("0.99958".into()));
    s.send(conv, "hi").await.unwrap();

    for _ in 0..50 {
        if s.connection().native_balance() == "0.99958" {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("balance was not refreshed");
}

#[tokio::test]
async fn own_messages_keep_persistence_order() {
    let (_dir, db) = open_db();
    let alice = Uuid::new_v4();
    let conv = seed_group(&db, &[alice]);
    let s = session(db, alice, Arc::new(CountingChain::default()), None);

    for i in 0..5 {
        s.send(conv, &format!("m{i}")).await.unwrap();
    }

    let history = s.history(conv, None, None).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|(_, m)| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert!(history.windows(2).all(|w| w[0].0 < w[1].0));

    let older = s.history(conv, Some(2), Some(history[2].0)).await.unwrap();
    let contents: Vec<&str> = older.iter().map(|(_, m)| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1"]);
}
