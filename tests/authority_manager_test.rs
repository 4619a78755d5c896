//! Integration tests of the authority manager: digests changing the authority set on one fork only,
//! pruning on finalization, and persistence through a `KVStore`.

mod common;

use std::sync::mpsc;

use log::LevelFilter;

use grandpa_rs::{
    authority_manager::{
        digests::{ConsensusDigest, GRANDPA_ENGINE_ID},
        AuthorityContext, AuthorityManager, AuthorityManagerError,
    },
    events::Event,
    types::{
        authority_set::Authority,
        data_types::{AuthorityId, AuthoritySetId, Weight},
    },
};

use common::{
    chain::{MockChain, GENESIS},
    logging::setup_logger,
    mem_db::MemDB,
};

fn authority(byte: u8, weight: u64) -> Authority {
    Authority::new(AuthorityId::new([byte; 32]), Weight::new(weight))
}

fn genesis_authorities() -> Vec<Authority> {
    vec![authority(1, 5), authority(2, 10), authority(3, 15)]
}

// GEN - A1 - A2 - ... - A10
//         \
//          X2 - X3 - ... - X6
fn chain() -> MockChain {
    let chain = MockChain::new();
    chain.push(
        GENESIS,
        &["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8", "A9", "A10"],
    );
    chain.push("A1", &["X2", "X3", "X4", "X5", "X6"]);
    chain
}

fn prepare(db: &MemDB, chain: &MockChain) -> AuthorityManager<MemDB, MockChain> {
    AuthorityManager::prepare(
        db.clone(),
        chain.clone(),
        chain.block(GENESIS),
        genesis_authorities(),
        None,
    )
    .unwrap()
}

fn set_id_at(am: &AuthorityManager<MemDB, MockChain>, chain: &MockChain, name: &str) -> AuthoritySetId {
    am.authorities(&chain.block(name), AuthorityContext::Current)
        .unwrap()
        .id()
}

#[test]
fn genesis_authorities_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);

    let set = am
        .authorities(&chain.block(GENESIS), AuthorityContext::Current)
        .unwrap();
    assert_eq!(set.id(), AuthoritySetId::new(0));
    assert_eq!(set.total_weight(), Weight::new(30));
    assert_eq!(set.threshold(), Weight::new(21));
    assert_eq!(set_id_at(&am, &chain, "A10"), AuthoritySetId::new(0));
    assert_eq!(set_id_at(&am, &chain, "X6"), AuthoritySetId::new(0));
    assert_eq!(am.root(), chain.block(GENESIS));
}

#[test]
fn scheduled_change_activates_after_delay_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::ScheduledChange {
            authorities: vec![authority(4, 1), authority(5, 1)],
            delay: 3,
        },
    )
    .unwrap();

    assert_eq!(set_id_at(&am, &chain, "A2"), AuthoritySetId::new(0));
    assert_eq!(set_id_at(&am, &chain, "A4"), AuthoritySetId::new(0));
    assert_eq!(set_id_at(&am, &chain, "A5"), AuthoritySetId::new(1));
    assert_eq!(set_id_at(&am, &chain, "A10"), AuthoritySetId::new(1));
    assert_eq!(
        am.authorities(&chain.block("A4"), AuthorityContext::Next)
            .unwrap()
            .id(),
        AuthoritySetId::new(1)
    );

    let new_set = am
        .authorities(&chain.block("A5"), AuthorityContext::Current)
        .unwrap();
    assert_eq!(new_set.total_weight(), Weight::new(2));
    assert!(new_set.contains(&AuthorityId::new([4; 32])));

    // The fork that does not contain A2 keeps the genesis set.
    assert_eq!(set_id_at(&am, &chain, "X5"), AuthoritySetId::new(0));
    assert_eq!(set_id_at(&am, &chain, "X6"), AuthoritySetId::new(0));
}

#[test]
fn forced_change_overrides_scheduled_change_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);
    let target = chain.block("A2");

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &target,
        &ConsensusDigest::ScheduledChange {
            authorities: vec![authority(4, 1)],
            delay: 5,
        },
    )
    .unwrap();
    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &target,
        &ConsensusDigest::ForcedChange {
            authorities: vec![authority(6, 7)],
            delay: 1,
        },
    )
    .unwrap();
    // A scheduled change arriving after a forced change is discarded.
    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &target,
        &ConsensusDigest::ScheduledChange {
            authorities: vec![authority(8, 1)],
            delay: 2,
        },
    )
    .unwrap();

    assert_eq!(set_id_at(&am, &chain, "A2"), AuthoritySetId::new(0));
    for name in ["A3", "A4", "A7", "A10"] {
        let set = am
            .authorities(&chain.block(name), AuthorityContext::Current)
            .unwrap();
        assert_eq!(set.id(), AuthoritySetId::new(1));
        assert_eq!(set.total_weight(), Weight::new(7));
        assert!(set.contains(&AuthorityId::new([6; 32])));
    }
}

#[test]
fn finalize_prunes_conflicting_forks_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);

    am.on_finalize(&chain.block("A3")).unwrap();
    assert_eq!(am.root(), chain.block("A3"));

    assert!(am.authorities(&chain.block("A5"), AuthorityContext::Current).is_ok());
    assert!(matches!(
        am.authorities(&chain.block("X3"), AuthorityContext::Current),
        Err(AuthorityManagerError::UnknownBlock { .. })
    ));
    assert!(matches!(
        am.authorities(&chain.block("A1"), AuthorityContext::Current),
        Err(AuthorityManagerError::UnknownBlock { .. })
    ));
    assert!(matches!(
        am.on_consensus(
            GRANDPA_ENGINE_ID,
            &chain.block("X4"),
            &ConsensusDigest::Pause { delay: 0 }
        ),
        Err(AuthorityManagerError::UnknownBlock { .. })
    ));

    // Finalizing the root or one of its ancestors changes nothing.
    am.on_finalize(&chain.block("A3")).unwrap();
    am.on_finalize(&chain.block("A2")).unwrap();
    assert_eq!(am.root(), chain.block("A3"));
}

#[test]
fn unknown_target_block_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);
    chain.push("A10", &["A11"]);
    let unknown = {
        let other = MockChain::new();
        other.push(GENESIS, &["Z1"]);
        other.block("Z1")
    };

    assert!(matches!(
        am.on_consensus(
            GRANDPA_ENGINE_ID,
            &unknown,
            &ConsensusDigest::Pause { delay: 0 }
        ),
        Err(AuthorityManagerError::UnknownBlock { block }) if block == unknown
    ));
    // Blocks imported after the manager was created are known.
    assert_eq!(set_id_at(&am, &chain, "A11"), AuthoritySetId::new(0));
}

#[test]
fn persistence_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let db = MemDB::new();
    let am = prepare(&db, &chain);

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::ScheduledChange {
            authorities: vec![authority(4, 1), authority(5, 1)],
            delay: 3,
        },
    )
    .unwrap();

    // Digests are only persisted once a block is finalized.
    let reloaded = prepare(&db, &chain);
    assert_eq!(set_id_at(&reloaded, &chain, "A5"), AuthoritySetId::new(0));

    am.on_finalize(&chain.block("A3")).unwrap();
    let reloaded = AuthorityManager::prepare(
        db.clone(),
        chain.clone(),
        chain.block(GENESIS),
        vec![authority(9, 1)],
        None,
    )
    .unwrap();
    assert_eq!(reloaded.root(), chain.block("A3"));
    assert_eq!(set_id_at(&reloaded, &chain, "A4"), AuthoritySetId::new(0));
    assert_eq!(
        reloaded
            .authorities(&chain.block("A4"), AuthorityContext::Current)
            .unwrap()
            .total_weight(),
        Weight::new(30)
    );
    assert_eq!(set_id_at(&reloaded, &chain, "A5"), AuthoritySetId::new(1));
}

#[test]
fn storage_failure_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let db = MemDB::new();
    let am = prepare(&db, &chain);

    db.set_fail_writes(true);
    assert!(matches!(
        am.on_finalize(&chain.block("A3")),
        Err(AuthorityManagerError::KVWriteError(_))
    ));
    // The in-memory tree is unchanged.
    assert_eq!(am.root(), chain.block(GENESIS));
    assert!(am.authorities(&chain.block("X3"), AuthorityContext::Current).is_ok());

    db.set_fail_writes(false);
    am.on_finalize(&chain.block("A3")).unwrap();
    assert_eq!(am.root(), chain.block("A3"));
}

#[test]
fn pause_and_resume_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::Pause { delay: 1 },
    )
    .unwrap();
    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A5"),
        &ConsensusDigest::Resume { delay: 1 },
    )
    .unwrap();

    let weight_at = |name: &str| {
        am.authorities(&chain.block(name), AuthorityContext::Current)
            .unwrap()
            .total_weight()
    };
    assert_eq!(weight_at("A2"), Weight::new(30));
    assert_eq!(weight_at("A3"), Weight::zero());
    assert_eq!(weight_at("A5"), Weight::zero());
    assert_eq!(weight_at("A6"), Weight::new(30));
    assert_eq!(weight_at("X4"), Weight::new(30));

    let paused = am
        .authorities(&chain.block("A4"), AuthorityContext::Current)
        .unwrap();
    assert_eq!(paused.id(), AuthoritySetId::new(0));
    assert_eq!(paused.len(), 3);
    assert_eq!(paused.threshold(), Weight::new(1));
}

#[test]
fn on_disabled_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::OnDisabled { authority_index: 1 },
    )
    .unwrap();

    let disabled = am
        .authorities(&chain.block("A4"), AuthorityContext::Current)
        .unwrap();
    assert_eq!(disabled.id(), AuthoritySetId::new(0));
    assert_eq!(disabled.weight(&AuthorityId::new([2; 32])), Some(Weight::zero()));
    assert_eq!(disabled.total_weight(), Weight::new(20));
    assert_eq!(
        am.authorities(&chain.block("A1"), AuthorityContext::Current)
            .unwrap()
            .total_weight(),
        Weight::new(30)
    );

    assert!(matches!(
        am.on_consensus(
            GRANDPA_ENGINE_ID,
            &chain.block("A3"),
            &ConsensusDigest::OnDisabled { authority_index: 3 }
        ),
        Err(AuthorityManagerError::InvalidAuthorityIndex { index: 3 })
    ));
}

#[test]
fn out_of_order_digests_reach_existing_nodes_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);
    let weight_at = |name: &str| {
        am.authorities(&chain.block(name), AuthorityContext::Current)
            .unwrap()
            .total_weight()
    };

    // A6 is imported, and gets a node of its own, before the digests of its ancestors arrive.
    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A6"),
        &ConsensusDigest::Resume { delay: 0 },
    )
    .unwrap();
    assert_eq!(weight_at("A7"), Weight::new(30));

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::OnDisabled { authority_index: 1 },
    )
    .unwrap();
    let at_a7 = am
        .authorities(&chain.block("A7"), AuthorityContext::Current)
        .unwrap();
    assert_eq!(at_a7.weight(&AuthorityId::new([2; 32])), Some(Weight::zero()));
    assert_eq!(at_a7.total_weight(), Weight::new(20));

    // A pause below A6 does not undo the resume carried by A6 itself.
    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A1"),
        &ConsensusDigest::Pause { delay: 0 },
    )
    .unwrap();
    assert_eq!(weight_at("A3"), Weight::zero());
    assert_eq!(weight_at("A7"), Weight::new(20));

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::ScheduledChange {
            authorities: vec![authority(4, 1), authority(5, 1)],
            delay: 2,
        },
    )
    .unwrap();
    assert_eq!(set_id_at(&am, &chain, "A3"), AuthoritySetId::new(0));
    assert_eq!(set_id_at(&am, &chain, "A6"), AuthoritySetId::new(1));
    assert_eq!(set_id_at(&am, &chain, "A7"), AuthoritySetId::new(1));
    assert_eq!(set_id_at(&am, &chain, "X3"), AuthoritySetId::new(0));
}

#[test]
fn foreign_engine_digest_is_ignored_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let am = prepare(&MemDB::new(), &chain);

    am.on_consensus(
        *b"BABE",
        &chain.block("A2"),
        &ConsensusDigest::ForcedChange {
            authorities: vec![authority(4, 1)],
            delay: 0,
        },
    )
    .unwrap();
    assert_eq!(set_id_at(&am, &chain, "A2"), AuthoritySetId::new(0));
    assert_eq!(set_id_at(&am, &chain, "A10"), AuthoritySetId::new(0));
}

#[test]
fn events_test() {
    setup_logger(LevelFilter::Debug);
    let chain = chain();
    let (publisher, subscriber) = mpsc::channel();
    let am = AuthorityManager::prepare(
        MemDB::new(),
        chain.clone(),
        chain.block(GENESIS),
        genesis_authorities(),
        Some(publisher),
    )
    .unwrap();

    am.on_consensus(
        GRANDPA_ENGINE_ID,
        &chain.block("A2"),
        &ConsensusDigest::ForcedChange {
            authorities: vec![authority(4, 1)],
            delay: 0,
        },
    )
    .unwrap();
    match subscriber.try_recv() {
        Ok(Event::ScheduleChange(event)) => {
            assert_eq!(event.target_block, chain.block("A2"));
            assert_eq!(event.digest.name(), "ForcedChange");
        }
        _ => panic!("expected a ScheduleChange event"),
    }

    am.on_finalize(&chain.block("A3")).unwrap();
    match subscriber.try_recv() {
        Ok(Event::FinalizeSchedule(event)) => {
            assert_eq!(event.root, chain.block("A3"));
            assert_eq!(event.set_id, AuthoritySetId::new(1));
        }
        _ => panic!("expected a FinalizeSchedule event"),
    }
    assert!(subscriber.try_recv().is_err());
}
