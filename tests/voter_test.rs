//! End-to-end tests of a voter running on its own threads, with real stage timers.

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::LevelFilter;
use rand_core::OsRng;

use grandpa_rs::{
    authority_manager::{
        digests::{ConsensusDigest, GRANDPA_ENGINE_ID},
        AuthorityContext, AuthorityManagerError,
    },
    config::RoundConfiguration,
    justification::Justification,
    types::{
        authority_set::Authority,
        crypto_primitives::{Keypair, SigningKey},
        data_types::{AuthoritySetId, BlockInfo, RoundNumber, Weight},
        signed_messages::{SignedMessage, Vote},
    },
    voter::{Voter, VoterError, VoterSpec},
};

use common::{
    chain::{MockChain, GENESIS},
    environment::RecordingEnvironment,
    logging::setup_logger,
    mem_db::MemDB,
};

fn configuration(signing_key: &SigningKey, stage_duration: Duration) -> RoundConfiguration {
    RoundConfiguration::builder()
        .keypair(signing_key.clone())
        .stage_duration(stage_duration)
        .log_events(false)
        .build()
}

fn start_voter(
    signing_key: &SigningKey,
    authorities: Vec<Authority>,
    kv_store: MemDB,
    chain: &MockChain,
    env: &RecordingEnvironment,
) -> Voter<MemDB, MockChain> {
    VoterSpec::builder()
        .kv_store(kv_store)
        .chain(chain.clone())
        .environment(env.clone())
        .configuration(configuration(signing_key, Duration::from_millis(20)))
        .genesis(chain.block(GENESIS))
        .genesis_authorities(authorities)
        .build()
        .start()
        .unwrap()
}

fn sign(key: &SigningKey, vote: Vote, round: u64) -> SignedMessage {
    SignedMessage::new(
        &Keypair::new(key.clone()),
        vote,
        RoundNumber::new(round),
        AuthoritySetId::new(0),
    )
}

// Poll `condition` every 10ms until it holds, failing the test after 10 seconds.
fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn single_authority_finalizes_best_chain_test() {
    setup_logger(LevelFilter::Info);
    let mut csprg = OsRng {};
    let signing_key = SigningKey::generate(&mut csprg);
    let me = Keypair::new(signing_key.clone()).id();

    let chain = MockChain::new();
    chain.push(GENESIS, &["A1", "A2", "A3"]);
    let env = RecordingEnvironment::new();
    let finalize_events = Arc::new(AtomicUsize::new(0));

    let voter = VoterSpec::builder()
        .kv_store(MemDB::new())
        .chain(chain.clone())
        .environment(env.clone())
        .configuration(
            RoundConfiguration::builder()
                .keypair(signing_key)
                .stage_duration(Duration::from_millis(10))
                .log_events(true)
                .build(),
        )
        .genesis(chain.block(GENESIS))
        .genesis_authorities(vec![Authority::new(me, Weight::new(1))])
        .on_finalize({
            let finalize_events = finalize_events.clone();
            move |_| {
                finalize_events.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .start()
        .unwrap();

    wait_until(|| voter.authority_manager().root() == chain.block("A3"));
    let justifications = env.finalized();
    assert_eq!(justifications[0].block, chain.block("A3"));
    assert_eq!(justifications[0].items.len(), 1);

    // Blocks imported later are finalized by later rounds.
    chain.push("A3", &["A4", "A5"]);
    wait_until(|| voter.authority_manager().root() == chain.block("A5"));
    wait_until(|| finalize_events.load(Ordering::SeqCst) >= 2);
    assert!(env.completed().len() >= 2);
}

#[test]
fn voter_follows_authority_set_change_test() {
    setup_logger(LevelFilter::Info);
    let mut csprg = OsRng {};
    let signing_key = SigningKey::generate(&mut csprg);
    let me = Keypair::new(signing_key.clone()).id();

    let chain = MockChain::new();
    chain.push(GENESIS, &["A1", "A2", "A3"]);
    let env = RecordingEnvironment::new();

    let voter = VoterSpec::builder()
        .kv_store(MemDB::new())
        .chain(chain.clone())
        .environment(env.clone())
        .configuration(
            RoundConfiguration::builder()
                .keypair(signing_key)
                .stage_duration(Duration::from_millis(50))
                .log_events(false)
                .build(),
        )
        .genesis(chain.block(GENESIS))
        .genesis_authorities(vec![Authority::new(me, Weight::new(1))])
        .build()
        .start()
        .unwrap();

    // The same authority, with a new weight, forms set 1 from block A2 onwards.
    voter
        .authority_manager()
        .on_consensus(
            GRANDPA_ENGINE_ID,
            &chain.block("A1"),
            &ConsensusDigest::ScheduledChange {
                authorities: vec![Authority::new(me, Weight::new(2))],
                delay: 1,
            },
        )
        .unwrap();
    wait_until(|| voter.authority_manager().root() == chain.block("A3"));
    assert_eq!(
        voter
            .authority_manager()
            .authorities(&chain.block("A3"), AuthorityContext::Current)
            .unwrap()
            .id(),
        AuthoritySetId::new(1)
    );

    // Votes after the change are signed by set 1.
    chain.push("A3", &["A4"]);
    wait_until(|| voter.authority_manager().root() == chain.block("A4"));
    wait_until(|| {
        env.voted
            .lock()
            .unwrap()
            .iter()
            .any(|(_, set_id, _)| *set_id == AuthoritySetId::new(1))
    });
}

#[test]
fn two_voters_finalize_together_test() {
    setup_logger(LevelFilter::Info);
    let mut csprg = OsRng {};
    let alice = SigningKey::generate(&mut csprg);
    let bob = SigningKey::generate(&mut csprg);
    // Threshold 2: neither voter finalizes anything without the other's votes.
    let authorities = vec![
        Authority::new(Keypair::new(alice.clone()).id(), Weight::new(1)),
        Authority::new(Keypair::new(bob.clone()).id(), Weight::new(1)),
    ];

    let chain = MockChain::new();
    chain.push(GENESIS, &["A1", "A2", "A3"]);
    let alice_env = RecordingEnvironment::new();
    let bob_env = RecordingEnvironment::new();
    let alice_voter = start_voter(&alice, authorities.clone(), MemDB::new(), &chain, &alice_env);
    let bob_voter = start_voter(&bob, authorities, MemDB::new(), &chain, &bob_env);
    // Votes cast before the peers are connected reach the other voter when they are rebroadcast.
    alice_env.add_peer(bob_voter.handle());
    bob_env.add_peer(alice_voter.handle());

    wait_until(|| alice_voter.authority_manager().root() == chain.block("A3"));
    wait_until(|| bob_voter.authority_manager().root() == chain.block("A3"));
    for env in [&alice_env, &bob_env] {
        let justification = &env.finalized()[0];
        assert_eq!(justification.block, chain.block("A3"));
        assert_eq!(justification.items.len(), 2);
    }

    // The voters keep each other going through the following rounds.
    chain.push("A3", &["A4", "A5"]);
    wait_until(|| alice_voter.authority_manager().root() == chain.block("A5"));
    wait_until(|| bob_voter.authority_manager().root() == chain.block("A5"));
    assert!(alice_voter.stop().is_ok());
    assert!(bob_voter.stop().is_ok());
}

#[test]
fn early_next_round_votes_test() {
    setup_logger(LevelFilter::Info);
    let mut csprg = OsRng {};
    let alice = SigningKey::generate(&mut csprg);
    let bob = SigningKey::generate(&mut csprg);
    let authorities = vec![
        Authority::new(Keypair::new(alice.clone()).id(), Weight::new(1)),
        Authority::new(Keypair::new(bob.clone()).id(), Weight::new(1)),
    ];

    let chain = MockChain::new();
    chain.push(GENESIS, &["A1", "A2", "A3"]);
    let env = RecordingEnvironment::new();
    let voter = start_voter(&alice, authorities, MemDB::new(), &chain, &env);

    // Bob's votes for rounds 1 and 2 all arrive while Alice is still in round 1.
    let handle = voter.handle();
    let a3 = chain.block("A3");
    for round in [1, 2] {
        for vote in [Vote::Prevote(a3), Vote::Precommit(a3)] {
            handle.submit_vote(
                AuthoritySetId::new(0),
                RoundNumber::new(round),
                sign(&bob, vote, round),
            );
        }
    }

    wait_until(|| voter.authority_manager().root() == a3);
    wait_until(|| {
        env.completed()
            .iter()
            .any(|state| state.round_number == RoundNumber::new(2))
    });
    let round_2 = env
        .completed()
        .into_iter()
        .find(|state| state.round_number == RoundNumber::new(2))
        .unwrap();
    assert_eq!(round_2.finalized, Some(a3));
    assert!(voter.is_running());
}

#[test]
fn storage_failure_stops_voter_test() {
    setup_logger(LevelFilter::Info);
    let mut csprg = OsRng {};
    let signing_key = SigningKey::generate(&mut csprg);
    let me = Keypair::new(signing_key.clone()).id();

    let chain = MockChain::new();
    let env = RecordingEnvironment::new();
    let kv_store = MemDB::new();
    let voter = start_voter(
        &signing_key,
        vec![Authority::new(me, Weight::new(1))],
        kv_store.clone(),
        &chain,
        &env,
    );
    assert!(voter.is_running());

    kv_store.set_fail_writes(true);
    chain.push(GENESIS, &["A1"]);
    wait_until(|| !voter.is_running());

    // A1 was handed to the environment, but the authority schedule could not be moved on to it.
    assert_eq!(env.finalized()[0].block, chain.block("A1"));
    assert_eq!(voter.authority_manager().root(), chain.block(GENESIS));
    assert!(matches!(
        voter.stop(),
        Err(VoterError::AuthorityManagerError(
            AuthorityManagerError::KVWriteError(_)
        ))
    ));
}

#[test]
fn submit_justification_test() {
    setup_logger(LevelFilter::Info);
    let mut csprg = OsRng {};
    let alice = SigningKey::generate(&mut csprg);
    let bob = SigningKey::generate(&mut csprg);
    let authorities = vec![
        Authority::new(Keypair::new(alice.clone()).id(), Weight::new(1)),
        Authority::new(Keypair::new(bob.clone()).id(), Weight::new(1)),
    ];

    let chain = MockChain::new();
    chain.push(GENESIS, &["A1", "A2", "A3"]);
    let env = RecordingEnvironment::new();
    // Alice never hears from Bob, so she can only learn of finality from a justification.
    let voter = start_voter(&alice, authorities, MemDB::new(), &chain, &env);

    let a2: BlockInfo = chain.block("A2");
    let justification = Justification {
        round: RoundNumber::new(3),
        block: a2,
        items: vec![
            sign(&alice, Vote::Precommit(a2), 3),
            sign(&bob, Vote::Precommit(chain.block("A3")), 3),
        ],
    };
    // Not signed by set 1, so it is dropped.
    voter
        .handle()
        .submit_justification(AuthoritySetId::new(1), justification.clone());
    voter
        .handle()
        .submit_justification(AuthoritySetId::new(0), justification);

    wait_until(|| voter.authority_manager().root() == a2);
    let finalized = env.finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].round, RoundNumber::new(3));
    assert_eq!(finalized[0].block, a2);

    // Alice goes on voting in round 4.
    wait_until(|| {
        env.voted
            .lock()
            .unwrap()
            .iter()
            .any(|(round, _, _)| *round == RoundNumber::new(4))
    });
}
