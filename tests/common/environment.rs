//! An [`Environment`] that records every call made to it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use grandpa_rs::{
    environment::{Environment, EnvironmentError},
    justification::Justification,
    types::{
        data_types::{AuthoritySetId, RoundNumber},
        signed_messages::SignedMessage,
    },
    voter::VoterHandle,
    voting_round::state::MovableRoundState,
};

/// Records the votes cast, the justifications finalized, and the states completed. Clones share the
/// same records, so a test can keep a clone after handing one to a voter.
///
/// Votes can also be forwarded to other voters, playing the part of the network.
#[derive(Clone, Default)]
pub(crate) struct RecordingEnvironment {
    pub(crate) voted: Arc<Mutex<Vec<(RoundNumber, AuthoritySetId, SignedMessage)>>>,
    pub(crate) finalized: Arc<Mutex<Vec<(AuthoritySetId, Justification)>>>,
    pub(crate) completed: Arc<Mutex<Vec<MovableRoundState>>>,
    refuse_finalize: Arc<AtomicBool>,
    peers: Arc<Mutex<Vec<VoterHandle>>>,
}

impl RecordingEnvironment {
    pub(crate) fn new() -> RecordingEnvironment {
        RecordingEnvironment::default()
    }

    /// Make every following call to `finalize` fail (or succeed again).
    pub(crate) fn set_refuse_finalize(&self, refuse: bool) {
        self.refuse_finalize.store(refuse, Ordering::SeqCst);
    }

    /// Forward every vote cast from now on to `peer`.
    pub(crate) fn add_peer(&self, peer: VoterHandle) {
        self.peers.lock().unwrap().push(peer);
    }

    pub(crate) fn voted(&self) -> Vec<SignedMessage> {
        self.voted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, vote)| vote.clone())
            .collect()
    }

    pub(crate) fn finalized(&self) -> Vec<Justification> {
        self.finalized
            .lock()
            .unwrap()
            .iter()
            .map(|(_, justification)| justification.clone())
            .collect()
    }

    pub(crate) fn completed(&self) -> Vec<MovableRoundState> {
        self.completed.lock().unwrap().clone()
    }
}

impl Environment for RecordingEnvironment {
    fn on_voted(&mut self, round: RoundNumber, set_id: AuthoritySetId, vote: &SignedMessage) {
        self.voted.lock().unwrap().push((round, set_id, vote.clone()));
        for peer in self.peers.lock().unwrap().iter() {
            peer.submit_vote(set_id, round, vote.clone());
        }
    }

    fn finalize(
        &mut self,
        set_id: AuthoritySetId,
        justification: &Justification,
    ) -> Result<(), EnvironmentError> {
        if self.refuse_finalize.load(Ordering::SeqCst) {
            return Err(EnvironmentError {
                reason: String::from("block store unavailable"),
            });
        }
        self.finalized
            .lock()
            .unwrap()
            .push((set_id, justification.clone()));
        Ok(())
    }

    fn on_completed(&mut self, state: &MovableRoundState) {
        self.completed.lock().unwrap().push(state.clone());
    }
}
