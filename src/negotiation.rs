//! Per-peer offer/answer/candidate state machines for mesh negotiation.
//!
//! The relay forwards payloads without looking inside them; correctness
//! of the mesh depends on each pair of participants running this
//! protocol against the message ordering the relay guarantees. The
//! machines here are pure: session descriptions and candidates are
//! opaque JSON produced by the media layer, and all I/O is left to the
//! embedding client.

use std::collections::HashMap;

use serde_json::{Value, json};
use thiserror::Error;

use crate::relay::ConnectionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// A candidate arrived before any session description was applied.
    /// Out-of-order delivery like this is not buffered; the candidate
    /// is rejected and the peer's later candidates still apply.
    #[error("candidate received before a session description for this peer")]
    CandidateBeforeDescription,

    #[error("cannot {op} while {state:?}")]
    InvalidTransition {
        op: &'static str,
        state: SessionState,
    },
}

/// Which side of the pair this session is.
///
/// The side that receives the `user-joined` notification initiates; the
/// side that joined the room responds to the inbound offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    OfferCreated,
    OfferSent,
    AwaitingAnswer,
    OfferReceived,
    AnswerCreated,
    AnswerSent,
    Connected,
}

/// Negotiation context for one remote peer.
#[derive(Debug)]
pub struct PeerSession {
    peer: ConnectionId,
    role: SessionRole,
    state: SessionState,
    candidates_applied: usize,
}

impl PeerSession {
    /// New initiator context, created on a `user-joined` notification.
    pub fn initiate(peer: ConnectionId) -> Self {
        Self {
            peer,
            role: SessionRole::Initiator,
            state: SessionState::Idle,
            candidates_applied: 0,
        }
    }

    /// New responder context, created when an offer arrives from a
    /// previously-unknown peer. The offer is applied immediately.
    pub fn accept(peer: ConnectionId) -> Self {
        Self {
            peer,
            role: SessionRole::Responder,
            state: SessionState::OfferReceived,
            candidates_applied: 0,
        }
    }

    pub fn peer(&self) -> ConnectionId {
        self.peer
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn candidates_applied(&self) -> usize {
        self.candidates_applied
    }

    /// The local offer has been generated and set.
    pub fn offer_created(&mut self) -> Result<(), NegotiationError> {
        self.transition("create offer", SessionState::Idle, SessionState::OfferCreated)
    }

    /// The offer has been handed to the router.
    pub fn offer_sent(&mut self) -> Result<(), NegotiationError> {
        self.transition(
            "send offer",
            SessionState::OfferCreated,
            SessionState::OfferSent,
        )
    }

    /// Nothing further to do locally until the answer arrives.
    pub fn awaiting_answer(&mut self) -> Result<(), NegotiationError> {
        self.transition(
            "await answer",
            SessionState::OfferSent,
            SessionState::AwaitingAnswer,
        )
    }

    /// The remote answer has been applied; the pair is negotiated.
    pub fn apply_answer(&mut self) -> Result<(), NegotiationError> {
        match self.state {
            SessionState::OfferSent | SessionState::AwaitingAnswer => {
                self.state = SessionState::Connected;
                Ok(())
            }
            state => Err(NegotiationError::InvalidTransition {
                op: "apply answer",
                state,
            }),
        }
    }

    /// The local answer has been generated and set.
    pub fn answer_created(&mut self) -> Result<(), NegotiationError> {
        self.transition(
            "create answer",
            SessionState::OfferReceived,
            SessionState::AnswerCreated,
        )
    }

    /// The answer has been handed to the router.
    pub fn answer_sent(&mut self) -> Result<(), NegotiationError> {
        self.transition(
            "send answer",
            SessionState::AnswerCreated,
            SessionState::AnswerSent,
        )
    }

    /// The transport layer reports the direct connection is up. For the
    /// initiator this already happened when the answer was applied, so
    /// a repeat is a no-op.
    pub fn established(&mut self) -> Result<(), NegotiationError> {
        match self.state {
            SessionState::AnswerSent | SessionState::Connected => {
                self.state = SessionState::Connected;
                Ok(())
            }
            state => Err(NegotiationError::InvalidTransition {
                op: "establish",
                state,
            }),
        }
    }

    /// Applies a remote candidate. Legal at any point after a session
    /// description exists, including after `Connected` (late candidates
    /// keep trickling in). Never changes state.
    pub fn apply_candidate(&mut self) -> Result<(), NegotiationError> {
        if self.state == SessionState::Idle {
            return Err(NegotiationError::CandidateBeforeDescription);
        }
        self.candidates_applied += 1;
        Ok(())
    }

    fn transition(
        &mut self,
        op: &'static str,
        from: SessionState,
        to: SessionState,
    ) -> Result<(), NegotiationError> {
        if self.state != from {
            return Err(NegotiationError::InvalidTransition {
                op,
                state: self.state,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// What an inbound signal did to the session table, and what the client
/// has to do next.
#[derive(Debug, PartialEq)]
pub enum SignalDisposition {
    /// A new responder context was created and the offer applied; the
    /// client must generate an answer and pass it to `answer_ready`.
    AnswerRequired { offer: Value },
    /// The answer completed an initiator session; the pair is connected.
    AnswerApplied,
    CandidateApplied,
    /// Payload made no sense for the session's current state (for
    /// example a repeat offer on an existing context); dropped.
    Ignored,
}

/// All negotiation contexts of one participant, keyed by peer id.
///
/// Context creation follows the relay's notifications: `user-joined`
/// makes an initiator, an offer from an unknown sender makes a
/// responder. An id that already has a context never gets a fresh one,
/// whichever message arrives (duplicate joins and racing offers reuse
/// the existing session).
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<ConnectionId, PeerSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a `user-joined` notification: creates an initiator
    /// session and returns the signal payload to send to the new peer
    /// (`offer` is the locally generated session description). Returns
    /// None if a context for this peer already exists.
    pub fn on_peer_joined(&mut self, peer: ConnectionId, offer: Value) -> Option<Value> {
        if self.sessions.contains_key(&peer) {
            return None;
        }

        let mut session = PeerSession::initiate(peer);
        // The three steps are synchronous here: the payload below is the
        // offer in flight.
        session.offer_created().ok()?;
        session.offer_sent().ok()?;
        session.awaiting_answer().ok()?;
        self.sessions.insert(peer, session);

        Some(json!({ "sdp": offer }))
    }

    /// Handles a forwarded `signal` payload from `from`.
    pub fn on_signal(
        &mut self,
        from: ConnectionId,
        data: Value,
    ) -> Result<SignalDisposition, NegotiationError> {
        match self.sessions.get_mut(&from) {
            None => {
                // Unknown sender: the first signal must carry an offer.
                // A lone candidate has nothing to attach to.
                let Some(offer) = data.get("sdp") else {
                    return Err(NegotiationError::CandidateBeforeDescription);
                };
                self.sessions.insert(from, PeerSession::accept(from));
                Ok(SignalDisposition::AnswerRequired {
                    offer: offer.clone(),
                })
            }
            Some(session) => {
                if data.get("candidate").is_some() {
                    session.apply_candidate()?;
                    return Ok(SignalDisposition::CandidateApplied);
                }
                if data.get("sdp").is_some() {
                    if session.role() == SessionRole::Initiator {
                        session.apply_answer()?;
                        return Ok(SignalDisposition::AnswerApplied);
                    }
                    // Repeat offer on an existing responder context: the
                    // context is reused, the duplicate is dropped.
                    return Ok(SignalDisposition::Ignored);
                }
                Ok(SignalDisposition::Ignored)
            }
        }
    }

    /// The answer for a responder session has been generated; returns
    /// the signal payload to send back to the offering peer.
    pub fn answer_ready(
        &mut self,
        peer: ConnectionId,
        answer: Value,
    ) -> Result<Value, NegotiationError> {
        let session =
            self.sessions
                .get_mut(&peer)
                .ok_or(NegotiationError::InvalidTransition {
                    op: "send answer",
                    state: SessionState::Idle,
                })?;
        session.answer_created()?;
        session.answer_sent()?;
        Ok(json!({ "sdp": answer }))
    }

    /// A locally discovered candidate for `peer`; returns the signal
    /// payload to send, or None if no context exists for that peer.
    /// Candidates may be emitted at any time after context creation.
    pub fn candidate_discovered(&mut self, peer: ConnectionId, candidate: Value) -> Option<Value> {
        if !self.sessions.contains_key(&peer) {
            return None;
        }
        Some(json!({ "candidate": candidate }))
    }

    /// The transport layer reports the pair connection is up.
    pub fn established(&mut self, peer: ConnectionId) -> Result<(), NegotiationError> {
        match self.sessions.get_mut(&peer) {
            Some(session) => session.established(),
            None => Err(NegotiationError::InvalidTransition {
                op: "establish",
                state: SessionState::Idle,
            }),
        }
    }

    /// Handles a `user-left` notification: the peer's context is
    /// dropped, abandoning any in-flight negotiation.
    pub fn on_peer_left(&mut self, peer: ConnectionId) {
        self.sessions.remove(&peer);
    }

    pub fn state_of(&self, peer: ConnectionId) -> Option<SessionState> {
        self.sessions.get(&peer).map(|s| s.state())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn offer() -> Value {
        json!({"type": "offer", "sdp": "v=0 offer"})
    }

    fn answer() -> Value {
        json!({"type": "answer", "sdp": "v=0 answer"})
    }

    fn candidate() -> Value {
        json!({"candidate": "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host"})
    }

    #[test]
    fn initiator_walks_offer_states_in_order() {
        let mut session = PeerSession::initiate(conn("conn_0000000b"));
        assert_eq!(session.state(), SessionState::Idle);

        session.offer_created().unwrap();
        assert_eq!(session.state(), SessionState::OfferCreated);
        session.offer_sent().unwrap();
        assert_eq!(session.state(), SessionState::OfferSent);
        session.awaiting_answer().unwrap();
        assert_eq!(session.state(), SessionState::AwaitingAnswer);
        session.apply_answer().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn responder_walks_answer_states_in_order() {
        let mut session = PeerSession::accept(conn("conn_0000000a"));
        assert_eq!(session.state(), SessionState::OfferReceived);
        assert_eq!(session.role(), SessionRole::Responder);

        session.answer_created().unwrap();
        session.answer_sent().unwrap();
        assert_eq!(session.state(), SessionState::AnswerSent);
        session.established().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn answer_before_offer_sent_is_rejected() {
        let mut session = PeerSession::initiate(conn("conn_0000000b"));
        let err = session.apply_answer().unwrap_err();
        assert_eq!(
            err,
            NegotiationError::InvalidTransition {
                op: "apply answer",
                state: SessionState::Idle,
            }
        );
    }

    #[test]
    fn candidate_at_idle_is_rejected_but_later_ones_apply() {
        let mut session = PeerSession::initiate(conn("conn_0000000b"));
        assert_eq!(
            session.apply_candidate().unwrap_err(),
            NegotiationError::CandidateBeforeDescription
        );

        session.offer_created().unwrap();
        session.apply_candidate().unwrap();
        assert_eq!(session.candidates_applied(), 1);
    }

    #[test]
    fn late_candidates_after_connected_still_apply() {
        let mut session = PeerSession::accept(conn("conn_0000000a"));
        session.answer_created().unwrap();
        session.answer_sent().unwrap();
        session.established().unwrap();

        session.apply_candidate().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.candidates_applied(), 1);
    }

    #[test]
    fn peer_joined_creates_initiator_and_emits_offer_payload() {
        let mut table = SessionTable::new();
        let b = conn("conn_0000000b");

        let payload = table.on_peer_joined(b, offer()).unwrap();
        assert_eq!(payload["sdp"]["type"], "offer");
        assert_eq!(table.state_of(b), Some(SessionState::AwaitingAnswer));
    }

    #[test]
    fn peer_joined_never_replaces_an_existing_context() {
        let mut table = SessionTable::new();
        let b = conn("conn_0000000b");

        table.on_peer_joined(b, offer()).unwrap();
        assert!(table.on_peer_joined(b, offer()).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn offer_from_unknown_sender_creates_responder_context() {
        let mut table = SessionTable::new();
        let a = conn("conn_0000000a");

        let disposition = table.on_signal(a, json!({"sdp": offer()})).unwrap();
        assert!(matches!(
            disposition,
            SignalDisposition::AnswerRequired { .. }
        ));
        assert_eq!(table.state_of(a), Some(SessionState::OfferReceived));

        let payload = table.answer_ready(a, answer()).unwrap();
        assert_eq!(payload["sdp"]["type"], "answer");
        assert_eq!(table.state_of(a), Some(SessionState::AnswerSent));
    }

    #[test]
    fn repeat_offer_reuses_existing_context() {
        let mut table = SessionTable::new();
        let a = conn("conn_0000000a");

        table.on_signal(a, json!({"sdp": offer()})).unwrap();
        // A racing duplicate offer must not reset the context.
        let disposition = table.on_signal(a, json!({"sdp": offer()})).unwrap();
        assert_eq!(disposition, SignalDisposition::Ignored);
        assert_eq!(table.state_of(a), Some(SessionState::OfferReceived));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lone_candidate_from_unknown_sender_is_rejected() {
        let mut table = SessionTable::new();
        let a = conn("conn_0000000a");

        let err = table.on_signal(a, candidate()).unwrap_err();
        assert_eq!(err, NegotiationError::CandidateBeforeDescription);
        assert!(table.is_empty());
    }

    #[test]
    fn candidate_discovered_requires_a_context() {
        let mut table = SessionTable::new();
        let b = conn("conn_0000000b");

        assert!(table.candidate_discovered(b, candidate()).is_none());
        table.on_peer_joined(b, offer()).unwrap();
        let payload = table.candidate_discovered(b, candidate()).unwrap();
        assert!(payload["candidate"]["candidate"]
            .as_str()
            .unwrap()
            .contains("typ host"));
    }

    #[test]
    fn peer_left_drops_the_context() {
        let mut table = SessionTable::new();
        let b = conn("conn_0000000b");

        table.on_peer_joined(b, offer()).unwrap();
        table.on_peer_left(b);
        assert!(table.state_of(b).is_none());

        // A re-join starts negotiation from scratch.
        assert!(table.on_peer_joined(b, offer()).is_some());
    }

    /// Two participants converge to Connected, shuttling every payload
    /// by hand: the joiner's side (responder) and the notified side
    /// (initiator) in both role assignments.
    #[test]
    fn both_sides_converge_to_connected() {
        for swap in [false, true] {
            let (a, b) = if swap {
                (conn("conn_0000000b"), conn("conn_0000000a"))
            } else {
                (conn("conn_0000000a"), conn("conn_0000000b"))
            };
            let mut table_a = SessionTable::new(); // prior member, initiator
            let mut table_b = SessionTable::new(); // joiner, responder

            // A is told B joined and offers.
            let offer_payload = table_a.on_peer_joined(b, offer()).unwrap();

            // B receives the offer, answers.
            let disposition = table_b.on_signal(a, offer_payload).unwrap();
            assert!(matches!(
                disposition,
                SignalDisposition::AnswerRequired { .. }
            ));
            let answer_payload = table_b.answer_ready(a, answer()).unwrap();

            // Candidates trickle both ways mid-negotiation.
            let cand_a = table_a.candidate_discovered(b, candidate()).unwrap();
            assert_eq!(
                table_b.on_signal(a, cand_a).unwrap(),
                SignalDisposition::CandidateApplied
            );
            let cand_b = table_b.candidate_discovered(a, candidate()).unwrap();

            // A applies the answer and the late candidate.
            assert_eq!(
                table_a.on_signal(b, answer_payload).unwrap(),
                SignalDisposition::AnswerApplied
            );
            assert_eq!(
                table_a.on_signal(b, cand_b).unwrap(),
                SignalDisposition::CandidateApplied
            );

            // B's transport comes up.
            table_b.established(a).unwrap();

            assert_eq!(table_a.state_of(b), Some(SessionState::Connected));
            assert_eq!(table_b.state_of(a), Some(SessionState::Connected));
        }
    }
}
