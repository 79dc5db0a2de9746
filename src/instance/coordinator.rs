use std::collections::HashMap;
use std::time::Duration;

use crate::membership::Membership;
use crate::message::{Accepted, Body, Message};
use crate::retry::RetryPolicy;
use crate::{Ballot, Ordinal, SlotNum, Value};

/// Rounds occupy the upper half of a ballot.
const MAX_ROUND: u64 = u32::MAX as u64;

#[derive(Debug)]
enum Phase {
    Idle,
    Preparing {
        ballot: Ballot,
        rsvps: HashMap<Ordinal, Option<Accepted>>,
    },
    Accepting {
        ballot: Ballot,
    },
    Done,
}

/// Drives a slot towards a decision on behalf of local proposals.
#[derive(Debug)]
pub(crate) struct Coordinator {
    slot: SlotNum,
    phase: Phase,
    candidate: Option<Value>,
    round: u64,
    highest_seen: Ballot,
    retry: RetryPolicy,
}

impl Coordinator {
    pub fn new(slot: SlotNum, retry: RetryPolicy) -> Self {
        Self {
            slot,
            phase: Phase::Idle,
            candidate: None,
            round: 0,
            highest_seen: 0,
            retry,
        }
    }

    /// Takes note of a ballot seen on the wire.
    pub fn observe(&mut self, ballot: Ballot) {
        self.highest_seen = self.highest_seen.max(ballot);
    }

    /// Hands the coordinator a value to propose.
    ///
    /// Returns `true` if the coordinator was idle and should start a round.
    /// Later candidates are ignored: the first one is the one pursued.
    pub fn propose(&mut self, value: Value) -> bool {
        if self.candidate.is_none() {
            self.candidate = Some(value);
        }

        matches!(self.phase, Phase::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.candidate.is_some() && !matches!(self.phase, Phase::Done)
    }

    /// Starts a new round, returning the invitation to send and the time the
    /// round is given.
    pub fn start_round(&mut self, me: Ordinal) -> (Message, Duration) {
        self.round = (self.round + 1)
            .max((self.highest_seen >> 32) + 1)
            .min(MAX_ROUND);

        let ballot = (self.round << 32) | Ballot::from(me);
        self.highest_seen = self.highest_seen.max(ballot);
        self.phase = Phase::Preparing {
            ballot,
            rsvps: HashMap::new(),
        };

        (
            Message::new(self.slot, me, Body::Invite { ballot }),
            self.retry.next_interval(),
        )
    }

    /// Collects a promise, returning the nomination once a quorum has promised
    /// the current ballot.
    pub fn handle_rsvp(
        &mut self,
        msg: &Message,
        me: Ordinal,
        membership: &Membership,
    ) -> Option<Message> {
        let (ballot, accepted) = match &msg.body {
            Body::Rsvp {
                ballot,
                to,
                accepted,
            } if *to == me => (*ballot, accepted),
            _ => return None,
        };

        if !membership.admits(msg.sender) {
            return None;
        }

        let (current, rsvps) = match &mut self.phase {
            Phase::Preparing { ballot, rsvps } => (*ballot, rsvps),
            _ => return None,
        };

        if ballot != current {
            return None;
        }

        rsvps.insert(msg.sender, accepted.clone());

        if rsvps.len() < membership.quorum() {
            return None;
        }

        let adopted = rsvps
            .values()
            .flatten()
            .max_by_key(|a| a.ballot)
            .map(|a| a.value.clone());

        let value = match adopted.or_else(|| self.candidate.clone()) {
            Some(value) => value,
            None => return None,
        };

        self.phase = Phase::Accepting { ballot: current };

        Some(Message::new(
            self.slot,
            me,
            Body::Nominate {
                ballot: current,
                value,
            },
        ))
    }

    pub fn ballot(&self) -> Option<Ballot> {
        match self.phase {
            Phase::Preparing { ballot, .. } | Phase::Accepting { ballot } => Some(ballot),
            Phase::Idle | Phase::Done => None,
        }
    }

    pub fn finish(&mut self) {
        self.phase = Phase::Done;
        self.retry.reset();
    }
}
