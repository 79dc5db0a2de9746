use std::collections::HashMap;

use crate::membership::Membership;
use crate::message::{Body, Message};
use crate::{Ballot, Ordinal, Value};

/// Counts votes until a quorum agrees.
#[derive(Debug, Default)]
pub(crate) struct Learner {
    /// Each sender's vote with the highest ballot.
    votes: HashMap<Ordinal, (Ballot, Value)>,
    decided: Option<(Ballot, Value)>,
}

impl Learner {
    /// Tallies `msg`, returning the decision the first time a quorum is
    /// reached.
    pub fn handle(&mut self, msg: &Message, membership: &Membership) -> Option<(Ballot, Value)> {
        let (ballot, value) = match &msg.body {
            Body::Vote { ballot, value } => (*ballot, value),
            Body::Invite { .. } | Body::Rsvp { .. } | Body::Nominate { .. } => return None,
        };

        if self.decided.is_some() || !membership.admits(msg.sender) {
            return None;
        }

        match self.votes.get(&msg.sender) {
            Some((b, _)) if *b >= ballot => return None,
            _ => {
                self.votes.insert(msg.sender, (ballot, value.clone()));
            }
        }

        let tally = self
            .votes
            .values()
            .filter(|(b, v)| *b == ballot && v == value)
            .count();

        if tally >= membership.quorum() {
            self.decided = Some((ballot, value.clone()));
            self.votes.clear();
            self.decided.clone()
        } else {
            None
        }
    }

    pub fn decided(&self) -> Option<&(Ballot, Value)> {
        self.decided.as_ref()
    }

    /// The vote a decided learner hands to a peer still working on the slot.
    pub fn catch_up(&self, msg: &Message, me: Option<Ordinal>) -> Option<Message> {
        let me = me?;
        let (ballot, value) = self.decided.as_ref()?;

        match msg.body {
            Body::Invite { .. } | Body::Nominate { .. } => Some(Message::new(
                msg.slot,
                me,
                Body::Vote {
                    ballot: *ballot,
                    value: value.clone(),
                },
            )),
            Body::Rsvp { .. } | Body::Vote { .. } => None,
        }
    }
}
