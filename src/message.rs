//! Defines [`Message`], the unit exchanged between members, and its codec.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::{Ballot, Ordinal, SlotNum, Value};

/// Frames larger than this are rejected without being decoded.
pub const MAX_FRAME_LEN: u64 = 1 << 20;

/// A protocol message for one slot.
///
/// `sender` is the position of the sending member in the slot's member list.
/// It is not a stable identity; receivers that know the sender's address
/// should let [`Manager::put_from`][crate::Manager::put_from] fill it in.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Slot the message belongs to, `0` if it is to be bound to the
    /// receiver's next free slot.
    pub slot: SlotNum,
    /// Ordinal of the sending member.
    pub sender: Ordinal,
    pub body: Body,
}

/// What a [`Message`] says, one variant per protocol step.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Coordinator bids for `ballot`.
    Invite { ballot: Ballot },

    /// Acceptor promises `ballot` to the coordinator at ordinal `to`.
    Rsvp {
        ballot: Ballot,
        to: Ordinal,
        accepted: Option<Accepted>,
    },

    /// Coordinator asks acceptors to accept `value` under `ballot`.
    Nominate { ballot: Ballot, value: Value },

    /// Acceptor accepted `value` under `ballot`.
    Vote { ballot: Ballot, value: Value },
}

/// A value an acceptor accepted, reported in its promise.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Accepted {
    pub ballot: Ballot,
    pub value: Value,
}

/// The variant of a [`Body`], without its payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Invite,
    Rsvp,
    Nominate,
    Vote,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_LEN)
        .reject_trailing_bytes()
}

impl Message {
    pub fn new(slot: SlotNum, sender: Ordinal, body: Body) -> Self {
        Self { slot, sender, body }
    }

    /// An invitation with an unassigned slot and sender.
    pub fn invite(ballot: Ballot) -> Self {
        Self::new(0, 0, Body::Invite { ballot })
    }

    /// A promise to the coordinator at ordinal `to`.
    pub fn rsvp(ballot: Ballot, to: Ordinal, accepted: Option<Accepted>) -> Self {
        Self::new(0, 0, Body::Rsvp { ballot, to, accepted })
    }

    /// A nomination with an unassigned slot and sender.
    pub fn nominate(ballot: Ballot, value: impl Into<Value>) -> Self {
        Self::new(
            0,
            0,
            Body::Nominate {
                ballot,
                value: value.into(),
            },
        )
    }

    /// A vote with an unassigned slot and sender.
    pub fn vote(ballot: Ballot, value: impl Into<Value>) -> Self {
        Self::new(
            0,
            0,
            Body::Vote {
                ballot,
                value: value.into(),
            },
        )
    }

    /// Replaces the slot.
    pub fn in_slot(mut self, slot: SlotNum) -> Self {
        self.slot = slot;
        self
    }

    /// Replaces the sender.
    pub fn sent_by(mut self, sender: Ordinal) -> Self {
        self.sender = sender;
        self
    }

    pub fn kind(&self) -> Kind {
        match self.body {
            Body::Invite { .. } => Kind::Invite,
            Body::Rsvp { .. } => Kind::Rsvp,
            Body::Nominate { .. } => Kind::Nominate,
            Body::Vote { .. } => Kind::Vote,
        }
    }

    /// The ballot the message is about, whatever its kind.
    pub fn ballot(&self) -> Ballot {
        match self.body {
            Body::Invite { ballot }
            | Body::Rsvp { ballot, .. }
            | Body::Nominate { ballot, .. }
            | Body::Vote { ballot, .. } => ballot,
        }
    }

    /// Checks the invariants the codec cannot express.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.ballot() == 0 {
            return Err(DecodeError::Invalid("ballot zero"));
        }

        if let Body::Rsvp {
            ballot,
            accepted: Some(accepted),
            ..
        } = &self.body
        {
            if accepted.ballot == 0 || accepted.ballot > *ballot {
                return Err(DecodeError::Invalid("accepted ballot out of range"));
            }
        }

        Ok(())
    }

    /// Encodes the message as a frame for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        codec().serialize(self).map_err(EncodeError)
    }

    /// Decodes and validates a frame.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let msg: Message = codec()
            .deserialize(frame)
            .map_err(DecodeError::Malformed)?;

        msg.validate()?;

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_frame_is_malformed() {
        let mut frame = Message::vote(1, "").in_slot(1).sent_by(1).encode().unwrap();
        frame.pop();

        assert!(matches!(Message::decode(&frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut frame = Message::invite(3).in_slot(9).encode().unwrap();
        frame.push(0);

        assert!(matches!(Message::decode(&frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn empty_frame_is_malformed() {
        assert!(matches!(Message::decode(&[]), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn ballot_zero_is_invalid() {
        let frame = Message::nominate(0, "x").in_slot(4).encode().unwrap();

        assert!(matches!(Message::decode(&frame), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn rsvp_cannot_report_a_ballot_above_its_promise() {
        let accepted = |ballot| Accepted {
            ballot,
            value: b"v".to_vec(),
        };

        let above = Message::rsvp(7, 0, Some(accepted(8))).in_slot(2);
        let repeated = Message::rsvp(7, 0, Some(accepted(7))).in_slot(2);

        assert!(matches!(above.validate(), Err(DecodeError::Invalid(_))));
        assert!(repeated.validate().is_ok());
    }

    #[test]
    fn decode_restores_every_field() {
        let accepted = Accepted {
            ballot: 4,
            value: b"old".to_vec(),
        };
        let msg = Message::rsvp(9, 2, Some(accepted)).in_slot(12).sent_by(1);

        assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);
    }
}
