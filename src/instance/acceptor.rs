use crate::message::{Accepted, Body, Message};
use crate::{Ballot, Ordinal};

/// Promises ballots and accepts nominations.
#[derive(Debug, Default)]
pub(crate) struct Acceptor {
    /// Highest ballot promised or accepted so far, `0` if none.
    promised: Ballot,
    accepted: Option<Accepted>,
}

impl Acceptor {
    /// Handles `msg`, returning the reply if there is one.
    ///
    /// `me` is the local ordinal; non-members never reply.
    pub fn handle(&mut self, msg: &Message, me: Option<Ordinal>) -> Option<Message> {
        let me = me?;

        match &msg.body {
            Body::Invite { ballot } => {
                if *ballot < self.promised {
                    return None;
                }

                self.promised = *ballot;

                Some(Message::new(
                    msg.slot,
                    me,
                    Body::Rsvp {
                        ballot: *ballot,
                        to: msg.sender,
                        accepted: self.accepted.clone(),
                    },
                ))
            }

            Body::Nominate { ballot, value } => {
                if *ballot < self.promised {
                    return None;
                }

                self.promised = *ballot;
                self.accepted = Some(Accepted {
                    ballot: *ballot,
                    value: value.clone(),
                });

                Some(Message::new(
                    msg.slot,
                    me,
                    Body::Vote {
                        ballot: *ballot,
                        value: value.clone(),
                    },
                ))
            }

            Body::Rsvp { .. } | Body::Vote { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn accepted(&self) -> Option<&Accepted> {
        self.accepted.as_ref()
    }
}
