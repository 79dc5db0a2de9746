mod common;

use futures::executor::block_on;
use futures::task::SpawnExt;

use paxseq::error::InstanceError;
use paxseq::log::Mutation;
use paxseq::message::{Accepted, Body, Message};
use paxseq::prototyping::{MemLog, RecordingPutter};
use paxseq::putter::NullPutter;
use paxseq::retry::RetryConfig;
use paxseq::{Config, RolePutters};

use common::*;

#[test]
fn propose_and_learn() {
    init_tracing();
    let (_log, manager, _) = single_node();

    let decided = block_on_within(manager.propose("foo")).unwrap();

    assert_eq!(decided, b"foo");
}

#[test]
fn propose_and_recv() {
    let (_log, manager, _) = single_node();

    block_on_within(manager.propose("foo")).unwrap();
    let decision = recv(&manager);

    assert_eq!(decision.slot, 2);
    assert_eq!(decision.value, b"foo");
}

#[test]
fn multiple_proposals_take_consecutive_slots() {
    let (log, manager, _) = single_node();

    let foo = Mutation::set("/foo", "a").encode().unwrap();
    let bar = Mutation::set("/bar", "b").encode().unwrap();

    block_on_within(manager.propose(foo.clone())).unwrap();
    let first = recv(&manager);
    log.apply(first.slot, first.value.clone()).unwrap();

    block_on_within(manager.propose(bar.clone())).unwrap();
    let second = recv(&manager);
    log.apply(second.slot, second.value.clone()).unwrap();

    assert_eq!((first.slot, first.value), (2, foo));
    assert_eq!((second.slot, second.value), (3, bar));
    assert_eq!(log.snapshot(3).unwrap().get("/bar"), Some(&b"b"[..]));
}

#[test]
fn vote_for_unseen_slot_decides_it() {
    let (_log, manager, _) = single_node();

    manager.put(Message::vote(1, "foo").in_slot(2).sent_by(0));
    let decision = recv(&manager);

    assert_eq!(decision.slot, 2);
    assert_eq!(decision.value, b"foo");
}

#[test]
fn decision_advances_the_cursor() {
    let (_log, manager, _) = single_node();

    manager.put(Message::vote(1, "foo").in_slot(2).sent_by(0));
    recv(&manager);

    assert_eq!(manager.cursor(), 3);
}

#[test]
fn slot_zero_resolves_to_the_cursor() {
    let (_log, manager, _) = single_node();

    let (slot, instance) = manager.instance(0).unwrap();

    assert_eq!(slot, 2);
    assert_eq!(instance.slot(), 2);
    assert_eq!(manager.cursor(), 2);
}

#[test]
fn unused_instance_does_not_take_the_slot_from_a_proposal() {
    let (_log, manager, _) = single_node();

    manager.instance(0).unwrap();
    block_on_within(manager.propose("foo")).unwrap();

    assert_eq!(recv(&manager).slot, 2);
}

#[test]
fn message_for_slot_zero_binds_to_the_cursor() {
    let (_log, manager, _) = single_node();

    manager.put(Message::vote(1, "foo").sent_by(0));

    assert_eq!(recv(&manager).slot, 2);
}

#[test]
fn malformed_frames_are_ignored() {
    let (_log, manager, _) = single_node();

    let frame = Message::vote(1, "foo").in_slot(2).encode().unwrap();
    manager.put_frame(&frame[..frame.len() - 1]);
    manager.put_frame(&[]);

    assert!(stays_pending(manager.recv()));

    manager.put_frame(&frame);
    assert_eq!(recv(&manager).value, b"foo");
}

#[test]
fn malformed_frame_does_not_disturb_the_next_proposal() {
    let (_log, manager, _) = single_node();

    let frame = Message::vote(1, "x").in_slot(2).encode().unwrap();
    manager.put_frame(&frame[..frame.len() - 1]);

    assert_eq!(block_on_within(manager.propose("y")).unwrap(), b"y");

    let decision = recv(&manager);
    assert_eq!((decision.slot, decision.value), (2, b"y".to_vec()));
}

#[test]
fn invalid_messages_are_ignored() {
    let (_log, manager, _) = single_node();

    manager.put(Message::vote(0, "foo").in_slot(2));

    assert!(stays_pending(manager.recv()));
}

#[test]
fn membership_is_read_from_the_preceding_version() {
    let (log, manager, _) = single_node();

    // Slot 3 is voted on by the members as of version 2.
    manager.put(Message::vote(1, "foo").in_slot(3).sent_by(0));
    assert!(stays_pending(manager.recv()));

    log.apply(2, member("b", "y")).unwrap();
    assert!(stays_pending(manager.recv()));

    manager.put(Message::vote(1, "foo").in_slot(3).sent_by(1));
    let decision = recv(&manager);

    assert_eq!(decision.slot, 3);
    assert_eq!(decision.value, b"foo");
}

#[test]
fn votes_from_beyond_the_membership_do_not_count() {
    let (_log, manager, _) = single_node();

    manager.put(Message::vote(1, "foo").in_slot(2).sent_by(1));

    assert!(stays_pending(manager.recv()));
}

#[test]
fn cluster_size_hint_applies_to_an_empty_membership() {
    let log = std::sync::Arc::new(MemLog::new());
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(NullPutter)
        .expecting_cluster_size(3)
        .spawn_in(pool());

    manager.put(Message::vote(1, "foo").in_slot(1).sent_by(0));
    assert!(stays_pending(manager.recv()));

    manager.put(Message::vote(1, "foo").in_slot(1).sent_by(2));
    assert_eq!(recv(&manager).slot, 1);
}

#[test]
fn single_expected_member_bootstraps_an_empty_log() {
    let log = std::sync::Arc::new(MemLog::new());
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(NullPutter)
        .expecting_cluster_size(1)
        .spawn_in(pool());

    assert_eq!(block_on_within(manager.propose("x")).unwrap(), b"x");
    assert_eq!(recv(&manager).slot, 1);
}

#[test]
fn larger_expected_cluster_cannot_coordinate_on_an_empty_log() {
    let log = std::sync::Arc::new(MemLog::new());
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(NullPutter)
        .expecting_cluster_size(3)
        .spawn_in(pool());

    assert!(stays_pending(manager.propose("x")));
}

#[test]
fn messages_too_far_ahead_of_the_log_are_dropped() {
    let log = log_with_members(&[("a", "x")]);
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log.clone())
        .sending_via(NullPutter)
        .with_config(Config {
            max_lookahead: 1,
            ..Config::default()
        })
        .spawn_in(pool());

    // Slot 3 lies two past version 1.
    manager.put(Message::vote(1, "foo").in_slot(3));
    log.apply(2, b"filler").unwrap();
    assert!(stays_pending(manager.recv()));

    manager.put(Message::vote(1, "foo").in_slot(3));
    assert_eq!(recv(&manager).slot, 3);
}

#[test]
fn put_from_substitutes_the_senders_ordinal() {
    let log = log_with_members(&[("a", "x"), ("b", "y"), ("c", "z")]);
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(NullPutter)
        .spawn_in(pool());

    let acceptor = RecordingPutter::new();
    let (_, instance) = manager.instance(4).unwrap();
    instance.set_putters(RolePutters {
        acceptor: std::sync::Arc::new(acceptor.clone()),
        ..RolePutters::uniform(std::sync::Arc::new(NullPutter))
    });

    manager.put_from("y", Message::invite(7).in_slot(4).sent_by(2));
    let rsvp = await_sent(&acceptor, |m| matches!(m.body, Body::Rsvp { .. }));

    assert_eq!(rsvp, Message::rsvp(7, 1, None).in_slot(4).sent_by(0));
}

#[test]
fn put_from_unknown_address_is_dropped() {
    let (_log, manager, _) = single_node();

    manager.put_from("w", Message::vote(1, "foo").in_slot(2));
    assert!(stays_pending(manager.recv()));

    manager.put_from("x", Message::vote(1, "foo").in_slot(2).sent_by(5));
    assert_eq!(recv(&manager).slot, 2);
}

#[test]
fn addrs_for_addresses_rsvps_to_their_coordinator() {
    let log = log_with_members(&[("a", "x"), ("b", "y"), ("c", "z")]);
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(NullPutter)
        .spawn_in(pool());

    let invite = Message::invite(1).in_slot(4);
    let rsvp = Message::rsvp(1, 2, None).in_slot(4);

    assert_eq!(
        block_on(manager.addrs_for(&invite)).unwrap(),
        vec!["x", "y", "z"]
    );
    assert_eq!(block_on(manager.addrs_for(&rsvp)).unwrap(), vec!["z"]);
}

#[test]
fn coordinator_adopts_previously_accepted_value() {
    let log = log_with_members(&[("a", "x"), ("b", "y"), ("c", "z")]);
    let egress = RecordingPutter::new();
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(egress.clone())
        .with_config(Config {
            retry: RetryConfig {
                initial_interval_ms: 60_000,
                max_interval_ms: 60_000,
                ..RetryConfig::default()
            },
            ..Config::default()
        })
        .spawn_in(pool());

    let proposer = pool();
    let proposal = {
        let manager = manager.clone();
        proposer
            .spawn_with_handle(async move { manager.propose("mine").await })
            .unwrap()
    };

    let invite = await_sent(&egress, |m| matches!(m.body, Body::Invite { .. }));
    let ballot = invite.ballot();
    let accepted = Accepted {
        ballot: 1,
        value: b"theirs".to_vec(),
    };

    manager.put_from(
        "y",
        Message::rsvp(ballot, 0, Some(accepted)).in_slot(invite.slot),
    );

    let nomination = await_sent(&egress, |m| matches!(m.body, Body::Nominate { .. }));
    assert_eq!(
        nomination.body,
        Body::Nominate {
            ballot,
            value: b"theirs".to_vec(),
        }
    );

    manager.put_from("y", Message::vote(ballot, "theirs").in_slot(invite.slot));

    assert_eq!(block_on_within(proposal).unwrap(), b"theirs");
}

#[test]
fn decided_instance_answers_late_invitations() {
    let (_log, manager, _) = single_node();

    block_on_within(manager.propose("foo")).unwrap();
    let decision = recv(&manager);

    let learner = RecordingPutter::new();
    let (_, instance) = manager.instance(decision.slot).unwrap();
    assert!(instance.is_decided());
    instance.set_putters(RolePutters {
        learner: std::sync::Arc::new(learner.clone()),
        ..RolePutters::uniform(std::sync::Arc::new(NullPutter))
    });

    manager.put(Message::invite(u64::MAX).in_slot(decision.slot).sent_by(0));
    let vote = await_sent(&learner, |m| matches!(m.body, Body::Vote { .. }));

    assert_eq!(vote.slot, decision.slot);
    assert!(matches!(vote.body, Body::Vote { ref value, .. } if value == b"foo"));
}

#[test]
fn applied_decisions_are_eventually_forgotten() {
    let log = log_with_members(&[("a", "x")]);
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log.clone())
        .sending_via(NullPutter)
        .with_config(Config {
            retain_decided: 2,
            ..Config::default()
        })
        .spawn_in(pool());

    for i in 0..5 {
        block_on_within(manager.propose(format!("v{}", i))).unwrap();
        let decision = recv(&manager);
        log.apply(decision.slot, decision.value).unwrap();
    }

    assert_eq!(manager.cursor(), 7);
    manager.instance(7).unwrap();

    assert!(matches!(
        manager.instance(3),
        Err(InstanceError::Forgotten(3))
    ));
    assert!(manager.instance(6).is_ok());
}

#[test]
fn with_config_keeps_the_node_id() {
    let log = std::sync::Arc::new(MemLog::new());
    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log)
        .sending_via(NullPutter)
        .with_config(Config {
            self_id: "ignored".to_owned(),
            window: 3,
            ..Config::default()
        })
        .starting_at(5)
        .spawn_in(pool());

    assert_eq!(manager.self_id(), "a");
    assert_eq!(manager.config().window, 3);
    assert_eq!(manager.cursor(), 5);
}
