//! Replicas fed the same committed log end in the same state.

use proptest::prelude::*;
use statemachine::{activity_channel, Command, Outcome, StateMachine, Status};
use testsupport::prelude::*;
use testsupport::proptest_generators::{arb_log, arb_mutation};

#[test]
fn sample_session_lands_on_every_replica() {
    let mut host = LocalHost::new(vec![
        ReplicaContext::new().unwrap(),
        ReplicaContext::new().unwrap(),
        ReplicaContext::durable().unwrap(),
    ]);
    for command in sample_session() {
        host.submit(&command);
    }

    assert_replicas_agree(host.replicas());
    assert_eq!(host.replica(2).dump().unwrap(), sample_session_state());
    assert_read(host.replica(1), "user:1", Some("alice@example.com"));
    assert_read(host.replica(1), "user:2", None);
}

#[test]
fn outcomes_are_identical_across_replicas() {
    let mut host = LocalHost::new(vec![
        ReplicaContext::new().unwrap(),
        ReplicaContext::durable().unwrap(),
    ]);
    for command in sample_session() {
        let outcomes = host.submit(&command);
        assert_eq!(outcomes[0], outcomes[1], "{command}");
    }
    let outcomes = host.submit_raw(&b"not a command"[..]);
    assert_status(&outcomes[0], Status::Error);
    assert_eq!(outcomes[0], outcomes[1]);
}

#[test]
fn late_joiner_catches_up_by_replay() {
    let mut host = LocalHost::new(vec![ReplicaContext::new().unwrap()]);
    for command in numbered_inserts(25) {
        host.submit(&command);
    }
    host.submit(&Command::delete("key-003"));

    let joined = host.join(ReplicaContext::durable().unwrap());
    assert_eq!(joined, 1);
    assert_replicas_agree(host.replicas());

    host.submit(&Command::insert("after", "join"));
    assert_read(host.replica(1), "after", Some("join"));
}

#[test]
fn leadership_changes_move_activity_events() {
    let (tx0, mut rx0) = activity_channel();
    let (tx1, mut rx1) = activity_channel();
    let mut host = LocalHost::new(vec![
        ReplicaContext::new().unwrap().with_activity(tx0),
        ReplicaContext::new().unwrap().with_activity(tx1),
    ]);

    host.submit(&Command::insert("a", "1"));
    host.elect(1);
    host.submit(&Command::insert("b", "2"));

    let first = rx0.try_recv().unwrap();
    assert_eq!((first.term, first.index), (1, 1));
    assert!(rx0.try_recv().is_err());

    let second = rx1.try_recv().unwrap();
    assert_eq!((second.term, second.index), (2, 2));
    assert!(rx1.try_recv().is_err());
}

#[test]
fn durable_replica_restarts_from_its_snapshot() {
    let mut host = LocalHost::new(vec![ReplicaContext::durable().unwrap()]);
    for command in sample_session() {
        host.submit(&command);
    }
    let marker = host.replica(0).machine().take_snapshot().unwrap();
    assert_eq!(marker.position.index, 7);

    let next_index = host.log().len() as u64 + 1;
    let restarted = host.into_replicas().remove(0).restart().unwrap();
    assert_eq!(restarted.last_applied(), Some(marker.position));
    assert_eq!(restarted.dump().unwrap(), sample_session_state());

    let mut host = LocalHost::new(vec![restarted]).starting_at(next_index);
    let outcomes = host.submit(&Command::insert("user:4", "dave"));
    assert_eq!(outcomes[0], Outcome::ok());
}

#[test]
fn gaps_in_the_index_sequence_are_tolerated() {
    let mut host = LocalHost::new(vec![ReplicaContext::new().unwrap()]).starting_at(100);
    host.submit(&Command::insert("a", "1"));
    host.skip_index();
    host.submit(&Command::insert("b", "2"));
    assert_eq!(host.replica(0).last_applied().unwrap().index, 102);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_replicas_converge(log in arb_log(40), leader_changes in 0usize..3) {
        let mut host = LocalHost::new(vec![
            ReplicaContext::new().unwrap(),
            ReplicaContext::with_scan_limit(2).unwrap(),
            ReplicaContext::durable().unwrap(),
        ]);
        for (i, payload) in log.iter().enumerate() {
            if leader_changes > 0 && i % (log.len() / leader_changes + 1) == 0 {
                host.elect(i % 3);
            }
            let outcomes = host.submit_raw(payload.clone());
            // Replica 1 only differs in scan limit, which never affects apply.
            prop_assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
        }
        assert_replicas_agree(host.replicas());

        let last = host.log().last().map(|e| e.index);
        prop_assert_eq!(host.replica(0).last_applied().map(|p| p.index), last);
    }

    #[test]
    fn prop_delete_is_idempotent(setup in prop::collection::vec(arb_mutation(), 0..20), key in "[a-d]{1,2}") {
        let mut host = LocalHost::new(vec![ReplicaContext::new().unwrap()]);
        for command in &setup {
            host.submit(command);
        }
        let first = host.submit(&Command::delete(key.clone()));
        let after_first = host.replica(0).dump().unwrap();
        let second = host.submit(&Command::delete(key.clone()));

        prop_assert_eq!(&first[0], &Outcome::ok());
        prop_assert_eq!(&second[0], &Outcome::ok());
        prop_assert_eq!(host.replica(0).dump().unwrap(), after_first);
        prop_assert_eq!(host.query(0, &Command::read(key)).status, Status::NotFound);
    }

    #[test]
    fn prop_restart_preserves_durable_state(setup in prop::collection::vec(arb_mutation(), 1..30)) {
        let mut host = LocalHost::new(vec![ReplicaContext::durable().unwrap()]);
        for command in &setup {
            host.submit(command);
        }
        let before = host.replica(0).dump().unwrap();
        let restarted = host.into_replicas().remove(0).restart().unwrap();
        prop_assert_eq!(restarted.dump().unwrap(), before);
    }
}
