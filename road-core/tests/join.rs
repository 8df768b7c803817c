mod support;

use road_core::{LocalConfig, RoadConfig};
use support::{deliver_all, new_stack, pump};

fn main_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(true))
}

fn sub_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(false))
}

#[test]
fn cold_join_establishes_both_sides() {
    let mut main = new_stack(main_config("main", 7530));
    let mut sub = new_stack(sub_config("sub", 7531));

    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);

    let sub_remote = sub.remotes.values().next().expect("sub learned a remote");
    assert_eq!(sub_remote.joined, Some(true));
    assert_ne!(sub.local.uid, 0, "joinent should have minted our uid");

    let main_remote = main.remotes.values().next().expect("main learned a remote");
    assert_eq!(main_remote.joined, Some(true));
    assert_eq!(main_remote.name, "sub");

    assert_eq!(sub.stats.get("join_initiate_complete"), 1);
    assert_eq!(main.stats.get("join_correspond_complete"), 1);
    assert!(sub.transactions.is_empty());
    assert!(main.transactions.is_empty());
}

#[test]
fn main_refuses_to_initiate_a_join() {
    let mut main = new_stack(main_config("main", 7532));
    main.join(("127.0.0.1".to_string(), 9999), 0.0);
    assert!(main.transactions.is_empty());
    assert!(main.sink.outbox.is_empty());
}

#[test]
fn rejected_credentials_mark_remote_refused() {
    let mut main = new_stack(main_config("main", 7533));
    main.keep.reject_all = true;
    let mut sub = new_stack(sub_config("sub", 7534));

    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);

    let sub_remote = sub.remotes.values().next().expect("sub still tracks the attempt");
    assert_eq!(sub_remote.joined, Some(false));
}

#[test]
fn redo_resends_the_request_until_timeout() {
    let mut main = new_stack(main_config("main", 7535));
    let mut sub = new_stack(sub_config("sub", 7536));
    // Never deliver main's response: sub should keep redoing the request.
    sub.join(main.local.ha.clone(), 0.0);
    assert_eq!(sub.sink.outbox.len(), 1);
    sub.sink.outbox.clear();

    sub.advance(2.0);
    assert!(!sub.sink.outbox.is_empty(), "expected at least one redo");
    assert!(sub.stats.get("redo_join") >= 1);
    sub.sink.outbox.clear();

    sub.advance(10.0);
    let moved = deliver_all(&mut sub, &mut main);
    assert_eq!(moved, 0, "joiner should have given up after its outer timeout without sending anything further");
    assert!(sub.transactions.is_empty());
}
