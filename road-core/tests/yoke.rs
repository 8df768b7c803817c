mod support;

use road_core::{LocalConfig, RoadConfig};
use support::{new_stack, pump};

fn main_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(true))
}

fn sub_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(false))
}

#[test]
fn main_re_yokes_an_already_known_subordinate() {
    let mut main = new_stack(main_config("main", 7540));
    let mut sub = new_stack(sub_config("sub", 7541));

    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);

    let sub_uid = *main.name_remotes.get("sub").expect("main should know sub by name");

    main.yoke(sub_uid, 0.0);
    pump(&mut main, &mut sub, 10);

    assert_eq!(main.stats.get("yoke_initiate_complete"), 1);
    assert_eq!(sub.stats.get("yoke_correspond_complete"), 1);
    assert_eq!(main.remotes.get(&sub_uid).unwrap().joined, Some(true));
    assert!(main.transactions.is_empty());
    assert!(sub.transactions.is_empty());
}

#[test]
fn sub_refuses_to_initiate_a_yoke() {
    let mut sub = new_stack(sub_config("sub", 7542));
    sub.yoke(1, 0.0);
    assert!(sub.transactions.is_empty());
    assert!(sub.sink.outbox.is_empty());
}

#[test]
fn yoke_against_unknown_remote_is_a_noop() {
    let mut main = new_stack(main_config("main", 7543));
    main.yoke(999, 0.0);
    assert!(main.transactions.is_empty());
    assert!(main.sink.outbox.is_empty());
}

#[test]
fn duplicate_yoke_attempt_is_counted() {
    let mut main = new_stack(main_config("main", 7544));
    let mut sub = new_stack(sub_config("sub", 7545));
    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);
    let sub_uid = *main.name_remotes.get("sub").expect("known");

    main.yoke(sub_uid, 0.0);
    // A second attempt while the first is still outstanding should be
    // rejected instead of racing a second request onto the wire.
    main.yoke(sub_uid, 0.0);
    assert_eq!(main.stats.get("duplicate_yoke_attempt"), 1);
}
