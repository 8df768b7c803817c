mod support;

use road_core::{LocalConfig, RoadConfig};
use support::{new_stack, pump};

fn main_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(true))
}

fn sub_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(false))
}

fn joined_pair(main_port: u16, sub_port: u16) -> (support::TestStack, support::TestStack) {
    let mut main = new_stack(main_config("main", main_port));
    let mut sub = new_stack(sub_config("sub", sub_port));
    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);
    (main, sub)
}

#[test]
fn allow_handshake_completes_both_sides() {
    let (mut main, mut sub) = joined_pair(7550, 7551);
    let sub_uid = *main.name_remotes.get("sub").unwrap();

    main.allow(sub_uid, false, 0.0);
    pump(&mut main, &mut sub, 10);

    assert_eq!(main.remotes.get(&sub_uid).unwrap().allowed, Some(true));
    let main_uid_in_sub = *sub.name_remotes.get("main").unwrap();
    assert_eq!(sub.remotes.get(&main_uid_in_sub).unwrap().allowed, Some(true));
    assert_eq!(main.stats.get("allow_initiate_complete"), 1);
    assert_eq!(sub.stats.get("allow_correspond_complete"), 1);
    assert!(main.transactions.is_empty());
    assert!(sub.transactions.is_empty());
}

#[test]
fn allow_cascades_into_alive_when_requested() {
    let (mut main, mut sub) = joined_pair(7552, 7553);
    let sub_uid = *main.name_remotes.get("sub").unwrap();

    main.allow(sub_uid, true, 0.0);
    pump(&mut main, &mut sub, 20);

    assert_eq!(main.remotes.get(&sub_uid).unwrap().alived, Some(true));
    assert_eq!(main.stats.get("alive_complete"), 1);
}

#[test]
fn allow_against_an_unjoined_remote_cascades_instead_of_sending_hello() {
    let mut main = new_stack(main_config("main", 7554));
    let sub_ha = ("127.0.0.1".to_string(), 7555);

    // A remote that's known by address but never joined: allow must cascade
    // into a yoke/join rather than send a hello straight away. Since main
    // is the authoritative side, the cascade is a yoke, which here has no
    // long-term keys to work with and bails out without transmitting.
    let fake_uid = main.mint_uid();
    main.remotes.insert(fake_uid, road_core::Remote::new(fake_uid, "sub", "road", sub_ha));
    main.allow(fake_uid, false, 0.0);

    assert!(main.sink.outbox.is_empty());
    assert!(main.transactions.is_empty());
}
