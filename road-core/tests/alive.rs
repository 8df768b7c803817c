mod support;

use road_core::{LocalConfig, RoadConfig};
use support::{new_stack, pump, TestStack};

fn main_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(true))
}

fn sub_config(name: &str, port: u16) -> RoadConfig {
    RoadConfig::new(LocalConfig::new(name, ("127.0.0.1".to_string(), port)).main(false))
}

fn allowed_pair(main_port: u16, sub_port: u16) -> (TestStack, TestStack, u32) {
    let mut main = new_stack(main_config("main", main_port));
    let mut sub = new_stack(sub_config("sub", sub_port));
    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);
    let sub_uid = *main.name_remotes.get("sub").unwrap();
    main.allow(sub_uid, false, 0.0);
    pump(&mut main, &mut sub, 10);
    (main, sub, sub_uid)
}

#[test]
fn alive_completes_once_joined_and_allowed() {
    let (mut main, mut sub, sub_uid) = allowed_pair(7560, 7561);

    main.alive(sub_uid, false);
    pump(&mut main, &mut sub, 10);

    assert_eq!(main.remotes.get(&sub_uid).unwrap().alived, Some(true));
    assert_eq!(main.stats.get("alive_complete"), 1);
    assert!(main.transactions.is_empty());
    assert!(sub.transactions.is_empty());
}

#[test]
fn alive_against_unallowed_remote_cascades_into_allow() {
    let mut main = new_stack(main_config("main", 7562));
    let mut sub = new_stack(sub_config("sub", 7563));
    sub.join(main.local.ha.clone(), 0.0);
    pump(&mut sub, &mut main, 10);
    let sub_uid = *main.name_remotes.get("sub").unwrap();

    main.alive(sub_uid, false);
    assert_eq!(main.stats.get("unallowed_remote"), 1);
    pump(&mut main, &mut sub, 20);

    assert_eq!(main.remotes.get(&sub_uid).unwrap().allowed, Some(true));
}

#[test]
fn alivent_refuses_when_remote_never_joined() {
    let mut main = new_stack(main_config("main", 7564));
    let mut sub = new_stack(sub_config("sub", 7565));

    // Sub believes (stale local state) that it already joined and was
    // allowed by a uid main never actually assigned it.
    sub.local.uid = 7;
    let mut stale = road_core::Remote::new(5, "main", "road", main.local.ha.clone());
    stale.joined = Some(true);
    stale.allowed = Some(true);
    sub.add_remote(stale);

    sub.alive(5, false);
    pump(&mut sub, &mut main, 5);

    assert_eq!(main.stats.get("unjoined_allow_attempt"), 1);
}
