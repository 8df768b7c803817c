mod support;

use road_core::{LocalConfig, RoadConfig};
use support::{deliver, new_stack, pump, TestStack};

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
fn message_is_reassembled_on_the_far_side() {
    let (mut main, mut sub, sub_uid) = allowed_pair(7570, 7571);
    let body = b"a segmented message that needs more than one wire segment to cross".to_vec();

    main.send_message(sub_uid, body.clone());
    pump(&mut main, &mut sub, 10);

    let (received, from) = sub.rx_msgs.pop_front().expect("sub should have received the message");
    assert_eq!(received, body);
    assert_eq!(from, "main");
    assert_eq!(main.stats.get("message_initiate_complete"), 1);
    assert!(main.transactions.is_empty());
    assert!(sub.transactions.is_empty());
}

#[test]
fn send_to_an_unallowed_remote_is_refused() {
    let mut main = new_stack(main_config("main", 7572));
    main.send_message(42, b"hello".to_vec());
    assert_eq!(main.stats.get("unallowed_message_attempt"), 1);
    assert!(main.transactions.is_empty());
}

#[test]
fn missing_segment_is_recovered_via_resend() {
    let (mut main, mut sub, sub_uid) = allowed_pair(7573, 7574);
    let body = vec![7u8; 80]; // three 32-byte segments

    main.send_message(sub_uid, body.clone());
    assert_eq!(main.sink.outbox.len(), 3);
    // Drop the middle segment to force the receiver to notice a gap.
    main.sink.outbox.remove(1);
    while let Some((_, bytes)) = main.sink.outbox.pop_front() {
        sub.receive(deliver(bytes));
    }
    assert!(sub.rx_msgs.is_empty(), "message should be incomplete with a segment missing");

    // Sub's messengent notices the gap on its next redo tick and asks main
    // to resend the missing index.
    sub.advance(2.0);
    assert!(!sub.sink.outbox.is_empty(), "expected a resend request");
    while let Some((_, bytes)) = sub.sink.outbox.pop_front() {
        main.receive(deliver(bytes));
    }
    assert!(main.stats.get("message_resend") >= 1);

    // Main just re-queued the missing segment; finish the exchange.
    pump(&mut main, &mut sub, 10);

    let (received, _) = sub.rx_msgs.pop_front().expect("message should complete after resend");
    assert_eq!(received, body);
}
