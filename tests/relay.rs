mod common;

use std::time::Duration;

use tokio::net::UdpSocket;

use common::{addr_of, introduce, make_node, mesh, recv_text, silent_peer};

#[tokio::test]
async fn write_through_relay_reaches_target() {
    let mut alice = make_node("N:alice").await;
    let mut bob = make_node("N:bob").await;
    let mut carol = make_node("N:carol").await;
    mesh(&mut [&mut alice, &mut bob, &mut carol]);
    alice.push_relay("N:bob");

    let (acknowledged, b, c) = tokio::join!(
        alice.write("D:relayed", "through bob"),
        bob.handle_incoming_messages(1500),
        carol.handle_incoming_messages(1500)
    );
    b.unwrap();
    c.unwrap();
    assert!(acknowledged.unwrap());
    assert_eq!(carol.local_value("D:relayed"), Some("through bob"));
    assert_eq!(bob.local_value("D:relayed"), Some("through bob"));
    assert_eq!(alice.read("D:relayed").await.unwrap().as_deref(), Some("through bob"));
}

#[tokio::test]
async fn is_active_through_relay() {
    let mut alice = make_node("N:alice").await;
    let mut bob = make_node("N:bob").await;
    let mut carol = make_node("N:carol").await;
    mesh(&mut [&mut alice, &mut bob, &mut carol]);
    alice.push_relay("N:bob");

    let (active, b, c) = tokio::join!(
        alice.is_active("N:carol"),
        bob.handle_incoming_messages(800),
        carol.handle_incoming_messages(800)
    );
    b.unwrap();
    c.unwrap();
    assert!(active.unwrap());

    // The relayed greeting arrives from bob, so carol's entry is left alone
    let carol_entry = alice.peers().find(|p| p.name == "N:carol").unwrap();
    assert_eq!(carol_entry.addr, addr_of(&carol));

    assert_eq!(alice.pop_relay().as_deref(), Some("N:bob"));
    assert!(alice.pop_relay().is_none());
}

#[tokio::test]
async fn read_through_dead_relay_gives_up() {
    let mut alice = make_node("N:alice").await;
    let mut carol = make_node("N:carol").await;
    assert!(!carol.write("D:secret", "behind the relay").await.unwrap());

    let bob = make_node("N:bob").await;
    let bob_addr = addr_of(&bob);
    drop(bob);

    alice.add_peer("N:bob", bob_addr).unwrap();
    introduce(&mut alice, &carol);
    alice.push_relay("N:bob");

    let (value, c) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(20), alice.read("D:secret")),
        carol.handle_incoming_messages(3000)
    );
    c.unwrap();
    let value = value.expect("read finishes within its retry budget").unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn relay_retransmits_then_reports_timeout() {
    let mut bob = make_node("N:bob").await;
    let bob_addr = addr_of(&bob);
    let (ghost, ghost_addr) = silent_peer().await;
    bob.add_peer("N:ghost", ghost_addr).unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let exchange = async {
        client.send_to(b"ab 1 0 N:ghost G", bob_addr).await.unwrap();
        let mut copies = Vec::new();
        while copies.len() < 3 {
            match recv_text(&ghost, Duration::from_millis(500)).await {
                Some(text) => copies.push(text),
                None => break,
            }
        }
        let reply = recv_text(&client, Duration::from_millis(1500)).await;
        (copies, reply)
    };

    let (served, (copies, reply)) = tokio::join!(bob.handle_incoming_messages(1500), exchange);
    served.unwrap();
    assert_eq!(copies, vec!["ab G", "ab G", "ab G"]);
    assert_eq!(reply.as_deref(), Some("ab I 1 Relay timeout "));
}

#[tokio::test]
async fn relay_to_unknown_target_is_reported() {
    let mut bob = make_node("N:bob").await;
    let bob_addr = addr_of(&bob);
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let exchange = async {
        client.send_to(b"cd 1 0 N:nobody G", bob_addr).await.unwrap();
        recv_text(&client, Duration::from_millis(800)).await
    };

    let (served, reply) = tokio::join!(bob.handle_incoming_messages(800), exchange);
    served.unwrap();
    assert_eq!(reply.as_deref(), Some("cd I 2 Relay target unknown "));
}

#[tokio::test]
async fn retagged_relay_reply_returns_under_outer_id() {
    let mut bob = make_node("N:bob").await;
    let bob_addr = addr_of(&bob);
    let (ghost, ghost_addr) = silent_peer().await;
    bob.add_peer("N:ghost", ghost_addr).unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let exchange = async {
        client.send_to(b"ef V 0 N:ghost gh R 0 D:k ", bob_addr).await.unwrap();
        let delivered = recv_text(&ghost, Duration::from_millis(500)).await;
        ghost.send_to(b"gh S Y 0 v ", bob_addr).await.unwrap();
        let reply = recv_text(&client, Duration::from_millis(800)).await;
        (delivered, reply)
    };

    let (served, (delivered, reply)) = tokio::join!(bob.handle_incoming_messages(1000), exchange);
    served.unwrap();
    assert_eq!(delivered.as_deref(), Some("gh R 0 D:k "));
    assert_eq!(reply.as_deref(), Some("ef S Y 0 v "));
}

#[tokio::test]
async fn write_through_two_relays() {
    let mut alice = make_node("N:alice").await;
    let mut bob = make_node("N:bob").await;
    let mut carol = make_node("N:carol").await;
    let mut dave = make_node("N:dave").await;
    mesh(&mut [&mut alice, &mut bob, &mut carol, &mut dave]);
    alice.push_relay("N:bob");
    alice.push_relay("N:carol");

    let (acknowledged, b, c, d) = tokio::join!(
        alice.write("D:hop", "two relays deep"),
        bob.handle_incoming_messages(2000),
        carol.handle_incoming_messages(2000),
        dave.handle_incoming_messages(2000)
    );
    b.unwrap();
    c.unwrap();
    d.unwrap();
    assert!(acknowledged.unwrap());
    assert_eq!(dave.local_value("D:hop"), Some("two relays deep"));

    let (active, b, c, d) = tokio::join!(
        alice.is_active("N:dave"),
        bob.handle_incoming_messages(800),
        carol.handle_incoming_messages(800),
        dave.handle_incoming_messages(800)
    );
    b.unwrap();
    c.unwrap();
    d.unwrap();
    assert!(active.unwrap());
}

#[tokio::test]
async fn timeout_report_crosses_relay_chain() {
    let mut bob = make_node("N:bob").await;
    let mut carol = make_node("N:carol").await;
    let bob_addr = addr_of(&bob);
    introduce(&mut bob, &carol);
    let (ghost, ghost_addr) = silent_peer().await;
    carol.add_peer("N:ghost", ghost_addr).unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let request = async {
        client.send_to(b"ab 2 0 N:carol 0 N:ghost G", bob_addr).await.unwrap();
        recv_text(&client, Duration::from_millis(1800)).await
    };

    let (b, c, reply) = tokio::join!(
        bob.handle_incoming_messages(1800),
        carol.handle_incoming_messages(1800),
        request
    );
    b.unwrap();
    c.unwrap();
    assert_eq!(reply.as_deref(), Some("ab I 1 Relay timeout "));
    drop(ghost);
}
