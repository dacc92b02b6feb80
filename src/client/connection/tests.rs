use super::*;
use crate::chain::tests::tx;
use crate::tests::support::{
    addr, eventually, expect_closed, expect_silence, next_packet, next_response, send_json,
    subscribe, ws_pair,
};
use serde_json::json;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

async fn running_connection(
    port: u16,
) -> (
    Arc<Connection>,
    WebSocketStream<DuplexStream>,
    JoinHandle<Result<Termination>>,
) {
    let (server, client) = ws_pair().await;
    let conn = Arc::new(Connection::new(server, addr(port)));
    let runner = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.run().await }
    });
    (conn, client, runner)
}

#[tokio::test]
async fn test_subscribe_supported_topic() {
    let (conn, mut client, _runner) = running_connection(4001).await;

    let resp = subscribe(&mut client, 1, "newTx").await;
    assert_eq!(resp.id, 1);
    assert!(resp.ok);
    assert_eq!(resp.message, "subscribed topic: newTx");
    assert!(conn.is_subscribed(Topic::NewTx));
    assert!(!conn.is_subscribed(Topic::BlockedTxHashes));
}

#[tokio::test]
async fn test_subscribe_unknown_topic_fails_and_keeps_state() {
    let (conn, mut client, _runner) = running_connection(4002).await;

    for (id, topic) in [(2, "bogus"), (3, ""), (4, "NEWTX"), (5, "new-transaction")] {
        let resp = subscribe(&mut client, id, topic).await;
        assert_eq!(resp.id, id);
        assert!(!resp.ok, "{topic} must be rejected");
        assert_eq!(resp.message, format!("unknown topic: {topic}"));
    }
    assert!(conn.subscribed_topics().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_always_succeeds() {
    let (conn, mut client, _runner) = running_connection(4003).await;

    for (id, topic) in [(1, "newTx"), (2, "blockedTxHashes"), (3, "bogus")] {
        send_json(&mut client, json!({ "op": 1, "id": id, "topic": topic })).await;
        let resp = next_response(&mut client).await;
        assert_eq!(resp.id, id);
        assert!(resp.ok);
        assert_eq!(resp.message, format!("unsubscribed topic (unchecked): {topic}"));
    }
    assert!(conn.subscribed_topics().is_empty());
}

#[tokio::test]
async fn test_last_operation_wins() {
    let (conn, mut client, _runner) = running_connection(4004).await;

    let ops = [0, 1, 1, 0, 0, 1, 0];
    for (id, op) in ops.iter().enumerate() {
        send_json(
            &mut client,
            json!({ "op": op, "id": id, "topic": "blockedTxHashes" }),
        )
        .await;
        let resp = next_response(&mut client).await;
        assert_eq!(resp.id, id as i64);
        assert_eq!(conn.is_subscribed(Topic::BlockedTxHashes), *op == 0);
    }
    assert_eq!(conn.subscribed_topics(), vec![Topic::BlockedTxHashes]);
}

#[tokio::test]
async fn test_malformed_request_gets_failure_and_connection_survives() {
    let (conn, mut client, _runner) = running_connection(4005).await;

    client
        .send(WsMessage::text("{not json"))
        .await
        .unwrap();
    let resp = next_response(&mut client).await;
    assert_eq!(resp.id, MALFORMED_REQUEST_ID);
    assert!(!resp.ok);
    assert!(!resp.message.is_empty());

    let resp = subscribe(&mut client, 7, "newTx").await;
    assert!(resp.ok);
    assert_eq!(conn.state(), ConnState::Open);
}

#[tokio::test]
async fn test_unsupported_op_is_ignored() {
    let (conn, mut client, _runner) = running_connection(4006).await;

    send_json(&mut client, json!({ "op": 9, "id": 1, "topic": "newTx" })).await;
    let resp = subscribe(&mut client, 2, "newTx").await;
    // the first packet on the wire answers the second request
    assert_eq!(resp.id, 2);
    assert!(conn.is_subscribed(Topic::NewTx));
}

#[tokio::test]
async fn test_binary_frames_are_decoded_as_requests() {
    let (conn, mut client, _runner) = running_connection(4007).await;

    client
        .send(WsMessage::binary(
            br#"{"op":0,"id":11,"topic":"blockedTxHashes"}"#.to_vec(),
        ))
        .await
        .unwrap();
    let resp = next_response(&mut client).await;
    assert_eq!(resp.id, 11);
    assert!(conn.is_subscribed(Topic::BlockedTxHashes));
}

#[tokio::test]
async fn test_enqueue_send_preserves_order() {
    let (conn, mut client, _runner) = running_connection(4008).await;

    conn.enqueue_send(Arc::new(Packet::Transactions(vec![tx(1), tx(2), tx(3)])))
        .await
        .unwrap();
    conn.respond(5, true, "second").await.unwrap();
    conn.enqueue_send(Arc::new(Packet::BlockedTxHashes(vec![])))
        .await
        .unwrap();

    match next_packet(&mut client).await {
        Packet::Transactions(txs) => assert_eq!(txs.len(), 3),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(next_response(&mut client).await.message, "second");
    assert_eq!(
        next_packet(&mut client).await,
        Packet::BlockedTxHashes(vec![])
    );
}

#[tokio::test]
async fn test_concurrent_stop_closes_once() {
    let (conn, mut client, runner) = running_connection(4009).await;

    let mut stops = Vec::new();
    for _ in 0..16 {
        let conn = Arc::clone(&conn);
        stops.push(tokio::spawn(async move { conn.stop() }));
    }
    let mut performed = 0;
    for stop in stops {
        if stop.await.unwrap() {
            performed += 1;
        }
    }
    assert_eq!(performed, 1);
    assert!(!conn.stop());

    let terminated = runner.await.unwrap();
    assert!(matches!(terminated, Ok(Termination::Stopped)));

    expect_closed(&mut client).await;
    let conn_for_poll = Arc::clone(&conn);
    assert!(eventually(|| {
        let conn = Arc::clone(&conn_for_poll);
        async move { conn.state() == ConnState::Closed }
    })
    .await);
}

#[tokio::test]
async fn test_send_after_stop_fails_fast() {
    let (conn, _client, _runner) = running_connection(4010).await;

    assert!(conn.stop());
    let err = conn.respond(1, true, "late").await.unwrap_err();
    assert!(matches!(err, RelayError::ConnectionClosed));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_peer_close_terminates_cleanly() {
    let (conn, mut client, runner) = running_connection(4011).await;

    client.close(None).await.unwrap();
    let terminated = runner.await.unwrap();
    assert!(matches!(terminated, Ok(Termination::PeerClosed)));
    // run() does not stop the connection by itself
    assert_eq!(conn.state(), ConnState::Open);
    assert!(conn.stop());
}

#[tokio::test]
async fn test_stop_before_run() {
    let (server, mut client) = ws_pair().await;
    let conn = Connection::new(server, addr(4012));

    assert!(conn.stop());
    assert_eq!(conn.state(), ConnState::Closed);
    assert!(matches!(conn.run().await, Ok(Termination::Stopped)));
    expect_closed(&mut client).await;
}

#[tokio::test]
async fn test_direct_subscribe_calls_update_state() {
    let (conn, mut client, _runner) = running_connection(4013).await;

    conn.subscribe("newTx", 20).await.unwrap();
    conn.subscribe("bogus", 21).await.unwrap();
    conn.unsubscribe("newTx", 22).await.unwrap();

    let ids: Vec<(i64, bool)> = vec![
        next_response(&mut client).await,
        next_response(&mut client).await,
        next_response(&mut client).await,
    ]
    .into_iter()
    .map(|r| (r.id, r.ok))
    .collect();
    assert_eq!(ids, vec![(20, true), (21, false), (22, true)]);
    assert!(!conn.is_subscribed(Topic::NewTx));
    expect_silence(&mut client).await;
}
