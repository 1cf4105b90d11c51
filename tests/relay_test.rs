use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use warp::ws::Message;

use uplink_relay::assistant::{Assistant, TextGenerator};
use uplink_relay::config::ServerConfig;
use uplink_relay::core::connection::Connection;
use uplink_relay::core::server::{RelayServer, SharedRelayServer};
use uplink_relay::error::Result;

type Inbox = mpsc::UnboundedReceiver<Message>;

async fn connect(server: &SharedRelayServer, id: &str, identity: &str) -> Inbox {
    let (tx, rx) = mpsc::unbounded_channel();
    server
        .register_connection(Connection::with_id(id.to_string(), tx), identity.to_string())
        .await
        .unwrap();
    rx
}

fn drain(inbox: &mut Inbox) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        if message.is_close() {
            frames.push(json!({ "event": "close" }));
        } else {
            frames.push(serde_json::from_str(message.to_str().unwrap()).unwrap());
        }
    }
    frames
}

async fn create_room(server: &SharedRelayServer, id: &str, inbox: &mut Inbox, admin: &str) -> String {
    let frame = json!({"event": "createRoom", "data": {"username": admin, "roomName": "Grid", "passwordHash": "pw"}});
    server.handle_frame(id, &frame.to_string()).await;
    let frames = drain(inbox);
    frames[0]["data"]["roomId"].as_str().unwrap().to_string()
}

fn join_frame(username: &str, room_id: &str) -> String {
    json!({"event": "joinRoom", "data": {"username": username, "roomId": room_id, "passwordHash": "pw"}})
        .to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_claim_a_name_once() {
    let server = RelayServer::new(ServerConfig::default(), Assistant::disabled());
    let mut admin = connect(&server, "admin", "10.0.0.1").await;
    let room_id = create_room(&server, "admin", &mut admin, "morpheus").await;

    let mut inboxes = Vec::new();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let id = format!("c{}", i);
        inboxes.push(connect(&server, &id, &format!("10.1.0.{}", i)).await);
        let server = server.clone();
        let frame = join_frame("neo", &room_id);
        tasks.push(tokio::spawn(async move {
            server.handle_frame(&id, &frame).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut joined = 0;
    let mut taken = 0;
    for inbox in inboxes.iter_mut() {
        for frame in drain(inbox) {
            match frame["event"].as_str() {
                Some("joined") => joined += 1,
                Some("error") => {
                    assert_eq!(frame["data"]["text"], "Username taken");
                    taken += 1;
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }
    assert_eq!(joined, 1);
    assert_eq!(taken, 15);
}

#[tokio::test(start_paused = true)]
async fn test_connections_from_one_address_share_a_budget() {
    let server = RelayServer::new(ServerConfig::default(), Assistant::disabled());
    let mut first = connect(&server, "a", "192.0.2.10").await;
    let mut second = connect(&server, "b", "192.0.2.10").await;
    let mut elsewhere = connect(&server, "c", "192.0.2.99").await;

    create_room(&server, "a", &mut first, "x").await;
    create_room(&server, "a", &mut first, "x").await;
    create_room(&server, "b", &mut second, "y").await;

    let frame = json!({"event": "createRoom", "data": {"username": "y", "roomName": "n", "passwordHash": "p"}});
    server.handle_frame("b", &frame.to_string()).await;
    assert_eq!(drain(&mut second)[0]["event"], "error");

    // The ban covers the other connection from the same address
    server.handle_frame("a", &join_frame("x", "00000000")).await;
    assert_eq!(drain(&mut first), vec![json!({"event": "close"})]);

    create_room(&server, "c", &mut elsewhere, "z").await;

    // After the ban and the create window pass, the address may create again
    tokio::time::sleep(Duration::from_secs(61)).await;
    server.handle_frame("b", &frame.to_string()).await;
    assert_eq!(drain(&mut second)[0]["event"], "roomCreated");
}

struct CannedGenerator(&'static str);

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn test_assistant_answers_are_forwarded() {
    let assistant = Assistant::new(
        Arc::new(CannedGenerator(
            "Here: {\"username\": \"Cipher_9\", \"backstory\": \"Escaped the mainframe.\"}",
        )),
        Duration::from_secs(5),
    );
    let server = RelayServer::new(ServerConfig::default(), assistant);
    let mut inbox = connect(&server, "a", "10.0.0.1").await;

    server.handle_frame("a", r#"{"event":"generateAlias"}"#).await;
    assert_eq!(
        drain(&mut inbox),
        vec![json!({"event": "aliasGenerated", "data": {"username": "Cipher_9", "backstory": "Escaped the mainframe."}})]
    );

    server
        .handle_frame("a", r#"{"event":"scanUrl","data":{"url":"notaurl"}}"#)
        .await;
    assert_eq!(
        drain(&mut inbox),
        vec![json!({"event": "scanResult", "data": {"url": "notaurl", "status": "ERROR", "reason": "Invalid URL"}})]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ai_budget_is_five_per_minute() {
    let server = RelayServer::new(ServerConfig::default(), Assistant::disabled());
    let mut inbox = connect(&server, "a", "10.0.0.1").await;

    for _ in 0..5 {
        server.handle_frame("a", r#"{"event":"generateRoomName"}"#).await;
    }
    let frames = drain(&mut inbox);
    assert_eq!(frames.len(), 5);
    assert!(frames
        .iter()
        .all(|f| f["data"]["name"].as_str().unwrap().starts_with("Node_")));

    server.handle_frame("a", r#"{"event":"generateRoomName"}"#).await;
    assert_eq!(
        drain(&mut inbox),
        vec![json!({"event": "error", "data": {"text": "RATE LIMIT: Too many requests. Wait 30s."}})]
    );
}
