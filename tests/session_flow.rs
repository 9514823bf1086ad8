//! End-to-end conversation flows over the in-memory transport.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use direct_messenger::{
    directory::StaticDirectory,
    session::{send, Phase, Router, SendOutcome},
    transport::{Delivery, InboundEvent, MemoryConnector, MessageEvent, NotificationEvent, TransportRecord},
    ChatClient, ClientEvent, ClientUpdate, OutboundEvent, Participant, SessionManager, UserId,
};
use serde_json::json;
use tokio::sync::mpsc;

fn token_for(id: i64) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(json!({ "id": id }).to_string())
    )
}

fn message_from(sender: i64, recipient: i64, body: &str) -> InboundEvent {
    InboundEvent::Message(MessageEvent {
        room_key: format!("{}_{}", sender.min(recipient), sender.max(recipient)),
        sender_id: UserId::numeric(sender),
        recipient_id: UserId::numeric(recipient),
        body: body.to_string(),
        sender_display_name: format!("user{sender}"),
        sender_avatar_ref: String::new(),
    })
}

#[tokio::test]
async fn test_open_receive_and_send() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector::new(tx);
    let log = connector.log();
    let mut manager = SessionManager::new(connector.clone());
    let mut router = Router::new();

    manager.authenticate(Some(&token_for(1))).await.unwrap();
    manager
        .select_conversation(Participant::new(UserId::numeric(2), "Bob"))
        .await
        .unwrap();

    assert_eq!(manager.phase(), Phase::Active);
    let active = manager.context().active().unwrap();
    assert_eq!(active.key().as_str(), "1_2");
    assert_eq!(
        log.emitted().await,
        vec![OutboundEvent::JoinRoom {
            room_key: active.key().clone(),
            user_id: UserId::numeric(1),
        }]
    );

    assert!(connector.deliver(message_from(2, 1, "hi")).await);
    let delivery = rx.recv().await.unwrap();
    router.on_transport_event(manager.context_mut(), delivery);
    let bodies: Vec<_> = manager
        .context()
        .active()
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.body.clone())
        .collect();
    assert_eq!(bodies, ["hi"]);

    let mut draft = "yo".to_string();
    assert_eq!(send(manager.context_mut(), &mut draft).await, SendOutcome::Sent);

    let emitted = log.emitted().await;
    assert_eq!(emitted.len(), 2);
    assert!(matches!(
        &emitted[1],
        OutboundEvent::ChatMessage { message, sender_id, recipient_id, .. }
            if message == "yo" && *sender_id == UserId::numeric(1) && *recipient_id == UserId::numeric(2)
    ));
    assert_eq!(manager.context().active().unwrap().messages().len(), 1);
}

#[tokio::test]
async fn test_switch_closes_previous_connection_first() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector::new(tx);
    let log = connector.log();
    let mut manager = SessionManager::new(connector);

    manager.authenticate(Some(&token_for(5))).await.unwrap();
    for peer in [2, 9, 2] {
        manager
            .select_conversation(Participant::new(UserId::numeric(peer), format!("user{peer}")))
            .await
            .unwrap();
    }

    let records = log.records().await;
    let mut open = 0i32;
    for record in &records {
        match record {
            TransportRecord::Opened { .. } => open += 1,
            TransportRecord::Closed { .. } => open -= 1,
            TransportRecord::Emitted { .. } => {}
        }
        assert!(open <= 1, "two connections open at once: {records:?}");
    }

    let keys: Vec<_> = records
        .iter()
        .filter_map(|record| match record {
            TransportRecord::Opened { room_key, .. } => Some(room_key.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(keys, ["2_5", "5_9", "2_5"]);
}

#[tokio::test]
async fn test_events_from_closed_session_never_reach_new_log() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector::new(tx);
    let mut manager = SessionManager::new(connector.clone());
    let mut router = Router::new();

    manager.authenticate(Some(&token_for(1))).await.unwrap();
    let first = manager
        .select_conversation(Participant::new(UserId::numeric(2), "Bob"))
        .await
        .unwrap()
        .session_id();
    manager
        .select_conversation(Participant::new(UserId::numeric(3), "Carol"))
        .await
        .unwrap();

    connector.push(first, message_from(2, 1, "late"));
    let delivery: Delivery = rx.recv().await.unwrap();
    router.on_transport_event(manager.context_mut(), delivery);

    assert!(manager.context().active().unwrap().messages().is_empty());
}

#[tokio::test]
async fn test_client_discards_superseded_lookup() {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector::new(tx);
    let log = connector.log();
    let directory = StaticDirectory::new([
        Participant::new(UserId::numeric(2), "Bob"),
        Participant::new(UserId::numeric(3), "Carol"),
    ]);

    let mut client = ChatClient::new(connector, directory, rx, 8);
    client.authenticate(Some(&token_for(1))).await.unwrap();
    let mut updates = client.subscribe();
    let events = client.sender();

    // Both selections are queued before the loop starts, so the second one
    // always supersedes the first lookup.
    events.send(ClientEvent::SelectPeer(UserId::numeric(2))).await.unwrap();
    events.send(ClientEvent::SelectPeer(UserId::numeric(3))).await.unwrap();
    let runner = tokio::spawn(async move {
        client.run().await;
        client
    });

    match updates.recv().await.unwrap() {
        ClientUpdate::ConversationOpened { room_key, .. } => assert_eq!(room_key, "1_3"),
        other => panic!("unexpected update {other:?}"),
    }

    events.send(ClientEvent::Shutdown).await.unwrap();
    let client = runner.await.unwrap();

    assert_eq!(log.opens().await, 1);
    assert_eq!(client.manager().phase(), Phase::Idle);
}

#[tokio::test]
async fn test_notifications_survive_conversation_switch() {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector::new(tx);
    let log = connector.log();
    let mut client = ChatClient::new(connector, StaticDirectory::default(), rx, 8);
    client.authenticate(Some(&token_for(1))).await.unwrap();

    client
        .select_participant(Participant::new(UserId::numeric(2), "Bob"))
        .await;
    let first = client.manager().context().active().unwrap().id();

    client
        .handle_event(ClientEvent::Inbound(Delivery {
            session: first,
            event: InboundEvent::Notification(NotificationEvent {
                recipient_id: UserId::numeric(1),
                payload: json!({ "type": "like" }),
            }),
        }))
        .await;
    client
        .handle_event(ClientEvent::Inbound(Delivery {
            session: first,
            event: message_from(2, 1, "hi"),
        }))
        .await;
    assert_eq!(client.messages().len(), 1);

    client
        .select_participant(Participant::new(UserId::numeric(3), "Carol"))
        .await;

    let active = client.manager().context().active().unwrap();
    assert_eq!(active.peer().id, UserId::numeric(3));
    assert_ne!(active.id(), first);
    assert_eq!(log.closes().await, 1);
    assert_eq!(client.notifications().len(), 1);
    assert_eq!(client.notifications()[0].payload["type"], "like");
    assert!(client.messages().is_empty());
}
