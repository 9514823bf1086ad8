//! Client event loop and coordination.
//!
//! [`ChatClient`] is the single owner of all mutable messaging state. User
//! actions and transport deliveries arrive as discrete events and are handled
//! one at a time; directory lookups run in spawned tasks and report back
//! through the same queue, tagged with the lookup token that requested them.

use crate::{
    directory::Directory,
    identity::{Participant, UserId},
    session::{self, LookupToken, Phase, Router, SendOutcome, SessionManager},
    transport::{Connector, Delivery, MessageEvent, NotificationEvent},
    utils::{ErrorKind, MessengerError, Result},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Error text shown when a conversation cannot be started
pub const UNAUTHENTICATED_TEXT: &str = "cannot start conversation";

/// Events processed by the client loop
#[derive(Debug)]
pub enum ClientEvent {
    /// User picked a peer by id; resolve it, then open the conversation
    SelectPeer(UserId),
    /// A directory lookup finished
    LookupCompleted {
        /// Token the lookup was issued under
        token: LookupToken,
        /// Lookup result
        result: Result<Participant>,
    },
    /// Transport delivered an inbound event
    Inbound(Delivery),
    /// User edited the compose field
    Compose(String),
    /// User pressed send
    Send,
    /// Leave the current conversation
    Teardown,
    /// Stop the loop
    Shutdown,
}

impl From<Delivery> for ClientEvent {
    fn from(delivery: Delivery) -> Self {
        Self::Inbound(delivery)
    }
}

/// Observable client changes, for whoever renders the client
#[derive(Debug, Clone)]
pub enum ClientUpdate {
    /// A conversation became active
    ConversationOpened {
        /// The peer
        peer: Participant,
        /// Conversation key
        room_key: String,
    },
    /// The active conversation was closed
    ConversationClosed,
    /// A message was appended to the conversation log
    MessageReceived(MessageEvent),
    /// A notification was appended
    NotificationReceived(NotificationEvent),
    /// The compose field was sent and cleared
    MessageSent,
    /// Error text changed
    Error(String),
}

/// Single-threaded owner of the messaging state
pub struct ChatClient<C: Connector, D> {
    manager: SessionManager<C>,
    router: Router,
    directory: Arc<D>,
    draft: String,
    error_text: Option<String>,
    queue_size: usize,
    // Strong handle held only while the loop is not running; lookups post
    // back through the weak one so they never keep a finished loop alive.
    events_tx: Option<mpsc::Sender<ClientEvent>>,
    events_weak: mpsc::WeakSender<ClientEvent>,
    events_rx: mpsc::Receiver<ClientEvent>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    updates: Option<mpsc::UnboundedSender<ClientUpdate>>,
}

impl<C, D> ChatClient<C, D>
where
    C: Connector,
    D: Directory + 'static,
{
    /// Create a client. `deliveries` must be the receiving end of the channel
    /// the connector pushes inbound events into.
    pub fn new(
        connector: C,
        directory: D,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        queue_size: usize,
    ) -> Self {
        let queue_size = queue_size.max(1);
        let (events_tx, events_rx) = mpsc::channel(queue_size);
        Self {
            manager: SessionManager::new(connector),
            router: Router::new(),
            directory: Arc::new(directory),
            draft: String::new(),
            error_text: None,
            queue_size,
            events_weak: events_tx.downgrade(),
            events_tx: Some(events_tx),
            events_rx,
            deliveries,
            updates: None,
        }
    }

    /// Sender for feeding user actions into the loop.
    ///
    /// [`ChatClient::run`] returns once every sender obtained here is dropped.
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        match &self.events_tx {
            Some(events) => events.clone(),
            None => closed_sender(),
        }
    }

    /// Subscribe to client updates
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ClientUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    /// Install the local identity from a credential
    pub async fn authenticate(&mut self, credential: Option<&str>) -> Result<UserId> {
        let previous = self.manager.identity().map(|identity| identity.user_id.clone());
        let result = self
            .manager
            .authenticate(credential)
            .await
            .map(|identity| identity.user_id.clone());

        let current = result.as_ref().ok();
        if previous.as_ref() != current {
            self.router.clear_notifications();
        }
        if result.is_ok() {
            self.set_error(None);
        }
        result
    }

    /// Session manager (read-only view)
    pub fn manager(&self) -> &SessionManager<C> {
        &self.manager
    }

    /// Messages of the active conversation
    pub fn messages(&self) -> &[MessageEvent] {
        self.manager
            .context()
            .active()
            .map(|active| active.messages())
            .unwrap_or_default()
    }

    /// All notifications received under the current identity
    pub fn notifications(&self) -> &[NotificationEvent] {
        self.router.notifications()
    }

    /// Current compose field contents
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Error text to show, if any
    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }

    /// Run until [`ClientEvent::Shutdown`] or until every sender handed out
    /// by [`ChatClient::sender`] is gone. The active session is torn down on
    /// exit, and the client can be run again afterwards.
    pub async fn run(&mut self) {
        log::info!("Chat client loop started");
        self.events_tx = None;

        loop {
            // Unbiased: neither user input nor deliveries can starve the other.
            let event = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                Some(delivery) = self.deliveries.recv() => ClientEvent::Inbound(delivery),
            };

            if !self.handle_event(event).await {
                break;
            }
        }

        self.manager.teardown().await;
        self.reopen_events();
        log::info!("Chat client loop stopped");
    }

    fn reopen_events(&mut self) {
        match self.events_weak.upgrade() {
            Some(events) => self.events_tx = Some(events),
            None => {
                let (events_tx, events_rx) = mpsc::channel(self.queue_size);
                self.events_weak = events_tx.downgrade();
                self.events_tx = Some(events_tx);
                self.events_rx = events_rx;
            }
        }
    }

    /// Handle one event. Returns false when the loop should stop.
    pub async fn handle_event(&mut self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::SelectPeer(peer_id) => self.start_lookup(peer_id),
            ClientEvent::LookupCompleted { token, result } => {
                let outcome = self.manager.complete_lookup(token, result).await;
                self.after_selection(outcome).await;
            }
            ClientEvent::Inbound(delivery) => self.route(delivery),
            ClientEvent::Compose(text) => self.draft = text,
            ClientEvent::Send => self.send().await,
            ClientEvent::Teardown => {
                let was_active = self.manager.phase() == Phase::Active;
                self.manager.teardown().await;
                if was_active {
                    self.notify(ClientUpdate::ConversationClosed);
                }
            }
            ClientEvent::Shutdown => return false,
        }
        true
    }

    /// Open a conversation with an already resolved participant
    pub async fn select_participant(&mut self, peer: Participant) {
        let outcome = self.manager.select_conversation(peer).await;
        self.after_selection(outcome).await;
    }

    fn start_lookup(&mut self, peer_id: UserId) {
        let token = self.manager.begin_lookup(peer_id.clone());
        let Some(events) = self.events_weak.upgrade() else {
            log::debug!("Event queue closed, lookup for {} not started", peer_id);
            return;
        };
        let directory = Arc::clone(&self.directory);

        tokio::spawn(async move {
            let result = directory.find_participant(&peer_id).await;
            if events
                .send(ClientEvent::LookupCompleted { token, result })
                .await
                .is_err()
            {
                log::debug!("Client gone before lookup for {} finished", peer_id);
            }
        });
    }

    async fn after_selection(&mut self, outcome: Result<session::Selection>) {
        match outcome {
            Ok(session::Selection::Opened(_)) => {
                self.set_error(None);
                if let Some(active) = self.manager.context().active() {
                    let update = ClientUpdate::ConversationOpened {
                        peer: active.peer().clone(),
                        room_key: active.key().to_string(),
                    };
                    self.notify(update);
                }
            }
            Ok(session::Selection::Unchanged(_)) => {}
            Err(e) => self.report(e),
        }
    }

    fn route(&mut self, delivery: Delivery) {
        let event = delivery.event.clone();
        match self.router.on_transport_event(self.manager.context_mut(), delivery) {
            session::Routed::Message => {
                if let crate::transport::InboundEvent::Message(message) = event {
                    self.notify(ClientUpdate::MessageReceived(message));
                }
            }
            session::Routed::Notification => {
                if let crate::transport::InboundEvent::Notification(notification) = event {
                    self.notify(ClientUpdate::NotificationReceived(notification));
                }
            }
            session::Routed::Discarded(_) => {}
        }
    }

    async fn send(&mut self) {
        if session::send(self.manager.context_mut(), &mut self.draft).await == SendOutcome::Sent {
            self.notify(ClientUpdate::MessageSent);
        }
    }

    fn report(&mut self, error: MessengerError) {
        match error.kind() {
            ErrorKind::Unauthenticated => {
                log::warn!("{}: {}", UNAUTHENTICATED_TEXT, error);
                self.set_error(Some(UNAUTHENTICATED_TEXT.to_string()));
            }
            ErrorKind::PeerUnresolved => log::debug!("Conversation not opened: {}", error),
            ErrorKind::TransportUnavailable => log::error!("Transport unavailable: {}", error),
            ErrorKind::StaleEventDiscarded => log::debug!("{}", error),
            ErrorKind::Other => log::error!("Conversation not opened: {}", error),
        }
    }

    fn set_error(&mut self, text: Option<String>) {
        if self.error_text != text {
            if let Some(text) = &text {
                self.notify(ClientUpdate::Error(text.clone()));
            }
            self.error_text = text;
        }
    }

    fn notify(&self, update: ClientUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }
}

/// A sender whose receiver is already gone; every send fails
fn closed_sender() -> mpsc::Sender<ClientEvent> {
    mpsc::channel(1).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::resolver::test_tokens::token_with_claims;
    use crate::transport::{InboundEvent, MemoryConnector, OutboundEvent, TransportLog};
    use crate::utils::DirectoryError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Directory with per-peer artificial latency
    struct SlowDirectory {
        delays: HashMap<String, Duration>,
    }

    #[async_trait]
    impl Directory for SlowDirectory {
        async fn find_participant(&self, id: &UserId) -> Result<Participant> {
            if let Some(delay) = self.delays.get(id.as_str()) {
                tokio::time::sleep(*delay).await;
            }
            if id.as_str() == "404" {
                return Err(DirectoryError::NotFound {
                    id: id.to_string(),
                    status: 404,
                }
                .into());
            }
            Ok(Participant::new(id.clone(), format!("user{id}")))
        }

        async fn search(&self, _query: &str) -> Result<Vec<Participant>> {
            Ok(Vec::new())
        }
    }

    fn client(
        delays: &[(&str, u64)],
    ) -> (ChatClient<MemoryConnector, SlowDirectory>, MemoryConnector, TransportLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new(tx);
        let log = connector.log();
        let directory = SlowDirectory {
            delays: delays
                .iter()
                .map(|(id, ms)| (id.to_string(), Duration::from_millis(*ms)))
                .collect(),
        };
        (ChatClient::new(connector.clone(), directory, rx, 16), connector, log)
    }

    async fn next_lookup(client: &mut ChatClient<MemoryConnector, SlowDirectory>) -> ClientEvent {
        client.events_rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_select_peer_opens_conversation() {
        let (mut client, _connector, log) = client(&[]);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();

        client.handle_event(ClientEvent::SelectPeer(UserId::numeric(2))).await;
        let completed = next_lookup(&mut client).await;
        client.handle_event(completed).await;

        assert_eq!(client.manager().phase(), Phase::Active);
        assert_eq!(log.opens().await, 1);
    }

    #[tokio::test]
    async fn test_late_lookup_does_not_open_session() {
        let (mut client, _connector, log) = client(&[("2", 200)]);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();

        client.handle_event(ClientEvent::SelectPeer(UserId::numeric(2))).await;
        client.handle_event(ClientEvent::SelectPeer(UserId::numeric(3))).await;

        // Peer 3 resolves first, then the stale answer for peer 2 arrives.
        let first = next_lookup(&mut client).await;
        client.handle_event(first).await;
        let second = next_lookup(&mut client).await;
        client.handle_event(second).await;

        let records = log.records().await;
        assert_eq!(log.opens().await, 1);
        assert!(matches!(
            &records[0],
            crate::transport::TransportRecord::Opened { room_key, .. } if room_key.as_str() == "1_3"
        ));
        assert_eq!(
            client.manager().context().active().unwrap().peer().id,
            UserId::numeric(3)
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_sets_error_text() {
        let (mut client, _connector, log) = client(&[]);
        assert!(client.authenticate(None).await.is_err());

        client
            .select_participant(Participant::new(UserId::numeric(2), "Bob"))
            .await;

        assert_eq!(client.error_text(), Some(UNAUTHENTICATED_TEXT));
        assert_eq!(log.opens().await, 0);
    }

    #[tokio::test]
    async fn test_unresolved_peer_is_silent() {
        let (mut client, _connector, log) = client(&[]);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();

        client.handle_event(ClientEvent::SelectPeer(UserId::numeric(404))).await;
        let completed = next_lookup(&mut client).await;
        client.handle_event(completed).await;

        assert!(client.error_text().is_none());
        assert_eq!(client.manager().phase(), Phase::Idle);
        assert_eq!(log.opens().await, 0);
    }

    #[tokio::test]
    async fn test_run_loop_routes_and_sends() {
        let (mut client, connector, log) = client(&[]);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();
        let mut updates = client.subscribe();
        let events = client.sender();

        let runner = tokio::spawn(async move {
            client.run().await;
            client
        });

        events.send(ClientEvent::SelectPeer(UserId::numeric(2))).await.unwrap();
        assert!(matches!(
            updates.recv().await.unwrap(),
            ClientUpdate::ConversationOpened { .. }
        ));

        connector
            .deliver(InboundEvent::Message(MessageEvent {
                room_key: "1_2".to_string(),
                sender_id: UserId::numeric(2),
                recipient_id: UserId::numeric(1),
                body: "hi".to_string(),
                sender_display_name: "user2".to_string(),
                sender_avatar_ref: String::new(),
            }))
            .await;
        assert!(matches!(
            updates.recv().await.unwrap(),
            ClientUpdate::MessageReceived(ref m) if m.body == "hi"
        ));

        events.send(ClientEvent::Compose("yo".to_string())).await.unwrap();
        events.send(ClientEvent::Send).await.unwrap();
        assert!(matches!(updates.recv().await.unwrap(), ClientUpdate::MessageSent));

        events.send(ClientEvent::Shutdown).await.unwrap();
        let client = runner.await.unwrap();

        assert_eq!(client.messages().len(), 0);
        assert!(client.draft().is_empty());
        assert_eq!(log.closes().await, 1);
        assert!(matches!(
            log.emitted().await.last(),
            Some(OutboundEvent::ChatMessage { message, .. }) if message == "yo"
        ));
    }

    #[tokio::test]
    async fn test_run_stops_when_all_senders_dropped() {
        let (mut client, _connector, log) = client(&[]);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();
        client
            .select_participant(Participant::new(UserId::numeric(2), "Bob"))
            .await;
        drop(client.sender());

        tokio::time::timeout(Duration::from_secs(2), client.run())
            .await
            .expect("loop kept running without senders");
        assert_eq!(log.closes().await, 1);

        // A fresh sender drives the next run.
        let events = client.sender();
        events.send(ClientEvent::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), client.run())
            .await
            .expect("second run did not see shutdown");
    }

    #[tokio::test]
    async fn test_deliveries_not_starved_by_user_input() {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new(tx);
        let directory = SlowDirectory {
            delays: HashMap::new(),
        };
        let mut client = ChatClient::new(connector.clone(), directory, rx, 64);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();
        client
            .select_participant(Participant::new(UserId::numeric(2), "Bob"))
            .await;
        let mut updates = client.subscribe();

        let events = client.sender();
        for n in 0..32 {
            events.send(ClientEvent::Compose(format!("draft {n}"))).await.unwrap();
        }
        events.send(ClientEvent::Shutdown).await.unwrap();
        connector
            .deliver(InboundEvent::Message(MessageEvent {
                room_key: "1_2".to_string(),
                sender_id: UserId::numeric(2),
                recipient_id: UserId::numeric(1),
                body: "hi".to_string(),
                sender_display_name: String::new(),
                sender_avatar_ref: String::new(),
            }))
            .await;

        client.run().await;

        let mut received = false;
        while let Ok(update) = updates.try_recv() {
            received |= matches!(update, ClientUpdate::MessageReceived(_));
        }
        assert!(received, "delivery was never routed before shutdown");
    }

    #[tokio::test]
    async fn test_delivery_after_teardown_is_dropped() {
        let (mut client, connector, _log) = client(&[]);
        client
            .authenticate(Some(&token_with_claims(&json!({"id": 1}))))
            .await
            .unwrap();
        client
            .select_participant(Participant::new(UserId::numeric(2), "Bob"))
            .await;
        let session = client.manager().context().active().unwrap().id();

        client.handle_event(ClientEvent::Teardown).await;
        connector.push(
            session,
            InboundEvent::Message(MessageEvent {
                room_key: "1_2".to_string(),
                sender_id: UserId::numeric(2),
                recipient_id: UserId::numeric(1),
                body: "late".to_string(),
                sender_display_name: String::new(),
                sender_avatar_ref: String::new(),
            }),
        );
        let delivery = client.deliveries.recv().await.unwrap();
        assert_eq!(delivery.session, session);
        client.handle_event(delivery.into()).await;

        assert!(client.messages().is_empty());
    }
}
