//! Outbound message dispatch.
//!
//! A composed message becomes exactly one `chatMessage` event on the active
//! session. The dispatcher never appends to the local log: the sender's own
//! copy, if the server echoes it, comes back through the router.

use crate::session::SessionContext;
use crate::transport::{OutboundEvent, TransportHandle};

/// Why a send was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No active session, or no local identity
    NoSession,
    /// The draft is empty or whitespace only
    EmptyBody,
}

/// Outcome of a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// One event was emitted and the draft cleared
    Sent,
    /// Preconditions failed; draft left as is
    Skipped(SkipReason),
    /// The transport refused the event; draft left as is
    Failed,
}

/// Send the draft to the active conversation's peer.
///
/// Never fails to the caller: precondition and transport failures are
/// reported through [`SendOutcome`] and leave `draft` untouched so the user
/// can retry. The body is sent exactly as typed.
pub async fn send<H: TransportHandle>(context: &mut SessionContext<H>, draft: &mut String) -> SendOutcome {
    if draft.trim().is_empty() {
        return SendOutcome::Skipped(SkipReason::EmptyBody);
    }

    let Some(sender_id) = context.identity().map(|identity| identity.user_id.clone()) else {
        return SendOutcome::Skipped(SkipReason::NoSession);
    };
    let Some(active) = context.active_mut() else {
        log::debug!("Send skipped: no active session");
        return SendOutcome::Skipped(SkipReason::NoSession);
    };

    let event = OutboundEvent::chat(
        active.key().clone(),
        draft.as_str(),
        sender_id,
        active.peer().id.clone(),
    );
    let session = active.id();

    match active.handle_mut().emit(event).await {
        Ok(()) => {
            draft.clear();
            SendOutcome::Sent
        }
        Err(e) => {
            log::error!("Send on {} failed: {}", session, e);
            SendOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::resolver::test_tokens::token_with_claims;
    use crate::identity::{Participant, UserId};
    use crate::session::{room_key, SessionManager};
    use crate::transport::{MemoryConnector, TransportLog};
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn active_manager() -> (SessionManager<MemoryConnector>, TransportLog) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new(tx);
        let log = connector.log();
        let mut manager = SessionManager::new(connector);
        let token = token_with_claims(&json!({ "id": 1 }));
        manager.authenticate(Some(&token)).await.unwrap();
        manager
            .select_conversation(Participant::new(UserId::numeric(2), "Bob"))
            .await
            .unwrap();
        (manager, log)
    }

    #[tokio::test]
    async fn test_send_emits_one_chat_message() {
        let (mut manager, log) = active_manager().await;
        let mut draft = "yo".to_string();

        let outcome = send(manager.context_mut(), &mut draft).await;

        assert_eq!(outcome, SendOutcome::Sent);
        assert!(draft.is_empty());
        let key = room_key(&UserId::numeric(1), &UserId::numeric(2)).unwrap();
        let emitted = log.emitted().await;
        assert_eq!(emitted.len(), 2);
        assert_eq!(
            emitted[1],
            OutboundEvent::chat(key, "yo", UserId::numeric(1), UserId::numeric(2))
        );
        assert!(manager.context().active().unwrap().messages().is_empty());
    }

    #[tokio::test]
    async fn test_blank_drafts_are_skipped() {
        let (mut manager, log) = active_manager().await;

        for text in ["", "   ", "\n\t"] {
            let mut draft = text.to_string();
            let outcome = send(manager.context_mut(), &mut draft).await;
            assert_eq!(outcome, SendOutcome::Skipped(SkipReason::EmptyBody));
            assert_eq!(draft, text);
        }
        assert_eq!(log.emitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_session_keeps_draft() {
        let (mut manager, log) = active_manager().await;
        manager.teardown().await;

        let mut draft = "hello".to_string();
        let outcome = send(manager.context_mut(), &mut draft).await;

        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::NoSession));
        assert_eq!(draft, "hello");
        assert_eq!(log.emitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_draft() {
        let (mut manager, _log) = active_manager().await;
        manager.connector().set_fail_emits(true);

        let mut draft = "hello".to_string();
        assert_eq!(send(manager.context_mut(), &mut draft).await, SendOutcome::Failed);
        assert_eq!(draft, "hello");
    }

    #[tokio::test]
    async fn test_body_sent_untrimmed() {
        let (mut manager, log) = active_manager().await;
        let mut draft = "  spaced  ".to_string();

        send(manager.context_mut(), &mut draft).await;

        match log.emitted().await.last() {
            Some(OutboundEvent::ChatMessage { message, .. }) => assert_eq!(message, "  spaced  "),
            other => panic!("unexpected {other:?}"),
        }
    }
}
