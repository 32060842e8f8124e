//! Routes inbound messages by type.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, trace, warn};

use hasslife_protocol::messages::{
    DeviceControlRequest, ErrorPayload, SyncDeviceRequest, UpdateEntitysPayload,
};
use hasslife_protocol::{Message, MessageType};

use crate::provider::ServiceInvoker;
use crate::queue::OutboundQueue;
use crate::session::Session;
use crate::state_sync::{SnapshotRequest, StateSyncManager};

/// What the read pump should do after a message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// The peer rejected this client; stop without reconnecting.
    Terminate { reason: String },
}

/// Maps each inbound [`MessageType`] to its handling.
///
/// Dispatch is synchronous so the read pump never waits on a handler.
/// Device control rows run on their own task.
pub struct Dispatcher {
    session: Arc<Session>,
    sync: Arc<StateSyncManager>,
    invoker: Arc<dyn ServiceInvoker>,
    queue: OutboundQueue,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        sync: Arc<StateSyncManager>,
        invoker: Arc<dyn ServiceInvoker>,
        queue: OutboundQueue,
    ) -> Self {
        Self {
            session,
            sync,
            invoker,
            queue,
        }
    }

    pub fn dispatch(&self, msg: Message) -> Disposition {
        trace!(msg_type = %msg.msg_type, "dispatching message");
        match msg.msg_type {
            MessageType::Auth => self.handle_auth(msg),
            MessageType::SyncDevice => self.handle_sync_device(msg),
            MessageType::DeviceControl => self.handle_device_control(msg),
            MessageType::UpdateEntitys => self.handle_update_entitys(msg),
            MessageType::Error => return self.handle_error(msg),
            MessageType::Pong => self.session.mark_pong(),
            MessageType::Ping | MessageType::SyncState => {
                debug!(msg_type = %msg.msg_type, "ignoring client-bound message type");
            }
            MessageType::Unknown => debug!("ignoring unknown message type"),
        }
        Disposition::Continue
    }

    fn handle_auth(&self, msg: Message) {
        match Message::new(MessageType::Auth, &self.session.login().payload()) {
            Ok(reply) => {
                if self.queue.enqueue(reply.with_request_id(msg.request_id)).is_ok() {
                    info!(username = %self.session.login().username, "auth reply queued");
                }
            }
            Err(e) => warn!(error = %e, "failed to build auth reply"),
        }
    }

    fn handle_sync_device(&self, msg: Message) {
        let req: SyncDeviceRequest = match msg.parse_payload() {
            Ok(r) => r,
            Err(e) => {
                warn!(msg_type = %msg.msg_type, error = %e, "invalid payload, ignoring");
                return;
            }
        };
        self.sync.sync_all(SnapshotRequest {
            page: req.page,
            page_size: req.page_size,
            search_keyword: req.search_keyword,
            request_id: msg.request_id,
            force: true,
        });
    }

    fn handle_device_control(&self, msg: Message) {
        let req: DeviceControlRequest = match msg.parse_payload() {
            Ok(r) => r,
            Err(e) => {
                warn!(msg_type = %msg.msg_type, error = %e, "invalid payload, ignoring");
                return;
            }
        };
        if req.rows.is_empty() {
            return;
        }

        let invoker = Arc::clone(&self.invoker);
        tokio::spawn(async move {
            let calls = req.rows.into_iter().map(|row| {
                let invoker = Arc::clone(&invoker);
                async move {
                    let domain = row.domain.clone();
                    let service = row.service.clone();
                    match invoker.invoke(row).await {
                        Ok(()) => debug!(%domain, %service, "service call completed"),
                        Err(e) => warn!(%domain, %service, error = %e, "service call failed"),
                    }
                }
            });
            join_all(calls).await;
        });
    }

    fn handle_update_entitys(&self, msg: Message) {
        let payload: UpdateEntitysPayload = match msg.parse_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(msg_type = %msg.msg_type, error = %e, "invalid payload, ignoring");
                return;
            }
        };
        let count = self
            .session
            .replace_tracked(payload.entity_ids.unwrap_or_default());
        info!(count, "tracked entity list updated");
    }

    fn handle_error(&self, msg: Message) -> Disposition {
        let reason = msg
            .parse_payload::<ErrorPayload>()
            .ok()
            .and_then(|p| p.msg)
            .unwrap_or_else(|| "unspecified error".to_string());
        warn!(%reason, "peer reported a terminal error");
        self.session.mark_terminal(reason.clone());
        Disposition::Terminate { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityWhitelist, SyncConfig};
    use crate::provider::MemoryStateProvider;
    use crate::queue::{QueueReceiver, outbound_queue};
    use crate::session::LoginInfo;
    use crate::test_support::RecordingInvoker;
    use hasslife_protocol::EntityState;
    use hasslife_protocol::messages::{LoginPayload, SyncDevicePayload};
    use serde_json::json;
    use std::time::Duration;

    fn setup(invoker: Arc<RecordingInvoker>) -> (Dispatcher, Arc<Session>, QueueReceiver) {
        let session = Arc::new(Session::new(LoginInfo::new("alice", "abc", "3.6")));
        let provider = Arc::new(MemoryStateProvider::with_entities([
            EntityState::new("light.kitchen", "on"),
            EntityState::new("switch.fan", "off"),
        ]));
        let (queue, rx) = outbound_queue(16);
        let sync = Arc::new(StateSyncManager::new(
            SyncConfig::default(),
            EntityWhitelist::default(),
            Arc::clone(&session),
            provider,
            queue.clone(),
        ));
        (
            Dispatcher::new(Arc::clone(&session), sync, invoker, queue),
            session,
            rx,
        )
    }

    fn msg(msg_type: MessageType, payload: serde_json::Value) -> Message {
        Message::new(msg_type, &payload).unwrap()
    }

    #[tokio::test]
    async fn auth_replies_with_login_and_request_id() {
        let (d, _, rx) = setup(Arc::new(RecordingInvoker::default()));
        let req = Message::bare(MessageType::Auth).with_request_id(Some("a1".into()));
        assert_eq!(d.dispatch(req), Disposition::Continue);

        let reply = rx.lock().await.try_recv().unwrap();
        assert_eq!(reply.msg_type, MessageType::Auth);
        assert_eq!(reply.request_id.as_deref(), Some("a1"));
        let login: LoginPayload = reply.parse_payload().unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.password, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[tokio::test]
    async fn update_entitys_replaces_tracked_set() {
        let (d, session, _rx) = setup(Arc::new(RecordingInvoker::default()));
        d.dispatch(msg(MessageType::UpdateEntitys, json!({"entity_ids": ["light.a", "light.b"]})));
        assert_eq!(session.tracked_entities(), vec!["light.a", "light.b"]);
        d.dispatch(msg(MessageType::UpdateEntitys, json!({})));
        assert!(session.tracked_entities().is_empty());
    }

    #[tokio::test]
    async fn sync_device_is_forced_and_echoes_request_id() {
        let (d, _, rx) = setup(Arc::new(RecordingInvoker::default()));
        for id in ["s1", "s2"] {
            let req = msg(MessageType::SyncDevice, json!({"SearchKeyword": "kit"}))
                .with_request_id(Some(id.into()));
            d.dispatch(req);
        }
        let mut guard = rx.lock().await;
        let first = guard.try_recv().unwrap();
        let second = guard.try_recv().unwrap();
        assert_eq!(first.request_id.as_deref(), Some("s1"));
        assert_eq!(second.request_id.as_deref(), Some("s2"));
        let payload: SyncDevicePayload = first.parse_payload().unwrap();
        assert_eq!(payload.total_count, 1);
        assert!(payload.list.contains("light.kitchen"));
    }

    #[tokio::test]
    async fn device_control_runs_every_row_despite_failures() {
        let invoker = Arc::new(RecordingInvoker::failing(["turn_off"]));
        let (d, _, _rx) = setup(invoker.clone());
        d.dispatch(msg(
            MessageType::DeviceControl,
            json!({"Rows": [
                {"domain": "light", "service": "turn_off", "data": {"entity_id": "light.kitchen"}},
                {"domain": "switch", "service": "toggle", "data": {"entity_id": "switch.fan"}}
            ]}),
        ));
        let calls = invoker.wait_for_calls(2, Duration::from_secs(2)).await;
        let mut services: Vec<_> = calls.iter().map(|c| c.service.clone()).collect();
        services.sort();
        assert_eq!(services, vec!["toggle", "turn_off"]);
    }

    #[tokio::test]
    async fn error_terminates_with_reason() {
        let (d, session, _rx) = setup(Arc::new(RecordingInvoker::default()));
        let outcome = d.dispatch(msg(MessageType::Error, json!({"msg": "bad credentials"})));
        assert_eq!(
            outcome,
            Disposition::Terminate {
                reason: "bad credentials".into()
            }
        );
        assert_eq!(session.terminal_reason().as_deref(), Some("bad credentials"));
    }

    #[tokio::test]
    async fn malformed_payload_is_not_fatal() {
        let (d, session, _rx) = setup(Arc::new(RecordingInvoker::default()));
        let bad = msg(MessageType::UpdateEntitys, json!({"entity_ids": 5}));
        assert_eq!(d.dispatch(bad), Disposition::Continue);
        assert!(session.tracked_entities().is_empty());
        let bad = msg(MessageType::DeviceControl, json!({"Rows": "nope"}));
        assert_eq!(d.dispatch(bad), Disposition::Continue);
    }

    #[tokio::test]
    async fn pong_and_unknown_types() {
        let (d, session, rx) = setup(Arc::new(RecordingInvoker::default()));
        assert_eq!(d.dispatch(Message::bare(MessageType::Pong)), Disposition::Continue);
        assert!(session.last_pong().is_some());
        assert_eq!(d.dispatch(Message::bare(MessageType::Unknown)), Disposition::Continue);
        assert_eq!(d.dispatch(Message::ping()), Disposition::Continue);
        assert!(rx.lock().await.try_recv().is_err());
    }
}
