//! Native upcall routing.
//!
//! The native engine invokes [`CallbackRouter`] from its own callback thread. Every upcall
//! copies its envelopes out synchronously (they are only valid for the duration of the upcall)
//! and then either forwards to the application, answers the engine, or queues work on the
//! [`AsyncExecutor`].

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{user_id_to_uuid, PeekInfo, TringApi};
use crate::executor::AsyncExecutor;
use crate::http::{HttpBridge, HttpError, HttpRequest};
use crate::marshal::{check_member_info, Arena, ByteArray, ByteArray2D, MarshalError, PString};
use crate::native::{EndpointHandle, NativeEngine};
use crate::session::{CallId, ClientId, DemuxId, Session};

/// Join state reported once the local device has joined the group call.
pub const JOIN_STATE_JOINED: i32 = 3;

/// Copy an upcall argument, logging and substituting empty bytes if it is unreadable.
fn copy_bytes(what: &'static str, bytes: ByteArray<'_>) -> Vec<u8> {
    bytes.to_vec().unwrap_or_else(|e| {
        error!(arg = what, error = %e, "unreadable upcall argument");
        Vec::new()
    })
}

fn decode_peek(
    joined: &ByteArray2D<'_>,
    creator: ByteArray<'_>,
    era_id: PString<'_>,
    max_devices: u64,
    device_count: u64,
) -> Result<PeekInfo, MarshalError> {
    let joined_members = joined
        .to_rows()?
        .iter()
        .filter_map(|row| {
            let id = user_id_to_uuid(row);
            if id.is_none() {
                warn!(len = row.len(), "skipping joined member with malformed user id");
            }
            id
        })
        .collect::<Vec<Uuid>>();
    let creator = creator.as_slice()?;
    let creator = if creator.is_empty() {
        None
    } else {
        user_id_to_uuid(creator)
    };
    Ok(PeekInfo {
        joined_members,
        creator,
        era_id: era_id.to_utf8()?,
        max_devices,
        device_count,
    })
}

/// Upcall surface handed to the native engine at endpoint creation.
pub struct CallbackRouter {
    engine: Arc<dyn NativeEngine>,
    api: Arc<dyn TringApi>,
    session: Arc<Session>,
    executor: AsyncExecutor,
    http: HttpBridge,
    endpoint: OnceCell<EndpointHandle>,
}

impl CallbackRouter {
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        api: Arc<dyn TringApi>,
        session: Arc<Session>,
        executor: AsyncExecutor,
        http: HttpBridge,
    ) -> Self {
        Self {
            engine,
            api,
            session,
            executor,
            http,
            endpoint: OnceCell::new(),
        }
    }

    /// Attach the endpoint created with this router. Later calls are ignored.
    pub fn bind(&self, endpoint: EndpointHandle) {
        if self.endpoint.set(endpoint).is_err() {
            warn!(%endpoint, "router already bound; ignoring");
        }
    }

    pub fn endpoint(&self) -> Option<EndpointHandle> {
        self.endpoint.get().copied()
    }

    fn bound(&self, upcall: &'static str) -> Option<EndpointHandle> {
        let endpoint = self.endpoint();
        if endpoint.is_none() {
            warn!(upcall, "upcall before endpoint creation completed; dropped");
        }
        endpoint
    }

    /// Wait until queued executor work has run. False on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.executor.flush(timeout)
    }

    /// Tell the engine the outbound signaling message was handed to the application.
    fn acknowledge(&self) {
        let Some(endpoint) = self.bound("signalMessageSent") else {
            return;
        };
        let call_id: CallId = self.session.signaling_call_id().unwrap_or_else(|| {
            warn!("acknowledging signaling before any one-to-one call; using call id 0");
            0
        });
        self.engine.signal_message_sent(endpoint, call_id);
        debug!(call_id, "signaling acknowledged");
    }

    pub fn on_status(&self, call_id: CallId, peer_id: u64, direction: i32, status_type: i32) {
        info!(call_id, peer_id, direction, status_type, "call status");
        self.api.status_callback(call_id, peer_id, direction, status_type);
        self.acknowledge();
    }

    pub fn on_signaling_offer(&self, offer: ByteArray<'_>) {
        let opaque = copy_bytes("offer", offer);
        info!(len = opaque.len(), "outbound offer");
        self.api.offer_callback(opaque);
        self.acknowledge();
    }

    pub fn on_signaling_answer(&self, answer: ByteArray<'_>) {
        let opaque = copy_bytes("answer", answer);
        info!(len = opaque.len(), "outbound answer");
        self.api.answer_callback(opaque);
        self.acknowledge();
    }

    pub fn on_signaling_ice(&self, ice: ByteArray<'_>) {
        let candidate = copy_bytes("ice", ice);
        info!(len = candidate.len(), "outbound ice candidate");
        self.api.ice_update_callback(vec![candidate]);
        self.acknowledge();
    }

    pub fn on_group_connection_state_changed(&self, client_id: ClientId, connection_state: i32) {
        info!(client_id, connection_state, "group connection state changed");
    }

    pub fn on_group_join_state_changed(&self, client_id: ClientId, join_state: i32) {
        info!(client_id, join_state, "group join state changed");
        if join_state != JOIN_STATE_JOINED {
            return;
        }
        if let Some(endpoint) = self.bound("groupJoinStateChanged") {
            self.engine.group_ring(endpoint, client_id);
        }
    }

    pub fn on_group_ended(&self, client_id: ClientId, reason: i32) {
        info!(client_id, reason, "group call ended");
        if let Some(endpoint) = self.bound("groupEnded") {
            self.engine.delete_group_call_client(endpoint, client_id);
        }
        if !self.session.end_group(client_id) {
            debug!(client_id, "ended client was not the active group session");
        }
    }

    /// Answered synchronously: the engine waits for the member list before continuing.
    pub fn on_group_request_group_members(&self, client_id: ClientId) {
        let Some(endpoint) = self.bound("groupRequestGroupMembers") else {
            return;
        };
        let group_id = self.session.local_group_id();
        let mut info = self.api.request_group_member_info(&group_id);
        if let Err(e) = check_member_info(&info) {
            error!(client_id, error = %e, "application returned unusable member info; sending no members");
            info.clear();
        }
        let arena = Arena::new();
        self.engine.set_group_members(endpoint, client_id, arena.bytes(&info));
        info!(client_id, members = info.len() / crate::marshal::GROUP_MEMBER_RECORD_LEN, "group members set");
    }

    /// The token fetch may hit the network, so it runs on the executor.
    pub fn on_group_request_membership_proof(&self, client_id: ClientId) {
        let Some(endpoint) = self.bound("groupRequestMembershipProof") else {
            return;
        };
        let engine = self.engine.clone();
        let api = self.api.clone();
        let session = self.session.clone();
        let submitted = self.executor.submit("membership-proof", move || {
            let group_id = session.local_group_id();
            let token = api.request_group_membership_token(&group_id);
            let arena = Arena::new();
            engine.set_membership_proof(endpoint, client_id, arena.bytes(&token));
            info!(client_id, len = token.len(), "membership proof set");
        });
        if let Err(e) = submitted {
            error!(client_id, error = %e, "could not queue membership proof request");
        }
    }

    pub fn on_group_ring(&self, group_id: ByteArray<'_>, ring_id: i64, sender: ByteArray<'_>, update: i32) {
        let group_id = copy_bytes("group_id", group_id);
        let sender = copy_bytes("sender", sender);
        info!(ring_id, update, "group ring");
        self.session.set_local_group_id(group_id.clone());
        self.api.group_call_update_ring(group_id, ring_id, sender, update);
    }

    pub fn on_send_call_message(&self, recipient: ByteArray<'_>, message: ByteArray<'_>, urgency: i32) {
        let recipient = copy_bytes("recipient", recipient);
        let message = copy_bytes("message", message);
        debug!(len = message.len(), urgency, "send call message");
        self.api.send_opaque_call_message(recipient, message, urgency);
    }

    pub fn on_send_call_message_to_group(&self, group_id: ByteArray<'_>, message: ByteArray<'_>, urgency: i32) {
        let group_id = copy_bytes("group_id", group_id);
        let message = copy_bytes("message", message);
        debug!(len = message.len(), urgency, "send group call message");
        self.api.send_opaque_group_call_message(group_id, message, urgency);
    }

    /// Request video for every remote device, then report the device list.
    pub fn on_remote_devices_changed(&self, demux_ids: &[DemuxId]) {
        info!(count = demux_ids.len(), "remote devices changed");
        if let Some(endpoint) = self.bound("remoteDevicesChanged") {
            for &demux_id in demux_ids {
                let engine = self.engine.clone();
                let session = self.session.clone();
                let submitted = self.executor.submit("request-video", move || match session.client_id() {
                    Some(client_id) => engine.request_video(endpoint, client_id, demux_id),
                    None => debug!(demux_id, "no group client; video request dropped"),
                });
                if let Err(e) = submitted {
                    error!(demux_id, error = %e, "could not queue video request");
                }
            }
        }
        self.api.update_remote_devices(demux_ids.to_vec());
    }

    pub fn on_peek_response(
        &self,
        joined: &ByteArray2D<'_>,
        creator: ByteArray<'_>,
        era_id: PString<'_>,
        max_devices: u64,
        device_count: u64,
    ) {
        let peek = match decode_peek(joined, creator, era_id, max_devices, device_count) {
            Ok(peek) => peek,
            Err(e) => {
                error!(error = %e, "unreadable peek response");
                return;
            }
        };
        if peek.creator.is_none() {
            info!("peek response without creator; ignored");
            return;
        }
        info!(joined = peek.joined_members.len(), device_count, "peek response");
        self.api.received_group_call_peek_for_ringing_check(peek);
    }

    pub fn on_peek_changed(
        &self,
        joined: &ByteArray2D<'_>,
        creator: ByteArray<'_>,
        era_id: PString<'_>,
        max_devices: u64,
        device_count: u64,
    ) {
        match decode_peek(joined, creator, era_id, max_devices, device_count) {
            Ok(peek) => info!(
                joined = peek.joined_members.len(),
                creator = ?peek.creator,
                era_id = %peek.era_id,
                "peek changed"
            ),
            Err(e) => error!(error = %e, "unreadable peek change"),
        }
    }

    /// Queue an HTTP request for the engine. The response is always delivered, also when the
    /// request block cannot be decoded.
    pub fn on_http_request(
        &self,
        uri: PString<'_>,
        method: u8,
        request_id: u32,
        headers: ByteArray<'_>,
        body: ByteArray<'_>,
    ) {
        let Some(endpoint) = self.bound("makeHttpRequest") else {
            return;
        };
        let request = uri
            .to_utf8()
            .and_then(|uri| Ok((uri, headers.to_vec()?, body.to_vec()?)))
            .map_err(|e| HttpError::Malformed(e.to_string()))
            .and_then(|(uri, headers, body)| HttpRequest::from_blocks(uri, method, &headers, &body));
        debug!(request_id, method, "http request queued");
        let engine = self.engine.clone();
        let http = self.http.clone();
        let submitted = self.executor.submit("http-request", move || {
            http.respond(engine.as_ref(), endpoint, request_id, request);
        });
        if let Err(e) = submitted {
            error!(request_id, error = %e, "could not queue http request; failing it");
            self.http.respond(
                self.engine.as_ref(),
                endpoint,
                request_id,
                Err(HttpError::Transport(e.to_string())),
            );
        }
    }

    pub fn on_destroy(&self) {
        info!("native engine released the callback table");
    }
}
