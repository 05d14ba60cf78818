//! Link-time binding to the native calling engine (feature `native`).
//!
//! The engine calls back through plain C function pointers without a context argument, so
//! the router is held in a process-wide cell. Only one endpoint can exist per process.
//!
//! [`AppInterface`] starts with the engine's fixed twelve entries. The entries after them
//! (`remoteDevicesChanged`, `peekResponse`, `peekChanged`, `makeHttpRequest`) are only
//! reached by an engine build that reads the extended table. A stock engine stops at entry
//! twelve, so with it remote-device updates, peek results and bridged HTTP requests never
//! arrive. These handlers stay callable through [`CallbackRouter`] directly.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{error, warn};

use crate::call_link::CallLinkCallback;
use crate::marshal::{ByteArray, ByteArray2D, PString};
use crate::native::{EndpointHandle, NativeEngine};
use crate::router::CallbackRouter;
use crate::session::{CallId, ClientId, DemuxId};

/// Upcall table handed to `createCallEndpoint`. The first twelve entries follow the engine's
/// fixed layout; the rest are appended extensions.
#[repr(C)]
#[allow(non_snake_case)]
pub struct AppInterface {
    pub destroy: extern "C" fn(),
    pub groupConnectionStateChanged: extern "C" fn(client_id: ClientId, connection_state: i32),
    pub groupEnded: extern "C" fn(client_id: ClientId, reason: i32),
    pub groupJoinStateChanged: extern "C" fn(client_id: ClientId, join_state: i32),
    pub groupRequestGroupMembers: extern "C" fn(client_id: ClientId),
    pub groupRequestMembershipProof: extern "C" fn(client_id: ClientId),
    pub groupRing: extern "C" fn(group_id: ByteArray<'_>, ring_id: i64, sender_id: ByteArray<'_>, update: i32),
    pub sendCallMessage: extern "C" fn(recipient: ByteArray<'_>, message: ByteArray<'_>, urgency: i32),
    pub sendCallMessageToGroup: extern "C" fn(group_id: ByteArray<'_>, message: ByteArray<'_>, urgency: i32),
    pub signalingMessageAnswer: extern "C" fn(answer: ByteArray<'_>),
    pub signalingMessageIce: extern "C" fn(ice: ByteArray<'_>),
    pub signalingMessageOffer: extern "C" fn(offer: ByteArray<'_>),
    pub remoteDevicesChanged: extern "C" fn(demux_ids: *const DemuxId, len: usize),
    pub peekResponse: extern "C" fn(
        joined: ByteArray2D<'_>,
        creator: ByteArray<'_>,
        era_id: PString<'_>,
        max_devices: u64,
        device_count: u64,
    ),
    pub peekChanged: extern "C" fn(
        joined: ByteArray2D<'_>,
        creator: ByteArray<'_>,
        era_id: PString<'_>,
        max_devices: u64,
        device_count: u64,
    ),
    pub makeHttpRequest: extern "C" fn(
        uri: PString<'_>,
        method: u8,
        request_id: u32,
        headers: ByteArray<'_>,
        body: ByteArray<'_>,
    ),
}

type StatusCallback = extern "C" fn(call_id: CallId, peer_id: u64, direction: i32, status_type: i32);

extern "C" {
    fn initRingRTC(greeting: PString<'_>) -> i64;
    fn getVersion() -> i64;
    fn createCallEndpoint(app_interface: AppInterface, status_callback: StatusCallback) -> i64;
    fn setSelfUuid(endpoint: i64, uuid: ByteArray<'_>) -> i64;
    fn receivedOffer(
        endpoint: i64,
        peer_id: PString<'_>,
        call_id: u64,
        offer_type: i32,
        sender_device_id: u32,
        receiver_device_id: u32,
        sender_key: ByteArray<'_>,
        receiver_key: ByteArray<'_>,
        opaque: ByteArray<'_>,
        age_sec: u64,
    ) -> i64;
    fn receivedOpaqueMessage(
        endpoint: i64,
        sender_uuid: ByteArray<'_>,
        sender_device_id: u32,
        local_device_id: u32,
        opaque: ByteArray<'_>,
        age_sec: u64,
    ) -> i64;
    fn receivedAnswer(
        endpoint: i64,
        peer_id: PString<'_>,
        call_id: u64,
        sender_device_id: u32,
        sender_key: ByteArray<'_>,
        receiver_key: ByteArray<'_>,
        opaque: ByteArray<'_>,
    ) -> i64;
    fn createOutgoingCall(endpoint: i64, peer_id: PString<'_>, video_enabled: bool, local_device_id: u32, call_id: i64) -> i64;
    fn proceedCall(
        endpoint: i64,
        call_id: u64,
        data_mode: i32,
        audio_levels_interval_millis: i32,
        ice_user: PString<'_>,
        ice_pwd: PString<'_>,
        ice_hostname: PString<'_>,
        icepack: ByteArray2D<'_>,
    ) -> i64;
    fn receivedIce(endpoint: i64, call_id: u64, sender_device_id: u32, icepack: ByteArray2D<'_>);
    fn acceptCall(endpoint: i64, call_id: u64) -> i64;
    fn ignoreCall(endpoint: i64, call_id: u64) -> i64;
    fn hangupCall(endpoint: i64) -> i64;
    fn signalMessageSent(endpoint: i64, call_id: u64) -> i64;
    fn setAudioInput(endpoint: i64, index: u16) -> i64;
    fn setAudioOutput(endpoint: i64, index: u16) -> i64;
    fn setOutgoingAudioEnabled(endpoint: i64, enable: bool) -> i64;
    fn setOutgoingVideoEnabled(endpoint: i64, enable: bool) -> i64;
    fn sendVideoFrame(endpoint: i64, width: u32, height: u32, pixel_format: i32, raw: *const u8) -> i64;
    fn fillRemoteVideoFrame(endpoint: i64, demux_id: i64, buffer: *mut u8, len: usize) -> i64;
    fn peekGroupCall(endpoint: i64, membership_proof: ByteArray<'_>, members: ByteArray<'_>) -> i64;
    fn panamaReceivedHttpResponse(endpoint: i64, request_id: u32, status_code: u32, body: ByteArray<'_>) -> i64;
    fn createGroupCallClient(
        endpoint: i64,
        group_id: ByteArray<'_>,
        sfu_url: PString<'_>,
        hkdf_extra_info: ByteArray<'_>,
    ) -> ClientId;
    fn deleteGroupCallClient(endpoint: i64, client_id: ClientId);
    fn setOutgoingAudioMuted(endpoint: i64, client_id: ClientId, muted: bool) -> i64;
    fn setOutgoingVideoMuted(endpoint: i64, client_id: ClientId, muted: bool) -> i64;
    fn group_ring(endpoint: i64, client_id: ClientId) -> i64;
    fn group_connect(endpoint: i64, client_id: ClientId) -> i64;
    fn setMembershipProof(endpoint: i64, client_id: ClientId, token: ByteArray<'_>) -> i64;
    fn setGroupMembers(endpoint: i64, client_id: ClientId, members: ByteArray<'_>) -> i64;
    fn setDataMode(endpoint: i64, client_id: ClientId, data_mode: i32) -> i64;
    fn join(endpoint: i64, client_id: ClientId) -> i64;
    fn disconnect(endpoint: i64, client_id: ClientId) -> i64;
    fn requestVideo(endpoint: i64, client_id: ClientId, demux_id: DemuxId) -> i64;
    fn rtc_calllinks_CallLinkRootKey_parse(link: *const c_char, context: *mut c_void, callback: CallLinkCallback);
}

static ROUTER: OnceCell<Arc<CallbackRouter>> = OnceCell::new();

/// Run `f` against the installed router. Panics are caught so they never unwind into the
/// engine.
fn dispatch(upcall: &'static str, f: impl FnOnce(&CallbackRouter)) {
    let Some(router) = ROUTER.get() else {
        warn!(upcall, "upcall before router installation; dropped");
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| f(router))).is_err() {
        error!(upcall, "upcall handler panicked");
    }
}

extern "C" fn on_destroy() {
    dispatch("destroy", |r| r.on_destroy());
}

extern "C" fn on_group_connection_state_changed(client_id: ClientId, connection_state: i32) {
    dispatch("groupConnectionStateChanged", |r| {
        r.on_group_connection_state_changed(client_id, connection_state)
    });
}

extern "C" fn on_group_ended(client_id: ClientId, reason: i32) {
    dispatch("groupEnded", |r| r.on_group_ended(client_id, reason));
}

extern "C" fn on_group_join_state_changed(client_id: ClientId, join_state: i32) {
    dispatch("groupJoinStateChanged", |r| r.on_group_join_state_changed(client_id, join_state));
}

extern "C" fn on_group_request_group_members(client_id: ClientId) {
    dispatch("groupRequestGroupMembers", |r| r.on_group_request_group_members(client_id));
}

extern "C" fn on_group_request_membership_proof(client_id: ClientId) {
    dispatch("groupRequestMembershipProof", |r| r.on_group_request_membership_proof(client_id));
}

extern "C" fn on_group_ring(group_id: ByteArray<'_>, ring_id: i64, sender_id: ByteArray<'_>, update: i32) {
    dispatch("groupRing", |r| r.on_group_ring(group_id, ring_id, sender_id, update));
}

extern "C" fn on_send_call_message(recipient: ByteArray<'_>, message: ByteArray<'_>, urgency: i32) {
    dispatch("sendCallMessage", |r| r.on_send_call_message(recipient, message, urgency));
}

extern "C" fn on_send_call_message_to_group(group_id: ByteArray<'_>, message: ByteArray<'_>, urgency: i32) {
    dispatch("sendCallMessageToGroup", |r| {
        r.on_send_call_message_to_group(group_id, message, urgency)
    });
}

extern "C" fn on_signaling_answer(answer: ByteArray<'_>) {
    dispatch("signalingMessageAnswer", |r| r.on_signaling_answer(answer));
}

extern "C" fn on_signaling_ice(ice: ByteArray<'_>) {
    dispatch("signalingMessageIce", |r| r.on_signaling_ice(ice));
}

extern "C" fn on_signaling_offer(offer: ByteArray<'_>) {
    dispatch("signalingMessageOffer", |r| r.on_signaling_offer(offer));
}

extern "C" fn on_remote_devices_changed(demux_ids: *const DemuxId, len: usize) {
    let ids: &[DemuxId] = if len == 0 {
        &[]
    } else if demux_ids.is_null() {
        error!(len, "remote device list with null pointer");
        return;
    } else {
        // SAFETY: the engine passes `len` readable ids, valid for this upcall.
        unsafe { slice::from_raw_parts(demux_ids, len) }
    };
    dispatch("remoteDevicesChanged", |r| r.on_remote_devices_changed(ids));
}

extern "C" fn on_peek_response(
    joined: ByteArray2D<'_>,
    creator: ByteArray<'_>,
    era_id: PString<'_>,
    max_devices: u64,
    device_count: u64,
) {
    dispatch("peekResponse", |r| {
        r.on_peek_response(&joined, creator, era_id, max_devices, device_count)
    });
}

extern "C" fn on_peek_changed(
    joined: ByteArray2D<'_>,
    creator: ByteArray<'_>,
    era_id: PString<'_>,
    max_devices: u64,
    device_count: u64,
) {
    dispatch("peekChanged", |r| {
        r.on_peek_changed(&joined, creator, era_id, max_devices, device_count)
    });
}

extern "C" fn on_http_request(uri: PString<'_>, method: u8, request_id: u32, headers: ByteArray<'_>, body: ByteArray<'_>) {
    dispatch("makeHttpRequest", |r| r.on_http_request(uri, method, request_id, headers, body));
}

extern "C" fn on_status(call_id: CallId, peer_id: u64, direction: i32, status_type: i32) {
    dispatch("statusCallback", |r| r.on_status(call_id, peer_id, direction, status_type));
}

fn app_interface() -> AppInterface {
    AppInterface {
        destroy: on_destroy,
        groupConnectionStateChanged: on_group_connection_state_changed,
        groupEnded: on_group_ended,
        groupJoinStateChanged: on_group_join_state_changed,
        groupRequestGroupMembers: on_group_request_group_members,
        groupRequestMembershipProof: on_group_request_membership_proof,
        groupRing: on_group_ring,
        sendCallMessage: on_send_call_message,
        sendCallMessageToGroup: on_send_call_message_to_group,
        signalingMessageAnswer: on_signaling_answer,
        signalingMessageIce: on_signaling_ice,
        signalingMessageOffer: on_signaling_offer,
        remoteDevicesChanged: on_remote_devices_changed,
        peekResponse: on_peek_response,
        peekChanged: on_peek_changed,
        makeHttpRequest: on_http_request,
    }
}

/// The engine linked into this binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedEngine;

// SAFETY (all methods): arguments are envelopes over memory the caller keeps alive for the
// duration of the call, and `endpoint` is the handle returned by `createCallEndpoint`.
impl NativeEngine for LinkedEngine {
    fn init_engine(&self, greeting: PString<'_>) -> i64 {
        unsafe { initRingRTC(greeting) }
    }

    fn version(&self) -> i64 {
        unsafe { getVersion() }
    }

    fn create_call_endpoint(&self, router: Arc<CallbackRouter>) -> i64 {
        if ROUTER.set(router).is_err() {
            error!("a call endpoint already exists in this process");
            return 0;
        }
        unsafe { createCallEndpoint(app_interface(), on_status) }
    }

    fn set_self_uuid(&self, endpoint: EndpointHandle, uuid: ByteArray<'_>) {
        unsafe { setSelfUuid(endpoint.raw(), uuid) };
    }

    fn received_offer(
        &self,
        endpoint: EndpointHandle,
        peer_id: PString<'_>,
        call_id: CallId,
        media_type: i32,
        sender_device_id: u32,
        receiver_device_id: u32,
        sender_key: ByteArray<'_>,
        receiver_key: ByteArray<'_>,
        opaque: ByteArray<'_>,
        age_sec: u64,
    ) {
        unsafe {
            receivedOffer(
                endpoint.raw(),
                peer_id,
                call_id,
                media_type,
                sender_device_id,
                receiver_device_id,
                sender_key,
                receiver_key,
                opaque,
                age_sec,
            )
        };
    }

    fn received_answer(
        &self,
        endpoint: EndpointHandle,
        peer_id: PString<'_>,
        call_id: CallId,
        sender_device_id: u32,
        sender_key: ByteArray<'_>,
        receiver_key: ByteArray<'_>,
        opaque: ByteArray<'_>,
    ) {
        unsafe {
            receivedAnswer(
                endpoint.raw(),
                peer_id,
                call_id,
                sender_device_id,
                sender_key,
                receiver_key,
                opaque,
            )
        };
    }

    fn received_opaque_message(
        &self,
        endpoint: EndpointHandle,
        sender_uuid: ByteArray<'_>,
        sender_device_id: u32,
        local_device_id: u32,
        opaque: ByteArray<'_>,
        age_sec: u64,
    ) {
        unsafe {
            receivedOpaqueMessage(
                endpoint.raw(),
                sender_uuid,
                sender_device_id,
                local_device_id,
                opaque,
                age_sec,
            )
        };
    }

    fn received_ice(&self, endpoint: EndpointHandle, call_id: CallId, sender_device_id: u32, ice: &ByteArray2D<'_>) {
        unsafe { receivedIce(endpoint.raw(), call_id, sender_device_id, *ice) };
    }

    fn proceed_call(
        &self,
        endpoint: EndpointHandle,
        call_id: CallId,
        bandwidth_mode: i32,
        audio_levels_interval_ms: i32,
        ice_user: PString<'_>,
        ice_pwd: PString<'_>,
        host_name: PString<'_>,
        ice: &ByteArray2D<'_>,
    ) {
        unsafe {
            proceedCall(
                endpoint.raw(),
                call_id,
                bandwidth_mode,
                audio_levels_interval_ms,
                ice_user,
                ice_pwd,
                host_name,
                *ice,
            )
        };
    }

    fn accept_call(&self, endpoint: EndpointHandle, call_id: CallId) {
        unsafe { acceptCall(endpoint.raw(), call_id) };
    }

    fn ignore_call(&self, endpoint: EndpointHandle, call_id: CallId) {
        unsafe { ignoreCall(endpoint.raw(), call_id) };
    }

    fn hangup_call(&self, endpoint: EndpointHandle) {
        unsafe { hangupCall(endpoint.raw()) };
    }

    fn create_outgoing_call(
        &self,
        endpoint: EndpointHandle,
        peer_id: PString<'_>,
        video_enabled: bool,
        local_device_id: u32,
        call_id: CallId,
    ) {
        // The engine takes the id as a signed value; the bit pattern is preserved.
        unsafe {
            createOutgoingCall(
                endpoint.raw(),
                peer_id,
                video_enabled,
                local_device_id,
                call_id as i64,
            )
        };
    }

    fn signal_message_sent(&self, endpoint: EndpointHandle, call_id: CallId) {
        unsafe { signalMessageSent(endpoint.raw(), call_id) };
    }

    fn set_audio_input(&self, endpoint: EndpointHandle, index: u16) {
        unsafe { setAudioInput(endpoint.raw(), index) };
    }

    fn set_audio_output(&self, endpoint: EndpointHandle, index: u16) {
        unsafe { setAudioOutput(endpoint.raw(), index) };
    }

    fn set_outgoing_audio_enabled(&self, endpoint: EndpointHandle, enabled: bool) {
        unsafe { setOutgoingAudioEnabled(endpoint.raw(), enabled) };
    }

    fn set_outgoing_video_enabled(&self, endpoint: EndpointHandle, enabled: bool) {
        unsafe { setOutgoingVideoEnabled(endpoint.raw(), enabled) };
    }

    fn send_video_frame(&self, endpoint: EndpointHandle, width: u32, height: u32, pixel_format: i32, frame: ByteArray<'_>) {
        unsafe { sendVideoFrame(endpoint.raw(), width, height, pixel_format, frame.as_ptr()) };
    }

    fn fill_remote_video_frame(&self, endpoint: EndpointHandle, demux_id: DemuxId, buffer: &mut [u8]) -> i64 {
        unsafe {
            fillRemoteVideoFrame(
                endpoint.raw(),
                i64::from(demux_id),
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        }
    }

    fn create_group_call_client(
        &self,
        endpoint: EndpointHandle,
        group_id: ByteArray<'_>,
        sfu_url: PString<'_>,
        hkdf_extra_info: ByteArray<'_>,
    ) -> ClientId {
        unsafe { createGroupCallClient(endpoint.raw(), group_id, sfu_url, hkdf_extra_info) }
    }

    fn delete_group_call_client(&self, endpoint: EndpointHandle, client_id: ClientId) {
        unsafe { deleteGroupCallClient(endpoint.raw(), client_id) };
    }

    fn group_connect(&self, endpoint: EndpointHandle, client_id: ClientId) {
        unsafe { group_connect(endpoint.raw(), client_id) };
    }

    fn join(&self, endpoint: EndpointHandle, client_id: ClientId) {
        unsafe { join(endpoint.raw(), client_id) };
    }

    fn disconnect(&self, endpoint: EndpointHandle, client_id: ClientId) {
        unsafe { disconnect(endpoint.raw(), client_id) };
    }

    fn group_ring(&self, endpoint: EndpointHandle, client_id: ClientId) {
        unsafe { group_ring(endpoint.raw(), client_id) };
    }

    fn set_data_mode(&self, endpoint: EndpointHandle, client_id: ClientId, data_mode: i32) {
        unsafe { setDataMode(endpoint.raw(), client_id, data_mode) };
    }

    fn set_outgoing_audio_muted(&self, endpoint: EndpointHandle, client_id: ClientId, muted: bool) {
        unsafe { setOutgoingAudioMuted(endpoint.raw(), client_id, muted) };
    }

    fn set_outgoing_video_muted(&self, endpoint: EndpointHandle, client_id: ClientId, muted: bool) {
        unsafe { setOutgoingVideoMuted(endpoint.raw(), client_id, muted) };
    }

    fn request_video(&self, endpoint: EndpointHandle, client_id: ClientId, demux_id: DemuxId) {
        unsafe { requestVideo(endpoint.raw(), client_id, demux_id) };
    }

    fn set_membership_proof(&self, endpoint: EndpointHandle, client_id: ClientId, proof: ByteArray<'_>) {
        unsafe { setMembershipProof(endpoint.raw(), client_id, proof) };
    }

    fn set_group_members(&self, endpoint: EndpointHandle, client_id: ClientId, members: ByteArray<'_>) {
        unsafe { setGroupMembers(endpoint.raw(), client_id, members) };
    }

    fn peek_group_call(&self, endpoint: EndpointHandle, membership_proof: ByteArray<'_>, members: ByteArray<'_>) {
        unsafe { peekGroupCall(endpoint.raw(), membership_proof, members) };
    }

    fn received_http_response(&self, endpoint: EndpointHandle, request_id: u32, status: i32, body: ByteArray<'_>) {
        // Negative failure codes keep their bit pattern in the unsigned status argument.
        unsafe { panamaReceivedHttpResponse(endpoint.raw(), request_id, status as u32, body) };
    }

    fn parse_call_link_root_key(&self, link: &CStr, context: *mut c_void, callback: CallLinkCallback) {
        unsafe { rtc_calllinks_CallLinkRootKey_parse(link.as_ptr(), context, callback) };
    }
}
