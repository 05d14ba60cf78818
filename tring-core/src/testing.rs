//! Recording fakes of the native engine and the application for unit tests.
//!
//! Both fakes can share one [`Timeline`] so tests can assert the interleaving of application
//! deliveries and native calls.

use std::ffi::{c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::api::{PeekInfo, TringApi};
use crate::call_link::{CallLinkCallback, RtcBytes};
use crate::marshal::{ByteArray, ByteArray2D, PString};
use crate::native::{EndpointHandle, NativeEngine};
use crate::router::CallbackRouter;
use crate::session::{CallId, ClientId, DemuxId};

pub(crate) const TEST_ENDPOINT: i64 = 0x7e57;

pub(crate) fn endpoint() -> EndpointHandle {
    EndpointHandle::new(TEST_ENDPOINT).unwrap()
}

pub(crate) fn header_block(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in pairs {
        out.extend_from_slice(&(k.len() as i32).to_be_bytes());
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(&(v.len() as i32).to_be_bytes());
        out.extend_from_slice(v.as_bytes());
    }
    out
}

pub(crate) fn body_block(body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as i64).to_be_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NativeCall {
    InitEngine(String),
    CreateCallEndpoint,
    SetSelfUuid(Vec<u8>),
    ReceivedOffer {
        peer_id: String,
        call_id: CallId,
        media_type: i32,
        sender_device_id: u32,
        receiver_device_id: u32,
        sender_key: Vec<u8>,
        receiver_key: Vec<u8>,
        opaque: Vec<u8>,
        age_sec: u64,
    },
    ReceivedAnswer {
        peer_id: String,
        call_id: CallId,
        sender_device_id: u32,
        sender_key: Vec<u8>,
        receiver_key: Vec<u8>,
        opaque: Vec<u8>,
    },
    ReceivedOpaqueMessage {
        sender_uuid: Vec<u8>,
        sender_device_id: u32,
        local_device_id: u32,
        opaque: Vec<u8>,
        age_sec: u64,
    },
    ReceivedIce {
        call_id: CallId,
        sender_device_id: u32,
        ice: Vec<Vec<u8>>,
    },
    ProceedCall {
        call_id: CallId,
        bandwidth_mode: i32,
        audio_levels_interval_ms: i32,
        ice_user: String,
        ice_pwd: String,
        host_name: String,
        ice: Vec<Vec<u8>>,
    },
    AcceptCall(CallId),
    IgnoreCall(CallId),
    HangupCall,
    CreateOutgoingCall {
        peer_id: String,
        video_enabled: bool,
        local_device_id: u32,
        call_id: CallId,
    },
    SignalMessageSent(CallId),
    SetAudioInput(u16),
    SetAudioOutput(u16),
    SetOutgoingAudioEnabled(bool),
    SetOutgoingVideoEnabled(bool),
    SendVideoFrame {
        width: u32,
        height: u32,
        pixel_format: i32,
        frame: Vec<u8>,
    },
    FillRemoteVideoFrame {
        demux_id: DemuxId,
        capacity: usize,
    },
    CreateGroupCallClient {
        group_id: Vec<u8>,
        sfu_url: String,
        hkdf_extra_info: Vec<u8>,
    },
    DeleteGroupCallClient(ClientId),
    GroupConnect(ClientId),
    Join(ClientId),
    Disconnect(ClientId),
    GroupRing(ClientId),
    SetDataMode(ClientId, i32),
    SetOutgoingAudioMuted(ClientId, bool),
    SetOutgoingVideoMuted(ClientId, bool),
    RequestVideo(ClientId, DemuxId),
    SetMembershipProof(ClientId, Vec<u8>),
    SetGroupMembers(ClientId, Vec<u8>),
    PeekGroupCall {
        membership_proof: Vec<u8>,
        members: Vec<u8>,
    },
    HttpResponse {
        request_id: u32,
        status: i32,
        body: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AppEvent {
    Status {
        call_id: CallId,
        peer_id: u64,
        direction: i32,
        status_type: i32,
    },
    Answer(Vec<u8>),
    Offer(Vec<u8>),
    Ice(Vec<Vec<u8>>),
    GroupRing {
        group_id: Vec<u8>,
        ring_id: i64,
        sender: Vec<u8>,
        status: i32,
    },
    Peek(PeekInfo),
    MembershipTokenRequested(Vec<u8>),
    MemberInfoRequested(Vec<u8>),
    SendGroupMessage {
        group_id: Vec<u8>,
        opaque: Vec<u8>,
        urgency: i32,
    },
    SendCallMessage {
        recipient: Vec<u8>,
        opaque: Vec<u8>,
        urgency: i32,
    },
    RemoteDevices(Vec<DemuxId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Native(NativeCall),
    App(AppEvent),
}

pub(crate) type Timeline = Arc<Mutex<Vec<Event>>>;

/// How the fake answers `parse_call_link_root_key`.
#[derive(Debug, Clone)]
pub(crate) enum CallLinkReply {
    Immediate(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Null,
    Never,
}

pub(crate) struct RecordingEngine {
    timeline: Timeline,
    endpoint_raw: AtomicI64,
    next_client_id: AtomicI32,
    remote_frame: Mutex<Option<(u32, u32)>>,
    call_link_reply: Mutex<CallLinkReply>,
    links: Mutex<Vec<String>>,
    router: Mutex<Option<Weak<CallbackRouter>>>,
    status_on_hangup: AtomicBool,
}

fn bytes(b: ByteArray<'_>) -> Vec<u8> {
    b.to_vec().unwrap()
}

fn text(s: PString<'_>) -> String {
    s.to_utf8().unwrap()
}

impl RecordingEngine {
    pub(crate) fn new() -> Self {
        Self::with_timeline(Timeline::default())
    }

    pub(crate) fn with_timeline(timeline: Timeline) -> Self {
        Self {
            timeline,
            endpoint_raw: AtomicI64::new(TEST_ENDPOINT),
            next_client_id: AtomicI32::new(11),
            remote_frame: Mutex::new(None),
            call_link_reply: Mutex::new(CallLinkReply::Never),
            links: Mutex::new(Vec::new()),
            router: Mutex::new(None),
            status_on_hangup: AtomicBool::new(false),
        }
    }

    fn record(&self, call: NativeCall) {
        self.timeline.lock().push(Event::Native(call));
    }

    pub(crate) fn calls(&self) -> Vec<NativeCall> {
        self.timeline
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Native(c) => Some(c.clone()),
                Event::App(_) => None,
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.timeline.lock().retain(|e| matches!(e, Event::App(_)));
    }

    pub(crate) fn set_endpoint_raw(&self, raw: i64) {
        self.endpoint_raw.store(raw, Ordering::SeqCst);
    }

    pub(crate) fn set_client_id(&self, client_id: ClientId) {
        self.next_client_id.store(client_id, Ordering::SeqCst);
    }

    /// Dimensions of the frame the next fill reports; `None` for no frame.
    pub(crate) fn set_remote_frame(&self, dims: Option<(u32, u32)>) {
        *self.remote_frame.lock() = dims;
    }

    pub(crate) fn set_call_link_reply(&self, reply: CallLinkReply) {
        *self.call_link_reply.lock() = reply;
    }

    pub(crate) fn parsed_links(&self) -> Vec<String> {
        self.links.lock().clone()
    }

    /// Router installed by the last `create_call_endpoint`.
    pub(crate) fn router(&self) -> Option<Arc<CallbackRouter>> {
        self.router.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Make `hangup_call` deliver a status upcall before returning, like the engine's
    /// synchronous hangup signaling.
    pub(crate) fn upcall_status_on_hangup(&self, on: bool) {
        self.status_on_hangup.store(on, Ordering::SeqCst);
    }
}

impl NativeEngine for RecordingEngine {
    fn init_engine(&self, greeting: PString<'_>) -> i64 {
        self.record(NativeCall::InitEngine(text(greeting)));
        1
    }

    fn version(&self) -> i64 {
        7
    }

    fn create_call_endpoint(&self, router: Arc<CallbackRouter>) -> i64 {
        *self.router.lock() = Some(Arc::downgrade(&router));
        self.record(NativeCall::CreateCallEndpoint);
        self.endpoint_raw.load(Ordering::SeqCst)
    }

    fn set_self_uuid(&self, _endpoint: EndpointHandle, uuid: ByteArray<'_>) {
        self.record(NativeCall::SetSelfUuid(bytes(uuid)));
    }

    fn received_offer(
        &self,
        _endpoint: EndpointHandle,
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
        self.record(NativeCall::ReceivedOffer {
            peer_id: text(peer_id),
            call_id,
            media_type,
            sender_device_id,
            receiver_device_id,
            sender_key: bytes(sender_key),
            receiver_key: bytes(receiver_key),
            opaque: bytes(opaque),
            age_sec,
        });
    }

    fn received_answer(
        &self,
        _endpoint: EndpointHandle,
        peer_id: PString<'_>,
        call_id: CallId,
        sender_device_id: u32,
        sender_key: ByteArray<'_>,
        receiver_key: ByteArray<'_>,
        opaque: ByteArray<'_>,
    ) {
        self.record(NativeCall::ReceivedAnswer {
            peer_id: text(peer_id),
            call_id,
            sender_device_id,
            sender_key: bytes(sender_key),
            receiver_key: bytes(receiver_key),
            opaque: bytes(opaque),
        });
    }

    fn received_opaque_message(
        &self,
        _endpoint: EndpointHandle,
        sender_uuid: ByteArray<'_>,
        sender_device_id: u32,
        local_device_id: u32,
        opaque: ByteArray<'_>,
        age_sec: u64,
    ) {
        self.record(NativeCall::ReceivedOpaqueMessage {
            sender_uuid: bytes(sender_uuid),
            sender_device_id,
            local_device_id,
            opaque: bytes(opaque),
            age_sec,
        });
    }

    fn received_ice(&self, _endpoint: EndpointHandle, call_id: CallId, sender_device_id: u32, ice: &ByteArray2D<'_>) {
        self.record(NativeCall::ReceivedIce {
            call_id,
            sender_device_id,
            ice: ice.to_rows().unwrap(),
        });
    }

    fn proceed_call(
        &self,
        _endpoint: EndpointHandle,
        call_id: CallId,
        bandwidth_mode: i32,
        audio_levels_interval_ms: i32,
        ice_user: PString<'_>,
        ice_pwd: PString<'_>,
        host_name: PString<'_>,
        ice: &ByteArray2D<'_>,
    ) {
        self.record(NativeCall::ProceedCall {
            call_id,
            bandwidth_mode,
            audio_levels_interval_ms,
            ice_user: text(ice_user),
            ice_pwd: text(ice_pwd),
            host_name: text(host_name),
            ice: ice.to_rows().unwrap(),
        });
    }

    fn accept_call(&self, _endpoint: EndpointHandle, call_id: CallId) {
        self.record(NativeCall::AcceptCall(call_id));
    }

    fn ignore_call(&self, _endpoint: EndpointHandle, call_id: CallId) {
        self.record(NativeCall::IgnoreCall(call_id));
    }

    fn hangup_call(&self, _endpoint: EndpointHandle) {
        self.record(NativeCall::HangupCall);
        if self.status_on_hangup.load(Ordering::SeqCst) {
            if let Some(router) = self.router() {
                router.on_status(0, 0, 11, 0);
            }
        }
    }

    fn create_outgoing_call(
        &self,
        _endpoint: EndpointHandle,
        peer_id: PString<'_>,
        video_enabled: bool,
        local_device_id: u32,
        call_id: CallId,
    ) {
        self.record(NativeCall::CreateOutgoingCall {
            peer_id: text(peer_id),
            video_enabled,
            local_device_id,
            call_id,
        });
    }

    fn signal_message_sent(&self, _endpoint: EndpointHandle, call_id: CallId) {
        self.record(NativeCall::SignalMessageSent(call_id));
    }

    fn set_audio_input(&self, _endpoint: EndpointHandle, index: u16) {
        self.record(NativeCall::SetAudioInput(index));
    }

    fn set_audio_output(&self, _endpoint: EndpointHandle, index: u16) {
        self.record(NativeCall::SetAudioOutput(index));
    }

    fn set_outgoing_audio_enabled(&self, _endpoint: EndpointHandle, enabled: bool) {
        self.record(NativeCall::SetOutgoingAudioEnabled(enabled));
    }

    fn set_outgoing_video_enabled(&self, _endpoint: EndpointHandle, enabled: bool) {
        self.record(NativeCall::SetOutgoingVideoEnabled(enabled));
    }

    fn send_video_frame(&self, _endpoint: EndpointHandle, width: u32, height: u32, pixel_format: i32, frame: ByteArray<'_>) {
        self.record(NativeCall::SendVideoFrame {
            width,
            height,
            pixel_format,
            frame: bytes(frame),
        });
    }

    fn fill_remote_video_frame(&self, _endpoint: EndpointHandle, demux_id: DemuxId, buffer: &mut [u8]) -> i64 {
        self.record(NativeCall::FillRemoteVideoFrame {
            demux_id,
            capacity: buffer.len(),
        });
        match *self.remote_frame.lock() {
            None => 0,
            Some((w, h)) => {
                let needed = w as usize * h as usize * 4;
                if needed <= buffer.len() {
                    buffer[..needed].fill(0xab);
                }
                (i64::from(w) << 16) | i64::from(h)
            }
        }
    }

    fn create_group_call_client(
        &self,
        _endpoint: EndpointHandle,
        group_id: ByteArray<'_>,
        sfu_url: PString<'_>,
        hkdf_extra_info: ByteArray<'_>,
    ) -> ClientId {
        self.record(NativeCall::CreateGroupCallClient {
            group_id: bytes(group_id),
            sfu_url: text(sfu_url),
            hkdf_extra_info: bytes(hkdf_extra_info),
        });
        self.next_client_id.load(Ordering::SeqCst)
    }

    fn delete_group_call_client(&self, _endpoint: EndpointHandle, client_id: ClientId) {
        self.record(NativeCall::DeleteGroupCallClient(client_id));
    }

    fn group_connect(&self, _endpoint: EndpointHandle, client_id: ClientId) {
        self.record(NativeCall::GroupConnect(client_id));
    }

    fn join(&self, _endpoint: EndpointHandle, client_id: ClientId) {
        self.record(NativeCall::Join(client_id));
    }

    fn disconnect(&self, _endpoint: EndpointHandle, client_id: ClientId) {
        self.record(NativeCall::Disconnect(client_id));
    }

    fn group_ring(&self, _endpoint: EndpointHandle, client_id: ClientId) {
        self.record(NativeCall::GroupRing(client_id));
    }

    fn set_data_mode(&self, _endpoint: EndpointHandle, client_id: ClientId, data_mode: i32) {
        self.record(NativeCall::SetDataMode(client_id, data_mode));
    }

    fn set_outgoing_audio_muted(&self, _endpoint: EndpointHandle, client_id: ClientId, muted: bool) {
        self.record(NativeCall::SetOutgoingAudioMuted(client_id, muted));
    }

    fn set_outgoing_video_muted(&self, _endpoint: EndpointHandle, client_id: ClientId, muted: bool) {
        self.record(NativeCall::SetOutgoingVideoMuted(client_id, muted));
    }

    fn request_video(&self, _endpoint: EndpointHandle, client_id: ClientId, demux_id: DemuxId) {
        self.record(NativeCall::RequestVideo(client_id, demux_id));
    }

    fn set_membership_proof(&self, _endpoint: EndpointHandle, client_id: ClientId, proof: ByteArray<'_>) {
        self.record(NativeCall::SetMembershipProof(client_id, bytes(proof)));
    }

    fn set_group_members(&self, _endpoint: EndpointHandle, client_id: ClientId, members: ByteArray<'_>) {
        self.record(NativeCall::SetGroupMembers(client_id, bytes(members)));
    }

    fn peek_group_call(&self, _endpoint: EndpointHandle, membership_proof: ByteArray<'_>, members: ByteArray<'_>) {
        self.record(NativeCall::PeekGroupCall {
            membership_proof: bytes(membership_proof),
            members: bytes(members),
        });
    }

    fn received_http_response(&self, _endpoint: EndpointHandle, request_id: u32, status: i32, body: ByteArray<'_>) {
        self.record(NativeCall::HttpResponse {
            request_id,
            status,
            body: bytes(body),
        });
    }

    fn parse_call_link_root_key(&self, link: &CStr, context: *mut c_void, callback: CallLinkCallback) {
        self.links.lock().push(link.to_string_lossy().into_owned());
        match self.call_link_reply.lock().clone() {
            CallLinkReply::Immediate(out) => {
                let result = RtcBytes {
                    ptr: out.as_ptr(),
                    count: out.len(),
                };
                callback(context, &result);
            }
            CallLinkReply::Delayed(delay, out) => {
                let context = context as usize;
                thread::spawn(move || {
                    thread::sleep(delay);
                    let result = RtcBytes {
                        ptr: out.as_ptr(),
                        count: out.len(),
                    };
                    callback(context as *mut c_void, &result);
                });
            }
            CallLinkReply::Null => callback(context, ptr::null()),
            CallLinkReply::Never => {}
        }
    }
}

/// Application fake. Token and member info replies are configurable.
pub(crate) struct RecordingApi {
    timeline: Timeline,
    membership_token: Mutex<Vec<u8>>,
    member_info: Mutex<Vec<u8>>,
}

impl RecordingApi {
    pub(crate) fn with_timeline(timeline: Timeline) -> Self {
        Self {
            timeline,
            membership_token: Mutex::new(b"token".to_vec()),
            member_info: Mutex::new(vec![7; 81]),
        }
    }

    fn record(&self, event: AppEvent) {
        self.timeline.lock().push(Event::App(event));
    }

    pub(crate) fn events(&self) -> Vec<AppEvent> {
        self.timeline
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::App(a) => Some(a.clone()),
                Event::Native(_) => None,
            })
            .collect()
    }

    pub(crate) fn set_membership_token(&self, token: Vec<u8>) {
        *self.membership_token.lock() = token;
    }

    pub(crate) fn set_member_info(&self, info: Vec<u8>) {
        *self.member_info.lock() = info;
    }
}

impl TringApi for RecordingApi {
    fn status_callback(&self, call_id: CallId, peer_id: u64, direction: i32, status_type: i32) {
        self.record(AppEvent::Status {
            call_id,
            peer_id,
            direction,
            status_type,
        });
    }

    fn answer_callback(&self, opaque: Vec<u8>) {
        self.record(AppEvent::Answer(opaque));
    }

    fn offer_callback(&self, opaque: Vec<u8>) {
        self.record(AppEvent::Offer(opaque));
    }

    fn ice_update_callback(&self, ice_candidates: Vec<Vec<u8>>) {
        self.record(AppEvent::Ice(ice_candidates));
    }

    fn group_call_update_ring(&self, group_id: Vec<u8>, ring_id: i64, sender: Vec<u8>, status: i32) {
        self.record(AppEvent::GroupRing {
            group_id,
            ring_id,
            sender,
            status,
        });
    }

    fn received_group_call_peek_for_ringing_check(&self, peek_info: PeekInfo) {
        self.record(AppEvent::Peek(peek_info));
    }

    fn request_group_membership_token(&self, group_id: &[u8]) -> Vec<u8> {
        self.record(AppEvent::MembershipTokenRequested(group_id.to_vec()));
        self.membership_token.lock().clone()
    }

    fn request_group_member_info(&self, group_id: &[u8]) -> Vec<u8> {
        self.record(AppEvent::MemberInfoRequested(group_id.to_vec()));
        self.member_info.lock().clone()
    }

    fn send_opaque_group_call_message(&self, group_id: Vec<u8>, opaque: Vec<u8>, urgency: i32) {
        self.record(AppEvent::SendGroupMessage {
            group_id,
            opaque,
            urgency,
        });
    }

    fn send_opaque_call_message(&self, recipient: Vec<u8>, opaque: Vec<u8>, urgency: i32) {
        self.record(AppEvent::SendCallMessage {
            recipient,
            opaque,
            urgency,
        });
    }

    fn update_remote_devices(&self, demux_ids: Vec<DemuxId>) {
        self.record(AppEvent::RemoteDevices(demux_ids));
    }
}

/// Engine and application fakes sharing one timeline.
pub(crate) fn fakes() -> (Arc<RecordingEngine>, Arc<RecordingApi>, Timeline) {
    let timeline = Timeline::default();
    (
        Arc::new(RecordingEngine::with_timeline(timeline.clone())),
        Arc::new(RecordingApi::with_timeline(timeline.clone())),
        timeline,
    )
}
