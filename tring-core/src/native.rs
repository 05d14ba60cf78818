//! Native engine function surface.
//!
//! [`NativeEngine`] mirrors the engine's C entry points one to one. Arguments are boundary
//! envelopes; the caller owns their backing memory for the duration of the call. The linked
//! implementation lives in `sys` (feature `native`).

use std::ffi::{c_void, CStr};
use std::fmt;
use std::num::NonZeroI64;
use std::sync::Arc;

use crate::call_link::CallLinkCallback;
use crate::marshal::{ByteArray, ByteArray2D, PString};
use crate::router::CallbackRouter;
use crate::session::{CallId, ClientId, DemuxId};

/// Bandwidth mode passed to `proceedCall`.
pub const BANDWIDTH_QUALITY_HIGH: i32 = 2;

/// Group data mode "normal".
pub const DATA_MODE_NORMAL: i32 = 1;

/// Media type for received offers (audio; the engine upgrades on video tracks).
pub const MEDIA_TYPE_AUDIO: i32 = 0;

/// Handle to the single call endpoint. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle(NonZeroI64);

impl EndpointHandle {
    /// A zero handle means endpoint creation failed.
    pub fn new(raw: i64) -> Option<Self> {
        NonZeroI64::new(raw).map(Self)
    }

    pub fn raw(self) -> i64 {
        self.0.get()
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Outbound native calls. Implementations must be callable from any thread.
pub trait NativeEngine: Send + Sync {
    fn init_engine(&self, greeting: PString<'_>) -> i64;

    fn version(&self) -> i64;

    /// Install `router` as the upcall surface and create the endpoint. Returns 0 on failure.
    fn create_call_endpoint(&self, router: Arc<CallbackRouter>) -> i64;

    fn set_self_uuid(&self, endpoint: EndpointHandle, uuid: ByteArray<'_>);

    #[allow(clippy::too_many_arguments)]
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
    );

    #[allow(clippy::too_many_arguments)]
    fn received_answer(
        &self,
        endpoint: EndpointHandle,
        peer_id: PString<'_>,
        call_id: CallId,
        sender_device_id: u32,
        sender_key: ByteArray<'_>,
        receiver_key: ByteArray<'_>,
        opaque: ByteArray<'_>,
    );

    fn received_opaque_message(
        &self,
        endpoint: EndpointHandle,
        sender_uuid: ByteArray<'_>,
        sender_device_id: u32,
        local_device_id: u32,
        opaque: ByteArray<'_>,
        age_sec: u64,
    );

    fn received_ice(
        &self,
        endpoint: EndpointHandle,
        call_id: CallId,
        sender_device_id: u32,
        ice: &ByteArray2D<'_>,
    );

    #[allow(clippy::too_many_arguments)]
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
    );

    fn accept_call(&self, endpoint: EndpointHandle, call_id: CallId);

    fn ignore_call(&self, endpoint: EndpointHandle, call_id: CallId);

    fn hangup_call(&self, endpoint: EndpointHandle);

    fn create_outgoing_call(
        &self,
        endpoint: EndpointHandle,
        peer_id: PString<'_>,
        video_enabled: bool,
        local_device_id: u32,
        call_id: CallId,
    );

    /// Acknowledge delivery of the current outbound signaling message.
    fn signal_message_sent(&self, endpoint: EndpointHandle, call_id: CallId);

    fn set_audio_input(&self, endpoint: EndpointHandle, index: u16);

    fn set_audio_output(&self, endpoint: EndpointHandle, index: u16);

    fn set_outgoing_audio_enabled(&self, endpoint: EndpointHandle, enabled: bool);

    fn set_outgoing_video_enabled(&self, endpoint: EndpointHandle, enabled: bool);

    fn send_video_frame(
        &self,
        endpoint: EndpointHandle,
        width: u32,
        height: u32,
        pixel_format: i32,
        frame: ByteArray<'_>,
    );

    /// Fill `buffer` with the newest RGBA frame of `demux_id`. Returns `(width << 16) | height`,
    /// or 0 when no frame is available.
    fn fill_remote_video_frame(&self, endpoint: EndpointHandle, demux_id: DemuxId, buffer: &mut [u8]) -> i64;

    fn create_group_call_client(
        &self,
        endpoint: EndpointHandle,
        group_id: ByteArray<'_>,
        sfu_url: PString<'_>,
        hkdf_extra_info: ByteArray<'_>,
    ) -> ClientId;

    fn delete_group_call_client(&self, endpoint: EndpointHandle, client_id: ClientId);

    fn group_connect(&self, endpoint: EndpointHandle, client_id: ClientId);

    fn join(&self, endpoint: EndpointHandle, client_id: ClientId);

    fn disconnect(&self, endpoint: EndpointHandle, client_id: ClientId);

    fn group_ring(&self, endpoint: EndpointHandle, client_id: ClientId);

    fn set_data_mode(&self, endpoint: EndpointHandle, client_id: ClientId, data_mode: i32);

    fn set_outgoing_audio_muted(&self, endpoint: EndpointHandle, client_id: ClientId, muted: bool);

    fn set_outgoing_video_muted(&self, endpoint: EndpointHandle, client_id: ClientId, muted: bool);

    fn request_video(&self, endpoint: EndpointHandle, client_id: ClientId, demux_id: DemuxId);

    fn set_membership_proof(&self, endpoint: EndpointHandle, client_id: ClientId, proof: ByteArray<'_>);

    fn set_group_members(&self, endpoint: EndpointHandle, client_id: ClientId, members: ByteArray<'_>);

    fn peek_group_call(&self, endpoint: EndpointHandle, membership_proof: ByteArray<'_>, members: ByteArray<'_>);

    fn received_http_response(&self, endpoint: EndpointHandle, request_id: u32, status: i32, body: ByteArray<'_>);

    /// Parse a call link root key. `callback` is invoked exactly once with `context`, possibly
    /// on another thread, or never if the engine drops the request.
    fn parse_call_link_root_key(&self, link: &CStr, context: *mut c_void, callback: CallLinkCallback);
}

/// Outcome of locating the native engine at startup.
#[derive(Clone)]
pub enum NativeSupport {
    Available(Arc<dyn NativeEngine>),
    Unavailable(String),
}

impl NativeSupport {
    /// The engine linked into this binary, if built with the `native` feature.
    pub fn linked() -> Self {
        #[cfg(feature = "native")]
        {
            NativeSupport::Available(Arc::new(crate::sys::LinkedEngine))
        }
        #[cfg(not(feature = "native"))]
        {
            NativeSupport::Unavailable("built without the `native` feature".to_string())
        }
    }
}

impl fmt::Debug for NativeSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeSupport::Available(_) => f.write_str("Available"),
            NativeSupport::Unavailable(reason) => write!(f, "Unavailable({reason})"),
        }
    }
}
