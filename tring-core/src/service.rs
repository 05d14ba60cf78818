//! Call session coordinator: the application's entry point and the only initiator of native
//! calls.
//!
//! Every operation takes the operation lock first, then briefly the session lock. The session
//! lock is released before any native call, since the engine may upcall synchronously. The
//! operation lock is reentrant so an application callback running on the calling thread may
//! issue further operations.

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::{debug, info, warn};

use crate::api::{TringApi, TringFrame};
use crate::call_link::parse_call_link;
use crate::config::TringConfig;
use crate::error::{Result, TringError};
use crate::executor::AsyncExecutor;
use crate::http::{HttpBridge, HttpClient, ReqwestClient};
use crate::marshal::{check_member_info, Arena, MarshalError};
use crate::native::{EndpointHandle, NativeEngine, NativeSupport, BANDWIDTH_QUALITY_HIGH, DATA_MODE_NORMAL, MEDIA_TYPE_AUDIO};
use crate::router::CallbackRouter;
use crate::session::{ActiveSession, CallId, ClientId, DemuxId, Session};

const GREETING: &str = "Hello from tring-core";

/// Demux id of the first remote stream, requested as soon as a group client connects.
const FIRST_DEMUX_ID: DemuxId = 1;

/// Pixel format reported for frames read back from the engine (always RGBA).
const REMOTE_FRAME_PIXEL_FORMAT: i32 = -1;

struct Bound {
    engine: Arc<dyn NativeEngine>,
    endpoint: EndpointHandle,
    router: Arc<CallbackRouter>,
    native_version: i64,
}

pub struct TringService {
    native: std::result::Result<Bound, String>,
    session: Arc<Session>,
    config: TringConfig,
    op_lock: ReentrantMutex<()>,
}

impl TringService {
    /// Initialize the engine and create the call endpoint, using a reqwest client for
    /// bridged HTTP requests.
    pub fn new(api: Arc<dyn TringApi>, support: NativeSupport, config: TringConfig) -> Result<Self> {
        let client = Arc::new(ReqwestClient::new(config.http_timeout()));
        Self::with_http_client(api, support, config, client)
    }

    /// As [`TringService::new`] with a caller-supplied HTTP client. Fails only if the executor
    /// thread cannot be started; a missing engine is recorded and reported per operation.
    pub fn with_http_client(
        api: Arc<dyn TringApi>,
        support: NativeSupport,
        config: TringConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let session = Arc::new(Session::new());
        let native = match support {
            NativeSupport::Unavailable(reason) => {
                warn!(%reason, "no native calling engine");
                Err(reason)
            }
            NativeSupport::Available(engine) => {
                let arena = Arena::new();
                engine.init_engine(arena.string(GREETING));
                let native_version = engine.version();
                let router = Arc::new(CallbackRouter::new(
                    engine.clone(),
                    api,
                    session.clone(),
                    AsyncExecutor::new()?,
                    HttpBridge::new(client),
                ));
                let raw = engine.create_call_endpoint(router.clone());
                match EndpointHandle::new(raw) {
                    Some(endpoint) => {
                        router.bind(endpoint);
                        info!(%endpoint, native_version, "call endpoint created");
                        Ok(Bound {
                            engine,
                            endpoint,
                            router,
                            native_version,
                        })
                    }
                    None => {
                        warn!("native engine returned a null call endpoint");
                        Err("call endpoint creation failed".to_string())
                    }
                }
            }
        };
        Ok(Self {
            native,
            session,
            config,
            op_lock: ReentrantMutex::new(()),
        })
    }

    fn bound(&self) -> Result<&Bound> {
        self.native
            .as_ref()
            .map_err(|reason| TringError::NoNativeSupport(reason.clone()))
    }

    pub fn has_native_support(&self) -> bool {
        self.native.is_ok()
    }

    /// Engine version reported at startup.
    pub fn native_version(&self) -> Option<i64> {
        self.native.as_ref().ok().map(|b| b.native_version)
    }

    pub fn version_info(&self) -> String {
        match &self.native {
            Ok(b) => format!(
                "tring-core {} using native engine v{}",
                env!("CARGO_PKG_VERSION"),
                b.native_version
            ),
            Err(reason) => format!("tring-core {} without native engine ({reason})", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn config(&self) -> &TringConfig {
        &self.config
    }

    pub fn session(&self) -> ActiveSession {
        self.session.active()
    }

    /// Upcall surface installed in the engine.
    pub fn callback_router(&self) -> Result<Arc<CallbackRouter>> {
        Ok(self.bound()?.router.clone())
    }

    pub fn set_self_uuid(&self, uuid: &[u8]) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        let arena = Arena::new();
        b.engine.set_self_uuid(b.endpoint, arena.bytes(uuid));
        Ok(())
    }

    /// Start an outgoing one-to-one call. Returns `call_id` unchanged.
    pub fn start_outgoing_call(
        &self,
        call_id: CallId,
        peer_id: &str,
        local_device_id: u32,
        enable_video: bool,
    ) -> Result<CallId> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        info!(call_id, local_device_id, enable_video, "starting outgoing call");
        b.engine.set_audio_input(b.endpoint, 0);
        b.engine.set_audio_output(b.endpoint, 0);
        self.session.set_one_to_one(call_id);
        let arena = Arena::new();
        b.engine
            .create_outgoing_call(b.endpoint, arena.string(peer_id), enable_video, local_device_id, call_id);
        Ok(call_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn received_offer(
        &self,
        peer_id: &str,
        call_id: CallId,
        sender_device_id: u32,
        receiver_device_id: u32,
        sender_key: &[u8],
        receiver_key: &[u8],
        opaque: &[u8],
    ) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        info!(call_id, sender_device_id, len = opaque.len(), "received offer");
        self.session.set_one_to_one(call_id);
        let arena = Arena::new();
        b.engine.received_offer(
            b.endpoint,
            arena.string(peer_id),
            call_id,
            MEDIA_TYPE_AUDIO,
            sender_device_id,
            receiver_device_id,
            arena.bytes(sender_key),
            arena.bytes(receiver_key),
            arena.bytes(opaque),
            0,
        );
        Ok(())
    }

    pub fn received_answer(
        &self,
        peer_id: &str,
        call_id: CallId,
        sender_device_id: u32,
        sender_key: &[u8],
        receiver_key: &[u8],
        opaque: &[u8],
    ) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        info!(call_id, sender_device_id, len = opaque.len(), "received answer");
        self.session.set_one_to_one(call_id);
        let arena = Arena::new();
        b.engine.received_answer(
            b.endpoint,
            arena.string(peer_id),
            call_id,
            sender_device_id,
            arena.bytes(sender_key),
            arena.bytes(receiver_key),
            arena.bytes(opaque),
        );
        Ok(())
    }

    pub fn received_opaque_message(
        &self,
        sender_uuid: &[u8],
        sender_device_id: u32,
        local_device_id: u32,
        opaque: &[u8],
        age_sec: u64,
    ) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        debug!(sender_device_id, len = opaque.len(), age_sec, "received opaque message");
        let arena = Arena::new();
        b.engine.received_opaque_message(
            b.endpoint,
            arena.bytes(sender_uuid),
            sender_device_id,
            local_device_id,
            arena.bytes(opaque),
            age_sec,
        );
        Ok(())
    }

    pub fn received_ice<R: AsRef<[u8]>>(&self, call_id: CallId, sender_device_id: u32, ice_candidates: &[R]) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        debug!(call_id, count = ice_candidates.len(), "received ice");
        let arena = Arena::new();
        let ice = arena.rows(ice_candidates)?;
        b.engine.received_ice(b.endpoint, call_id, sender_device_id, &ice);
        Ok(())
    }

    /// Let the engine continue an incoming or outgoing call with the given ICE server.
    pub fn proceed<R: AsRef<[u8]>>(
        &self,
        call_id: CallId,
        ice_user: &str,
        ice_pwd: &str,
        host_name: &str,
        ice_candidates: &[R],
    ) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        info!(call_id, host_name, "proceeding with call");
        let arena = Arena::new();
        let ice = arena.rows(ice_candidates)?;
        b.engine.set_outgoing_audio_enabled(b.endpoint, true);
        b.engine.proceed_call(
            b.endpoint,
            call_id,
            BANDWIDTH_QUALITY_HIGH,
            0,
            arena.string(ice_user),
            arena.string(ice_pwd),
            arena.string(host_name),
            &ice,
        );
        Ok(())
    }

    pub fn accept_call(&self) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        let call_id = self.session.active_call_id().ok_or(TringError::NoActiveCall)?;
        info!(call_id, "accepting call");
        b.engine.set_audio_input(b.endpoint, 0);
        b.engine.set_outgoing_audio_enabled(b.endpoint, true);
        b.engine.accept_call(b.endpoint, call_id);
        Ok(())
    }

    pub fn ignore_call(&self) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        let call_id = self.session.active_call_id().ok_or(TringError::NoActiveCall)?;
        info!(call_id, "ignoring call");
        b.engine.ignore_call(b.endpoint, call_id);
        Ok(())
    }

    /// Leave a group call, or hang up the one-to-one call.
    pub fn hangup_call(&self) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        match self.session.active() {
            ActiveSession::Group(client_id) => {
                info!(client_id, "disconnecting group call");
                b.engine.disconnect(b.endpoint, client_id);
            }
            ActiveSession::OneToOne(call_id) => {
                info!(call_id, "hanging up");
                self.session.end_one_to_one();
                b.engine.hangup_call(b.endpoint);
            }
            ActiveSession::None => {
                debug!("hangup without an active session");
                b.engine.hangup_call(b.endpoint);
            }
        }
        Ok(())
    }

    /// Create and connect a group call client.
    ///
    /// Outgoing media is muted while connecting and the first remote stream is requested
    /// before media is unmuted; the engine expects exactly this sequence.
    pub fn create_group_call_client(&self, group_id: &[u8], sfu_url: &str, hkdf_extra_info: &[u8]) -> Result<ClientId> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        if !group_id.is_empty() {
            self.session.set_local_group_id(group_id.to_vec());
        }
        let local_group_id = self.session.local_group_id();
        let client_id = {
            let arena = Arena::new();
            b.engine.create_group_call_client(
                b.endpoint,
                arena.bytes(&local_group_id),
                arena.string(sfu_url),
                arena.bytes(hkdf_extra_info),
            )
        };
        if client_id == 0 {
            warn!(sfu_url, "group call client rejected");
            return Err(TringError::GroupClientRejected);
        }
        self.session.set_group(client_id);
        info!(client_id, sfu_url, "group call client created");

        b.engine.set_outgoing_audio_muted(b.endpoint, client_id, true);
        b.engine.set_outgoing_video_muted(b.endpoint, client_id, true);
        b.engine.set_data_mode(b.endpoint, client_id, DATA_MODE_NORMAL);
        b.engine.group_connect(b.endpoint, client_id);
        b.engine.request_video(b.endpoint, client_id, FIRST_DEMUX_ID);
        b.engine.set_outgoing_audio_muted(b.endpoint, client_id, false);
        b.engine.set_outgoing_video_muted(b.endpoint, client_id, false);
        b.engine.set_data_mode(b.endpoint, client_id, DATA_MODE_NORMAL);
        Ok(client_id)
    }

    pub fn join_group_call(&self) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        let client_id = self.session.client_id().ok_or(TringError::NoGroupClient)?;
        info!(client_id, "joining group call");
        b.engine.join(b.endpoint, client_id);
        Ok(())
    }

    pub fn set_group_bandwidth(&self, client_id: ClientId, data_mode: i32) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        self.session.client_id().ok_or(TringError::NoGroupClient)?;
        debug!(client_id, data_mode, "setting group data mode");
        b.engine.set_data_mode(b.endpoint, client_id, data_mode);
        Ok(())
    }

    /// Peek a group call. `members` holds 81 byte member records.
    pub fn peek_group_call(&self, membership_proof: &[u8], members: &[u8]) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        self.session.client_id().ok_or(TringError::NoGroupClient)?;
        check_member_info(members)?;
        debug!(proof_len = membership_proof.len(), members_len = members.len(), "peeking group call");
        let arena = Arena::new();
        b.engine
            .peek_group_call(b.endpoint, arena.bytes(membership_proof), arena.bytes(members));
        Ok(())
    }

    pub fn enable_outgoing_audio(&self, enable: bool) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        match self.session.active() {
            ActiveSession::Group(client_id) => b.engine.set_outgoing_audio_muted(b.endpoint, client_id, !enable),
            ActiveSession::OneToOne(_) | ActiveSession::None => b.engine.set_outgoing_audio_enabled(b.endpoint, enable),
        }
        Ok(())
    }

    pub fn enable_outgoing_video(&self, enable: bool) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        match self.session.active() {
            ActiveSession::Group(client_id) => b.engine.set_outgoing_video_muted(b.endpoint, client_id, !enable),
            ActiveSession::OneToOne(_) | ActiveSession::None => b.engine.set_outgoing_video_enabled(b.endpoint, enable),
        }
        Ok(())
    }

    /// Hand a local camera frame to the engine. Not validated here.
    pub fn send_video_frame(&self, width: u32, height: u32, pixel_format: i32, raw: &[u8]) -> Result<()> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        let arena = Arena::new();
        b.engine
            .send_video_frame(b.endpoint, width, height, pixel_format, arena.bytes(raw));
        Ok(())
    }

    /// Newest RGBA frame of `demux_id`, if the engine has one.
    ///
    /// The engine always returns its newest frame, so `skip` only shows up in diagnostics.
    pub fn get_remote_video_frame(&self, demux_id: DemuxId, skip: bool) -> Result<Option<TringFrame>> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        let capacity = self.config.remote_frame_capacity;
        let mut buffer = vec![0u8; capacity];
        let res = b.engine.fill_remote_video_frame(b.endpoint, demux_id, &mut buffer);
        if res <= 0 {
            if res < 0 {
                warn!(demux_id, res, "negative frame result");
            }
            return Ok(None);
        }
        let width = ((res >> 16) & 0xffff_ffff) as u32;
        let height = (res & 0xffff) as u32;
        let needed = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .unwrap_or(usize::MAX);
        if needed > capacity {
            return Err(MarshalError::Overflow { needed, capacity }.into());
        }
        buffer.truncate(needed);
        debug!(demux_id, width, height, skip, "remote frame");
        Ok(Some(TringFrame {
            width,
            height,
            pixel_format: REMOTE_FRAME_PIXEL_FORMAT,
            data: buffer,
        }))
    }

    /// Root key bytes of a call link. Blocks up to the configured call-link timeout.
    pub fn get_call_link_bytes(&self, link: &str) -> Result<Vec<u8>> {
        let _op = self.op_lock.lock();
        let b = self.bound()?;
        parse_call_link(b.engine.as_ref(), link, self.config.call_link_timeout())
    }
}
