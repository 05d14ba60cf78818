//! Session bookkeeping shared by the coordinator and the callback router.
//!
//! Lock order: the coordinator's operation lock is taken before [`Session`]'s lock. The session
//! lock is only held for reads and writes of these fields, never across a native call or an
//! application callback.

use parking_lot::Mutex;

/// One-to-one call identifier, chosen by the application.
pub type CallId = u64;

/// Group call client identifier, assigned by the native engine.
pub type ClientId = i32;

/// Remote media stream identifier within a group call.
pub type DemuxId = u32;

/// Which kind of call, if any, outbound media and teardown operations target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveSession {
    #[default]
    None,
    OneToOne(CallId),
    Group(ClientId),
}

#[derive(Debug, Default)]
struct SessionState {
    active: ActiveSession,
    last_call_id: Option<CallId>,
    local_group_id: Vec<u8>,
}

/// Lock-guarded session fields.
#[derive(Debug, Default)]
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> ActiveSession {
        self.state.lock().active
    }

    /// Record `call_id` as the call awaiting signaling acknowledgement.
    pub fn set_one_to_one(&self, call_id: CallId) {
        let mut state = self.state.lock();
        state.active = ActiveSession::OneToOne(call_id);
        state.last_call_id = Some(call_id);
    }

    pub fn set_group(&self, client_id: ClientId) {
        self.state.lock().active = ActiveSession::Group(client_id);
    }

    /// The one-to-one call id, if that is the active session.
    pub fn active_call_id(&self) -> Option<CallId> {
        match self.active() {
            ActiveSession::OneToOne(call_id) => Some(call_id),
            _ => None,
        }
    }

    /// Call id for signaling acknowledgements: the most recent one-to-one call, kept after
    /// hangup because the engine still sends the hangup message under it.
    pub fn signaling_call_id(&self) -> Option<CallId> {
        self.state.lock().last_call_id
    }

    /// The group client id, if that is the active session.
    pub fn client_id(&self) -> Option<ClientId> {
        match self.active() {
            ActiveSession::Group(client_id) => Some(client_id),
            _ => None,
        }
    }

    /// Clear a one-to-one session. Returns the call id that was cleared.
    pub fn end_one_to_one(&self) -> Option<CallId> {
        let mut state = self.state.lock();
        match state.active {
            ActiveSession::OneToOne(call_id) => {
                state.active = ActiveSession::None;
                Some(call_id)
            }
            _ => None,
        }
    }

    /// Clear the group session if `client_id` is the active client.
    pub fn end_group(&self, client_id: ClientId) -> bool {
        let mut state = self.state.lock();
        if state.active == ActiveSession::Group(client_id) {
            state.active = ActiveSession::None;
            true
        } else {
            false
        }
    }

    pub fn local_group_id(&self) -> Vec<u8> {
        self.state.lock().local_group_id.clone()
    }

    pub fn set_local_group_id(&self, group_id: Vec<u8>) {
        self.state.lock().local_group_id = group_id;
    }
}
