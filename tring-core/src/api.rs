//! Application-facing upcall surface and the value types it carries.

use uuid::Uuid;

use crate::session::{CallId, DemuxId};

/// Implemented by the application. Called from the native callback thread or the executor
/// worker, never while session state is locked.
pub trait TringApi: Send + Sync {
    /// Call status change (also used by the engine for hangup signaling).
    fn status_callback(&self, call_id: CallId, peer_id: u64, direction: i32, status_type: i32);

    fn answer_callback(&self, opaque: Vec<u8>);

    fn offer_callback(&self, opaque: Vec<u8>);

    fn ice_update_callback(&self, ice_candidates: Vec<Vec<u8>>);

    fn group_call_update_ring(&self, group_id: Vec<u8>, ring_id: i64, sender: Vec<u8>, status: i32);

    fn received_group_call_peek_for_ringing_check(&self, peek_info: PeekInfo);

    /// Membership token for `group_id`. May block on the network; runs on the executor.
    fn request_group_membership_token(&self, group_id: &[u8]) -> Vec<u8>;

    /// Serialized member records for `group_id`, 81 bytes each.
    fn request_group_member_info(&self, group_id: &[u8]) -> Vec<u8>;

    fn send_opaque_group_call_message(&self, group_id: Vec<u8>, opaque: Vec<u8>, urgency: i32);

    fn send_opaque_call_message(&self, recipient: Vec<u8>, opaque: Vec<u8>, urgency: i32);

    fn update_remote_devices(&self, demux_ids: Vec<DemuxId>);
}

/// Result of peeking a group call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekInfo {
    pub joined_members: Vec<Uuid>,
    pub creator: Option<Uuid>,
    pub era_id: String,
    pub max_devices: u64,
    pub device_count: u64,
}

/// One decoded RGBA video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TringFrame {
    pub width: u32,
    pub height: u32,
    /// Pixel format tag; `-1` for frames produced by the engine (always RGBA).
    pub pixel_format: i32,
    pub data: Vec<u8>,
}

/// Decode a 16 byte user id. Anything else is not a user id.
pub fn user_id_to_uuid(bytes: &[u8]) -> Option<Uuid> {
    Uuid::from_slice(bytes).ok()
}
