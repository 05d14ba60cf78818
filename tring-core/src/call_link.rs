//! Call-link root key parsing: an asynchronous native callback turned into a bounded wait.

use std::ffi::{c_void, CString};
use std::sync::mpsc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::TringError;
use crate::marshal::{ByteArray, MarshalError};
use crate::native::NativeEngine;

/// Default wait for the parse callback.
pub const DEFAULT_CALL_LINK_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte result handed to the parse callback.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RtcBytes {
    pub ptr: *const u8,
    pub count: usize,
}

/// Completion callback signature expected by the native parser.
pub type CallLinkCallback = extern "C" fn(context: *mut c_void, result: *const RtcBytes);

type Reply = mpsc::Sender<Vec<u8>>;

/// Receives the parse result. `context` is the boxed reply channel leaked by [`parse_call_link`].
pub extern "C" fn call_link_parsed(context: *mut c_void, result: *const RtcBytes) {
    if context.is_null() {
        warn!("call link callback without context");
        return;
    }
    // SAFETY: context came from Box::into_raw in parse_call_link and is reclaimed exactly once.
    let reply = unsafe { Box::from_raw(context as *mut Reply) };
    let bytes = if result.is_null() {
        Vec::new()
    } else {
        // SAFETY: the engine keeps `result` valid for the duration of the callback.
        let raw = unsafe { &*result };
        unsafe { ByteArray::from_raw(raw.ptr, raw.count) }
            .to_vec()
            .unwrap_or_else(|e| {
                warn!(error = %e, "unreadable call link result");
                Vec::new()
            })
    };
    // The waiter may have timed out already.
    let _ = reply.send(bytes);
}

/// Parse `link`, blocking for at most `timeout`.
///
/// If the engine never calls back, the reply box is leaked; it is freed if the callback
/// arrives late.
pub fn parse_call_link(engine: &dyn NativeEngine, link: &str, timeout: Duration) -> Result<Vec<u8>, TringError> {
    let c_link = CString::new(link).map_err(|_| MarshalError::InteriorNul)?;
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let context = Box::into_raw(Box::<Reply>::new(tx)) as *mut c_void;
    engine.parse_call_link_root_key(&c_link, context, call_link_parsed);
    match rx.recv_timeout(timeout) {
        Ok(bytes) => {
            info!(len = bytes.len(), "call link parsed");
            Ok(bytes)
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "call link parse timed out");
            Err(TringError::CallLinkTimeout(timeout))
        }
    }
}
