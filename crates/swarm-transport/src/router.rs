//! Pending-call correlation.
//!
//! Every outgoing CALL is registered here under its message id. The read
//! loop resolves the entry when the matching CALLRESULT or CALLERROR
//! arrives; the caller's completion handle fires with the outcome. Entries
//! leave the map on reply, on deadline, or when the link dies.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use swarm_types::{CallErrorCode, Message, OcppError, OcppResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::client::LinkCommand;

/// Terminal state of a pending CALL.
#[derive(Debug)]
pub enum CallOutcome {
    /// Peer answered with CALLRESULT.
    Result(Value),
    /// Peer answered with CALLERROR.
    Error {
        code: CallErrorCode,
        description: String,
    },
    /// The link failed the call locally (disconnect, cancellation).
    Failed(OcppError),
}

struct PendingEntry {
    action: String,
    handle: oneshot::Sender<CallOutcome>,
}

/// Map of in-flight CALLs keyed by message id.
#[derive(Default)]
pub struct CallRouter {
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl CallRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outgoing CALL; the returned handle fires with the outcome.
    pub fn register(&self, unique_id: &str, action: &str) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap();
        if pending
            .insert(
                unique_id.to_string(),
                PendingEntry {
                    action: action.to_string(),
                    handle: tx,
                },
            )
            .is_some()
        {
            warn!("duplicate message id registered: {unique_id}");
        }
        rx
    }

    /// Resolve a pending CALL with its CALLRESULT payload. Returns the
    /// action name, or `None` for an unmatched reply (logged and dropped).
    pub fn resolve(&self, unique_id: &str, payload: Value) -> Option<String> {
        let entry = self.pending.lock().unwrap().remove(unique_id)?;
        let action = entry.action.clone();
        let _ = entry.handle.send(CallOutcome::Result(payload));
        Some(action)
    }

    /// Fail a pending CALL with a CALLERROR from the peer.
    pub fn reject(
        &self,
        unique_id: &str,
        code: CallErrorCode,
        description: String,
    ) -> Option<String> {
        let entry = self.pending.lock().unwrap().remove(unique_id)?;
        let action = entry.action.clone();
        let _ = entry.handle.send(CallOutcome::Error { code, description });
        Some(action)
    }

    /// Drop a pending entry without completing it (deadline expiry).
    pub fn forget(&self, unique_id: &str) -> bool {
        self.pending.lock().unwrap().remove(unique_id).is_some()
    }

    /// Fail every pending CALL, e.g. on disconnect or local stop.
    pub fn fail_all(&self, err: impl Fn(&str) -> OcppError) {
        let drained: Vec<(String, PendingEntry)> =
            self.pending.lock().unwrap().drain().collect();
        for (id, entry) in drained {
            debug!("failing pending call {id} ({})", entry.action);
            let _ = entry
                .handle
                .send(CallOutcome::Failed(err(entry.action.as_str())));
        }
    }

    /// Number of CALLs currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Issue a CALL over a link and await its reply within `timeout`.
///
/// On deadline the entry is removed and the caller sees `CallTimeout`; a
/// reply arriving later is then unmatched and gets dropped by the read loop.
pub async fn call_over(
    router: &CallRouter,
    outbox: &mpsc::Sender<LinkCommand>,
    action: &str,
    payload: Value,
    timeout: Duration,
) -> OcppResult<Value> {
    let message = Message::call(action, payload)?;
    let unique_id = message.unique_id().to_string();
    let text = swarm_messages::encode(&message)?;

    let handle = router.register(&unique_id, action);

    if outbox.send(LinkCommand::Send(text)).await.is_err() {
        router.forget(&unique_id);
        return Err(OcppError::Transport {
            message: "link closed before send".to_string(),
        });
    }

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(CallOutcome::Result(payload))) => Ok(payload),
        Ok(Ok(CallOutcome::Error { code, description })) => {
            Err(OcppError::CallError { code, description })
        }
        Ok(Ok(CallOutcome::Failed(err))) => Err(err),
        // Sender dropped without an outcome: the router was torn down.
        Ok(Err(_)) => Err(OcppError::Cancelled),
        Err(_) => {
            router.forget(&unique_id);
            Err(OcppError::CallTimeout {
                action: action.to_string(),
            })
        }
    }
}
