//! Background connection worker.
//!
//! One worker runs per `start()`: it binds the socket (retrying while the
//! engine still holds the endpoint of a previous association), issues the
//! non-blocking connect and exits. The association reaches CONNECTED later,
//! when the engine reports communication-up.

use std::{io, sync::atomic::Ordering, sync::Arc, thread, time::Duration};

use parking_lot::MutexGuard;
use tracing::{debug, info, trace, warn};

use crate::engine::{ConnAddr, EngineError};
use crate::{Association, AssociationState};

/// Sleep between bind attempts while the local endpoint is in use
pub const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Handle of a running connection worker thread
pub(crate) struct ConnectionWorker {
    handle: thread::JoinHandle<()>,
}

impl ConnectionWorker {
    pub(crate) fn spawn(association: Arc<Association>) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("connection_thread_{}", association.id()))
            .spawn(move || {
                // TODO: accept inbound associations once a listener role exists
                if !client_role_connect(&association) {
                    debug!(association_id = association.id(), "Connection worker gave up");
                }
            })?;
        Ok(Self { handle })
    }

    /// Must be called without the association's instance lock held.
    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            warn!("Connection worker panicked");
        }
    }
}

fn client_role_connect(association: &Association) -> bool {
    let id = association.id();
    let mut inner = association.inner.lock();
    let socket = match (inner.state, inner.socket) {
        (AssociationState::Connecting, Some(socket)) => socket,
        (state, _) => {
            debug!(association_id = id, %state, "Association no longer connecting");
            return false;
        }
    };

    // Right after a disconnect the engine keeps the endpoint for a while, so
    // a quick reconnect sees the address in use until it is released.
    let local = ConnAddr::new(association.token(), inner.local_port);
    loop {
        match association.engine.bind(socket, local) {
            Ok(()) => break,
            Err(EngineError::AddrInUse) => {
                trace!(association_id = id, %local, "Local address in use, retrying bind");
                MutexGuard::unlocked(&mut inner, || thread::sleep(BIND_RETRY_INTERVAL));
                if inner.state != AssociationState::Connecting || inner.socket != Some(socket) {
                    debug!(association_id = id, "Association torn down during bind retry");
                    return false;
                }
            }
            Err(e) => {
                info!(association_id = id, error = %e, "bind() error");
                return false;
            }
        }
    }

    let remote = ConnAddr::new(association.token(), inner.remote_port);
    match association.engine.connect(socket, remote) {
        Ok(()) | Err(EngineError::InProgress) => {}
        Err(e) => {
            info!(association_id = id, error = %e, "connect() error");
            return false;
        }
    }

    association.done_connect.store(true, Ordering::Release);
    debug!(association_id = id, %local, %remote, "Outbound connect issued");
    true
}
