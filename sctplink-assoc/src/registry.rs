//! Keyed table of live associations.
//!
//! The registry owns every association by id and is the single place engine
//! upcalls enter. Upcalls are addressed by [`AssociationToken`], which names
//! one association instance: an upcall for a token that is no longer
//! registered (the engine may still emit a final notification during
//! teardown) is dropped, even when a new association has since been created
//! under the same id. The table lock only covers map operations and is never
//! held while calling into an association.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::engine::{AssociationToken, EngineSettings, SctpEngine};
use crate::events::{self, Upcall};
use crate::{Association, AssociationId};

struct RegistryEntry {
    association: Arc<Association>,
    refs: usize,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<AssociationId, RegistryEntry>,
    by_token: HashMap<AssociationToken, Arc<Association>>,
    next_token: u64,
    engine_active: bool,
}

/// Process-wide association table
pub struct AssociationRegistry {
    engine: Arc<dyn SctpEngine>,
    settings: EngineSettings,
    inner: Mutex<RegistryInner>,
}

impl AssociationRegistry {
    pub fn new(engine: Arc<dyn SctpEngine>) -> Self {
        Self::with_settings(engine, EngineSettings::default())
    }

    /// Registry whose engine is initialised with `settings`.
    pub fn with_settings(engine: Arc<dyn SctpEngine>, settings: EngineSettings) -> Self {
        Self {
            engine,
            settings,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Look up the association for `id`, creating it on first use.
    ///
    /// Every call takes a reference that must be given back with
    /// [`AssociationRegistry::release`].
    pub fn get(&self, id: AssociationId) -> Arc<Association> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&id) {
            entry.refs += 1;
            return entry.association.clone();
        }

        if !inner.engine_active {
            debug!(settings = ?self.settings, "Initializing SCTP engine");
            self.engine.init(&self.settings);
            inner.engine_active = true;
        }
        inner.next_token += 1;
        let token = AssociationToken(inner.next_token);
        let association = Association::new(id, token, self.engine.clone());
        inner.by_token.insert(token, association.clone());
        self.engine.register_address(token);
        inner.entries.insert(
            id,
            RegistryEntry {
                association: association.clone(),
                refs: 1,
            },
        );
        debug!(association_id = id, %token, "Created association");
        association
    }

    /// Current association for `id`; does not take a reference.
    pub fn lookup(&self, id: AssociationId) -> Option<Arc<Association>> {
        self.inner.lock().entries.get(&id).map(|entry| entry.association.clone())
    }

    /// Liveness check used by upcalls; does not take a reference.
    pub fn lookup_token(&self, token: AssociationToken) -> Option<Arc<Association>> {
        self.inner.lock().by_token.get(&token).cloned()
    }

    pub fn contains(&self, id: AssociationId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    /// Get number of registered associations
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop one reference. The last release removes the association, joins
    /// its worker and closes its socket. Returns whether it was removed.
    pub fn release(&self, id: AssociationId) -> bool {
        let association = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entries.get_mut(&id) else {
                warn!(association_id = id, "Release of unknown association");
                return false;
            };
            entry.refs -= 1;
            if entry.refs > 0 {
                return false;
            }
            let Some(entry) = inner.entries.remove(&id) else {
                return false;
            };
            let token = entry.association.token();
            inner.by_token.remove(&token);
            self.engine.deregister_address(token);
            entry.association
        };

        association.destroy();
        debug!(association_id = id, token = %association.token(), "Destroyed association");

        let mut inner = self.inner.lock();
        if inner.entries.is_empty() && inner.engine_active {
            debug!("Last association gone, finishing SCTP engine");
            self.engine.finish();
            inner.engine_active = false;
        }
        true
    }

    /// Engine receive callback: notification, shutdown completion or message.
    pub fn receive(&self, token: AssociationToken, upcall: Upcall) {
        match self.lookup_token(token) {
            Some(association) => events::handle_upcall(&association, upcall),
            None => trace!(%token, "Dropping upcall for unknown association"),
        }
    }

    /// Engine egress callback: a wire packet to put on the transport.
    pub fn packet_out(&self, token: AssociationToken, packet: &[u8]) {
        match self.lookup_token(token) {
            Some(association) => association.emit_packet_out(packet),
            None => trace!(%token, "Dropping packet for unknown association"),
        }
    }
}
