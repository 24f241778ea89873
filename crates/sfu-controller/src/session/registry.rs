//! Index of sessions by id.
//!
//! A session lives in exactly one of two maps: not-active (created but never
//! joined, or recycled after everyone left) and active. Moves between the
//! maps hold the write side of `moves`; lookups spanning both maps hold the
//! read side, so a moving session is never seen in neither.

use super::room::RoomSession;
use crate::errors::SfuError;
use crate::observability::metrics;
use common::types::SessionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Default)]
pub struct SessionRegistry {
    active: DashMap<SessionId, Arc<RoomSession>>,
    not_active: DashMap<SessionId, Arc<RoomSession>>,
    moves: RwLock<()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new not-active session.
    ///
    /// # Errors
    ///
    /// `Conflict` if a session with the same id exists in either map.
    pub fn insert(&self, session: Arc<RoomSession>) -> Result<(), SfuError> {
        let id = session.id().clone();
        let _moves = self.moves.write();
        if self.active.contains_key(&id) {
            return Err(SfuError::Conflict(format!("session {id} already exists")));
        }
        match self.not_active.entry(id.clone()) {
            Entry::Occupied(_) => Err(SfuError::Conflict(format!("session {id} already exists"))),
            Entry::Vacant(slot) => {
                slot.insert(session);
                self.update_gauges();
                Ok(())
            }
        }
    }

    pub fn get_active(&self, id: &SessionId) -> Option<Arc<RoomSession>> {
        self.active.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn get_not_active(&self, id: &SessionId) -> Option<Arc<RoomSession>> {
        self.not_active.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Active session first, then not-active.
    pub fn get_any(&self, id: &SessionId) -> Option<Arc<RoomSession>> {
        let _moves = self.moves.read();
        self.get_active(id).or_else(|| self.get_not_active(id))
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.active.contains_key(id)
    }

    /// Move a session to the active map. Idempotent.
    pub fn activate(&self, session: &Arc<RoomSession>) {
        let _moves = self.moves.write();
        self.active
            .entry(session.id().clone())
            .or_insert_with(|| Arc::clone(session));
        self.not_active.remove(session.id());
        self.update_gauges();
    }

    /// Move a session back to the not-active map.
    pub fn deactivate(&self, session: &Arc<RoomSession>) {
        let _moves = self.moves.write();
        self.not_active
            .entry(session.id().clone())
            .or_insert_with(|| Arc::clone(session));
        self.active.remove(session.id());
        self.update_gauges();
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<RoomSession>> {
        let _moves = self.moves.write();
        let removed = self
            .active
            .remove(id)
            .or_else(|| self.not_active.remove(id))
            .map(|(_, s)| s);
        self.update_gauges();
        removed
    }

    /// Every session, ordered by creation time.
    pub fn list(&self) -> Vec<Arc<RoomSession>> {
        let _moves = self.moves.read();
        let mut sessions: Vec<Arc<RoomSession>> = self
            .active
            .iter()
            .chain(self.not_active.iter())
            .map(|s| Arc::clone(s.value()))
            .collect();
        sessions.sort_by_key(|s| (s.created_at_ms(), s.id().clone()));
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn not_active_count(&self) -> usize {
        self.not_active.len()
    }

    fn update_gauges(&self) {
        metrics::set_session_gauges(self.active.len(), self.not_active.len());
    }
}
