use super::{Registry, UpdateStore, select_accepted, select_sheet_updates};
use crate::error::StoreError;
use crate::registry::{Sheet, Visibility};
use crate::update_log::{Acceptance, LogEntry, NewUpdate, SheetId, UpdateId};
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    registry: Registry,
    entries: Vec<LogEntry>,
}

/// Keeps everything in process memory. Used by tests and throwaway servers.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> Result<R, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut state))
    }
}

impl UpdateStore for MemoryStore {
    async fn append(&self, update: NewUpdate) -> Result<LogEntry, StoreError> {
        self.with_state(|state| {
            let id = state.registry.next_update_id();
            let entry = LogEntry::from_new(id, update);
            state.entries.push(entry.clone());
            entry
        })
    }

    async fn accepted_after(&self, after: UpdateId) -> Result<Vec<LogEntry>, StoreError> {
        self.with_state(|state| select_accepted(&state.entries, after))
    }

    async fn sheet_updates(
        &self,
        sheet: SheetId,
        acceptance: Acceptance,
        after: UpdateId,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.with_state(|state| select_sheet_updates(&state.entries, sheet, acceptance, after))
    }

    async fn register_publisher(&self, publisher: &str) -> Result<bool, StoreError> {
        self.with_state(|state| state.registry.add_publisher(publisher))
    }

    async fn publishers(&self) -> Result<Vec<String>, StoreError> {
        self.with_state(|state| state.registry.publishers.clone())
    }

    async fn sheets(&self) -> Result<Vec<Sheet>, StoreError> {
        self.with_state(|state| state.registry.sheets.clone())
    }

    async fn find_sheet(&self, publisher: &str, name: &str) -> Result<Option<Sheet>, StoreError> {
        self.with_state(|state| state.registry.find_sheet(publisher, name))
    }

    async fn insert_sheet(
        &self,
        owner: &str,
        name: &str,
        visibility: Visibility,
    ) -> Result<Sheet, StoreError> {
        self.with_state(|state| state.registry.add_sheet(owner, name, visibility))
    }

    async fn delete_sheet(&self, sheet: SheetId) -> Result<bool, StoreError> {
        self.with_state(|state| {
            state.entries.retain(|e| e.sheet != sheet);
            state.registry.remove_sheet(sheet)
        })
    }
}
