//! Durable store interface and its implementations.
//!
//! The store is the source of truth: it assigns update IDs, keeps the
//! append-only log and the publisher/sheet registry. Everything the cache
//! holds can be rebuilt from it.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::registry::{Sheet, Visibility};
use crate::update_log::{Acceptance, LogEntry, NewUpdate, SheetId, UpdateId};
use serde::{Deserialize, Serialize};
use std::future::Future;

pub trait UpdateStore: Send + Sync {
    /// Appends an entry and returns it with its assigned ID, which is
    /// strictly greater than every ID handed out before.
    fn append(&self, update: NewUpdate) -> impl Future<Output = Result<LogEntry, StoreError>> + Send;

    /// Accepted entries of all sheets with `id > after`, ascending by ID.
    fn accepted_after(
        &self,
        after: UpdateId,
    ) -> impl Future<Output = Result<Vec<LogEntry>, StoreError>> + Send;

    /// Entries of one sheet matching `acceptance` with `id > after`,
    /// ascending by ID.
    fn sheet_updates(
        &self,
        sheet: SheetId,
        acceptance: Acceptance,
        after: UpdateId,
    ) -> impl Future<Output = Result<Vec<LogEntry>, StoreError>> + Send;

    /// Returns `false` if the publisher already existed.
    fn register_publisher(
        &self,
        publisher: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn publishers(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn sheets(&self) -> impl Future<Output = Result<Vec<Sheet>, StoreError>> + Send;

    fn find_sheet(
        &self,
        publisher: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Sheet>, StoreError>> + Send;

    /// Inserts a sheet under an already unique name.
    fn insert_sheet(
        &self,
        owner: &str,
        name: &str,
        visibility: Visibility,
    ) -> impl Future<Output = Result<Sheet, StoreError>> + Send;

    /// Removes a sheet and every log entry that belongs to it. Returns
    /// `false` if there was no such sheet.
    fn delete_sheet(&self, sheet: SheetId) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Publisher and sheet bookkeeping shared by the store implementations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct Registry {
    pub publishers: Vec<String>,
    pub sheets: Vec<Sheet>,
    pub last_sheet_id: SheetId,
    /// Highest update ID ever handed out, kept so IDs are not reused after
    /// the newest entries are deleted along with their sheet.
    pub last_update_id: UpdateId,
}

impl Registry {
    pub fn add_publisher(&mut self, publisher: &str) -> bool {
        if self.publishers.iter().any(|p| p == publisher) {
            return false;
        }
        self.publishers.push(publisher.to_string());
        true
    }

    pub fn find_sheet(&self, publisher: &str, name: &str) -> Option<Sheet> {
        self.sheets
            .iter()
            .find(|s| s.owner == publisher && s.name == name)
            .cloned()
    }

    pub fn add_sheet(&mut self, owner: &str, name: &str, visibility: Visibility) -> Sheet {
        self.last_sheet_id += 1;
        let sheet = Sheet {
            id: self.last_sheet_id,
            name: name.to_string(),
            owner: owner.to_string(),
            visibility,
        };
        self.sheets.push(sheet.clone());
        sheet
    }

    pub fn remove_sheet(&mut self, sheet: SheetId) -> bool {
        let before = self.sheets.len();
        self.sheets.retain(|s| s.id != sheet);
        self.sheets.len() != before
    }

    pub fn next_update_id(&mut self) -> UpdateId {
        self.last_update_id += 1;
        self.last_update_id
    }
}

pub(crate) fn select_sheet_updates(
    entries: &[LogEntry],
    sheet: SheetId,
    acceptance: Acceptance,
    after: UpdateId,
) -> Vec<LogEntry> {
    entries
        .iter()
        .filter(|e| e.sheet == sheet && e.id > after && acceptance.matches(e.accepted))
        .cloned()
        .collect()
}

pub(crate) fn select_accepted(entries: &[LogEntry], after: UpdateId) -> Vec<LogEntry> {
    entries
        .iter()
        .filter(|e| e.accepted && e.id > after)
        .cloned()
        .collect()
}
