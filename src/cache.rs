//! Materialized view of the accepted part of the update log.
//!
//! For every sheet the cache keeps the current term of each cell together
//! with the ID of the accepted update that last set it. Folding accepted
//! entries in ascending ID order yields last-writer-wins per cell; proposals
//! (`accepted == false`) are never folded.

use crate::error::{FoldError, NotFoundError};
use crate::payload::{PayloadEntry, parse_payload};
use crate::reference::{Extent, Reference};
use crate::update_log::{Delta, LogEntry, SheetId, UpdateId};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCell {
    pub term: String,
    pub update_id: UpdateId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetState {
    pub extent: Extent,
    pub cells: BTreeMap<Reference, CachedCell>,
}

impl SheetState {
    fn new(extent: Extent) -> Self {
        SheetState {
            extent,
            cells: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetCache {
    default_extent: Extent,
    sheets: HashMap<SheetId, SheetState>,
    /// Highest update ID folded so far.
    last_folded: UpdateId,
}

impl SheetCache {
    pub fn new(default_extent: Extent) -> Self {
        SheetCache {
            default_extent,
            sheets: HashMap::new(),
            last_folded: 0,
        }
    }

    pub fn last_folded(&self) -> UpdateId {
        self.last_folded
    }

    pub fn contains_sheet(&self, sheet: SheetId) -> bool {
        self.sheets.contains_key(&sheet)
    }

    pub fn sheet_ids(&self) -> Vec<SheetId> {
        self.sheets.keys().copied().collect()
    }

    /// Makes an empty sheet known to the cache. Existing state is kept.
    pub fn register_sheet(&mut self, sheet: SheetId) {
        let extent = self.default_extent;
        self.sheets
            .entry(sheet)
            .or_insert_with(|| SheetState::new(extent));
    }

    pub fn remove_sheet(&mut self, sheet: SheetId) -> bool {
        self.sheets.remove(&sheet).is_some()
    }

    pub fn sheet(&self, sheet: SheetId) -> Result<&SheetState, NotFoundError> {
        self.sheets.get(&sheet).ok_or(NotFoundError::SheetId(sheet))
    }

    pub fn extent(&self, sheet: SheetId) -> Result<Extent, NotFoundError> {
        self.sheet(sheet).map(|state| state.extent)
    }

    pub fn cell(&self, sheet: SheetId, reference: &Reference) -> Option<&CachedCell> {
        self.sheets.get(&sheet)?.cells.get(reference)
    }

    /// Cold build: folds every accepted entry, which must arrive in
    /// ascending ID order. Entries at or below [`Self::last_folded`] are
    /// skipped, so a cache restored from a checkpoint can be topped up with
    /// a full scan. Entries of unknown sheets and malformed payloads are
    /// logged and skipped. Returns the number of entries folded.
    pub fn build<'a, I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut folded = 0;
        for entry in entries {
            if entry.id <= self.last_folded {
                continue;
            }
            match self.fold(entry) {
                Ok(true) => folded += 1,
                Ok(false) => {}
                Err(FoldError::NotFound(e)) => {
                    warn!("skipping update {}: {}", entry.id, e);
                }
                Err(FoldError::Validation(e)) => {
                    warn!("skipping update {}: {}", entry.id, e);
                }
            }
        }
        info!(
            "cache folded {} accepted updates across {} sheets (last id {})",
            folded,
            self.sheets.len(),
            self.last_folded
        );
        folded
    }

    /// Folds one log entry. Returns `false` for proposals, which never touch
    /// the cache.
    pub fn fold(&mut self, entry: &LogEntry) -> Result<bool, FoldError> {
        if !entry.accepted {
            return Ok(false);
        }
        let entries = parse_payload(&entry.payload)?;
        self.update_sheet_payload(entry.sheet, &entries, entry.id)?;
        Ok(true)
    }

    /// Applies already-parsed payload entries of an accepted update, stamping
    /// each cell with `update_id` and growing the sheet extent to fit.
    pub fn update_sheet_payload(
        &mut self,
        sheet: SheetId,
        entries: &[PayloadEntry],
        update_id: UpdateId,
    ) -> Result<(), NotFoundError> {
        let state = self
            .sheets
            .get_mut(&sheet)
            .ok_or(NotFoundError::SheetId(sheet))?;

        for entry in entries {
            state.cells.insert(
                entry.reference,
                CachedCell {
                    term: entry.term.clone(),
                    update_id,
                },
            );
            state.extent.grow_to_fit(&entry.reference);
        }

        self.last_folded = self.last_folded.max(update_id);
        debug!(
            "folded update {} into sheet {} ({} cells)",
            update_id,
            sheet,
            entries.len()
        );
        Ok(())
    }

    /// Cells last set by an update newer than `since`, ordered by that
    /// update ID, as payload text.
    pub fn sheet_payload(&self, sheet: SheetId, since: UpdateId) -> Result<Delta, NotFoundError> {
        let state = self.sheet(sheet)?;

        let mut newer: Vec<(&Reference, &CachedCell)> = state
            .cells
            .iter()
            .filter(|(_, cell)| cell.update_id > since)
            .collect();
        newer.sort_by_key(|(reference, cell)| (cell.update_id, **reference));

        let mut delta = Delta::default();
        for (reference, cell) in newer {
            delta.payload.push_str(&reference.to_string());
            delta.payload.push(' ');
            delta.payload.push_str(&cell.term);
            delta.payload.push('\n');
            delta.last_id = delta.last_id.max(cell.update_id);
        }
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update_log::NewUpdate;

    fn entry(id: UpdateId, sheet: SheetId, payload: &str, accepted: bool) -> LogEntry {
        LogEntry::from_new(
            id,
            NewUpdate {
                sheet,
                submitter: "owner".into(),
                payload: payload.into(),
                accepted,
            },
        )
    }

    fn cache_with(sheets: &[SheetId]) -> SheetCache {
        let mut cache = SheetCache::new(Extent::new(10, 10));
        for sheet in sheets {
            cache.register_sheet(*sheet);
        }
        cache
    }

    #[test]
    fn later_write_wins() {
        let mut cache = cache_with(&[1]);
        let log = vec![entry(1, 1, "$A1 1\n", true), entry(2, 1, "$A1 2\n", true)];
        assert_eq!(cache.build(&log), 2);

        let delta = cache.sheet_payload(1, 0).unwrap();
        assert_eq!(delta.payload, "$A1 2\n");
        assert_eq!(delta.last_id, 2);
    }

    #[test]
    fn proposals_never_fold() {
        let mut cache = cache_with(&[1]);
        let log = vec![entry(1, 1, "$A1 9\n", false)];
        assert_eq!(cache.build(&log), 0);

        let delta = cache.sheet_payload(1, 0).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.last_id, 0);
        assert!(cache.cell(1, &Reference::new(1, 1)).is_none());
    }

    #[test]
    fn delta_since_is_strict_and_ordered_by_id() {
        let mut cache = cache_with(&[1, 2]);
        let log = vec![
            entry(1, 1, "$B1 old\n$A1 x\n", true),
            entry(2, 2, "$A1 other sheet\n", true),
            entry(3, 1, "$C5 =SUM($A1,1)\n", true),
            entry(4, 1, "$B1 new\n", true),
        ];
        cache.build(&log);

        let delta = cache.sheet_payload(1, 1).unwrap();
        assert_eq!(delta.payload, "$C5 =SUM($A1,1)\n$B1 new\n");
        assert_eq!(delta.last_id, 4);

        let full = cache.sheet_payload(1, 0).unwrap();
        assert_eq!(full.payload, "$A1 x\n$C5 =SUM($A1,1)\n$B1 new\n");

        let nothing = cache.sheet_payload(1, 4).unwrap();
        assert_eq!(nothing, Delta::default());
    }

    #[test]
    fn cells_record_their_last_update() {
        let mut cache = cache_with(&[1]);
        cache.build(&vec![
            entry(5, 1, "$A1 a\n$A2 b\n", true),
            entry(9, 1, "$A2 c\n", true),
        ]);
        assert_eq!(cache.cell(1, &Reference::new(1, 1)).unwrap().update_id, 5);
        assert_eq!(
            cache.cell(1, &Reference::new(1, 2)).unwrap(),
            &CachedCell {
                term: "c".into(),
                update_id: 9
            }
        );
        assert_eq!(cache.last_folded(), 9);
    }

    #[test]
    fn extent_grows_with_payloads() {
        let mut cache = cache_with(&[1]);
        cache.build(&vec![entry(1, 1, "$AB40 far\n", true)]);
        assert_eq!(cache.extent(1).unwrap(), Extent::new(40, 28));

        cache.build(&vec![entry(2, 1, "$A1 \n", true)]);
        assert_eq!(cache.extent(1).unwrap(), Extent::new(40, 28));
    }

    #[test]
    fn unknown_sheets() {
        let mut cache = cache_with(&[1]);
        assert_eq!(cache.sheet_payload(7, 0), Err(NotFoundError::SheetId(7)));
        assert!(matches!(
            cache.fold(&entry(1, 7, "$A1 1\n", true)),
            Err(FoldError::NotFound(_))
        ));
        // build skips them instead of failing
        assert_eq!(cache.build(&vec![entry(2, 7, "$A1 1\n", true)]), 0);
    }

    #[test]
    fn build_skips_already_folded_ids() {
        let mut cache = cache_with(&[1]);
        cache.build(&vec![entry(3, 1, "$A1 new\n", true)]);
        cache.build(&vec![
            entry(2, 1, "$A1 stale\n", true),
            entry(3, 1, "$A1 new\n", true),
        ]);
        assert_eq!(cache.sheet_payload(1, 0).unwrap().payload, "$A1 new\n");
    }
}
