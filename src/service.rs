//! Reconciliation protocol over the update log and the sheet cache.
//!
//! Owners publish (accepted writes, folded into the cache right after the
//! durable append); everyone else proposes (stored, never folded). The
//! published delta reads the raw log, proposals included. The subscription
//! delta reads only accepted state: the cache on a cold bootstrap
//! (`since == 0`), accepted log entries afterwards.
//!
//! The cache is built lazily on first use and kept warm afterwards. Every
//! operation that folds into it or reads from it holds its lock, so a delta
//! never observes a half-applied write.

use crate::cache::SheetCache;
use crate::config::Config;
use crate::error::{FormulaResult, NotFoundError, SyncError, SyncResult};
use crate::formula::{Context, FormulaEngine, Value};
use crate::payload::{PayloadEntry, parse_payload};
use crate::reference::Extent;
use crate::registry::{Sheet, SheetRef, Visibility, unique_sheet_name};
use crate::saving::{load_checkpoint, save_checkpoint};
use crate::spreadsheet::Spreadsheet;
use crate::store::UpdateStore;
use crate::update_log::{Acceptance, Delta, LogEntry, NewUpdate, UpdateId};
use log::{debug, info, warn};
use std::path::PathBuf;
use tokio::sync::{Mutex, OnceCell};

pub struct SheetService<S> {
    store: S,
    engine: FormulaEngine,
    default_extent: Extent,
    checkpoint: Option<PathBuf>,
    cache: OnceCell<Mutex<SheetCache>>,
}

impl<S: UpdateStore> SheetService<S> {
    pub fn new(store: S, default_extent: Extent) -> Self {
        SheetService {
            store,
            engine: FormulaEngine::new(),
            default_extent,
            checkpoint: None,
            cache: OnceCell::new(),
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        let service = Self::new(store, config.default_extent());
        match &config.checkpoint {
            Some(path) => service.with_checkpoint(path.clone()),
            None => service,
        }
    }

    /// Restores the cache from `path` on first use and lets
    /// [`Self::checkpoint`] write it back there.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &FormulaEngine {
        &self.engine
    }

    async fn cache(&self) -> SyncResult<&Mutex<SheetCache>> {
        self.cache.get_or_try_init(|| self.build_cache()).await
    }

    async fn build_cache(&self) -> SyncResult<Mutex<SheetCache>> {
        let mut cache = match &self.checkpoint {
            Some(path) => match load_checkpoint(path) {
                Ok(Some(cache)) => {
                    info!(
                        "restored cache checkpoint {} (last id {})",
                        path.display(),
                        cache.last_folded()
                    );
                    cache
                }
                Ok(None) => SheetCache::new(self.default_extent),
                Err(e) => {
                    warn!("ignoring unreadable checkpoint {}: {}", path.display(), e);
                    SheetCache::new(self.default_extent)
                }
            },
            None => SheetCache::new(self.default_extent),
        };

        let sheets = self.store.sheets().await?;
        for id in cache.sheet_ids() {
            if !sheets.iter().any(|s| s.id == id) {
                cache.remove_sheet(id);
            }
        }
        for sheet in &sheets {
            cache.register_sheet(sheet.id);
        }

        let entries = self.store.accepted_after(cache.last_folded()).await?;
        cache.build(&entries);
        Ok(Mutex::new(cache))
    }

    /// Registers a publisher. Returns `false` if it was already known.
    pub async fn register(&self, publisher: &str) -> SyncResult<bool> {
        if publisher.trim().is_empty() {
            return Err(SyncError::InvalidRequest("publisher name is empty".into()));
        }
        let added = self.store.register_publisher(publisher).await?;
        if added {
            info!("registered publisher {}", publisher);
        }
        Ok(added)
    }

    pub async fn publishers(&self) -> SyncResult<Vec<String>> {
        Ok(self.store.publishers().await?)
    }

    async fn require_publisher(&self, publisher: &str) -> SyncResult<()> {
        if self.store.publishers().await?.iter().any(|p| p == publisher) {
            Ok(())
        } else {
            Err(NotFoundError::Publisher(publisher.to_string()).into())
        }
    }

    /// Creates a sheet for `caller`, who must be the publisher named in
    /// `sheet_ref`. A taken name gets the smallest free ` (n)` suffix;
    /// visibility follows the name as requested.
    pub async fn create_sheet(&self, caller: &str, sheet_ref: &SheetRef) -> SyncResult<Sheet> {
        if caller != sheet_ref.publisher {
            return Err(SyncError::unauthorized(caller, "create sheets for another publisher"));
        }
        let requested = sheet_ref.sheet.trim();
        if requested.is_empty() {
            return Err(SyncError::InvalidRequest("sheet name is empty".into()));
        }
        self.require_publisher(caller).await?;

        let mut cache = self.cache().await?.lock().await;
        let existing = self.store.sheets().await?;
        let name = unique_sheet_name(
            existing
                .iter()
                .filter(|s| s.owner == caller)
                .map(|s| s.name.as_str()),
            requested,
        );
        let sheet = self
            .store
            .insert_sheet(caller, &name, Visibility::from_name(requested))
            .await?;
        cache.register_sheet(sheet.id);

        info!("created sheet {} ({:?}) for {}", sheet.name, sheet.visibility, caller);
        Ok(sheet)
    }

    /// Sheets of `publisher` that `requester` may see.
    pub async fn sheets(&self, publisher: &str, requester: &str) -> SyncResult<Vec<Sheet>> {
        self.require_publisher(publisher).await?;
        Ok(self
            .store
            .sheets()
            .await?
            .into_iter()
            .filter(|s| s.owner == publisher && s.is_visible_to(requester))
            .collect())
    }

    /// Deletes a sheet together with its log entries and cached state.
    pub async fn delete_sheet(&self, caller: &str, sheet_ref: &SheetRef) -> SyncResult<()> {
        let mut cache = self.cache().await?.lock().await;
        let sheet = self.resolve(sheet_ref).await?;
        if !sheet.is_owned_by(caller) {
            return Err(SyncError::unauthorized(caller, "delete this sheet"));
        }

        self.store.delete_sheet(sheet.id).await?;
        cache.remove_sheet(sheet.id);
        info!("deleted sheet {} of {}", sheet.name, sheet.owner);
        Ok(())
    }

    pub async fn resolve(&self, sheet_ref: &SheetRef) -> SyncResult<Sheet> {
        self.require_publisher(&sheet_ref.publisher).await?;
        self.store
            .find_sheet(&sheet_ref.publisher, &sheet_ref.sheet)
            .await?
            .ok_or_else(|| {
                NotFoundError::Sheet {
                    publisher: sheet_ref.publisher.clone(),
                    sheet: sheet_ref.sheet.clone(),
                }
                .into()
            })
    }

    async fn resolve_visible(&self, requester: &str, sheet_ref: &SheetRef) -> SyncResult<Sheet> {
        let sheet = self.resolve(sheet_ref).await?;
        if !sheet.is_visible_to(requester) {
            return Err(SyncError::unauthorized(requester, "read a private sheet"));
        }
        Ok(sheet)
    }

    fn validate(&self, payload: &str) -> SyncResult<Vec<PayloadEntry>> {
        let entries = parse_payload(payload).inspect_err(|e| {
            warn!("rejected payload: {}", e);
        })?;
        if entries.is_empty() {
            return Err(SyncError::InvalidRequest("payload has no entries".into()));
        }
        Ok(entries)
    }

    /// Owner write: appended as accepted, then folded into the cache. A
    /// payload that fails validation leaves log and cache untouched.
    pub async fn publish(
        &self,
        caller: &str,
        sheet_ref: &SheetRef,
        payload: &str,
    ) -> SyncResult<LogEntry> {
        let entries = self.validate(payload)?;

        let mut cache = self.cache().await?.lock().await;
        let sheet = self.resolve(sheet_ref).await?;
        if !sheet.is_owned_by(caller) {
            return Err(SyncError::unauthorized(caller, "publish to this sheet"));
        }

        let entry = self
            .store
            .append(NewUpdate {
                sheet: sheet.id,
                submitter: caller.to_string(),
                payload: payload.to_string(),
                accepted: true,
            })
            .await?;
        cache.update_sheet_payload(sheet.id, &entries, entry.id)?;

        debug!("published update {} to {}/{}", entry.id, sheet.owner, sheet.name);
        Ok(entry)
    }

    /// Subscriber write: appended as a proposal and never folded.
    pub async fn propose(
        &self,
        caller: &str,
        sheet_ref: &SheetRef,
        payload: &str,
    ) -> SyncResult<LogEntry> {
        self.validate(payload)?;

        // Held so the sheet cannot be deleted between resolve and append.
        let _cache = self.cache().await?.lock().await;
        let sheet = self.resolve_visible(caller, sheet_ref).await?;

        let entry = self
            .store
            .append(NewUpdate {
                sheet: sheet.id,
                submitter: caller.to_string(),
                payload: payload.to_string(),
                accepted: false,
            })
            .await?;

        debug!("proposed update {} to {}/{} by {}", entry.id, sheet.owner, sheet.name, caller);
        Ok(entry)
    }

    /// Publishes when `caller` owns the sheet, proposes otherwise.
    pub async fn submit(
        &self,
        caller: &str,
        sheet_ref: &SheetRef,
        payload: &str,
    ) -> SyncResult<LogEntry> {
        if caller == sheet_ref.publisher {
            self.publish(caller, sheet_ref, payload).await
        } else {
            self.propose(caller, sheet_ref, payload).await
        }
    }

    /// Every log entry of the sheet after `since`, accepted or proposed.
    pub async fn published_delta(
        &self,
        requester: &str,
        sheet_ref: &SheetRef,
        since: UpdateId,
    ) -> SyncResult<Delta> {
        let sheet = self.resolve_visible(requester, sheet_ref).await?;
        let entries = self
            .store
            .sheet_updates(sheet.id, Acceptance::Any, since)
            .await?;

        debug!(
            "published delta of {}/{} since {}: {} entries",
            sheet.owner,
            sheet.name,
            since,
            entries.len()
        );
        Ok(Delta::from_entries(&entries))
    }

    /// Accepted state after `since`. With `since == 0` this is the whole
    /// materialized sheet.
    pub async fn subscription_delta(
        &self,
        requester: &str,
        sheet_ref: &SheetRef,
        since: UpdateId,
    ) -> SyncResult<Delta> {
        let cache = self.cache().await?.lock().await;
        let sheet = self.resolve_visible(requester, sheet_ref).await?;

        let delta = if since == 0 {
            cache.sheet_payload(sheet.id, 0)?
        } else {
            let entries = self
                .store
                .sheet_updates(sheet.id, Acceptance::Accepted, since)
                .await?;
            Delta::from_entries(&entries)
        };

        debug!(
            "subscription delta of {}/{} since {}: up to {}",
            sheet.owner, sheet.name, since, delta.last_id
        );
        Ok(delta)
    }

    pub fn evaluate_formula<C: Context + ?Sized>(
        &self,
        text: &str,
        context: &C,
    ) -> FormulaResult<Value> {
        self.engine.evaluate_formula(text, context)
    }

    /// The accepted state of a sheet as a client-side model.
    pub async fn snapshot(&self, requester: &str, sheet_ref: &SheetRef) -> SyncResult<Spreadsheet> {
        let cache = self.cache().await?.lock().await;
        let sheet = self.resolve_visible(requester, sheet_ref).await?;
        let state = cache.sheet(sheet.id)?;

        let mut snapshot = Spreadsheet::new(state.extent);
        for (reference, cell) in &state.cells {
            snapshot.set(*reference, cell.term.clone());
        }
        Ok(snapshot)
    }

    /// Evaluates `term` against the accepted state of a sheet.
    pub async fn evaluate_in_sheet(
        &self,
        requester: &str,
        sheet_ref: &SheetRef,
        term: &str,
    ) -> SyncResult<Value> {
        let snapshot = self.snapshot(requester, sheet_ref).await?;
        let evaluation = snapshot.evaluate_all(&self.engine);
        Ok(evaluation.evaluate_term(&self.engine, term)?)
    }

    /// Writes the cache to the configured checkpoint path. Returns `false`
    /// when no path is configured.
    pub async fn checkpoint(&self) -> SyncResult<bool> {
        let Some(path) = &self.checkpoint else {
            return Ok(false);
        };
        let cache = self.cache().await?.lock().await;
        save_checkpoint(&cache, path)?;
        info!(
            "wrote cache checkpoint {} (last id {})",
            path.display(),
            cache.last_folded()
        );
        Ok(true)
    }
}
