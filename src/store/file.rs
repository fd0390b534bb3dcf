use super::{Registry, UpdateStore, select_accepted, select_sheet_updates};
use crate::error::StoreError;
use crate::registry::{Sheet, Visibility};
use crate::update_log::{Acceptance, LogEntry, NewUpdate, SheetId, UpdateId};
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const LOG_FILE: &str = "updates.jsonl";
const REGISTRY_FILE: &str = "registry.json";

struct FileState {
    registry: Registry,
    entries: Vec<LogEntry>,
}

/// Directory-backed store.
///
/// The update log is a JSON-lines file that only ever has lines appended;
/// each append is synced before the entry becomes visible. The registry is a
/// single JSON document replaced atomically. Both are mirrored in memory, so
/// reads never touch the disk.
pub struct FileStore {
    dir: PathBuf,
    state: Mutex<FileState>,
}

impl FileStore {
    /// Opens (or creates) a store in `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let mut registry: Registry = match fs::read_to_string(dir.join(REGISTRY_FILE)).await {
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Registry::default(),
            Err(e) => return Err(e.into()),
        };

        let (mut entries, torn) = match fs::read_to_string(dir.join(LOG_FILE)).await {
            Ok(data) => parse_log(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };

        if let Some(max) = entries.iter().map(|e| e.id).max() {
            registry.last_update_id = registry.last_update_id.max(max);
        }

        // Entries of sheets deleted before their log rewrite finished.
        let before = entries.len();
        entries.retain(|e| registry.sheets.iter().any(|s| s.id == e.sheet));
        if entries.len() != before {
            warn!("dropping {} orphaned update log entries", before - entries.len());
        }

        // Appends must start on a fresh line, so a torn tail is cut off
        // before anything else is written.
        if torn || entries.len() != before {
            write_log(&dir.join(LOG_FILE), &entries).await?;
        }

        info!(
            "opened store at {} ({} publishers, {} sheets, {} updates)",
            dir.display(),
            registry.publishers.len(),
            registry.sheets.len(),
            entries.len()
        );

        Ok(FileStore {
            dir,
            state: Mutex::new(FileState { registry, entries }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_registry(&self, registry: &Registry) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(registry)?;
        replace_file(&self.dir.join(REGISTRY_FILE), &data).await
    }

    /// Appends one synced line. On failure the file is cut back to its
    /// previous length so no partial line is left behind.
    async fn append_line(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(LOG_FILE))
            .await?;
        let len = file.metadata().await?.len();

        let written = match file.write_all(&line).await {
            Ok(()) => file.sync_data().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("append of update {} failed: {}", entry.id, e);
            if let Err(e) = file.set_len(len).await {
                warn!("could not roll back update log to {} bytes: {}", len, e);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

async fn write_log(path: &Path, entries: &[LogEntry]) -> Result<(), StoreError> {
    let mut data = Vec::new();
    for entry in entries {
        data.extend(serde_json::to_vec(entry)?);
        data.push(b'\n');
    }
    replace_file(path, &data).await
}

/// Write-to-temp, fsync, rename.
async fn replace_file(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Parses the log file and reports whether it ended in a torn line. A torn
/// final line (a crash mid-append) is dropped; corruption anywhere else is
/// an error.
fn parse_log(data: &str) -> Result<(Vec<LogEntry>, bool), StoreError> {
    let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut entries = Vec::with_capacity(lines.len());
    let mut torn = !data.is_empty() && !data.ends_with('\n');

    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if i + 1 == lines.len() => {
                warn!("dropping torn last line of update log: {}", e);
                torn = true;
            }
            Err(e) => return Err(e.into()),
        }
    }

    entries.sort_by_key(|e| e.id);
    Ok((entries, torn))
}

impl UpdateStore for FileStore {
    async fn append(&self, update: NewUpdate) -> Result<LogEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = LogEntry::from_new(state.registry.last_update_id + 1, update);

        self.append_line(&entry).await?;

        state.registry.last_update_id = entry.id;
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn accepted_after(&self, after: UpdateId) -> Result<Vec<LogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(select_accepted(&state.entries, after))
    }

    async fn sheet_updates(
        &self,
        sheet: SheetId,
        acceptance: Acceptance,
        after: UpdateId,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(select_sheet_updates(&state.entries, sheet, acceptance, after))
    }

    async fn register_publisher(&self, publisher: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let mut registry = state.registry.clone();
        if !registry.add_publisher(publisher) {
            return Ok(false);
        }
        self.write_registry(&registry).await?;
        state.registry = registry;
        Ok(true)
    }

    async fn publishers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().await.registry.publishers.clone())
    }

    async fn sheets(&self) -> Result<Vec<Sheet>, StoreError> {
        Ok(self.state.lock().await.registry.sheets.clone())
    }

    async fn find_sheet(&self, publisher: &str, name: &str) -> Result<Option<Sheet>, StoreError> {
        Ok(self.state.lock().await.registry.find_sheet(publisher, name))
    }

    async fn insert_sheet(
        &self,
        owner: &str,
        name: &str,
        visibility: Visibility,
    ) -> Result<Sheet, StoreError> {
        let mut state = self.state.lock().await;
        let mut registry = state.registry.clone();
        let sheet = registry.add_sheet(owner, name, visibility);
        self.write_registry(&registry).await?;
        state.registry = registry;
        Ok(sheet)
    }

    async fn delete_sheet(&self, sheet: SheetId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let mut registry = state.registry.clone();
        if !registry.remove_sheet(sheet) {
            return Ok(false);
        }

        // The registry write commits the delete. Entries left in the log
        // file after that are orphans, dropped on the next open.
        self.write_registry(&registry).await?;
        state.registry = registry;
        state.entries.retain(|e| e.sheet != sheet);

        if let Err(e) = write_log(&self.dir.join(LOG_FILE), &state.entries).await {
            warn!("sheet {} deleted but its log entries remain on disk: {}", sheet, e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(sheet: SheetId, payload: &str, accepted: bool) -> NewUpdate {
        NewUpdate {
            sheet,
            submitter: "ana".into(),
            payload: payload.into(),
            accepted,
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (sheet, last) = {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.register_publisher("ana").await.unwrap();
            let sheet = store.insert_sheet("ana", "plan", Visibility::Public).await.unwrap();
            store.append(update(sheet.id, "$A1 1\n", true)).await.unwrap();
            let last = store.append(update(sheet.id, "$A2 2\n", false)).await.unwrap();
            (sheet, last)
        };

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.publishers().await.unwrap(), vec!["ana".to_string()]);
        assert_eq!(store.find_sheet("ana", "plan").await.unwrap(), Some(sheet.clone()));

        let all = store.sheet_updates(sheet.id, Acceptance::Any, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], last);

        let next = store.append(update(sheet.id, "$A3 3\n", true)).await.unwrap();
        assert_eq!(next.id, last.id + 1);
    }

    #[tokio::test]
    async fn delete_rewrites_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let keep = store.insert_sheet("ana", "keep", Visibility::Public).await.unwrap();
        let gone = store.insert_sheet("ana", "gone", Visibility::Public).await.unwrap();
        store.append(update(keep.id, "$A1 k\n", true)).await.unwrap();
        let last = store.append(update(gone.id, "$A1 d\n", true)).await.unwrap();

        assert!(store.delete_sheet(gone.id).await.unwrap());
        reopen_and_check(dir.path(), keep.id, last.id).await;
    }

    async fn reopen_and_check(dir: &Path, keep: SheetId, last: UpdateId) {
        let store = FileStore::open(dir).await.unwrap();
        let accepted = store.accepted_after(0).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].sheet, keep);

        let next = store.append(update(keep, "$B1 x\n", true)).await.unwrap();
        assert!(next.id > last, "update ids must not be reused");
    }

    #[test]
    fn torn_last_line_is_dropped() {
        let good = serde_json::to_string(&LogEntry::from_new(1, update(1, "$A1 1\n", true))).unwrap();
        let data = format!("{}\n{{\"id\":2,\"she", good);
        let (entries, torn) = parse_log(&data).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(torn);

        let (_, torn) = parse_log(&format!("{}\n", good)).unwrap();
        assert!(!torn);

        let data = format!("garbage\n{}\n", good);
        assert!(parse_log(&data).is_err());
    }

    #[tokio::test]
    async fn appends_after_a_torn_tail_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let (sheet, first) = {
            let store = FileStore::open(dir.path()).await.unwrap();
            let sheet = store.insert_sheet("ana", "plan", Visibility::Public).await.unwrap();
            let first = store.append(update(sheet.id, "$A1 1\n", true)).await.unwrap();
            (sheet, first)
        };

        let log = dir.path().join(LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(&log).await.unwrap();
        file.write_all(b"{\"id\":2,\"sheet\":").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            let second = store.append(update(sheet.id, "$A2 2\n", true)).await.unwrap();
            assert_eq!(second.id, first.id + 1);
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let accepted = store.accepted_after(0).await.unwrap();
        let payloads: Vec<&str> = accepted.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, ["$A1 1\n", "$A2 2\n"]);
    }

    #[tokio::test]
    async fn failed_log_rewrite_still_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let keep = store.insert_sheet("ana", "keep", Visibility::Public).await.unwrap();
        let gone = store.insert_sheet("ana", "gone", Visibility::Public).await.unwrap();
        store.append(update(keep.id, "$A1 k\n", true)).await.unwrap();
        let last = store.append(update(gone.id, "$A1 d\n", true)).await.unwrap();

        // blocks the temp file of the log rewrite
        let blocker = dir.path().join(LOG_FILE).with_extension("tmp");
        fs::create_dir(&blocker).await.unwrap();

        assert!(store.delete_sheet(gone.id).await.unwrap());
        assert_eq!(store.find_sheet("ana", "gone").await.unwrap(), None);
        assert!(
            store
                .sheet_updates(gone.id, Acceptance::Any, 0)
                .await
                .unwrap()
                .is_empty()
        );
        drop(store);

        fs::remove_dir(&blocker).await.unwrap();
        reopen_and_check(dir.path(), keep.id, last.id).await;
    }
}
