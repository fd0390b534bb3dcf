use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use crate::cache::SheetCache;
use crate::error::StoreError;

/// Writes a gzip-compressed bincode snapshot of the cache. The file is
/// written next to `path` first and renamed into place.
pub fn save_checkpoint(cache: &SheetCache, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");

    let file = File::create(&tmp_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, cache)?;
    writer.flush()?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    let file = encoder.finish()?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads a checkpoint written by [`save_checkpoint`]. A missing file is not
/// an error: the caller rebuilds from the log instead.
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Option<SheetCache>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let cache: SheetCache = deserialize_from(&mut reader)?;
    Ok(Some(cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadEntry;
    use crate::reference::{Extent, Reference};

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin.gz");

        let mut cache = SheetCache::new(Extent::new(5, 5));
        cache.register_sheet(3);
        cache
            .update_sheet_payload(3, &[PayloadEntry::new(Reference::new(2, 9), "=$A1+1")], 12)
            .unwrap();

        save_checkpoint(&cache, &path).unwrap();
        let loaded = load_checkpoint(&path).unwrap().unwrap();

        assert_eq!(loaded, cache);
        assert_eq!(loaded.last_folded(), 12);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_checkpoint(dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin.gz");
        fs::write(&path, b"not gzip").unwrap();
        assert!(load_checkpoint(&path).is_err());
    }
}
