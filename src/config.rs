//! Process configuration read from the environment and the command line.

use crate::reference::Extent;
use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_ROWS: u32 = 100;
pub const DEFAULT_COLS: u32 = 26;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Directory of the file-backed store.
    pub database_dir: PathBuf,
    pub bind_addr: String,
    /// Starting grid size of a new sheet.
    pub default_rows: u32,
    pub default_cols: u32,
    /// Where the cache checkpoint is kept, if anywhere.
    pub checkpoint: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_dir: PathBuf::from("database"),
            bind_addr: "127.0.0.1:3000".to_string(),
            default_rows: DEFAULT_ROWS,
            default_cols: DEFAULT_COLS,
            checkpoint: None,
        }
    }
}

impl Config {
    /// Reads `SHEETSYNC_*` variables. Absent or unparsable values keep
    /// their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(dir) = lookup("SHEETSYNC_DATABASE_DIR") {
            config.database_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup("SHEETSYNC_BIND") {
            config.bind_addr = bind;
        }
        if let Some(rows) = parse_var(&lookup, "SHEETSYNC_ROWS") {
            config.default_rows = rows;
        }
        if let Some(cols) = parse_var(&lookup, "SHEETSYNC_COLS") {
            config.default_cols = cols;
        }
        config.checkpoint = lookup("SHEETSYNC_CHECKPOINT")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        config
    }

    /// Applies positional `<rows> <cols>` arguments (program name already
    /// stripped). Zero or unparsable dimensions are ignored.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let dimension = |i: usize| {
            args.get(i)
                .and_then(|a| a.as_ref().trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
        };
        if let Some(rows) = dimension(0) {
            self.default_rows = rows;
        }
        if let Some(cols) = dimension(1) {
            self.default_cols = cols;
        }
        self
    }

    pub fn default_extent(&self) -> Extent {
        Extent::new(self.default_rows, self.default_cols)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
