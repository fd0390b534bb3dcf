/*!
# sheetsync

Core of a collaborative spreadsheet: a formula language and an update log
that keeps publishers and subscribers of a sheet in sync.

## Overview

Publishers own sheets. Other users subscribe to a sheet and propose edits;
the owner's own writes are the authoritative state. Every change travels as
a *payload*, newline-delimited `"<ref> <term>"` entries such as

```text
$A1 10
$A2 =SUM($A1, 5)
```

and is appended to a log under a strictly increasing update ID. Clients poll
with the highest ID they have seen and receive everything newer.

## Architecture

### Formula stack
- **Tokenizer** - lexes formula text into typed tokens
- **Parser** - recursive descent into an expression tree
- **Evaluator** - walks the tree over a context of cell values
- **Client sheet** - evaluates a whole sheet in dependency order, with cycle
  detection

### Persistence stack
- **Reference codec** - `$AB42` <-> `(column, row)`, shared by both stacks
- **Update log** - append-only entries, accepted (owner) or proposed
  (subscriber)
- **Sheet cache** - accepted entries folded in ID order, last writer wins per
  cell
- **Reconciliation** - publish, propose, published delta, subscription delta

### Storage
- In-memory store for tests, directory store (JSON-lines log plus an
  atomically replaced registry) for servers
- Gzip-compressed bincode checkpoints of the cache for fast cold starts

## Modules

- **reference**: cell reference codec and sheet extents
- **formula**: tokenizer, parser, evaluator and `FormulaEngine`
- **spreadsheet**: client-side sheet model
- **payload**: payload parsing, validation and rendering
- **update_log**: log entries and deltas
- **registry**: publishers, sheets and visibility
- **cache**: materialized sheet state
- **store**: durable store trait and implementations
- **saving**: cache checkpoints
- **service**: the reconciliation protocol
- **config**: process configuration
- **app**: HTTP routes (feature `web`)

## REST API Endpoints

All under `/api/v1/`, caller named by the `X-Client` header:

- `register`, `getPublishers` - publisher registry
- `createSheet`, `getSheets`, `deleteSheet` - sheet lifecycle
- `updatePublished`, `updateSubscription` - publish and propose
- `getUpdatesForPublished`, `getUpdatesForSubscription` - deltas since an ID
- `evaluate` - evaluate a term against a sheet's accepted state
*/

#[cfg(feature = "web")]
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod formula;
pub mod payload;
pub mod reference;
pub mod registry;
pub mod saving;
pub mod service;
pub mod spreadsheet;
pub mod store;
pub mod update_log;

pub use cache::SheetCache;
pub use config::Config;
pub use error::{
    CellError, EvalError, FoldError, FormatError, FormulaError, LexError, NotFoundError, ParseError,
    StoreError, SyncError, ValidationError,
};
pub use formula::{FormulaEngine, Node, Value};
pub use reference::{Extent, Reference};
pub use registry::{Sheet, SheetRef, Visibility};
pub use service::SheetService;
pub use spreadsheet::Spreadsheet;
pub use store::{FileStore, MemoryStore, UpdateStore};
pub use update_log::{Delta, LogEntry, UpdateId};
