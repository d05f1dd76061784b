pub mod core;
pub mod schema;
pub mod query;
pub mod search;
pub mod spell;
pub mod storage;
pub mod writer;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::index::SearchIndex;
pub use crate::core::types::{DocId, Document, FieldValue};
pub use crate::query::ast::{Expr, QueryArgs, and_, or_, q, terms};
pub use crate::schema::schema::{DefaultValue, Field, FieldType, Schema, Tokenizer};
pub use crate::search::cursor::SearchCursor;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                          QUARRY ARCHITECTURE                             │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── CORE LAYER ──────────────────────────────────┐
│                                                                          │
│  ┌────────────────────────────────────────────────────────────────┐     │
│  │                     struct SearchIndex                          │     │
│  │  config: Config              // Timeouts, buffer, windows       │     │
│  │  schema: Schema              // Field declarations (cloned)     │     │
│  │  storage: SqliteStorage      // Connection behind the seam      │     │
│  │  buffer: Mutex<WriteBuffer>  // Queued mutations                │     │
│  │  writable: bool              // ReadOnly guard                  │     │
│  └────────────────────────────────────────────────────────────────┘     │
│                                                                          │
│  ┌───────────────┐ ┌────────────────┐ ┌──────────────────────────┐      │
│  │ struct DocId  │ │ enum FieldValue│ │ struct Document          │      │
│  │ • 0: i64      │ │ • Text/Int/... │ │ • id, score, fields      │      │
│  └───────────────┘ └────────────────┘ └──────────────────────────┘      │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── QUERY LAYER ─────────────────────────────────┐
│                                                                          │
│  terms().set("body__allow_prefix", "hel*")      q("a","x").or(q("b","y"))│
│        │ keyword mode                                  │ expression mode │
│        └──────────────┬─────────────────────────────────┘                │
│                       ▼                                                  │
│  ┌────────────────────────────────────────────────────────────────┐     │
│  │ QueryCompiler: lookup chains → escaped match syntax + SQL      │     │
│  │ preds; QueryPlan (order/window/highlight/snippet) fixed by the │     │
│  │ cursor before its first execution                              │     │
│  └────────────────────────────────────────────────────────────────┘     │
│                       │                                                  │
│                       ▼                                                  │
│  ┌────────────────────────────────────────────────────────────────┐     │
│  │ SearchCursor: Pending ── first accessor ──▶ Materialized       │     │
│  │ setters fail with AlreadyExecuted once frozen                  │     │
│  └────────────────────────────────────────────────────────────────┘     │
└──────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────── STORAGE LAYER ────────────────────────────────┐
│                                                                          │
│  trait StorageBackend ── SqliteStorage (busy timeout = writer lock)      │
│                                                                          │
│  content table ──triggers──▶ <name>_fts (external-content FTS5)          │
│        │                          │                                      │
│        │                          └──▶ <name>_vocab ──▶ <name>_spell     │
│        │                               (token stats)    (bigram match)   │
│        └── WriteBuffer flushes batches as one IMMEDIATE transaction      │
└──────────────────────────────────────────────────────────────────────────┘
*/
