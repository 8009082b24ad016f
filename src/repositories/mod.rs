//! Typed operations over `Store` for the `files`, `symbols`, `relations`, and
//! `watcher_owner` entities (§4.2). Every repository borrows the store for
//! the duration of a call; none hold their own connection or lock.

mod files;
mod relations;
mod symbols;

pub use files::FileRepository;
pub use relations::RelationRepository;
pub use symbols::{SearchQuery, SymbolRepository, SymbolStats};
pub use relations::RelationSearchQuery;

use rusqlite::Row;
use serde_json::Value as JsonValue;

use crate::error::{LedgerError, Result};
use crate::model::{Position, Span, SymbolKind};

pub(crate) fn span_from_row(row: &Row) -> rusqlite::Result<Span> {
    Ok(Span {
        start: Position {
            line: row.get("start_line")?,
            column: row.get("start_column")?,
        },
        end: Position {
            line: row.get("end_line")?,
            column: row.get("end_column")?,
        },
    })
}

pub(crate) fn parse_kind(s: &str) -> Result<SymbolKind> {
    SymbolKind::parse(s)
        .ok_or_else(|| LedgerError::store(anyhow::anyhow!("unknown symbol kind: {s}")))
}

pub(crate) fn parse_detail(text: &str) -> JsonValue {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::json!({}))
}
