//! Symbol and relation search query composition (§4.6). Each repository
//! result is already shaped correctly by `SymbolRecord`/`RelationRecord`
//! (span grouping, boolean `is_exported`, parsed `detail`) — this module's
//! job is building the FTS expression and filling in default limits.

use crate::error::Result;
use crate::model::{RelationRecord, RelationType, SymbolKind, SymbolRecord};
use crate::repositories::{RelationRepository, RelationSearchQuery, SearchQuery, SymbolRepository};
use crate::store::Store;

const DEFAULT_SYMBOL_LIMIT: usize = 100;
const DEFAULT_RELATION_LIMIT: usize = 500;

#[derive(Debug, Default, Clone)]
pub struct SymbolSearchQuery {
    pub text: Option<String>,
    pub kind: Option<SymbolKind>,
    pub file_path: Option<String>,
    pub is_exported: Option<bool>,
    pub project: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct RelationSearchParams {
    pub src_file_path: Option<String>,
    pub src_symbol_name: Option<String>,
    pub dst_file_path: Option<String>,
    pub dst_symbol_name: Option<String>,
    pub relation_type: Option<RelationType>,
    pub project: Option<String>,
    pub limit: Option<usize>,
}

/// Trim, split on whitespace, escape FTS metacharacters, append `*` per
/// token for prefix matching: `"User Svc"` → `User* Svc*`.
pub fn build_fts_expression(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let tokens: Vec<String> = trimmed
        .split_whitespace()
        .map(escape_token)
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn escape_token(token: &str) -> String {
    let needs_quoting = token
        .chars()
        .any(|c| !(c.is_alphanumeric() || c == '_'));
    if needs_quoting {
        format!("\"{}\"*", token.replace('"', "\"\""))
    } else {
        format!("{token}*")
    }
}

pub fn search_symbols(store: &Store, query: &SymbolSearchQuery) -> Result<Vec<SymbolRecord>> {
    let repo = SymbolRepository::new(store);
    let fts_query = query.text.as_deref().and_then(build_fts_expression);
    repo.search_by_query(&SearchQuery {
        fts_query,
        kind: query.kind,
        file_path: query.file_path.clone(),
        is_exported: query.is_exported,
        project: query.project.clone(),
        limit: query.limit.unwrap_or(DEFAULT_SYMBOL_LIMIT),
    })
}

pub fn search_relations(store: &Store, query: &RelationSearchParams) -> Result<Vec<RelationRecord>> {
    let repo = RelationRepository::new(store);
    repo.search_relations(&RelationSearchQuery {
        src_file_path: query.src_file_path.clone(),
        src_symbol_name: query.src_symbol_name.clone(),
        dst_file_path: query.dst_file_path.clone(),
        dst_symbol_name: query.dst_symbol_name.clone(),
        relation_type: query.relation_type,
        project: query.project.clone(),
        limit: query.limit.unwrap_or(DEFAULT_RELATION_LIMIT),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_expression_appends_prefix_star_per_token() {
        assert_eq!(build_fts_expression("User Svc").unwrap(), "User* Svc*");
    }

    #[test]
    fn fts_expression_trims_whitespace() {
        assert_eq!(build_fts_expression("  foo  ").unwrap(), "foo*");
    }

    #[test]
    fn fts_expression_empty_text_is_none() {
        assert!(build_fts_expression("   ").is_none());
    }

    #[test]
    fn fts_expression_quotes_special_characters() {
        assert_eq!(build_fts_expression("foo-bar").unwrap(), "\"foo-bar\"*");
    }
}
