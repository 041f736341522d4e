use shardgate_core::{QueryContext, SchemaCatalog, ShardgateError, SqlType};
use shardgate_protocol::{Charset, RowDataPacket};
use sqlparser::ast::{ShowStatementFilter, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

const BASE_TABLE: &str = "BASE TABLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTablesKind {
    Tables,
    FullTables,
}

/// Rewrites `SHOW [FULL] TABLES` answered by a schema's default data node.
///
/// The physical node knows nothing about sharded tables: any physical table
/// that shares a name with a sharded one is hidden, and one row per sharded
/// table is appended right after the column definitions.
#[derive(Debug, Clone)]
pub struct ShardTableFilter {
    kind: ShowTablesKind,
    /// Upper-cased sharded table names.
    tables: BTreeSet<String>,
}

impl ShardTableFilter {
    /// Returns a filter only for `SHOW [FULL] TABLES` issued from a schema
    /// that has a default data node.
    pub fn resolve(
        ctx: &QueryContext,
        frontend_schema: Option<&str>,
        catalog: &SchemaCatalog,
    ) -> Option<Self> {
        if ctx.sql_type != SqlType::Show {
            return None;
        }
        let schema = catalog.get_schema(frontend_schema?)?;
        if !schema.has_default_data_node() {
            return None;
        }
        let show = parse_show_tables(&ctx.statement)?;
        let target = match show.db_name.as_deref() {
            Some(db) => catalog.get_schema(db),
            None => Some(schema),
        };
        let tables = target
            .into_iter()
            .flat_map(|schema| schema.table_names())
            .filter(|name| {
                show.like
                    .as_deref()
                    .map_or(true, |pattern| like_matches(pattern, name))
            })
            .map(str::to_owned)
            .collect();
        Some(Self {
            kind: if show.full {
                ShowTablesKind::FullTables
            } else {
                ShowTablesKind::Tables
            },
            tables,
        })
    }

    pub fn kind(&self) -> ShowTablesKind {
        self.kind
    }

    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// True if the row's first field names a sharded table.
    pub fn suppresses(&self, row: &[u8], charset: Charset) -> Result<bool, ShardgateError> {
        let row = RowDataPacket::read(row, 1)?;
        Ok(match row.field_values.first() {
            Some(Some(name)) => self.tables.contains(&charset.decode(name).to_uppercase()),
            _ => false,
        })
    }

    /// One row per sharded table, lower-cased, packet ids left at zero.
    pub fn synthesized_rows(&self, charset: Charset) -> impl Iterator<Item = RowDataPacket> + '_ {
        self.tables.iter().map(move |name| {
            let mut row = RowDataPacket::new(0);
            row.add(charset.encode(&name.to_lowercase()));
            if self.kind == ShowTablesKind::FullTables {
                row.add(charset.encode(BASE_TABLE));
            }
            row
        })
    }
}

struct ShowTables {
    full: bool,
    db_name: Option<String>,
    like: Option<String>,
}

fn parse_show_tables(sql: &str) -> Option<ShowTables> {
    let statements = Parser::parse_sql(&MySqlDialect {}, sql).ok()?;
    match statements.as_slice() {
        [Statement::ShowTables {
            full,
            db_name,
            filter,
            ..
        }] => Some(ShowTables {
            full: *full,
            db_name: db_name.as_ref().map(|ident| ident.value.clone()),
            like: match filter {
                Some(ShowStatementFilter::Like(pattern)) | Some(ShowStatementFilter::ILike(pattern)) => {
                    Some(pattern.clone())
                }
                _ => None,
            },
        }),
        _ => None,
    }
}

/// Case-insensitive SQL `LIKE` with `%` and `_` wildcards.
fn like_matches(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_uppercase().chars().collect();
    let value: Vec<char> = value.to_uppercase().chars().collect();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, v));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}
