//! Query limits and the SQL dialect, loadable from configuration.

use sea_orm::DbBackend;
use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, SelectStatement, SqliteQueryBuilder, Values,
};
use serde::{Deserialize, Serialize};

/// Database dialect the statements are rendered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlBackend {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
}

impl SqlBackend {
    #[must_use]
    pub fn from_db(backend: DbBackend) -> Self {
        if backend == DbBackend::Postgres {
            Self::Postgres
        } else if backend == DbBackend::MySql {
            Self::Mysql
        } else {
            Self::Sqlite
        }
    }

    #[must_use]
    pub fn db_backend(self) -> DbBackend {
        match self {
            Self::Sqlite => DbBackend::Sqlite,
            Self::Postgres => DbBackend::Postgres,
            Self::Mysql => DbBackend::MySql,
        }
    }

    /// SQL text with bind parameters.
    #[must_use]
    pub fn build(self, stmt: &SelectStatement) -> (String, Values) {
        match self {
            Self::Sqlite => stmt.build(SqliteQueryBuilder),
            Self::Postgres => stmt.build(PostgresQueryBuilder),
            Self::Mysql => stmt.build(MysqlQueryBuilder),
        }
    }

    /// SQL text with the values inlined, for logs and the CLI.
    #[must_use]
    pub fn render(self, stmt: &SelectStatement) -> String {
        match self {
            Self::Sqlite => stmt.to_string(SqliteQueryBuilder),
            Self::Postgres => stmt.to_string(PostgresQueryBuilder),
            Self::Mysql => stmt.to_string(MysqlQueryBuilder),
        }
    }
}

/// Server-side limits applied to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Largest accepted `$top`; bigger requests are clamped.
    pub max_top: u64,
    /// Server page size. When set, collections are returned in pages and
    /// a full page carries a `@odata.nextLink`.
    pub page_size: Option<u64>,
    pub max_expand_depth: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_top: 1000,
            page_size: None,
            max_expand_depth: 5,
        }
    }
}

impl QueryConfig {
    #[must_use]
    pub fn with_page_size(mut self, size: u64) -> Self {
        self.page_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_max_expand_depth(mut self, depth: u32) -> Self {
        self.max_expand_depth = depth;
        self
    }
}

/// Effective `LIMIT`/`OFFSET` of a collection request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub top: Option<u64>,
    pub skip: Option<u64>,
    /// The server page size capped `top`.
    pub server_limited: bool,
}

impl Page {
    /// Combines the request's `$top`/`$skip` with the server page. The
    /// skiptoken is the offset the previous page ended at; rows already
    /// served count against `$top`.
    #[must_use]
    pub fn combine(
        cfg: &QueryConfig,
        top: Option<u64>,
        skip: Option<u64>,
        token: Option<u64>,
    ) -> Self {
        let start = skip.unwrap_or(0);
        let offset = token.map_or(start, |t| t.max(start));
        let remaining = top
            .map(|t| t.min(cfg.max_top))
            .map(|t| t.saturating_sub(offset - start));
        let (top, server_limited) = match (remaining, cfg.page_size) {
            (Some(t), Some(p)) if p < t => (Some(p), true),
            (None, Some(p)) => (Some(p), true),
            (t, _) => (t, false),
        };
        let skip = (skip.is_some() || token.is_some()).then_some(offset);
        Self {
            top,
            skip,
            server_limited,
        }
    }

    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.top.is_some() || self.skip.is_some()
    }

    /// Offset the next page starts at.
    #[must_use]
    pub fn next_skip(&self) -> Option<u64> {
        self.top.map(|t| self.skip.unwrap_or(0) + t)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: QueryConfig = serde_json::from_str(r#"{ "page_size": 20 }"#).unwrap();
        assert_eq!(cfg.page_size, Some(20));
        assert_eq!(cfg.max_top, 1000);
        assert_eq!(cfg.max_expand_depth, 5);
        assert!(serde_json::from_str::<QueryConfig>(r#"{ "nope": 1 }"#).is_err());
    }

    #[test]
    fn request_and_server_page_combine() {
        let cfg = QueryConfig::default().with_page_size(10);
        let page = Page::combine(&cfg, Some(50), Some(5), None);
        assert_eq!(page.top, Some(10));
        assert_eq!(page.skip, Some(5));
        assert!(page.server_limited);

        let page = Page::combine(&cfg, Some(3), None, Some(10));
        assert_eq!(page.top, Some(3));
        assert_eq!(page.skip, Some(10));
        assert!(!page.server_limited);

        let page = Page::combine(&cfg, None, None, Some(20));
        assert_eq!(page.top, Some(10));
        assert_eq!(page.skip, Some(20));
        assert!(page.server_limited);

        let page = Page::combine(&QueryConfig::default(), Some(5000), None, None);
        assert_eq!(page.top, Some(1000));
        assert_eq!(page.next_skip(), Some(1000));
    }

    #[test]
    fn top_is_spent_across_pages() {
        let cfg = QueryConfig::default().with_page_size(2);
        let first = Page::combine(&cfg, Some(3), None, None);
        assert_eq!((first.top, first.skip), (Some(2), None));
        assert!(first.server_limited);

        let second = Page::combine(&cfg, Some(3), None, first.next_skip());
        assert_eq!((second.top, second.skip), (Some(1), Some(2)));
        assert!(!second.server_limited);

        let page = Page::combine(&cfg, Some(5), Some(4), Some(6));
        assert_eq!((page.top, page.skip), (Some(2), Some(6)));
        assert!(page.server_limited);
        let last = Page::combine(&cfg, Some(5), Some(4), page.next_skip());
        assert_eq!((last.top, last.skip), (Some(1), Some(8)));
        assert!(!last.server_limited);

        let spent = Page::combine(&cfg, Some(3), None, Some(7));
        assert_eq!(spent.top, Some(0));
    }

    #[test]
    fn backend_names() {
        let b: SqlBackend = serde_json::from_str(r#""postgres""#).unwrap();
        assert_eq!(b, SqlBackend::Postgres);
        assert_eq!(SqlBackend::from_db(b.db_backend()), b);
    }
}
