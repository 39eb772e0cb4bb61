// Paginated, filtered listing shared by every entity listing.
//
// Each entity describes its joined relation once (`ListQuery`); the data
// page and the count are built from that same description so joins and
// filters can never drift apart.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgRow};
use uuid::Uuid;

use crate::error::{ApiError, db_error, internal_row};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/* -------------------------
   Request / response shapes
--------------------------*/

#[derive(Debug, Default, Deserialize)]
pub struct ListQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64, search: Option<&str>) -> Result<Self, ApiError> {
        if page < 1 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "page must be a positive integer".into(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self { page, limit, search })
    }

    pub fn from_params(p: &ListQueryParams) -> Result<Self, ApiError> {
        Self::new(
            p.page.unwrap_or(1),
            p.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            p.search.as_deref(),
        )
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub total_count: i64,
    pub page_count: i64,
    pub current_page: i64,
    pub limit: i64,
}

impl PageMetadata {
    pub fn new(total_count: i64, req: &PageRequest) -> Self {
        Self {
            total_count,
            page_count: page_count(total_count, req.limit),
            current_page: req.page,
            limit: req.limit,
        }
    }
}

pub fn page_count(total: i64, limit: i64) -> i64 {
    if total <= 0 || limit <= 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

/// `%term%` for ILIKE, with LIKE wildcards in the term matched literally.
pub fn contains_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/* -------------------------
   Query description
--------------------------*/

/// Equality predicate derived from the caller, never from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub column: &'static str,
    pub value: Uuid,
}

#[derive(Debug)]
pub struct ListQuery {
    /// Column list, without the SELECT keyword.
    pub columns: &'static str,
    /// FROM clause with every join.
    pub from: &'static str,
    /// Root primary key, counted distinct.
    pub root_key: &'static str,
    pub search_columns: &'static [&'static str],
    pub order_by: &'static str,
    /// Set when a join can yield several rows per root row.
    pub fans_out: bool,
}

impl ListQuery {
    fn push_filter(&self, qb: &mut QueryBuilder<'static, Postgres>, scope: Option<Scope>, search: Option<&str>) {
        let search = search.filter(|s| !s.is_empty() && !self.search_columns.is_empty());
        if scope.is_none() && search.is_none() {
            return;
        }

        qb.push(" WHERE ");
        if let Some(scope) = scope {
            qb.push(scope.column);
            qb.push(" = ");
            qb.push_bind(scope.value);
            if search.is_some() {
                qb.push(" AND ");
            }
        }

        if let Some(term) = search {
            let pattern = contains_pattern(term);
            qb.push("(");
            for (i, col) in self.search_columns.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(*col);
                qb.push(" ILIKE ");
                qb.push_bind(pattern.clone());
            }
            qb.push(")");
        }
    }

    pub fn data_query(&self, req: &PageRequest, scope: Option<Scope>) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(if self.fans_out { "SELECT DISTINCT " } else { "SELECT " });
        qb.push(self.columns);
        qb.push(" FROM ");
        qb.push(self.from);
        self.push_filter(&mut qb, scope, req.search.as_deref());
        qb.push(" ORDER BY ");
        qb.push(self.order_by);
        qb.push(" LIMIT ");
        qb.push_bind(req.limit);
        qb.push(" OFFSET ");
        qb.push_bind(req.offset());
        qb
    }

    pub fn count_query(&self, req: &PageRequest, scope: Option<Scope>) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT COUNT(DISTINCT ");
        qb.push(self.root_key);
        qb.push(") FROM ");
        qb.push(self.from);
        self.push_filter(&mut qb, scope, req.search.as_deref());
        qb
    }

    pub fn by_id_query(&self, id: Uuid, scope: Option<Scope>) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(if self.fans_out { "SELECT DISTINCT " } else { "SELECT " });
        qb.push(self.columns);
        qb.push(" FROM ");
        qb.push(self.from);
        qb.push(" WHERE ");
        qb.push(self.root_key);
        qb.push(" = ");
        qb.push_bind(id);
        if let Some(scope) = scope {
            qb.push(" AND ");
            qb.push(scope.column);
            qb.push(" = ");
            qb.push_bind(scope.value);
        }
        qb
    }
}

/// One record through the same joins and mapper as the listing. A row
/// outside the caller's scope reads as missing.
pub async fn fetch_one<T, F>(
    db: &PgPool,
    query: &ListQuery,
    id: Uuid,
    scope: Option<Scope>,
    map: F,
) -> Result<Option<T>, ApiError>
where
    F: Fn(&PgRow) -> Result<T, sqlx::Error>,
{
    let mut qb = query.by_id_query(id, scope);
    let row = qb.build().fetch_optional(db).await.map_err(db_error)?;
    row.as_ref().map(map).transpose().map_err(internal_row)
}

/// Runs the page and count queries concurrently and maps every row with
/// the entity's mapper.
pub async fn fetch_page<T, F>(
    db: &PgPool,
    query: &ListQuery,
    req: &PageRequest,
    scope: Option<Scope>,
    map: F,
) -> Result<Page<T>, ApiError>
where
    F: Fn(&PgRow) -> Result<T, sqlx::Error>,
{
    let mut data_qb = query.data_query(req, scope);
    let mut count_qb = query.count_query(req, scope);

    let (rows, total) = tokio::try_join!(
        data_qb.build().fetch_all(db),
        count_qb.build_query_scalar::<i64>().fetch_one(db),
    )
    .map_err(db_error)?;

    let data = rows
        .iter()
        .map(&map)
        .collect::<Result<Vec<_>, _>>()
        .map_err(internal_row)?;

    Ok(Page {
        data,
        metadata: PageMetadata::new(total, req),
    })
}
