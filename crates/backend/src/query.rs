//! Query builder producing REST-layer filter parameters.
//!
//! Filters follow the `column=op.value` convention; the builder only encodes
//! values (quoting list members, translating wildcards) and leaves URL
//! encoding to `reqwest`.

use std::fmt::Display;

/// Highest page number a listing will request.
pub const MAX_PAGE: u64 = 10_000;

/// 1-based page number, with zero read as the first page and anything past
/// [`MAX_PAGE`] read as the last.
#[must_use]
pub const fn clamp_page(page: u64) -> u64 {
    if page == 0 {
        1
    } else if page > MAX_PAGE {
        MAX_PAGE
    } else {
        page
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Filter and paging parameters for a table read or write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    select: Option<String>,
    filters: Vec<(String, String)>,
    or: Vec<String>,
    order: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Column list, including embedded resources (`*,order_items(*)`).
    #[must_use]
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    /// The column list, if one was set.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.select.as_deref()
    }

    fn filter(mut self, column: &str, op: &str, value: impl Display) -> Self {
        self.filters.push((column.to_string(), format!("{op}.{value}")));
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "eq", value)
    }

    #[must_use]
    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "neq", value)
    }

    #[must_use]
    pub fn gt(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "gt", value)
    }

    #[must_use]
    pub fn gte(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "gte", value)
    }

    #[must_use]
    pub fn lt(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "lt", value)
    }

    #[must_use]
    pub fn lte(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "lte", value)
    }

    /// Case-sensitive pattern match; `%` is accepted as a wildcard.
    #[must_use]
    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.filter(column, "like", pattern.replace('%', "*"))
    }

    /// Case-insensitive pattern match; `%` is accepted as a wildcard.
    #[must_use]
    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.filter(column, "ilike", pattern.replace('%', "*"))
    }

    /// `column IS NULL` when `null`, else `column IS NOT NULL`.
    #[must_use]
    pub fn is_null(mut self, column: &str, null: bool) -> Self {
        let value = if null { "is.null" } else { "not.is.null" };
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    /// `column IN (values...)`.
    #[must_use]
    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        let list = values
            .into_iter()
            .map(|v| quote_list_value(&v.to_string()))
            .collect::<Vec<_>>()
            .join(",");
        self.filter(column, "in", format!("({list})"))
    }

    /// Raw disjunction, e.g. `name.ilike.*tea*,sku.eq.T-1`.
    #[must_use]
    pub fn or(mut self, conditions: impl Into<String>) -> Self {
        self.or.push(conditions.into());
        self
    }

    /// Case-insensitive substring search across `columns`.
    ///
    /// Characters that carry meaning in filter syntax are dropped from the
    /// term; an empty term adds nothing.
    #[must_use]
    pub fn search(self, columns: &[&str], term: &str) -> Self {
        let term = sanitize_search_term(term);
        if term.is_empty() || columns.is_empty() {
            return self;
        }
        let conditions = columns
            .iter()
            .map(|c| format!("{c}.ilike.*{term}*"))
            .collect::<Vec<_>>()
            .join(",");
        self.or(conditions)
    }

    #[must_use]
    pub fn order(mut self, column: &str, direction: Order) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Inclusive row range `from..=to`.
    #[must_use]
    pub const fn range(self, from: u64, to: u64) -> Self {
        let limit = if to >= from { to - from + 1 } else { 0 };
        self.offset(from).limit(limit)
    }

    /// One page of `per_page` rows, `page` starting at 1.
    ///
    /// Page numbers past [`MAX_PAGE`] are read as `MAX_PAGE`.
    #[must_use]
    pub const fn page(self, page: u64, per_page: u64) -> Self {
        let page = clamp_page(page);
        self.offset((page - 1).saturating_mul(per_page)).limit(per_page)
    }

    /// Whether any row filter is set.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty() || !self.or.is_empty()
    }

    /// Same query without ordering or paging, for counts.
    #[must_use]
    pub fn without_paging(&self) -> Self {
        Self {
            select: None,
            filters: self.filters.clone(),
            or: self.or.clone(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Query parameters in a stable order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.filters.len() + 4);
        if let Some(select) = &self.select {
            pairs.push(("select".to_string(), select.clone()));
        }
        pairs.extend(self.filters.iter().cloned());
        for group in &self.or {
            pairs.push(("or".to_string(), format!("({group})")));
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(c, d)| format!("{c}.{}", d.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        pairs
    }

    /// Cache key: `"<table>:"` followed by the sorted parameters.
    ///
    /// Filter order does not change the key.
    #[must_use]
    pub fn cache_key(&self, table: &str) -> String {
        let mut pairs = self.to_pairs();
        pairs.sort();
        let params = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{table}:{params}")
    }
}

fn quote_list_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if needs_quotes {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

fn sanitize_search_term(term: &str) -> String {
    term.chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '%' | '"' | '\\' | '.' | ':'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn test_filters_and_paging() {
        let q = Query::new()
            .select("*")
            .eq("status", "active")
            .gte("price", 10)
            .is_null("category_id", false)
            .order("created_at", Order::Desc)
            .order("name", Order::Asc)
            .page(3, 20);
        assert_eq!(
            q.to_pairs(),
            vec![
                pair("select", "*"),
                pair("status", "eq.active"),
                pair("price", "gte.10"),
                pair("category_id", "not.is.null"),
                pair("order", "created_at.desc,name.asc"),
                pair("limit", "20"),
                pair("offset", "40"),
            ]
        );
    }

    #[test]
    fn test_in_list_quotes_reserved_values() {
        let q = Query::new().in_list("slug", ["plain", "with,comma", "two words", "q\"uote"]);
        assert_eq!(
            q.to_pairs(),
            vec![pair("slug", r#"in.(plain,"with,comma","two words","q\"uote")"#)]
        );
    }

    #[test]
    fn test_like_translates_wildcards() {
        let q = Query::new().ilike("name", "%tea%");
        assert_eq!(q.to_pairs(), vec![pair("name", "ilike.*tea*")]);
    }

    #[test]
    fn test_search_sanitizes_term() {
        let q = Query::new().search(&["name", "description"], "  green (tea),* ");
        assert_eq!(
            q.to_pairs(),
            vec![pair("or", "(name.ilike.*green tea*,description.ilike.*green tea*)")]
        );
        assert!(Query::new().search(&["name"], " (*) ").to_pairs().is_empty());
    }

    #[test]
    fn test_range() {
        let q = Query::new().range(10, 19);
        assert_eq!(q.to_pairs(), vec![pair("limit", "10"), pair("offset", "10")]);
    }

    #[test]
    fn test_page_zero_is_first_page() {
        assert_eq!(Query::new().page(0, 12), Query::new().page(1, 12));
    }

    #[test]
    fn test_huge_page_numbers_do_not_overflow() {
        let q = Query::new().page(u64::MAX, 24);
        assert_eq!(q, Query::new().page(MAX_PAGE, 24));
        assert_eq!(
            q.to_pairs(),
            vec![pair("limit", "24"), pair("offset", &((MAX_PAGE - 1) * 24).to_string())]
        );
        let wide = Query::new().page(2, u64::MAX).to_pairs();
        assert_eq!(wide.last(), Some(&pair("offset", &u64::MAX.to_string())));
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(0), 1);
        assert_eq!(clamp_page(7), 7);
        assert_eq!(clamp_page(u64::MAX), MAX_PAGE);
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = Query::new().eq("a", 1).eq("b", 2);
        let b = Query::new().eq("b", 2).eq("a", 1);
        assert_eq!(a.cache_key("products"), b.cache_key("products"));
        assert!(a.cache_key("products").starts_with("products:"));
        assert_ne!(a.cache_key("products"), a.cache_key("categories"));
    }

    #[test]
    fn test_without_paging() {
        let q = Query::new().select("*").eq("a", 1).limit(5).order("a", Order::Asc);
        assert_eq!(q.without_paging().to_pairs(), vec![pair("a", "eq.1")]);
    }
}
