//! Receipt filter builder for constructing dynamic SQL queries
//!
//! Shared by `list_receipts` and `count_receipts` so both see the same rows.

use chrono::NaiveDate;

use crate::models::UploadStatus;

/// Builder for constructing receipt query filters
#[derive(Debug, Clone, Default)]
pub struct ReceiptFilter {
    pub id: Option<i64>,
    /// Free-text search over vendor, filename and invoice number
    pub search: Option<String>,
    pub category: Option<String>,
    /// Inclusive total amount range
    pub amount_range: Option<(f64, f64)>,
    /// Inclusive range over the calendar date of `captured_at`
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub upload_status: Option<UploadStatus>,
    pub limit: Option<i64>,
}

/// Result of building a filter - contains SQL components and parameters
pub struct FilterResult {
    /// WHERE clause including "WHERE" keyword (empty if no conditions)
    pub where_clause: String,
    /// ORDER BY clause including "ORDER BY" keyword
    pub order_clause: String,
    /// LIMIT clause (empty if unlimited)
    pub limit_clause: String,
    /// Parameters for the query (boxed for rusqlite compatibility)
    pub params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl ReceiptFilter {
    /// Create a new filter builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn search(mut self, query: Option<&str>) -> Self {
        self.search = query.map(str::to_string);
        self
    }

    pub fn category(mut self, category: Option<&str>) -> Self {
        self.category = category.map(str::to_string);
        self
    }

    pub fn amount_range(mut self, min: f64, max: f64) -> Self {
        self.amount_range = Some((min, max));
        self
    }

    pub fn date_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_range = Some((from, to));
        self
    }

    pub fn upload_status(mut self, status: Option<UploadStatus>) -> Self {
        self.upload_status = status;
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    /// Build the filter components
    pub fn build(&self) -> FilterResult {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(id) = self.id {
            conditions.push("id = ?".to_string());
            params.push(Box::new(id));
        }

        if let Some(q) = self.search.as_deref() {
            if !q.trim().is_empty() {
                conditions.push(
                    "(vendor_name LIKE ? COLLATE NOCASE OR filename LIKE ? COLLATE NOCASE \
                     OR invoice_number LIKE ? COLLATE NOCASE)"
                        .to_string(),
                );
                let pattern = format!("%{}%", q.trim());
                params.push(Box::new(pattern.clone()));
                params.push(Box::new(pattern.clone()));
                params.push(Box::new(pattern));
            }
        }

        if let Some(category) = self.category.as_deref() {
            conditions.push("category = ?".to_string());
            params.push(Box::new(category.to_string()));
        }

        if let Some((min, max)) = self.amount_range {
            conditions.push("total_amount >= ? AND total_amount <= ?".to_string());
            params.push(Box::new(min));
            params.push(Box::new(max));
        }

        // Compare on the date part so the upper bound includes the whole day
        if let Some((from, to)) = self.date_range {
            conditions.push("date(captured_at) >= ? AND date(captured_at) <= ?".to_string());
            params.push(Box::new(from.to_string()));
            params.push(Box::new(to.to_string()));
        }

        if let Some(status) = self.upload_status {
            conditions.push("upload_status = ?".to_string());
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = match self.limit {
            Some(n) if n > 0 => format!("LIMIT {}", n),
            _ => String::new(),
        };

        FilterResult {
            where_clause,
            order_clause: "ORDER BY captured_at DESC, id DESC".to_string(),
            limit_clause,
            params,
        }
    }
}

impl FilterResult {
    /// Build a COUNT query
    pub fn build_count_query(&self) -> String {
        format!("SELECT COUNT(*) FROM receipts {}", self.where_clause)
    }

    /// Build a SELECT query with the given column list
    pub fn build_select_query(&self, columns: &str) -> String {
        format!(
            "SELECT {} FROM receipts {} {} {}",
            columns, self.where_clause, self.order_clause, self.limit_clause
        )
    }

    /// Get parameter references for query execution
    pub fn params_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}
