//! Search index backends.
//!
//! - [`MemoryIndex`]: process-local, used by tests and `search.backend = "memory"`
//! - [`ElasticsearchIndex`]: the `emails` index the frontend queries

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchIndex;
pub use memory::MemoryIndex;

use onebox_core::error::IndexError;
use onebox_core::types::{Category, ClassifiedEmail};
use onebox_sync::traits::{IndexField, SearchFilters};

/// Page size when the caller passes `0`.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Maximum distinct values returned for one field.
pub const MAX_DISTINCT_VALUES: usize = 100;

/// Clamp a 1-based page number and page size.
pub(crate) fn paging(page: usize, limit: usize) -> (usize, usize) {
    let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
    (page.max(1), limit)
}

/// Number of hits before `page`, saturating for out-of-range pages.
pub(crate) fn page_offset(page: usize, limit: usize) -> usize {
    page.saturating_sub(1).saturating_mul(limit)
}

/// Keyword value of `field` on a stored record.
pub(crate) fn field_value(record: &ClassifiedEmail, field: IndexField) -> &str {
    match field {
        IndexField::AccountId => &record.email.account_id,
        IndexField::Folder => &record.email.folder,
        IndexField::Category => record.category.as_str(),
    }
}

/// Keyword filters as `(field, value)` pairs, free text excluded.
pub(crate) fn keyword_filters(filters: &SearchFilters) -> Vec<(IndexField, String)> {
    let mut out = Vec::new();
    if let Some(account_id) = &filters.account_id {
        out.push((IndexField::AccountId, account_id.clone()));
    }
    if let Some(folder) = &filters.folder {
        out.push((IndexField::Folder, folder.clone()));
    }
    if let Some(category) = filters.category {
        out.push((IndexField::Category, category.as_str().to_string()));
    }
    out
}

/// Check a manual update before it reaches the backend.
///
/// Category values are normalized to their canonical label.
pub(crate) fn validate_update(field: IndexField, value: &str) -> Result<String, IndexError> {
    match field {
        IndexField::Category => Category::parse_label(value)
            .map(|c| c.as_str().to_string())
            .ok_or_else(|| IndexError::InvalidField(format!("{} = '{}'", field, value))),
        _ if value.trim().is_empty() => {
            Err(IndexError::InvalidField(format!("{} = ''", field)))
        }
        _ => Ok(value.to_string()),
    }
}
