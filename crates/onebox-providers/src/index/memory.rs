//! Process-local search index.
//!
//! Free text matches when any query term appears (case-insensitively) in the
//! subject or body. Results are sorted newest first.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use onebox_core::error::IndexError;
use onebox_core::types::{Category, ClassifiedEmail};
use onebox_sync::traits::{IndexField, SearchFilters, SearchIndex, SearchPage};

use super::{field_value, keyword_filters, page_offset, paging, validate_update, MAX_DISTINCT_VALUES};

#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: RwLock<HashMap<String, ClassifiedEmail>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

fn matches(record: &ClassifiedEmail, filters: &SearchFilters) -> bool {
    let keywords_match = keyword_filters(filters)
        .iter()
        .all(|(field, value)| field_value(record, *field) == value);
    if !keywords_match {
        return false;
    }

    let Some(text) = filters.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return true;
    };
    let subject = record.email.subject.to_lowercase();
    let body = record.email.body.to_lowercase();
    text.split_whitespace()
        .map(str::to_lowercase)
        .any(|term| subject.contains(&term) || body.contains(&term))
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, id: &str, record: &ClassifiedEmail) -> Result<(), IndexError> {
        self.docs.write().await.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ClassifiedEmail>, IndexError> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn query(
        &self,
        filters: &SearchFilters,
        page: usize,
        limit: usize,
    ) -> Result<SearchPage, IndexError> {
        let (page, limit) = paging(page, limit);
        let docs = self.docs.read().await;

        let mut hits: Vec<&ClassifiedEmail> = docs.values().filter(|r| matches(r, filters)).collect();
        hits.sort_by(|a, b| {
            b.email
                .date
                .cmp(&a.email.date)
                .then_with(|| a.email.id.cmp(&b.email.id))
        });

        Ok(SearchPage {
            total: hits.len(),
            items: hits
                .into_iter()
                .skip(page_offset(page, limit))
                .take(limit)
                .cloned()
                .collect(),
            page,
            limit,
        })
    }

    async fn distinct_values(
        &self,
        field: IndexField,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<String>, IndexError> {
        let everything = SearchFilters::default();
        let filter = filter.unwrap_or(&everything);
        let docs = self.docs.read().await;

        let values: BTreeSet<&str> = docs
            .values()
            .filter(|r| matches(r, filter))
            .map(|r| field_value(r, field))
            .collect();
        Ok(values
            .into_iter()
            .take(MAX_DISTINCT_VALUES)
            .map(String::from)
            .collect())
    }

    async fn update_field(&self, id: &str, field: IndexField, value: &str) -> Result<(), IndexError> {
        let value = validate_update(field, value)?;
        let mut docs = self.docs.write().await;
        let record = docs
            .get_mut(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;

        match field {
            IndexField::AccountId => record.email.account_id = value,
            IndexField::Folder => record.email.folder = value,
            IndexField::Category => {
                record.category = Category::parse_label(&value).unwrap_or_default();
            }
        }
        Ok(())
    }
}
