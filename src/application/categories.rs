use std::sync::Arc;

use tracing::info;

use crate::application::error::AppError;
use crate::application::repos::{CategoriesRepo, CategoriesWriteRepo, CategoryParams};
use crate::cache::{CacheInvalidator, CacheKey, CategoryBatchLoader, CategoryListVariant, ListCache};
use crate::domain::categories::{CategoryNode, build_category_tree};
use crate::domain::entities::CategoryRecord;
use crate::domain::error::DomainError;
use crate::domain::types::CategoryId;

/// Category reads through the caches and writes that keep them fresh.
#[derive(Clone)]
pub struct CategoryService {
    reader: Arc<dyn CategoriesRepo>,
    writer: Arc<dyn CategoriesWriteRepo>,
    entities: CategoryBatchLoader,
    lists: ListCache,
    invalidator: CacheInvalidator,
}

impl CategoryService {
    pub fn new(
        reader: Arc<dyn CategoriesRepo>,
        writer: Arc<dyn CategoriesWriteRepo>,
        entities: CategoryBatchLoader,
        lists: ListCache,
        invalidator: CacheInvalidator,
    ) -> Self {
        Self {
            reader,
            writer,
            entities,
            lists,
            invalidator,
        }
    }

    pub async fn get(&self, id: CategoryId) -> Result<CategoryRecord, AppError> {
        self.entities
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("category").into())
    }

    pub async fn list(&self, variant: CategoryListVariant) -> Result<Vec<CategoryRecord>, AppError> {
        let reader = Arc::clone(&self.reader);
        let filter = variant.filter();
        let categories = self
            .lists
            .get_or_compute(&CacheKey::CategoryList(variant), move || async move {
                reader.list_categories(filter).await
            })
            .await?;
        Ok(categories)
    }

    pub async fn list_all(&self) -> Result<Vec<CategoryRecord>, AppError> {
        self.list(CategoryListVariant::All).await
    }

    pub async fn list_active(&self) -> Result<Vec<CategoryRecord>, AppError> {
        self.list(CategoryListVariant::Active).await
    }

    pub async fn tree(&self, variant: CategoryListVariant) -> Result<Vec<CategoryNode>, AppError> {
        Ok(build_category_tree(self.list(variant).await?))
    }

    pub async fn create(&self, params: CategoryParams) -> Result<CategoryRecord, AppError> {
        let params = normalize(params, None)?;
        let category = self.writer.create_category(params).await?;
        self.invalidator.category_changed(None).await;
        info!(category_id = category.id, "category created");
        Ok(category)
    }

    pub async fn update(
        &self,
        id: CategoryId,
        params: CategoryParams,
    ) -> Result<CategoryRecord, AppError> {
        let params = normalize(params, Some(id))?;
        let category = self.writer.update_category(id, params).await?;
        self.invalidator.category_changed(Some(id)).await;
        info!(category_id = id, "category updated");
        Ok(category)
    }

    pub async fn delete(&self, id: CategoryId) -> Result<(), AppError> {
        self.writer.delete_category(id).await?;
        self.invalidator.category_changed(Some(id)).await;
        info!(category_id = id, "category deleted");
        Ok(())
    }
}

fn normalize(params: CategoryParams, id: Option<CategoryId>) -> Result<CategoryParams, AppError> {
    let name = params.name.trim().to_string();
    if name.is_empty() {
        return Err(DomainError::validation("category name must not be empty").into());
    }
    let parent_id = params.parent_id.filter(|parent| *parent != 0);
    if parent_id.is_some() && parent_id == id {
        return Err(DomainError::validation("category cannot be its own parent").into());
    }

    Ok(CategoryParams {
        name,
        description: trim_optional(params.description),
        icon: trim_optional(params.icon),
        theme: trim_optional(params.theme),
        parent_id,
        ..params
    })
}

pub(crate) fn trim_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
