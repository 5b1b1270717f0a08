use std::sync::Arc;

use tracing::info;

use crate::application::categories::trim_optional;
use crate::application::error::AppError;
use crate::application::repos::{TagParams, TagsRepo, TagsWriteRepo};
use crate::cache::{CacheInvalidator, CacheKey, ListCache, TagBatchLoader};
use crate::domain::entities::TagRecord;
use crate::domain::error::DomainError;
use crate::domain::types::TagId;

#[derive(Clone)]
pub struct TagService {
    reader: Arc<dyn TagsRepo>,
    writer: Arc<dyn TagsWriteRepo>,
    entities: TagBatchLoader,
    lists: ListCache,
    invalidator: CacheInvalidator,
}

impl TagService {
    pub fn new(
        reader: Arc<dyn TagsRepo>,
        writer: Arc<dyn TagsWriteRepo>,
        entities: TagBatchLoader,
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

    pub async fn get(&self, id: TagId) -> Result<TagRecord, AppError> {
        self.entities
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("tag").into())
    }

    pub async fn list_all(&self) -> Result<Vec<TagRecord>, AppError> {
        let reader = Arc::clone(&self.reader);
        let tags = self
            .lists
            .get_or_compute(&CacheKey::TagList, move || async move {
                reader.list_tags().await
            })
            .await?;
        Ok(tags)
    }

    /// Tags whose name equals `name`, served from the cached full list.
    pub async fn list_by_name(&self, name: &str) -> Result<Vec<TagRecord>, AppError> {
        let name = name.trim();
        let tags = self.list_all().await?;
        if name.is_empty() {
            return Ok(tags);
        }
        Ok(tags.into_iter().filter(|tag| tag.name == name).collect())
    }

    pub async fn create(&self, params: TagParams) -> Result<TagRecord, AppError> {
        let params = normalize(params)?;
        let tag = self.writer.create_tag(params).await?;
        self.invalidator.tag_changed(None).await;
        info!(tag_id = tag.id, "tag created");
        Ok(tag)
    }

    pub async fn update(&self, id: TagId, params: TagParams) -> Result<TagRecord, AppError> {
        let params = normalize(params)?;
        let tag = self.writer.update_tag(id, params).await?;
        self.invalidator.tag_changed(Some(id)).await;
        info!(tag_id = id, "tag updated");
        Ok(tag)
    }

    pub async fn delete(&self, id: TagId) -> Result<(), AppError> {
        self.writer.delete_tag(id).await?;
        self.invalidator.tag_changed(Some(id)).await;
        info!(tag_id = id, "tag deleted");
        Ok(())
    }
}

fn normalize(params: TagParams) -> Result<TagParams, AppError> {
    let name = params.name.trim().to_string();
    if name.is_empty() {
        return Err(DomainError::validation("tag name must not be empty").into());
    }
    Ok(TagParams {
        name,
        color: trim_optional(params.color),
    })
}
