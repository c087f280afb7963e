use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// Read-side catalog service. Products are managed out of band; the
/// storefront only lists and fetches them.
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists active products, paginated and ordered by name.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        page_size: Option<u64>,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let paginator = product::Entity::find()
            .filter(product::Column::Active.eq(true))
            .order_by_asc(product::Column::Name)
            .paginate(self.db.as_ref(), page_size);

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((products, total))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {id}")))
    }
}
