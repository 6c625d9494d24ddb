use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::cart_item::{self, Entity as CartItemEntity},
    errors::ServiceError,
};

pub const MAX_LINE_QUANTITY: i32 = 999;

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AddToCartRequest {
    #[validate(length(min = 1, max = 64))]
    pub product_id: String,
    #[validate(length(min = 1, max = 64))]
    pub product_variant_id: Option<String>,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

/// A shopper's saved cart lines.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_owned(&self, user_id: Uuid, id: Uuid) -> Result<cart_item::Model, ServiceError> {
        CartItemEntity::find_by_id(id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::db("find cart item", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_desc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(|e| ServiceError::db("list cart items", e))
    }

    /// Adds to the matching (product, variant) line or creates it.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn add(
        &self,
        user_id: Uuid,
        request: AddToCartRequest,
    ) -> Result<cart_item::Model, ServiceError> {
        request.validate()?;

        let mut query = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(request.product_id.clone()));
        query = match &request.product_variant_id {
            Some(variant) => query.filter(cart_item::Column::ProductVariantId.eq(variant.clone())),
            None => query.filter(cart_item::Column::ProductVariantId.is_null()),
        };
        let existing = query
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::db("find cart line", e))?;

        let item = match existing {
            Some(line) => {
                let quantity = line
                    .quantity
                    .saturating_add(request.quantity)
                    .min(MAX_LINE_QUANTITY);
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active
                    .update(&*self.db)
                    .await
                    .map_err(|e| ServiceError::db("increment cart line", e))?
            }
            None => {
                let now = Utc::now();
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(request.product_id),
                    product_variant_id: Set(request.product_variant_id),
                    quantity: Set(request.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await
                .map_err(|e| ServiceError::db("insert cart line", e))?
            }
        };

        info!(cart_item_id = %item.id, quantity = item.quantity, "cart line saved");
        Ok(item)
    }

    #[instrument(skip(self, request))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        id: Uuid,
        request: UpdateCartItemRequest,
    ) -> Result<cart_item::Model, ServiceError> {
        request.validate()?;
        let line = self.find_owned(user_id, id).await?;
        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(request.quantity);
        active
            .update(&*self.db)
            .await
            .map_err(|e| ServiceError::db("update cart line", e))
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let line = self.find_owned(user_id, id).await?;
        line.delete(&*self.db)
            .await
            .map_err(|e| ServiceError::db("delete cart line", e))?;
        Ok(())
    }

    /// Empties the cart; returns how many lines were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await
            .map_err(|e| ServiceError::db("clear cart", e))?;
        info!(removed = result.rows_affected, "cart cleared");
        Ok(result.rows_affected)
    }
}
