use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    ensure_owner, parse_currency, practitioner_account_id, require, require_text,
    MIN_CHARGE_AMOUNT,
};
use crate::{
    auth::AuthUser,
    database::models::{NewPractitionerProduct, PractitionerProduct, ProductChanges},
    error::AppError,
    processor::NewProduct,
    AppState,
};

pub const ALLOWED_DURATIONS: [i32; 5] = [30, 45, 60, 75, 90];

#[derive(Debug, Default, Deserialize)]
pub struct CreateProductRequest {
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price_amount: Option<i64>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteProductRequest {
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListProductsRequest {
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub product: PractitionerProduct,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<PractitionerProduct>,
}

pub fn validate_price(amount: i64) -> Result<(), AppError> {
    if amount < MIN_CHARGE_AMOUNT {
        return Err(AppError::Validation(format!(
            "price_amount must be at least {MIN_CHARGE_AMOUNT}"
        )));
    }
    Ok(())
}

pub fn validate_duration(minutes: i32) -> Result<(), AppError> {
    if !ALLOWED_DURATIONS.contains(&minutes) {
        return Err(AppError::Validation(format!(
            "duration_minutes must be one of {ALLOWED_DURATIONS:?}"
        )));
    }
    Ok(())
}

fn product_metadata(practitioner_id: Uuid, duration: i32, category: Option<&str>) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        ("practitioner_id".to_string(), practitioner_id.to_string()),
        ("duration_minutes".to_string(), duration.to_string()),
    ]);
    if let Some(category) = category {
        metadata.insert("category".to_string(), category.to_string());
    }
    metadata
}

/// Creates the product and its price on the practitioner's account, then
/// records it. A failed price removes the product it would have priced.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn create_product(
    state: &AppState,
    caller: &AuthUser,
    request: CreateProductRequest,
) -> Result<ProductResponse, AppError> {
    let practitioner_id = require(request.practitioner_id, "practitioner_id")?;
    ensure_owner(caller.id, practitioner_id)?;
    let name = require_text(request.name, "name")?;
    let price_amount = require(request.price_amount, "price_amount")?;
    let duration_minutes = require(request.duration_minutes, "duration_minutes")?;
    validate_price(price_amount)?;
    validate_duration(duration_minutes)?;
    let currency = parse_currency(request.currency.as_deref().unwrap_or("usd"))?.to_string();
    let description = request.description.filter(|d| !d.trim().is_empty());
    let category = request.category.filter(|c| !c.trim().is_empty());

    let account_id = practitioner_account_id(state, practitioner_id).await?;

    let product = state
        .processor
        .create_product(
            &account_id,
            NewProduct {
                name: name.clone(),
                description: description.clone(),
                metadata: product_metadata(practitioner_id, duration_minutes, category.as_deref()),
            },
        )
        .await?;

    let price = match state
        .processor
        .create_price(&account_id, &product.id, price_amount, &currency)
        .await
    {
        Ok(price) => price,
        Err(e) => {
            error!("Price creation failed for product {}: {e}", product.id);
            if let Err(cleanup) = state.processor.delete_product(&account_id, &product.id).await {
                warn!("Failed to delete orphaned product {}: {cleanup}", product.id);
            }
            return Err(e.into());
        }
    };

    let stored = state
        .store
        .insert_product(NewPractitionerProduct {
            id: Uuid::new_v4(),
            practitioner_id,
            stripe_product_id: product.id.clone(),
            stripe_price_id: price.id.clone(),
            name,
            description,
            price_amount,
            currency,
            duration_minutes,
            category,
            is_active: true,
        })
        .await;

    match stored {
        Ok(product) => {
            info!("Created product {} for practitioner {practitioner_id}", product.id);
            Ok(ProductResponse { product })
        }
        Err(e) => {
            error!("Failed to store product {}: {e}", product.id);
            if let Err(cleanup) = state.processor.deactivate_price(&account_id, &price.id).await {
                warn!("Failed to deactivate orphaned price {}: {cleanup}", price.id);
            }
            if let Err(cleanup) = state.processor.archive_product(&account_id, &product.id).await {
                warn!("Failed to archive orphaned product {}: {cleanup}", product.id);
            }
            Err(e.into())
        }
    }
}

async fn owned_product(
    state: &AppState,
    caller: &AuthUser,
    practitioner_id: Option<Uuid>,
    product_id: Option<Uuid>,
) -> Result<PractitionerProduct, AppError> {
    let practitioner_id = require(practitioner_id, "practitioner_id")?;
    let product_id = require(product_id, "product_id")?;
    ensure_owner(caller.id, practitioner_id)?;
    let product = state
        .store
        .product_by_id(product_id)
        .await?
        .ok_or(AppError::ProductNotFound)?;
    ensure_owner(practitioner_id, product.practitioner_id)?;
    Ok(product)
}

/// Prices are immutable at the processor, so a new amount means a new price.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn update_product(
    state: &AppState,
    caller: &AuthUser,
    request: UpdateProductRequest,
) -> Result<ProductResponse, AppError> {
    let current = owned_product(state, caller, request.practitioner_id, request.product_id).await?;

    if let Some(amount) = request.price_amount {
        validate_price(amount)?;
    }
    if let Some(minutes) = request.duration_minutes {
        validate_duration(minutes)?;
    }
    let name = match request.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::Validation("name must not be empty".into()))
        }
        other => other.map(|n| n.trim().to_string()),
    };

    let account_id = practitioner_account_id(state, current.practitioner_id).await?;
    let mut changes = ProductChanges {
        name: name.clone(),
        description: request.description.clone(),
        duration_minutes: request.duration_minutes,
        category: request.category,
        is_active: request.is_active,
        ..Default::default()
    };

    if name.is_some() || request.description.is_some() {
        state
            .processor
            .update_product(
                &account_id,
                &current.stripe_product_id,
                name,
                request.description,
            )
            .await?;
    }

    if let Some(amount) = request.price_amount.filter(|a| *a != current.price_amount) {
        let price = state
            .processor
            .create_price(
                &account_id,
                &current.stripe_product_id,
                amount,
                &current.currency,
            )
            .await?;
        if let Err(e) = state
            .processor
            .deactivate_price(&account_id, &current.stripe_price_id)
            .await
        {
            warn!("Failed to deactivate old price {}: {e}", current.stripe_price_id);
        }
        changes.price_amount = Some(amount);
        changes.stripe_price_id = Some(price.id);
    }

    let product = state.store.update_product(current.id, changes).await?;
    Ok(ProductResponse { product })
}

/// Soft delete: the processor product is archived and the row deactivated so
/// payment history keeps its references.
#[tracing::instrument(skip(state, request), fields(user_id = %caller.id))]
pub async fn delete_product(
    state: &AppState,
    caller: &AuthUser,
    request: DeleteProductRequest,
) -> Result<ProductResponse, AppError> {
    let current = owned_product(state, caller, request.practitioner_id, request.product_id).await?;
    let account_id = practitioner_account_id(state, current.practitioner_id).await?;

    state
        .processor
        .archive_product(&account_id, &current.stripe_product_id)
        .await?;

    let product = state
        .store
        .update_product(
            current.id,
            ProductChanges {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;
    Ok(ProductResponse { product })
}

pub async fn list_products(
    state: &AppState,
    request: ListProductsRequest,
) -> Result<ProductListResponse, AppError> {
    let practitioner_id = require(request.practitioner_id, "practitioner_id")?;
    let products = state
        .store
        .list_products(practitioner_id, request.include_inactive)
        .await?;
    Ok(ProductListResponse { products })
}
