//! Product and category management.

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use serde::Deserialize;
use shopfront_backend::{Order, Page, Query, storage::object_path_for};
use shopfront_core::{
    Category, CategoryId, Product, ProductId, ProductPatch, ProductStatus, ValidationErrors,
};
use tracing::{info, instrument};

use super::{ApiJson, ApiPath, ApiQuery, Payload, page_number, parse_filter, search_term};
use crate::error::{AppError, Result};
use crate::middleware::RequireAdmin;
use crate::state::AppState;

// =============================================================================
// Products
// =============================================================================

/// Query parameters for the product list.
#[derive(Debug, Default, Deserialize)]
pub struct ProductFilters {
    pub q: Option<String>,
    pub page: Option<u64>,
    pub category: Option<String>,
    pub status: Option<String>,
}

impl ProductFilters {
    /// Backend query for these filters, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for an unknown status or malformed
    /// category ID.
    pub fn query(&self) -> Result<Query> {
        let mut query = Query::new().order("created_at", Order::Desc);
        if let Some(term) = search_term(self.q.as_deref()) {
            query = query.search(&["name", "sku", "slug"], term);
        }
        if let Some(category) = parse_filter::<CategoryId>(self.category.as_deref())? {
            query = query.eq("category_id", category);
        }
        if let Some(status) = parse_filter::<ProductStatus>(self.status.as_deref())? {
            query = query.eq("status", status);
        }
        Ok(query)
    }
}

/// GET /api/products
#[instrument(skip(state, _admin))]
pub async fn list_products(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiQuery(filters): ApiQuery<ProductFilters>,
) -> Result<Json<Page<Product>>> {
    let page = state
        .products()
        .page(
            &filters.query()?,
            page_number(filters.page),
            state.config().page_size,
        )
        .await?;
    Ok(Json(page))
}

/// GET /api/products/{id}
pub async fn show_product(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiPath(id): ApiPath<ProductId>,
) -> Result<Json<Product>> {
    let product = state
        .products()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".into()))?;
    Ok(Json(product))
}

/// POST /api/products
#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn create_product(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(payload): Payload,
) -> Result<(StatusCode, Json<Product>)> {
    let product = state.products().create_json(payload).await?;
    info!(product_id = %product.id, slug = %product.slug, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// PATCH /api/products/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, product_id = %id))]
pub async fn update_product(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<ProductId>,
    ApiJson(payload): Payload,
) -> Result<Json<Product>> {
    let product = state.products().update_json(id, payload).await?;
    info!("Product updated");
    Ok(Json(product))
}

/// DELETE /api/products/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, product_id = %id))]
pub async fn delete_product(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<ProductId>,
) -> Result<StatusCode> {
    state.products().delete(id).await?;
    info!("Product deleted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Image upload
// =============================================================================

/// An image read from a multipart body.
#[derive(Debug)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Accept raster images only; SVG can carry script.
fn check_image_type(content_type: &str) -> std::result::Result<(), ValidationErrors> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.starts_with("image/") && essence != "image/svg+xml" {
        Ok(())
    } else {
        Err(ValidationErrors::single("file", "must be an image"))
    }
}

fn check_image_size(len: usize, max_bytes: usize) -> std::result::Result<(), ValidationErrors> {
    if len == 0 {
        return Err(ValidationErrors::single("file", "is empty"));
    }
    if len > max_bytes {
        return Err(ValidationErrors::single(
            "file",
            format!("must be at most {} KiB", max_bytes / 1024),
        ));
    }
    Ok(())
}

/// Read the `file` field, skipping any others.
async fn read_image(multipart: &mut Multipart, max_bytes: usize) -> Result<ImageUpload> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or("image").to_string();
        check_image_type(&content_type)?;

        let bytes = field.bytes().await?;
        check_image_size(bytes.len(), max_bytes)?;

        return Ok(ImageUpload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Err(AppError::BadRequest("Choose an image file to upload.".into()))
}

/// Patch that records a newly uploaded image. The first image also becomes
/// the product's primary image.
fn image_patch(product: &Product, url: String) -> ProductPatch {
    let mut images = product.images.clone();
    images.push(url.clone());
    ProductPatch {
        image_url: product.image_url.is_none().then_some(url),
        images: Some(images),
        ..ProductPatch::default()
    }
}

/// POST /api/products/{id}/image
#[instrument(skip_all, fields(admin_id = %admin.id, product_id = %id))]
pub async fn upload_image(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<ProductId>,
    mut multipart: Multipart,
) -> Result<Json<Product>> {
    let product = state
        .products()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".into()))?;

    let upload = read_image(&mut multipart, state.config().max_upload_bytes).await?;
    let path = object_path_for(id, &upload.filename);
    let url = state
        .storage()
        .upload(
            &state.config().backend.storage_bucket,
            &path,
            upload.bytes,
            &upload.content_type,
        )
        .await?;

    let product = state
        .products()
        .update(id, &image_patch(&product, url))
        .await?;
    info!(path = %path, "Product image uploaded");
    Ok(Json(product))
}

// =============================================================================
// Categories
// =============================================================================

/// GET /api/categories
pub async fn list_categories(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<Category>>> {
    let categories = state
        .categories()
        .list(
            &Query::new()
                .order("sort_order", Order::Asc)
                .order("name", Order::Asc),
        )
        .await?;
    Ok(Json(categories))
}

/// GET /api/categories/{id}
pub async fn show_category(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiPath(id): ApiPath<CategoryId>,
) -> Result<Json<Category>> {
    let category = state
        .categories()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Category".into()))?;
    Ok(Json(category))
}

/// POST /api/categories
#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn create_category(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(payload): Payload,
) -> Result<(StatusCode, Json<Category>)> {
    let category = state.categories().create_json(payload).await?;
    info!(category_id = %category.id, "Category created");
    Ok((StatusCode::CREATED, Json(category)))
}

/// PATCH /api/categories/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, category_id = %id))]
pub async fn update_category(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<CategoryId>,
    ApiJson(payload): Payload,
) -> Result<Json<Category>> {
    if payload
        .get("parent_id")
        .or_else(|| payload.get("parentId"))
        .and_then(serde_json::Value::as_str)
        == Some(id.to_string().as_str())
    {
        return Err(ValidationErrors::single("parent_id", "cannot be the category itself").into());
    }
    let category = state.categories().update_json(id, payload).await?;
    info!("Category updated");
    Ok(Json(category))
}

/// DELETE /api/categories/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, category_id = %id))]
pub async fn delete_category(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<CategoryId>,
) -> Result<StatusCode> {
    state.categories().delete(id).await?;
    info!("Category deleted");
    Ok(StatusCode::NO_CONTENT)
}
