//! Seed the catalog from a YAML file.
//!
//! Categories are created first so products can refer to them by slug.
//! Rows whose slug already exists are left untouched, so the command can be
//! re-run after editing the file.
//!
//! ```yaml
//! categories:
//!   - name: Kitchen
//!     slug: kitchen
//!   - name: Mugs
//!     slug: mugs
//!     parent: kitchen
//! products:
//!   - name: Enamel Mug
//!     slug: enamel-mug
//!     category: mugs
//!     price: "12.00"
//!     stock: 40
//!     status: active
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use shopfront_backend::{BackendClient, BackendConfig, CrudService, Query};
use shopfront_core::{
    Category, CategoryId, NewCategory, NewProduct, Product, ProductStatus, Validate,
};
use tracing::{error, info};

/// A category entry in the seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedCategory {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Slug of the parent category.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

/// A product entry in the seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedProduct {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    #[serde(default)]
    pub stock: i32,
    /// Slug of the product's category.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub sku: Option<String>,
}

/// Parsed seed file.
#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub products: Vec<SeedProduct>,
}

/// Outcome of a seeding run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub categories_created: usize,
    pub categories_skipped: usize,
    pub products_created: usize,
    pub products_skipped: usize,
}

/// Category slugs mapped to their IDs.
type CategoryIndex = HashMap<String, CategoryId>;

impl SeedCategory {
    fn insert_form(&self, parent_id: Option<CategoryId>) -> NewCategory {
        NewCategory {
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            parent_id,
            image_url: self.image_url.clone(),
            sort_order: self.sort_order,
        }
    }

    fn to_new(&self, index: &CategoryIndex) -> Result<NewCategory, String> {
        let parent_id = self
            .parent
            .as_deref()
            .map(|slug| resolve(index, slug, &self.slug))
            .transpose()?;
        Ok(self.insert_form(parent_id))
    }
}

impl SeedProduct {
    fn insert_form(&self, category_id: Option<CategoryId>) -> NewProduct {
        NewProduct {
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            price: self.price,
            compare_at_price: self.compare_at_price,
            stock: self.stock,
            category_id,
            image_url: self.image_url.clone(),
            images: self.images.clone(),
            status: self.status,
            is_featured: self.is_featured,
            sku: self.sku.clone(),
        }
    }

    fn to_new(&self, index: &CategoryIndex) -> Result<NewProduct, String> {
        let category_id = self
            .category
            .as_deref()
            .map(|slug| resolve(index, slug, &self.slug))
            .transpose()?;
        Ok(self.insert_form(category_id))
    }
}

fn resolve(index: &CategoryIndex, slug: &str, owner: &str) -> Result<CategoryId, String> {
    index
        .get(slug)
        .copied()
        .ok_or_else(|| format!("{owner}: unknown category '{slug}'"))
}

/// Problems in the file that can be found without touching the backend:
/// duplicate slugs, self-parented categories, and field rule violations.
///
/// Category references are resolved later, since they may name rows that
/// already exist upstream.
#[must_use]
pub fn validate_file(file: &SeedFile) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for category in &file.categories {
        if !seen.insert(category.slug.as_str()) {
            errors.push(format!("duplicate category slug '{}'", category.slug));
        }
        if category.parent.as_deref() == Some(category.slug.as_str()) {
            errors.push(format!("{}: category cannot be its own parent", category.slug));
        }
        if let Err(e) = category.insert_form(None).validate() {
            errors.push(format!("{}: {e}", category.slug));
        }
    }

    let mut seen = HashSet::new();
    for product in &file.products {
        if !seen.insert(product.slug.as_str()) {
            errors.push(format!("duplicate product slug '{}'", product.slug));
        }
        if let Err(e) = product.insert_form(None).validate() {
            errors.push(format!("{}: {e}", product.slug));
        }
    }

    errors
}

/// Create everything in `file` that is not already in the catalog.
///
/// # Errors
///
/// Returns an error on the first backend failure or unresolvable category.
pub async fn apply(
    categories: &CrudService<Category>,
    products: &CrudService<Product>,
    file: &SeedFile,
) -> Result<SeedReport, Box<dyn std::error::Error>> {
    let mut report = SeedReport::default();

    let mut index: CategoryIndex = categories
        .list(&Query::new())
        .await?
        .into_iter()
        .map(|c| (c.slug, c.id))
        .collect();

    for category in &file.categories {
        if index.contains_key(&category.slug) {
            report.categories_skipped += 1;
            continue;
        }
        let created = categories.create(&category.to_new(&index)?).await?;
        info!(slug = %created.slug, "Category created");
        index.insert(created.slug, created.id);
        report.categories_created += 1;
    }

    let mut existing: HashSet<String> = products
        .list(&Query::new())
        .await?
        .into_iter()
        .map(|p| p.slug)
        .collect();

    for product in &file.products {
        if existing.contains(&product.slug) {
            report.products_skipped += 1;
            continue;
        }
        let created = products.create(&product.to_new(&index)?).await?;
        info!(slug = %created.slug, "Product created");
        existing.insert(created.slug);
        report.products_created += 1;
    }

    Ok(report)
}

/// Parse a seed file.
///
/// # Errors
///
/// Returns `serde_yaml::Error` if the YAML is malformed.
pub fn parse(content: &str) -> Result<SeedFile, serde_yaml::Error> {
    serde_yaml::from_str(content)
}

/// Seed the catalog from the file at `path`.
///
/// # Errors
///
/// Returns an error if the file is missing or invalid, the service-role key
/// is not configured, or a backend write fails.
pub async fn catalog(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()).into());
    }

    info!(path = %path.display(), "Loading catalog from file");

    // Read and validate before connecting to the backend
    let content = tokio::fs::read_to_string(path).await?;
    let file = parse(&content)?;

    info!(
        categories = file.categories.len(),
        products = file.products.len(),
        "Parsed catalog"
    );

    let errors = validate_file(&file);
    if !errors.is_empty() {
        error!("Catalog validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    if dry_run {
        info!("Catalog is valid; nothing written (dry run)");
        return Ok(());
    }

    let config = BackendConfig::from_env()?;
    config.require_service_role()?;
    let client = BackendClient::new(config)?.service()?;

    let report = apply(
        &CrudService::uncached(client.clone()),
        &CrudService::uncached(client),
        &file,
    )
    .await?;

    info!("Seeding complete!");
    info!("  Categories created: {}", report.categories_created);
    info!("  Categories skipped (already exist): {}", report.categories_skipped);
    info!("  Products created: {}", report.products_created);
    info!("  Products skipped (already exist): {}", report.products_skipped);

    Ok(())
}
