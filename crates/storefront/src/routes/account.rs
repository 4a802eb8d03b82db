//! Account route handlers.
//!
//! These routes require authentication. Reads and writes go through clients
//! scoped to the user's access token, so row-level policies decide what is
//! visible.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, Query, State},
    response::Redirect,
};
use serde::Deserialize;
use shopfront_backend::{
    BackendError, CrudService, Order as SortOrder, Query as BackendQuery, UserAttributes,
};
use shopfront_core::{
    Address, AddressId, AddressPatch, AddressSnapshot, Email, Entity, NewAddress, Order, OrderId,
    Profile, ProfilePatch, UserId, Validate, ValidationErrors, Validator,
};
use tower_sessions::Session;
use tracing::instrument;

use super::{ListingQuery, Pagination, non_blank, redirect_with};
use crate::error::{AppError, Result, add_breadcrumb, describe_validation};
use crate::filters;
use crate::middleware::{PageContext, RequireAuth, set_current_user};
use crate::models::Flash;
use crate::state::AppState;

const RECENT_ORDERS: u64 = 3;
const ORDERS_PER_PAGE: u64 = 10;
const MIN_PASSWORD_LENGTH: usize = 8;

// =============================================================================
// Forms
// =============================================================================

/// Shipping address fields, shared by the address book and checkout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AddressForm {
    /// Saved address to use instead of the typed fields (checkout only).
    pub address_id: Option<String>,
    pub label: Option<String>,
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
    /// Checkbox: make this the default address.
    pub is_default: Option<String>,
    /// Checkbox: save the typed address to the address book (checkout only).
    pub save: Option<String>,
}

impl AddressForm {
    /// Selected saved address, if one was picked.
    #[must_use]
    pub fn saved_address_id(&self) -> Option<AddressId> {
        non_blank(self.address_id.clone()).and_then(|id| id.parse().ok())
    }

    #[must_use]
    pub fn wants_default(&self) -> bool {
        is_checked(self.is_default.as_deref())
    }

    #[must_use]
    pub fn wants_saved(&self) -> bool {
        is_checked(self.save.as_deref())
    }

    /// The typed fields as an order snapshot.
    ///
    /// # Errors
    ///
    /// Returns the missing or malformed fields.
    pub fn snapshot(&self) -> std::result::Result<AddressSnapshot, ValidationErrors> {
        let snapshot = AddressSnapshot {
            full_name: self.full_name.trim().to_string(),
            line1: self.line1.trim().to_string(),
            line2: non_blank(self.line2.clone()),
            city: self.city.trim().to_string(),
            state: non_blank(self.state.clone()),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_string(),
            phone: non_blank(self.phone.clone()),
        };
        let mut v = Validator::new();
        snapshot.check(&mut v);
        v.finish()?;
        Ok(snapshot)
    }

    /// The typed fields as an address book entry.
    #[must_use]
    pub fn to_new_address(&self, user_id: UserId, is_default: bool) -> NewAddress {
        NewAddress {
            user_id,
            label: non_blank(self.label.clone()),
            full_name: self.full_name.trim().to_string(),
            line1: self.line1.trim().to_string(),
            line2: non_blank(self.line2.clone()),
            city: self.city.trim().to_string(),
            state: non_blank(self.state.clone()),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_string(),
            phone: non_blank(self.phone.clone()),
            is_default,
        }
    }
}

fn is_checked(value: Option<&str>) -> bool {
    matches!(value, Some("on" | "true" | "1"))
}

/// Address book of `user_id`, default first.
pub(crate) async fn list_addresses(
    addresses: &CrudService<Address>,
    user_id: UserId,
) -> std::result::Result<Vec<Address>, BackendError> {
    addresses
        .list(
            &BackendQuery::new()
                .eq("user_id", user_id)
                .order("is_default", SortOrder::Desc)
                .order("created_at", SortOrder::Desc),
        )
        .await
}

/// Save an address, clearing the previous default when this one takes over.
///
/// The first address a user saves always becomes the default.
pub(crate) async fn save_address(
    addresses: &CrudService<Address>,
    form: &AddressForm,
    user_id: UserId,
) -> std::result::Result<Address, AppError> {
    let existing = addresses
        .count(&BackendQuery::new().eq("user_id", user_id))
        .await?;
    let is_default = form.wants_default() || existing == 0;

    let input = form.to_new_address(user_id, is_default);
    input.validate()?;

    if is_default {
        clear_default(addresses, user_id).await?;
    }
    Ok(addresses.create(&input).await?)
}

async fn clear_default(
    addresses: &CrudService<Address>,
    user_id: UserId,
) -> std::result::Result<(), BackendError> {
    let patch = AddressPatch {
        is_default: Some(false),
        ..AddressPatch::default()
    };
    let _: Vec<Address> = addresses
        .client()
        .update(
            Address::TABLE,
            &BackendQuery::new()
                .eq("user_id", user_id)
                .eq("is_default", true),
            &patch,
        )
        .await?;
    Ok(())
}

/// Flash a failed form submission and go back.
async fn form_failed(session: &Session, to: &str, error: AppError) -> Redirect {
    if error.is_server_error() {
        tracing::warn!(error = %error, "Account update failed");
    }
    redirect_with(session, to, Flash::error(error.user_message())).await
}

// =============================================================================
// Overview and profile
// =============================================================================

/// Account overview page template.
#[derive(Template, WebTemplate)]
#[template(path = "account/index.html")]
pub struct AccountIndexTemplate {
    pub page: PageContext,
    pub profile: Option<Profile>,
    pub recent_orders: Vec<Order>,
    pub default_address: Option<Address>,
}

impl AccountIndexTemplate {
    #[must_use]
    pub fn full_name(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|p| p.full_name.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn phone(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|p| p.phone.as_deref())
            .unwrap_or_default()
    }
}

/// Display account overview page.
#[instrument(skip(state, user, page), fields(user_id = %user.id))]
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    page: PageContext,
) -> Result<AccountIndexTemplate> {
    let profiles = state.profiles().for_user(&user.access_token);
    let orders = state.orders().for_user(&user.access_token);
    let addresses = state.addresses().for_user(&user.access_token);

    let recent = BackendQuery::new()
        .eq("user_id", user.id)
        .order("created_at", SortOrder::Desc)
        .limit(RECENT_ORDERS);
    let default_query = BackendQuery::new()
        .eq("user_id", user.id)
        .eq("is_default", true)
        .limit(1);

    let (profile, recent_orders, default_address) = tokio::try_join!(
        profiles.find(user.id),
        orders.list(&recent),
        addresses.list(&default_query),
    )?;

    Ok(AccountIndexTemplate {
        page,
        profile,
        recent_orders,
        default_address: default_address.into_iter().next(),
    })
}

/// Profile form data.
#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
}

/// Update name and phone. The role is never taken from the form.
#[instrument(skip(state, session, user, form), fields(user_id = %user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(mut user): RequireAuth,
    Form(form): Form<ProfileForm>,
) -> Result<Redirect> {
    let patch = ProfilePatch {
        full_name: Some(form.full_name.trim().to_string()),
        phone: Some(form.phone.trim().to_string()),
        avatar_url: None,
        role: None,
    };
    if let Err(errors) = patch.validate() {
        let flash = Flash::error(describe_validation(&errors));
        return Ok(redirect_with(&session, "/account", flash).await);
    }

    let profiles = state.profiles().for_user(&user.access_token);
    match profiles.update(user.id, &patch).await {
        Ok(profile) => {
            user.name.clone_from(&profile.full_name);
            set_current_user(&session, &user).await?;
            Ok(redirect_with(&session, "/account", Flash::success("Profile updated.")).await)
        }
        Err(e) => Ok(form_failed(&session, "/account", e.into()).await),
    }
}

// =============================================================================
// Security
// =============================================================================

/// Password and email page template.
#[derive(Template, WebTemplate)]
#[template(path = "account/security.html")]
pub struct SecurityTemplate {
    pub page: PageContext,
}

/// Display the password and email forms.
#[instrument(skip_all)]
pub async fn security(RequireAuth(_user): RequireAuth, page: PageContext) -> SecurityTemplate {
    SecurityTemplate { page }
}

/// Password change form data.
#[derive(Deserialize)]
pub struct PasswordForm {
    pub password: String,
    pub confirm: String,
}

/// Check a new password and its confirmation.
fn check_password(form: &PasswordForm) -> std::result::Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.min_len("password", &form.password, MIN_PASSWORD_LENGTH)
        .check("confirm", form.password == form.confirm, "does not match the password");
    v.finish()
}

/// Change the signed-in user's password.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Form(form): Form<PasswordForm>,
) -> Result<Redirect> {
    const BACK: &str = "/account/security";

    if let Err(errors) = check_password(&form) {
        return Ok(redirect_with(&session, BACK, Flash::error(describe_validation(&errors))).await);
    }

    let attributes = UserAttributes {
        password: Some(form.password),
        ..UserAttributes::default()
    };
    match state.auth().update_user(&user.access_token, &attributes).await {
        Ok(_) => {
            add_breadcrumb("auth", "Password changed", None);
            let flash = Flash::success("Your password has been changed.");
            Ok(redirect_with(&session, BACK, flash).await)
        }
        Err(e) => Ok(form_failed(&session, BACK, e.into()).await),
    }
}

/// Email change form data.
#[derive(Debug, Deserialize)]
pub struct EmailForm {
    pub email: String,
}

/// Start an email change; the auth service mails a confirmation link.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_email(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Form(form): Form<EmailForm>,
) -> Result<Redirect> {
    const BACK: &str = "/account/security";

    let Ok(email) = Email::parse(&form.email) else {
        let flash = Flash::error("Please enter a valid email address.");
        return Ok(redirect_with(&session, BACK, flash).await);
    };
    if email == user.email {
        let flash = Flash::info("That is already your email address.");
        return Ok(redirect_with(&session, BACK, flash).await);
    }

    let attributes = UserAttributes {
        email: Some(email.to_string()),
        ..UserAttributes::default()
    };
    match state.auth().update_user(&user.access_token, &attributes).await {
        Ok(_) => Ok(redirect_with(
            &session,
            BACK,
            Flash::success(format!("Check {email} for a link to confirm the change.")),
        )
        .await),
        Err(e) => Ok(form_failed(&session, BACK, e.into()).await),
    }
}

// =============================================================================
// Addresses
// =============================================================================

/// Address book template.
#[derive(Template, WebTemplate)]
#[template(path = "account/addresses.html")]
pub struct AddressesTemplate {
    pub page: PageContext,
    pub addresses: Vec<Address>,
}

/// Display the address book.
#[instrument(skip(state, user, page), fields(user_id = %user.id))]
pub async fn addresses(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    page: PageContext,
) -> Result<AddressesTemplate> {
    let addresses =
        list_addresses(&state.addresses().for_user(&user.access_token), user.id).await?;
    Ok(AddressesTemplate { page, addresses })
}

/// Add an address to the book.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create_address(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Form(form): Form<AddressForm>,
) -> Result<Redirect> {
    const BACK: &str = "/account/addresses";

    let addresses = state.addresses().for_user(&user.access_token);
    match save_address(&addresses, &form, user.id).await {
        Ok(_) => Ok(redirect_with(&session, BACK, Flash::success("Address saved.")).await),
        Err(e) => Ok(form_failed(&session, BACK, e).await),
    }
}

/// Remove an address.
#[instrument(skip(state, session, user), fields(user_id = %user.id))]
pub async fn delete_address(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Path(id): Path<AddressId>,
) -> Result<Redirect> {
    const BACK: &str = "/account/addresses";

    let addresses = state.addresses().for_user(&user.access_token);
    match addresses.delete(id).await {
        Ok(()) => Ok(redirect_with(&session, BACK, Flash::info("Address removed.")).await),
        Err(e) => Ok(form_failed(&session, BACK, e.into()).await),
    }
}

/// Make an address the default.
#[instrument(skip(state, session, user), fields(user_id = %user.id))]
pub async fn set_default_address(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Path(id): Path<AddressId>,
) -> Result<Redirect> {
    const BACK: &str = "/account/addresses";

    let addresses = state.addresses().for_user(&user.access_token);
    if addresses.find(id).await?.is_none() {
        return Err(AppError::NotFound(format!("address {id}")));
    }

    clear_default(&addresses, user.id).await?;
    let patch = AddressPatch {
        is_default: Some(true),
        ..AddressPatch::default()
    };
    addresses.update(id, &patch).await?;

    Ok(redirect_with(&session, BACK, Flash::success("Default address updated.")).await)
}

// =============================================================================
// Orders
// =============================================================================

/// Order history template.
#[derive(Template, WebTemplate)]
#[template(path = "account/orders.html")]
pub struct OrdersTemplate {
    pub page: PageContext,
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

/// Display the order history.
#[instrument(skip(state, user, page), fields(user_id = %user.id))]
pub async fn orders(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Query(query): Query<ListingQuery>,
    page: PageContext,
) -> Result<OrdersTemplate> {
    let orders = state.orders().for_user(&user.access_token);
    let results = orders
        .page(
            &BackendQuery::new()
                .eq("user_id", user.id)
                .order("created_at", SortOrder::Desc),
            query.page_number(),
            ORDERS_PER_PAGE,
        )
        .await?;

    Ok(OrdersTemplate {
        page,
        pagination: Pagination::new(
            "/account/orders".to_string(),
            results.page,
            results.total_pages(),
            results.total,
        ),
        orders: results.items,
    })
}

/// Order detail template.
#[derive(Template, WebTemplate)]
#[template(path = "account/order.html")]
pub struct OrderTemplate {
    pub page: PageContext,
    pub order: Order,
}

/// Display one order.
#[instrument(skip(state, user, page), fields(user_id = %user.id))]
pub async fn order(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<OrderId>,
    page: PageContext,
) -> Result<OrderTemplate> {
    let order = state
        .orders()
        .for_user(&user.access_token)
        .find(id)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;

    Ok(OrderTemplate { page, order })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn address_form() -> AddressForm {
        AddressForm {
            full_name: " Jo Doe ".into(),
            line1: "1 Tea Lane".into(),
            line2: Some(String::new()),
            city: "Portland".into(),
            postal_code: "97201".into(),
            country: "US".into(),
            ..AddressForm::default()
        }
    }

    #[test]
    fn test_address_snapshot_trims_and_drops_blanks() {
        let snapshot = address_form().snapshot().unwrap();
        assert_eq!(snapshot.full_name, "Jo Doe");
        assert_eq!(snapshot.line2, None);
    }

    #[test]
    fn test_address_snapshot_reports_missing_fields() {
        let form = AddressForm {
            city: "  ".into(),
            ..address_form()
        };
        let errors = form.snapshot().unwrap_err();
        assert_eq!(errors.message_for("city"), Some("is required"));
    }

    #[test]
    fn test_saved_address_id() {
        let id = AddressId::generate();
        let form = AddressForm {
            address_id: Some(id.to_string()),
            ..AddressForm::default()
        };
        assert_eq!(form.saved_address_id(), Some(id));

        let typed = AddressForm {
            address_id: Some(String::new()),
            ..AddressForm::default()
        };
        assert_eq!(typed.saved_address_id(), None);
    }

    #[test]
    fn test_checkboxes() {
        let form = AddressForm {
            is_default: Some("on".into()),
            ..AddressForm::default()
        };
        assert!(form.wants_default());
        assert!(!form.wants_saved());
    }

    #[test]
    fn test_check_password() {
        let ok = PasswordForm {
            password: "longenough".into(),
            confirm: "longenough".into(),
        };
        assert!(check_password(&ok).is_ok());

        let bad = PasswordForm {
            password: "short".into(),
            confirm: "other".into(),
        };
        let errors = check_password(&bad).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
