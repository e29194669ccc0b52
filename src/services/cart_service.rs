use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::{
    audit::log_audit,
    dto::cart::{AddToCartRequest, CartLineDto, CartList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartLine,
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(FromRow)]
struct CartLineRow {
    id: i64,
    variant_id: i64,
    name: String,
    shade_name: Option<String>,
    qty: i32,
    unit_price: Decimal,
    line_total: Decimal,
}

#[derive(FromRow)]
struct VariantRow {
    id: i64,
    sku: String,
    price: Decimal,
}

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let rows = sqlx::query_as::<_, CartLineRow>(
        r#"
        SELECT ci.id, ci.variant_id, pv.sku AS name, pv.shade_name,
               ci.qty, ci.unit_price, ci.line_total
        FROM cart_items ci
        JOIN carts c ON c.id = ci.cart_id
        JOIN product_variants pv ON pv.id = ci.variant_id
        WHERE c.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let subtotal: Decimal = rows.iter().map(|row| row.line_total).sum();
    let items = rows
        .into_iter()
        .map(|row| CartLineDto {
            id: row.id,
            variant_id: row.variant_id,
            name: row.name,
            shade_name: row.shade_name,
            qty: row.qty,
            unit_price: row.unit_price,
            line_total: row.line_total,
        })
        .collect();

    Ok(ApiResponse::success(
        "OK",
        CartList { items, subtotal },
        Some(Meta::empty()),
    ))
}

/// Add a variant to the user's cart, lazily creating the cart row. The line
/// snapshots the variant's current price; re-adding recomputes it.
pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartLine>> {
    if payload.qty <= 0 {
        return Err(AppError::BadRequest(
            "qty must be greater than 0".to_string(),
        ));
    }

    let variant: Option<VariantRow> =
        sqlx::query_as("SELECT id, sku, price FROM product_variants WHERE id = $1")
            .bind(payload.variant_id)
            .fetch_optional(&state.pool)
            .await?;
    let Some(variant) = variant else {
        return Err(AppError::BadRequest("variant not found".to_string()));
    };

    let (cart_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO carts (user_id) VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
        RETURNING id
        "#,
    )
    .bind(user.user_id)
    .fetch_one(&state.pool)
    .await?;

    let line_total = variant.price * Decimal::from(payload.qty);
    let cart_line = sqlx::query_as::<_, CartLine>(
        r#"
        INSERT INTO cart_items (cart_id, variant_id, qty, unit_price, line_total)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (cart_id, variant_id)
        DO UPDATE SET qty = EXCLUDED.qty, unit_price = EXCLUDED.unit_price,
                      line_total = EXCLUDED.line_total
        RETURNING *
        "#,
    )
    .bind(cart_id)
    .bind(variant.id)
    .bind(payload.qty)
    .bind(variant.price)
    .bind(line_total)
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "variant_id": payload.variant_id, "qty": payload.qty })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_line, None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    variant_id: i64,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query(
        r#"
        DELETE FROM cart_items
        WHERE variant_id = $1
          AND cart_id IN (SELECT id FROM carts WHERE user_id = $2)
        "#,
    )
    .bind(variant_id)
    .bind(user.user_id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "variant_id": variant_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
