use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, FromQueryResult, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};

use chrono::Utc;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithLines},
    entity::{
        cart_items::{self, Column as CartItemCol, Entity as CartItems},
        carts::{Column as CartCol, Entity as Carts},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        product_variants::Column as VariantCol,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderLine, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// Turn the user's cart into an immutable PENDING order, atomically and
/// exactly once. The cart row is locked for the whole transaction, so two
/// concurrent checkouts by the same user serialize; the loser finds the cart
/// gone and fails the precondition instead of duplicating the order.
pub async fn checkout_order(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let txn = state.orm.begin().await?;

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::CartNotFound)?;

    #[derive(Debug, FromQueryResult)]
    struct SnapshotRow {
        variant_id: i64,
        qty: i32,
        unit_price: Decimal,
        line_total: Decimal,
        product_id: i64,
        name: String,
        shade_name: Option<String>,
    }

    let rows = CartItems::find()
        .select_only()
        .column_as(CartItemCol::VariantId, "variant_id")
        .column_as(CartItemCol::Qty, "qty")
        .column_as(CartItemCol::UnitPrice, "unit_price")
        .column_as(CartItemCol::LineTotal, "line_total")
        .join(
            JoinType::InnerJoin,
            cart_items::Relation::ProductVariants.def(),
        )
        .column_as(VariantCol::ProductId, "product_id")
        .column_as(VariantCol::Sku, "name")
        .column_as(VariantCol::ShadeName, "shade_name")
        .filter(CartItemCol::CartId.eq(cart.id))
        .into_model::<SnapshotRow>()
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::EmptyCart);
    }

    for row in &rows {
        if row.qty <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
    }

    let subtotal: Decimal = rows.iter().map(|row| row.line_total).sum();
    let shipping_fee = Decimal::new(0, 2);
    let discount_total = Decimal::new(0, 2);
    let grand_total = subtotal - discount_total + shipping_fee;

    let order = OrderActive {
        id: NotSet,
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending.as_str().into()),
        subtotal: Set(subtotal),
        shipping_fee: Set(shipping_fee),
        discount_total: Set(discount_total),
        grand_total: Set(grand_total),
        scb_transaction_id: Set(None),
        scb_qr_id: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut lines: Vec<OrderItemModel> = Vec::with_capacity(rows.len());
    for row in &rows {
        let line = OrderItemActive {
            id: NotSet,
            order_id: Set(order.id),
            product_id: Set(row.product_id),
            variant_id: Set(row.variant_id),
            name: Set(row.name.clone()),
            shade_name: Set(row.shade_name.clone()),
            unit_price: Set(row.unit_price),
            qty: Set(row.qty),
            line_total: Set(row.line_total),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        lines.push(line);
    }

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;
    Carts::delete_by_id(cart.id).exec(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "lines": lines.len() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok((order, lines))
}

pub async fn checkout(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderWithLines>> {
    let (order, lines) = checkout_order(state, user).await?;
    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithLines {
            order: order_from_entity(order),
            items: lines.into_iter().map(order_line_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: i64,
) -> AppResult<ApiResponse<OrderWithLines>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_line_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithLines {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        status: model.status,
        subtotal: model.subtotal,
        shipping_fee: model.shipping_fee,
        discount_total: model.discount_total,
        grand_total: model.grand_total,
        scb_transaction_id: model.scb_transaction_id,
        scb_qr_id: model.scb_qr_id,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn order_line_from_entity(model: OrderItemModel) -> OrderLine {
    OrderLine {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        variant_id: model.variant_id,
        name: model.name,
        shade_name: model.shade_name,
        unit_price: model.unit_price,
        qty: model.qty,
        line_total: model.line_total,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
