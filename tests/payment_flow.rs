use axum_checkout_api::{
    config::{AppConfig, ScbConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::cart::AddToCartRequest,
    dto::payment::StatusQuery,
    error::AppError,
    events::EventHub,
    middleware::auth::AuthUser,
    services::{cart_service, order_service, payment_service, scb, scb::ScbClient},
    state::AppState,
};
use base64::Engine as _;
use futures::{FutureExt, StreamExt};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, Statement};
use sha2::Sha256;

const WEBHOOK_SECRET: &str = "test-webhook-secret";

// Integration flow: cart (2 x 100.00 + 1 x 50.00) -> checkout -> QR-order
// reuse -> idempotent paid confirmation via both the direct transition and the
// signed webhook path.
#[tokio::test]
async fn checkout_reuse_and_paid_reconciliation_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let user_id = seed_user(&state, "buyer@example.com").await?;
    let user = AuthUser {
        user_id,
        role: "user".into(),
    };

    let (variant_a, variant_b) = seed_catalog(&state).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            variant_id: variant_a,
            qty: 2,
        },
    )
    .await?;
    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            variant_id: variant_b,
            qty: 1,
        },
    )
    .await?;

    // Checkout snapshots the cart into a PENDING order.
    let order = payment_service::ensure_pending_order(&state, &user).await?;
    let expected: Decimal = "250.00".parse()?;
    assert_eq!(order.status, "PENDING");
    assert_eq!(order.subtotal, expected);
    assert_eq!(order.grand_total, expected);
    assert_eq!(scb::format_amount(order.grand_total)?, "250.00");

    let cart_resp = cart_service::list_cart(&state, &user).await?;
    assert!(cart_resp.data.unwrap().items.is_empty(), "cart not cleared");

    // Revisiting the payment screen reuses the PENDING order.
    let reused = payment_service::ensure_pending_order(&state, &user).await?;
    assert_eq!(reused.id, order.id);

    // The cart was consumed, so a second explicit checkout has nothing to do.
    let second_checkout = order_service::checkout_order(&state, &user).await;
    assert!(matches!(second_checkout, Err(AppError::CartNotFound)));

    // First confirmation wins, the second is a no-op; subscribers hear about
    // the transition exactly once.
    let mut events = state.events.subscribe(order.id);
    assert!(payment_service::mark_paid(&state, order.id).await?);
    assert!(!payment_service::mark_paid(&state, order.id).await?);

    let event = events.next().await.expect("missing paid event");
    assert_eq!(event.status, "PAID");
    assert!(events.next().now_or_never().is_none(), "duplicate event");

    let order_resp = order_service::get_order(&state, &user, order.id).await?;
    let paid = order_resp.data.unwrap();
    assert_eq!(paid.order.status, "PAID");
    assert_eq!(paid.items.len(), 2);
    let line_sum: Decimal = paid.items.iter().map(|line| line.line_total).sum();
    assert_eq!(line_sum, paid.order.subtotal);

    // Webhook path: a correctly signed confirmation for the already-paid
    // order is acknowledged without further effect.
    let body = format!(
        r#"{{"data":{{"ref1":"{}","status":"PAID"}}}}"#,
        scb::make_order_ref(order.id)
    );
    let signature = sign(body.as_bytes());
    payment_service::confirm_webhook(&state, body.as_bytes(), Some(&signature)).await?;
    assert!(events.next().now_or_never().is_none(), "no-op must not notify");

    // A tampered body is rejected outright.
    let tampered = body.replace("PAID", "PAYD");
    let rejected =
        payment_service::confirm_webhook(&state, tampered.as_bytes(), Some(&signature)).await;
    assert!(matches!(rejected, Err(AppError::InvalidSignature)));

    // A correctly signed but unreadable body is still acknowledged, so the
    // gateway does not retry it forever.
    let garbage = b"not-json";
    let garbage_signature = sign(garbage);
    payment_service::confirm_webhook(&state, garbage, Some(&garbage_signature)).await?;
    assert!(events.next().now_or_never().is_none(), "garbage must not notify");

    // Status polling is scoped to the order's owner; another user naming this
    // order id is turned away before any gateway call.
    let intruder = AuthUser {
        user_id: seed_user(&state, "intruder@example.com").await?,
        role: "user".into(),
    };
    let cross_check = payment_service::check_status(
        &state,
        &intruder,
        StatusQuery {
            order_id: Some(order.id),
            transaction_id: Some("tx-1".into()),
        },
    )
    .await;
    assert!(matches!(cross_check, Err(AppError::NotFound)));

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, cart_items, carts, audit_logs, product_variants, products, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        scb: test_scb_config(),
    };
    let gateway = ScbClient::new(config.scb.clone())?;

    Ok(AppState {
        pool,
        orm,
        config,
        gateway,
        events: EventHub::new(),
    })
}

fn test_scb_config() -> ScbConfig {
    ScbConfig {
        base_url: "http://localhost:1".into(),
        api_key: "test-key".into(),
        api_secret: "test-secret".into(),
        client_id: "test-key".into(),
        client_secret: "test-secret".into(),
        biller_id: "011556677889900".into(),
        ref3_prefix: "SHP".into(),
        callback_url: None,
        webhook_secret: WEBHOOK_SECRET.into(),
    }
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).expect("hmac key");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

async fn seed_user(state: &AppState, email: &str) -> anyhow::Result<i64> {
    let user = axum_checkout_api::entity::users::ActiveModel {
        id: NotSet,
        email: Set(email.to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(user.id)
}

async fn seed_catalog(state: &AppState) -> anyhow::Result<(i64, i64)> {
    let product = axum_checkout_api::entity::products::ActiveModel {
        id: NotSet,
        name: Set("Test Lipstick".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let variant_a = axum_checkout_api::entity::product_variants::ActiveModel {
        id: NotSet,
        product_id: Set(product.id),
        sku: Set("TL-01".into()),
        shade_name: Set(Some("Coral".into())),
        price: Set("100.00".parse()?),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let variant_b = axum_checkout_api::entity::product_variants::ActiveModel {
        id: NotSet,
        product_id: Set(product.id),
        sku: Set("TL-02".into()),
        shade_name: Set(Some("Nude".into())),
        price: Set("50.00".parse()?),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok((variant_a.id, variant_b.id))
}
