use axum_checkout_api::db::{create_orm_conn, run_migrations};
use axum_checkout_api::entity::{
    product_variants::ActiveModel as VariantActive, products::ActiveModel as ProductActive,
    users::ActiveModel as UserActive,
};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let user = UserActive {
        id: NotSet,
        email: Set("demo@example.com".into()),
        created_at: NotSet,
    }
    .insert(&orm)
    .await?;

    let catalog: &[(&str, &[(&str, Option<&str>, &str)])] = &[
        (
            "Velvet Matte Lipstick",
            &[
                ("VML-01", Some("Rosewood"), "259.00"),
                ("VML-02", Some("Brick Red"), "259.00"),
            ],
        ),
        ("Hydra Glow Serum", &[("HGS-30", None, "590.00")]),
    ];

    for (name, variants) in catalog {
        let product = ProductActive {
            id: NotSet,
            name: Set((*name).into()),
            created_at: NotSet,
        }
        .insert(&orm)
        .await?;

        for (sku, shade, price) in *variants {
            let price: Decimal = price.parse()?;
            VariantActive {
                id: NotSet,
                product_id: Set(product.id),
                sku: Set((*sku).into()),
                shade_name: Set(shade.map(Into::into)),
                price: Set(price),
                created_at: NotSet,
            }
            .insert(&orm)
            .await?;
        }
    }

    println!("seeded demo catalog; demo user id = {}", user.id);
    Ok(())
}
