use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartLineDto, CartList},
        orders::{OrderList, OrderWithLines},
        payment::{PaymentStatusData, QrIssueData, SimulatePaidRequest, StatusQuery},
    },
    events::OrderEvent,
    models::{CartLine, Order, OrderLine, OrderStatus},
    response::{ApiResponse, Meta},
    routes::{cart, health, orders, params, payment},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        payment::checkout_qr,
        payment::status,
        payment::webhook
    ),
    components(
        schemas(
            Order,
            OrderLine,
            OrderStatus,
            CartLine,
            CartList,
            CartLineDto,
            AddToCartRequest,
            OrderList,
            OrderWithLines,
            QrIssueData,
            PaymentStatusData,
            StatusQuery,
            SimulatePaidRequest,
            OrderEvent,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<CartList>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithLines>,
            ApiResponse<QrIssueData>,
            ApiResponse<PaymentStatusData>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payment", description = "QR payment and reconciliation endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
