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
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{CheckoutRequest, CheckoutResponse, DeletedOrderItem},
        orders::{
            DeletedOrder, OrderItemList, OrderList, OrderStatusChanged, OrderWithItems,
            PaymentStatusChanged, UpdateStatusRequest,
        },
        products::{
            AdjustStockRequest, CreateProductRequest, ProductList, SelectiveProductsQuery,
            UpdateProductRequest,
        },
    },
    models::{CartItem, Order, OrderItem, OrderStatus, PaymentStatus, Product, User},
    response::{ApiResponse, Meta},
    routes::{auth, cart, health, orders, products, users},
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
        auth::login,
        auth::register,
        users::get_user,
        products::list_products,
        products::get_selective_products,
        products::create_product,
        products::get_product,
        products::update_product,
        products::delete_product,
        products::adjust_stock,
        products::activate_product,
        products::deactivate_product,
        cart::checkout,
        cart::delete_order_item,
        orders::get_order,
        orders::list_user_orders,
        orders::list_order_items,
        orders::delete_order,
        orders::update_order_status,
        orders::update_payment_status
    ),
    components(
        schemas(
            User,
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CheckoutRequest,
            CheckoutResponse,
            DeletedOrderItem,
            DeletedOrder,
            UpdateStatusRequest,
            OrderStatusChanged,
            PaymentStatusChanged,
            OrderList,
            OrderItemList,
            OrderWithItems,
            CreateProductRequest,
            UpdateProductRequest,
            AdjustStockRequest,
            SelectiveProductsQuery,
            ProductList,
            Meta,
            ApiResponse<User>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CheckoutResponse>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Users", description = "User profile endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Checkout endpoints"),
        (name = "Orders", description = "Order management endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_path_is_documented() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/cart/checkout"));
        assert!(doc.paths.paths.contains_key("/api/order/update/status/{order_id}"));
        assert!(doc.paths.paths.contains_key("/api/users/{user_id}"));
        assert!(doc.paths.paths.contains_key("/api/products/selective"));
    }
}
