pub mod cart_service;
pub mod order_service;
pub mod payment_service;
pub mod promptpay;
pub mod scb;
