pub mod coupon_service;
pub mod export_service;
pub mod qr_service;
