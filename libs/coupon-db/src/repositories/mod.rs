pub mod coupon_repo;
