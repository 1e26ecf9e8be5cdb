//! sea-orm entities, one per table.

pub mod cart_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod setting;

pub mod prelude {
    pub use super::cart_item::Entity as CartItem;
    pub use super::coupon::Entity as Coupon;
    pub use super::order::Entity as Order;
    pub use super::order_item::Entity as OrderItem;
    pub use super::payment::Entity as Payment;
    pub use super::product::Entity as Product;
    pub use super::setting::Entity as Setting;
}
