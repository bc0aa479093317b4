//! Products domain module.
//!
//! Business rules for the product catalog, implemented as deterministic
//! domain logic (no IO, no storage). Inventory can only be opened for
//! active products.

pub mod product;

pub use product::{
    Product, ProductActivated, ProductArchived, ProductCreated, ProductEvent, ProductId,
    ProductSnapshot, ProductStatus,
};
