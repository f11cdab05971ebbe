//! Built-in transform hooks.

mod files;
mod permissions;
mod prices;

pub use files::FileFormatter;
pub use permissions::{GroupPermissions, PermissionGate};
pub use prices::CatalogPrices;
