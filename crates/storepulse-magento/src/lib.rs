mod client;
mod error;

pub use client::{MagentoClient, Page, StoreAuth, StoreView};
pub use error::MagentoError;
