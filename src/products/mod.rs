pub mod handlers;
pub mod model;
pub mod repository;

pub use handlers::get_product;
pub use model::Product;
pub use repository::{InMemoryProductRepository, ProductRepository, TracedProductRepository};
