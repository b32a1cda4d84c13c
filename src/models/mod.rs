pub mod api_model;
pub mod db_model;
pub mod queries;

pub use api_model::*;
pub use db_model::*;
pub use queries::*;
