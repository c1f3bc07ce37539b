pub mod cache;
pub mod config;
pub mod dimred;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod preprocessing;
pub mod reshape;
pub mod session;
pub mod store;
pub mod svd;
pub mod table;
mod utils;

pub use cache::{cache_key, CachedReducer, ParamValue, ResultCache};
pub use config::Settings;
pub use dimred::{Algorithm, Reducer};
pub use engine::ReductionEngine;
pub use error::{Error, Result};
pub use logging::LogTarget;
pub use pipeline::{Pipeline, Step};
pub use session::ExplorerSession;
pub use store::TabularStore;
pub use table::Table;
