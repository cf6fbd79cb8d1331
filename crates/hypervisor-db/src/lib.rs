pub mod config;
pub mod models;
pub mod pool;

pub mod queries {
    pub mod clusters;
    pub mod deployments;
}

pub use config::DbConfig;
pub use pool::{create_pool, default_migrations_path, ensure_database_exists, run_migrations};
