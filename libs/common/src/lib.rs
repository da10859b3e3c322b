//! Common library for the ID-100 application
//!
//! This crate provides shared functionality used by the game service:
//! database connectivity, credential generation and the error types
//! both of them report.
//!
//! ```rust,no_run
//! use common::credentials::{TOKEN_LENGTH, generate_secure_token};
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = init_pool(&DatabaseConfig::from_env()?).await?;
//!     assert!(health_check(&pool).await?);
//!
//!     let token = generate_secure_token(TOKEN_LENGTH)?;
//!     println!("new bag token: {}", token);
//!     Ok(())
//! }
//! ```

pub mod credentials;
pub mod database;
pub mod error;
