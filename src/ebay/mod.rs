pub mod auth;
pub mod browse;
pub mod config;
pub mod price;

pub use auth::CredentialCache;
pub use browse::BrowseClient;
pub use price::{PriceClient, PriceOutcome};
