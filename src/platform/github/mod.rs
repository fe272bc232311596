pub mod auth;
pub mod client;
pub mod mapper;

pub use auth::resolve_token;
pub use client::GitHubPlatform;
