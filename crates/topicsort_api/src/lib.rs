//! HTTP surface over the topicsort core, served as an axum [`axum::Router`].

pub mod api;
pub mod dto;
pub mod session;

pub use api::{create_router, ApiError, TopicsApi};
pub use session::{
    authorize, InvalidationReason, SessionEvent, SessionEvents, StaticTokens, TokenVerifier,
};
