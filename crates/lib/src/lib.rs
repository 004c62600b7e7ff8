//! QHub client library: session storage, the REST gateway client, and the page models
//! (auth forms, chat controller, documents) shared by the CLI and desktop applications.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod documents;
pub mod error;
pub mod router;
pub mod session;
pub mod views;
