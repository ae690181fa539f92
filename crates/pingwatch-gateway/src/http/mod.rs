pub mod auth_routes;
pub mod devices;
pub mod events;
pub mod health;
pub mod notifications;
pub mod sessions;
