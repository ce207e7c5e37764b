pub mod connection;
pub mod events;
pub mod health;
pub mod server;
pub mod upstream;
pub mod webhook;
