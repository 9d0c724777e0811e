pub mod handler;
pub mod hub;
pub mod locks;
pub mod registry;
pub mod rooms;

#[cfg(test)]
mod hub_tests;
