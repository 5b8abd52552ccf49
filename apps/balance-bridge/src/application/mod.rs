//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (session keys, quotes, transport).
pub mod ports;

/// Application services for snapshot building.
pub mod services;
