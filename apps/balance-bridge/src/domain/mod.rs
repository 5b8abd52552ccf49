//! Domain Layer - Core bridge types and business logic.
//!
//! This layer contains the account valuation rules, the session token and
//! the upstream connector state machine. Nothing here performs I/O.

/// Raw balances, prices and the quote-valued snapshot.
pub mod balance;

/// Upstream connector lifecycle states and transitions.
pub mod connector;

/// Listen-key session token.
pub mod session;
