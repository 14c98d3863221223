//! HTTP and WebSocket API
//!
//! Player routes (tickets, bets, cash-outs, claims, verification) and operator
//! routes (manual round control, pause, config, prize pool).

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::ApiServer;
