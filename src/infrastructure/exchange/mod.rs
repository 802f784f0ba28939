// src/infrastructure/exchange/mod.rs
// One adapter per exchange, each owning its transport, signing scheme, and
// native-error translation.

pub mod binance;
pub mod bybit;
pub mod okx;

pub use binance::{BinanceAdapter, BinanceConfig};
pub use bybit::{BybitAdapter, BybitConfig};
pub use okx::{OkxAdapter, OkxConfig};
