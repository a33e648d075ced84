//! Domain and wire primitives shared across the exchange core.

mod account;
mod candle;
mod order;

pub use account::{AccountInfo, Position};
pub use candle::{Candle, CandleError, Interval, MINUTE_SECS};
pub use order::{CancelReason, Order, OrderKind, OrderRequest, OrderSide, OrderStatus, TpSl};
