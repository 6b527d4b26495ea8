//! Market-data provider implementations

pub mod dexscreener;
pub mod generic;
pub mod pumpfun;

pub use dexscreener::DexScreenerProvider;
pub use generic::GenericProvider;
pub use pumpfun::PumpFunProvider;
