pub mod loader;
pub mod normalize;
pub mod provider;
pub mod types;

pub use loader::JsonFileProvider;
pub use normalize::{IvUnit, NormalizeConfig, PriceUnit, RejectedQuote, SnapshotNormalizer};
pub use provider::{
    InMemoryProvider, MarketDataError, MarketDataProvider, RetryPolicy, RetryingProvider,
};
pub use types::{
    Action, ChainQuote, Greeks, InstrumentQuote, MarketSnapshot, OptionContract, OptionType,
    Strategy, StrategyLeg, StrategyType, EXPIRY_HOUR_UTC,
};
