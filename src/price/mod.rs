pub mod cache;
pub mod fetcher;
pub mod refresher;

pub use cache::{PriceCache, RedisPriceCache};
pub use fetcher::{HttpPriceSource, PriceSource};
pub use refresher::{refresh_history, refresh_spot_price, run_history_refresh, run_spot_refresh};
