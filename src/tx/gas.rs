//! Gas price tiers refreshed from a remote price feed

use crate::config::{gwei, GasConfig};
use crate::error::{WalletError, WalletResult};
use crate::events::{EventBus, WalletEvent};
use crate::schedule::PeriodicTask;

use async_trait::async_trait;
use ethers::types::U256;
use ethers::utils::parse_units;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Below this `fast` price the super fast tier falls back to `max`
const SUPER_FAST_FLOOR_GWEI: u64 = 10;
/// Upper bound for the super fast tier
const SUPER_FAST_CAP_GWEI: u64 = 100;

/// Named gas price points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GasTier {
    Low,
    #[default]
    Standard,
    Fast,
    SuperFast,
    Max,
}

/// Snapshot of the cached prices, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasTiers {
    pub default: U256,
    pub low: U256,
    pub standard: U256,
    pub fast: U256,
    pub max: U256,
}

impl GasTiers {
    pub fn from_config(config: &GasConfig) -> Self {
        Self {
            default: config.default_price(),
            low: config.low_price(),
            standard: config.default_price(),
            fast: config.max_price(),
            max: config.max_price(),
        }
    }

    /// Derived on every read from `fast`
    pub fn super_fast(&self) -> U256 {
        if self.fast < gwei(SUPER_FAST_FLOOR_GWEI) {
            return self.max;
        }
        std::cmp::min(self.fast.saturating_mul(U256::from(2u64)), gwei(SUPER_FAST_CAP_GWEI))
    }

    pub fn get(&self, tier: GasTier) -> U256 {
        match tier {
            GasTier::Low => self.low,
            GasTier::Standard => self.standard,
            GasTier::Fast => self.fast,
            GasTier::SuperFast => self.super_fast(),
            GasTier::Max => self.max,
        }
    }

    /// Apply the `data` object of a feed response; returns false if there is none.
    ///
    /// `max` is recomputed from the configured ceiling on every refresh.
    fn apply(&mut self, response: &Value, ceiling: U256) -> bool {
        let Some(data) = response.get("data").and_then(Value::as_object) else {
            return false;
        };

        let field = |name: &str| data.get(name).and_then(parse_gwei);
        self.default = field("default").unwrap_or(self.default);
        self.low = field("low").unwrap_or(self.low);
        self.standard = field("standard").unwrap_or(self.standard);
        self.fast = field("fast").unwrap_or(self.fast);

        self.enforce_order(ceiling);
        true
    }

    /// Keep low <= standard <= fast <= max
    fn enforce_order(&mut self, ceiling: U256) {
        self.low = std::cmp::min(self.low, self.standard);
        self.fast = std::cmp::max(self.fast, self.standard);
        self.max = std::cmp::max(ceiling, self.fast);
    }
}

/// Parse a decimal gwei amount ("12.5", or a bare JSON number) into wei
fn parse_gwei(value: &Value) -> Option<U256> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() || text.starts_with('-') {
        return None;
    }
    parse_units(text.as_str(), "gwei").ok().map(U256::from)
}

/// Remote source of gas price tiers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasPriceFeed: Send + Sync {
    /// Raw `{ "data": { "default", "low", "standard", "fast" } }` document
    async fn fetch(&self) -> WalletResult<Value>;
}

/// HTTP GET price feed
pub struct HttpGasPriceFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpGasPriceFeed {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|err| {
                warn!("Failed to build gas feed client ({}); using default client", err);
                reqwest::Client::new()
            });

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl GasPriceFeed for HttpGasPriceFeed {
    async fn fetch(&self) -> WalletResult<Value> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WalletError::Network(format!("gas feed request: {}", e)))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| WalletError::Decode(format!("gas feed body: {}", e)))
    }
}

/// Clears the in-flight flag when a refresh ends, even if it is cancelled
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cache of the current gas price tiers
pub struct GasPriceCache {
    feed: Arc<dyn GasPriceFeed>,
    tiers: RwLock<GasTiers>,
    /// Configured maximum price
    ceiling: U256,
    loading: AtomicBool,
    events: EventBus,
    timer: PeriodicTask,
}

impl GasPriceCache {
    pub fn new(feed: Arc<dyn GasPriceFeed>, config: &GasConfig, events: EventBus) -> Self {
        Self {
            feed,
            tiers: RwLock::new(GasTiers::from_config(config)),
            ceiling: config.max_price(),
            loading: AtomicBool::new(false),
            events,
            timer: PeriodicTask::new("gas price refresh"),
        }
    }

    pub async fn tiers(&self) -> GasTiers {
        *self.tiers.read().await
    }

    pub async fn price(&self, tier: GasTier) -> U256 {
        self.tiers.read().await.get(tier)
    }

    /// Fetch the feed once. Returns true when new prices were applied.
    ///
    /// Never fails: outages leave the cache untouched. A call made while
    /// another refresh is in flight returns immediately.
    pub async fn refresh(&self) -> bool {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Gas price refresh already in flight, skipping");
            return false;
        }
        let _in_flight = InFlight(&self.loading);

        let response = match self.feed.fetch().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch gas prices: {}", e);
                crate::metrics::record_gas_refresh(false);
                return false;
            }
        };

        let tiers = {
            let mut tiers = self.tiers.write().await;
            if !tiers.apply(&response, self.ceiling) {
                warn!("Gas price response has no data object");
                crate::metrics::record_gas_refresh(false);
                return false;
            }
            *tiers
        };

        debug!("Gas prices updated: {:?}", tiers);
        crate::metrics::record_gas_refresh(true);
        for (label, tier) in [
            ("low", GasTier::Low),
            ("standard", GasTier::Standard),
            ("fast", GasTier::Fast),
            ("super_fast", GasTier::SuperFast),
            ("max", GasTier::Max),
        ] {
            crate::metrics::record_gas_price(label, tiers.get(tier));
        }
        self.events.publish(WalletEvent::GasPricesUpdated);
        true
    }

    /// Refresh now, then every `period`
    pub async fn start(self: &Arc<Self>, period: Duration) -> WalletResult<()> {
        let cache = Arc::downgrade(self);
        self.timer
            .start(period, move || {
                let cache = cache.clone();
                async move {
                    if let Some(cache) = cache.upgrade() {
                        cache.refresh().await;
                    }
                }
            })
            .await
    }

    /// Cancel the timer; an in-flight refresh still applies its result
    pub async fn stop(&self) {
        self.timer.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Notify;

    fn cache_with(feed: impl GasPriceFeed + 'static) -> (Arc<GasPriceCache>, EventBus) {
        let events = EventBus::new();
        let cache = Arc::new(GasPriceCache::new(
            Arc::new(feed),
            &GasConfig::default(),
            events.clone(),
        ));
        (cache, events)
    }

    fn assert_ordered(tiers: &GasTiers) {
        assert!(tiers.low <= tiers.standard);
        assert!(tiers.standard <= tiers.fast);
        assert!(tiers.fast <= tiers.max);
    }

    #[test]
    fn test_super_fast_below_floor_returns_max() {
        let tiers = GasTiers {
            default: gwei(5),
            low: gwei(3),
            standard: gwei(5),
            fast: gwei(8),
            max: gwei(20),
        };
        assert_eq!(tiers.super_fast(), gwei(20));
        assert_eq!(tiers.get(GasTier::SuperFast), gwei(20));
    }

    #[test]
    fn test_super_fast_doubles_fast_up_to_cap() {
        let mut tiers = GasTiers {
            default: gwei(10),
            low: gwei(5),
            standard: gwei(10),
            fast: gwei(12),
            max: gwei(20),
        };
        assert_eq!(tiers.super_fast(), gwei(24));

        tiers.fast = gwei(80);
        assert_eq!(tiers.super_fast(), gwei(100));
    }

    #[test]
    fn test_parse_gwei_values() {
        assert_eq!(parse_gwei(&json!("12.5")), Some(U256::from(12_500_000_000u64)));
        assert_eq!(parse_gwei(&json!(" 3 ")), Some(gwei(3)));
        assert_eq!(parse_gwei(&json!(7)), Some(gwei(7)));
        assert_eq!(parse_gwei(&json!("abc")), None);
        assert_eq!(parse_gwei(&json!("-1")), None);
        assert_eq!(parse_gwei(&json!("")), None);
        assert_eq!(parse_gwei(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_refresh_applies_present_fields_only() {
        let mut feed = MockGasPriceFeed::new();
        feed.expect_fetch().times(1).returning(|| {
            Ok(json!({ "data": { "default": "11", "low": "6", "standard": "bogus", "fast": "15" } }))
        });
        let (cache, events) = cache_with(feed);
        let mut rx = events.subscribe();
        let before = cache.tiers().await;

        assert!(cache.refresh().await);

        let tiers = cache.tiers().await;
        assert_eq!(tiers.default, gwei(11));
        assert_eq!(tiers.low, gwei(6));
        assert_eq!(tiers.standard, before.standard);
        assert_eq!(tiers.fast, gwei(15));
        assert_ordered(&tiers);
        assert_eq!(rx.try_recv().unwrap(), WalletEvent::GasPricesUpdated);
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_cache_untouched() {
        let mut feed = MockGasPriceFeed::new();
        feed.expect_fetch()
            .times(1)
            .returning(|| Err(WalletError::Network("connection refused".into())));
        let (cache, events) = cache_with(feed);
        let mut rx = events.subscribe();
        let before = cache.tiers().await;

        assert!(!cache.refresh().await);
        assert_eq!(cache.tiers().await, before);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_without_data_is_ignored() {
        let mut feed = MockGasPriceFeed::new();
        feed.expect_fetch()
            .times(1)
            .returning(|| Ok(json!({ "error": "rate limited" })));
        let (cache, _) = cache_with(feed);
        let before = cache.tiers().await;

        assert!(!cache.refresh().await);
        assert_eq!(cache.tiers().await, before);
    }

    #[tokio::test]
    async fn test_ordering_holds_for_inverted_feed() {
        let mut feed = MockGasPriceFeed::new();
        feed.expect_fetch().times(1).returning(|| {
            Ok(json!({ "data": { "low": "40", "standard": "30", "fast": "25" } }))
        });
        let (cache, _) = cache_with(feed);

        assert!(cache.refresh().await);
        let tiers = cache.tiers().await;
        assert_ordered(&tiers);
        assert_eq!(tiers.standard, gwei(30));
        assert_eq!(tiers.max, gwei(30));
    }

    #[tokio::test]
    async fn test_max_returns_to_configured_ceiling_after_spike() {
        let mut feed = MockGasPriceFeed::new();
        let mut seq = mockall::Sequence::new();
        feed.expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(json!({ "data": { "fast": "80" } })));
        feed.expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(json!({ "data": { "standard": "5", "fast": "8" } })));
        let (cache, _) = cache_with(feed);

        assert!(cache.refresh().await);
        assert_eq!(cache.price(GasTier::Max).await, gwei(80));

        assert!(cache.refresh().await);
        let tiers = cache.tiers().await;
        assert_eq!(tiers.fast, gwei(8));
        assert_eq!(tiers.max, GasConfig::default().max_price());
        assert_eq!(tiers.super_fast(), gwei(20));
        assert_ordered(&tiers);
    }

    /// Feed that blocks until released
    struct GatedFeed {
        gate: Arc<Notify>,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl GasPriceFeed for GatedFeed {
        async fn fetch(&self) -> WalletResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(json!({ "data": { "fast": "30" } }))
        }
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_skipped() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (cache, _) = cache_with(GatedFeed {
            gate: gate.clone(),
            calls: calls.clone(),
        });

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh().await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(!cache.refresh().await);
        gate.notify_one();
        assert!(first.await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.price(GasTier::Fast).await, gwei(30));

        // The flag is released once the first refresh finishes
        gate.notify_one();
        assert!(cache.refresh().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_refreshes_immediately_and_stop_cancels() {
        let mut feed = MockGasPriceFeed::new();
        feed.expect_fetch()
            .times(2)
            .returning(|| Ok(json!({ "data": { "fast": "30" } })));
        let (cache, _) = cache_with(feed);

        cache.start(Duration::from_secs(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.price(GasTier::Fast).await, gwei(30));

        tokio::time::sleep(Duration::from_secs(10)).await;
        cache.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
