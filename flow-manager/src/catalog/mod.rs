//! Endpoint catalog for vendor REST polling.
//!
//! The catalog is a static table of every REST endpoint the scheduler
//! walks, each assigned a cadence tier. It is loaded and validated once
//! at startup and immutable afterwards; an invalid catalog aborts the
//! process.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use flow_common::error::ConfigurationError;

/// Cadence class driving an endpoint's polling frequency.
///
/// Priority is derived from the tier: T0 jobs preempt T1-T3 when the
/// rate limiter is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CadenceTier {
    /// Near-real-time, at most 30s between polls
    T0,
    /// Every 5 minutes
    T1,
    /// Hourly
    T2,
    /// Daily
    T3,
}

impl CadenceTier {
    /// Polling interval for this tier.
    pub fn interval(&self) -> Duration {
        match self {
            CadenceTier::T0 => Duration::from_secs(30),
            CadenceTier::T1 => Duration::from_secs(300),
            CadenceTier::T2 => Duration::from_secs(3600),
            CadenceTier::T3 => Duration::from_secs(86_400),
        }
    }

    /// Dispatch priority; lower is more urgent.
    pub fn priority(&self) -> u8 {
        match self {
            CadenceTier::T0 => 0,
            CadenceTier::T1 => 1,
            CadenceTier::T2 => 2,
            CadenceTier::T3 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceTier::T0 => "T0",
            CadenceTier::T1 => "T1",
            CadenceTier::T2 => "T2",
            CadenceTier::T3 => "T3",
        }
    }
}

/// One entry in the endpoint catalog.
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    /// Unique endpoint key, e.g. `stock_greek_exposure`
    pub key: &'static str,
    /// Path template; `{symbol}` is substituted for per-symbol endpoints
    pub path: &'static str,
    /// Whether the endpoint is polled once per symbol in the universe
    pub requires_symbol: bool,
    /// Static query parameters
    pub params: &'static [(&'static str, &'static str)],
    /// Cadence tier
    pub tier: CadenceTier,
}

impl EndpointDescriptor {
    const SYMBOL_PLACEHOLDER: &'static str = "{symbol}";

    /// Render the request path for a symbol (or none for global endpoints).
    pub fn render_path(&self, symbol: Option<&str>) -> Result<String, ConfigurationError> {
        match (self.requires_symbol, symbol) {
            (true, Some(symbol)) => Ok(self.path.replace(Self::SYMBOL_PLACEHOLDER, symbol)),
            (true, None) => Err(ConfigurationError::invalid_value(
                self.key,
                "endpoint requires a symbol",
            )),
            (false, Some(_)) => Err(ConfigurationError::invalid_value(
                self.key,
                "endpoint does not take a symbol",
            )),
            (false, None) => Ok(self.path.to_string()),
        }
    }

    /// Source label for observations produced by this endpoint.
    pub fn source(&self) -> String {
        format!("rest:{}", self.key)
    }
}

/// Per-symbol endpoints, one poll per symbol in the universe.
const SYMBOL_ENDPOINTS: &[EndpointDescriptor] = &[
    EndpointDescriptor {
        key: "stock_flow_alerts",
        path: "/api/stock/{symbol}/flow-alerts",
        requires_symbol: true,
        params: &[("limit", "100")],
        tier: CadenceTier::T0,
    },
    EndpointDescriptor {
        key: "stock_ohlc_1m",
        path: "/api/stock/{symbol}/ohlc/1m",
        requires_symbol: true,
        params: &[("limit", "500")],
        tier: CadenceTier::T0,
    },
    EndpointDescriptor {
        key: "stock_greek_exposure",
        path: "/api/stock/{symbol}/greek-exposure",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_greek_exposure_expiry",
        path: "/api/stock/{symbol}/greek-exposure/expiry",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_greek_exposure_strike",
        path: "/api/stock/{symbol}/greek-exposure/strike",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_greek_flow",
        path: "/api/stock/{symbol}/greek-flow",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_net_prem_ticks",
        path: "/api/stock/{symbol}/net-prem-ticks",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_nope",
        path: "/api/stock/{symbol}/nope",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_spot_exposures",
        path: "/api/stock/{symbol}/spot-exposures",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_spot_exposures_strike",
        path: "/api/stock/{symbol}/spot-exposures/strike",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_state",
        path: "/api/stock/{symbol}/stock-state",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_volume_price_levels",
        path: "/api/stock/{symbol}/stock-volume-price-levels",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_darkpool",
        path: "/api/darkpool/{symbol}",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_flow_per_expiry",
        path: "/api/stock/{symbol}/flow-per-expiry",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "stock_interpolated_iv",
        path: "/api/stock/{symbol}/interpolated-iv",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_iv_rank",
        path: "/api/stock/{symbol}/iv-rank",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_max_pain",
        path: "/api/stock/{symbol}/max-pain",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_oi_change",
        path: "/api/stock/{symbol}/oi-change",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_option_chains",
        path: "/api/stock/{symbol}/option-chains",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_option_stock_price_levels",
        path: "/api/stock/{symbol}/option/stock-price-levels",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_options_volume",
        path: "/api/stock/{symbol}/options-volume",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_volatility_realized",
        path: "/api/stock/{symbol}/volatility/realized",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_volatility_stats",
        path: "/api/stock/{symbol}/volatility/stats",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "stock_volatility_term_structure",
        path: "/api/stock/{symbol}/volatility/term-structure",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "etf_exposure",
        path: "/api/etfs/{symbol}/exposure",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "etf_in_outflow",
        path: "/api/etfs/{symbol}/in-outflow",
        requires_symbol: true,
        params: &[],
        tier: CadenceTier::T2,
    },
];

/// Global endpoints, one poll per cadence cycle.
const GLOBAL_ENDPOINTS: &[EndpointDescriptor] = &[
    EndpointDescriptor {
        key: "market_tide",
        path: "/api/market/market-tide",
        requires_symbol: false,
        params: &[],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "market_total_options_volume",
        path: "/api/market/total-options-volume",
        requires_symbol: false,
        params: &[("limit", "100")],
        tier: CadenceTier::T1,
    },
    EndpointDescriptor {
        key: "market_oi_change",
        path: "/api/market/oi-change",
        requires_symbol: false,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "market_top_net_impact",
        path: "/api/market/top-net-impact",
        requires_symbol: false,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "net_flow_expiry",
        path: "/api/net-flow/expiry",
        requires_symbol: false,
        params: &[],
        tier: CadenceTier::T2,
    },
    EndpointDescriptor {
        key: "market_economic_calendar",
        path: "/api/market/economic-calendar",
        requires_symbol: false,
        params: &[],
        tier: CadenceTier::T3,
    },
];

/// The validated endpoint catalog.
pub struct EndpointCatalog {
    entries: Vec<EndpointDescriptor>,
    by_key: HashMap<&'static str, usize>,
}

impl EndpointCatalog {
    /// Build the default catalog, validating every entry.
    pub fn load_default() -> Result<Self, ConfigurationError> {
        let entries: Vec<EndpointDescriptor> = SYMBOL_ENDPOINTS
            .iter()
            .chain(GLOBAL_ENDPOINTS.iter())
            .cloned()
            .collect();
        Self::from_entries(entries)
    }

    /// Build a catalog from explicit entries (used by tests).
    pub fn from_entries(entries: Vec<EndpointDescriptor>) -> Result<Self, ConfigurationError> {
        let mut by_key = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if entry.path.is_empty() {
                return Err(ConfigurationError::invalid_value(entry.key, "empty path"));
            }
            let has_placeholder = entry.path.contains(EndpointDescriptor::SYMBOL_PLACEHOLDER);
            if entry.requires_symbol && !has_placeholder {
                return Err(ConfigurationError::invalid_value(
                    entry.key,
                    "per-symbol endpoint has no {symbol} placeholder",
                ));
            }
            if !entry.requires_symbol && has_placeholder {
                return Err(ConfigurationError::invalid_value(
                    entry.key,
                    "global endpoint must not contain {symbol}",
                ));
            }
            if by_key.insert(entry.key, idx).is_some() {
                return Err(ConfigurationError::invalid_value(
                    entry.key,
                    "duplicate endpoint key",
                ));
            }
        }
        Ok(Self { entries, by_key })
    }

    /// Look up an endpoint by key.
    pub fn get(&self, key: &str) -> Option<&EndpointDescriptor> {
        self.by_key.get(key).map(|&idx| &self.entries[idx])
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.entries.iter()
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated requests per minute for a given universe size, useful
    /// for sanity-checking the rate budget at startup.
    pub fn estimated_requests_per_minute(&self, universe_size: usize) -> f64 {
        self.entries
            .iter()
            .map(|e| {
                let per_cycle = if e.requires_symbol {
                    universe_size as f64
                } else {
                    1.0
                };
                per_cycle * 60.0 / e.tier.interval().as_secs_f64()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_valid() {
        let catalog = EndpointCatalog::load_default().unwrap();
        assert!(catalog.len() > 30);
        assert!(catalog.get("stock_greek_exposure").is_some());
        assert!(catalog.get("market_tide").is_some());
        assert!(catalog.get("nonsense").is_none());
    }

    #[test]
    fn render_path_substitutes_symbol() {
        let catalog = EndpointCatalog::load_default().unwrap();
        let endpoint = catalog.get("stock_greek_exposure").unwrap();
        assert_eq!(
            endpoint.render_path(Some("SPY")).unwrap(),
            "/api/stock/SPY/greek-exposure"
        );
        assert!(endpoint.render_path(None).is_err());
    }

    #[test]
    fn render_path_rejects_symbol_on_global() {
        let catalog = EndpointCatalog::load_default().unwrap();
        let endpoint = catalog.get("market_tide").unwrap();
        assert_eq!(
            endpoint.render_path(None).unwrap(),
            "/api/market/market-tide"
        );
        assert!(endpoint.render_path(Some("SPY")).is_err());
    }

    #[test]
    fn duplicate_keys_rejected() {
        let dup = EndpointDescriptor {
            key: "market_tide",
            path: "/api/market/market-tide",
            requires_symbol: false,
            params: &[],
            tier: CadenceTier::T1,
        };
        let result = EndpointCatalog::from_entries(vec![dup.clone(), dup]);
        assert!(result.is_err());
    }

    #[test]
    fn placeholder_mismatch_rejected() {
        let bad = EndpointDescriptor {
            key: "broken",
            path: "/api/stock/greek-exposure",
            requires_symbol: true,
            params: &[],
            tier: CadenceTier::T1,
        };
        assert!(EndpointCatalog::from_entries(vec![bad]).is_err());
    }

    #[test]
    fn tier_priorities_are_ordered() {
        assert!(CadenceTier::T0.priority() < CadenceTier::T1.priority());
        assert!(CadenceTier::T1.priority() < CadenceTier::T2.priority());
        assert!(CadenceTier::T2.priority() < CadenceTier::T3.priority());
    }

    #[test]
    fn request_rate_estimate_scales_with_universe() {
        let catalog = EndpointCatalog::load_default().unwrap();
        let small = catalog.estimated_requests_per_minute(1);
        let large = catalog.estimated_requests_per_minute(10);
        assert!(large > small);
    }
}
