//! Read-side query facade consumed by the HTTP layer
//!
//! Validates and normalizes inputs, then translates them into store lookups
//! with typed results.

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use crate::store::PriceStore;
use crate::types::{normalize_symbol, PricePoint};

/// Typed query failures surfaced to the API layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Unsupported symbol: {0}")]
    UnknownSymbol(String),
    #[error("No price data available")]
    NotFound,
    #[error("tolerance must be non-negative")]
    InvalidTolerance,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<PriceStore>,
    /// Configured symbol universe, canonical form
    symbols: BTreeSet<String>,
}

impl QueryService {
    pub fn new(store: Arc<PriceStore>, symbols: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            symbols: symbols.into_iter().collect(),
        }
    }

    /// Configured symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }

    fn canonical(&self, raw: &str) -> Result<String, QueryError> {
        let canonical =
            normalize_symbol(raw).ok_or_else(|| QueryError::UnknownSymbol(raw.to_string()))?;
        if !self.symbols.contains(&canonical) {
            return Err(QueryError::UnknownSymbol(raw.to_string()));
        }
        Ok(canonical)
    }

    /// Latest point for a symbol
    pub fn get_latest(&self, symbol: &str) -> Result<PricePoint, QueryError> {
        let canonical = self.canonical(symbol)?;
        self.store.latest(&canonical).ok_or(QueryError::NotFound)
    }

    /// Latest point per symbol, symbol-ordered
    pub fn get_all(&self) -> Vec<PricePoint> {
        self.store.latest_all()
    }

    /// Point nearest to `timestamp` within `tolerance` seconds
    pub fn get_at_timestamp(
        &self,
        symbol: &str,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<PricePoint, QueryError> {
        if tolerance < 0 {
            return Err(QueryError::InvalidTolerance);
        }
        let canonical = self.canonical(symbol)?;
        self.store
            .nearest(&canonical, timestamp, tolerance)
            .ok_or(QueryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn service() -> QueryService {
        let store = Arc::new(PriceStore::new(Duration::from_secs(6 * 3600)));
        store.ingest(PricePoint::new("BTC", 50_000.0, 100, None));
        store.ingest(PricePoint::new("BTC", 50_100.0, 110, None));
        QueryService::new(store, ["BTC".to_string(), "ETH".to_string()])
    }

    #[test]
    fn latest_accepts_wire_symbol_forms() {
        let service = service();
        assert_eq!(service.get_latest("btc").unwrap().price, 50_100.0);
        assert_eq!(service.get_latest("BTC/USD").unwrap().price, 50_100.0);
    }

    #[test]
    fn unknown_symbol_is_typed() {
        let service = service();
        assert_eq!(
            service.get_latest("DOGE"),
            Err(QueryError::UnknownSymbol("DOGE".to_string()))
        );
        assert_eq!(
            service.get_at_timestamp("DOGE", 100, 10),
            Err(QueryError::UnknownSymbol("DOGE".to_string()))
        );
    }

    #[test]
    fn configured_symbol_without_data_is_not_found() {
        let service = service();
        assert_eq!(service.get_latest("ETH"), Err(QueryError::NotFound));
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let service = service();
        assert_eq!(
            service.get_at_timestamp("BTC", 100, -1),
            Err(QueryError::InvalidTolerance)
        );
    }

    #[test]
    fn timestamp_query_finds_nearest() {
        let service = service();
        let hit = service.get_at_timestamp("BTC", 104, 10).unwrap();
        assert_eq!(hit.timestamp, 100);

        assert_eq!(
            service.get_at_timestamp("BTC", 500, 10),
            Err(QueryError::NotFound)
        );
    }
}
