//! In-memory price time series
//!
//! One bounded, timestamp-ordered series per symbol, each behind its own
//! lock so feed, query and eviction contexts never contend across symbols.
//! The outer map lock is held only long enough to resolve a series handle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crate::types::PricePoint;

#[derive(Debug, PartialEq, Eq)]
enum IngestOutcome {
    Appended,
    Replaced,
    OutOfOrder,
    DuplicateRound,
}

/// Timestamp-ascending points for one symbol, unique per timestamp.
#[derive(Debug, Default)]
struct SymbolSeries {
    points: VecDeque<PricePoint>,
}

impl SymbolSeries {
    fn ingest(&mut self, point: PricePoint) -> IngestOutcome {
        match self.points.back_mut() {
            Some(last) if point.round_id.is_some() && point.round_id == last.round_id => {
                IngestOutcome::DuplicateRound
            }
            Some(last) if point.timestamp < last.timestamp => IngestOutcome::OutOfOrder,
            Some(last) if point.timestamp == last.timestamp => {
                // Last write wins for re-delivered ticks
                *last = point;
                IngestOutcome::Replaced
            }
            _ => {
                self.points.push_back(point);
                IngestOutcome::Appended
            }
        }
    }

    fn latest(&self) -> Option<&PricePoint> {
        self.points.back()
    }

    /// Closest point within tolerance; ties prefer the earlier timestamp.
    /// The series is sorted, so only the neighbors of the insertion position
    /// are candidates.
    fn nearest(&self, target: i64, tolerance: i64) -> Option<&PricePoint> {
        let idx = self.points.partition_point(|p| p.timestamp < target);

        let mut best: Option<&PricePoint> = None;
        for candidate in [idx.checked_sub(1), Some(idx)].into_iter().flatten() {
            let Some(point) = self.points.get(candidate) else {
                continue;
            };
            let dist = (point.timestamp - target).abs();
            if dist > tolerance {
                continue;
            }
            best = match best {
                None => Some(point),
                Some(current) => {
                    let current_dist = (current.timestamp - target).abs();
                    if dist < current_dist
                        || (dist == current_dist && point.timestamp < current.timestamp)
                    {
                        Some(point)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best
    }

    /// Drop points older than the retention window, always keeping the
    /// most recent point so `latest` keeps answering.
    fn evict(&mut self, now: i64, retention_secs: i64) -> usize {
        let mut removed = 0;
        while self.points.len() > 1 {
            match self.points.front() {
                Some(point) if now - point.timestamp > retention_secs => {
                    self.points.pop_front();
                    removed += 1;
                }
                _ => break,
            }
        }
        removed
    }
}

/// Mapping from symbol to its series, plus the retention window.
pub struct PriceStore {
    series: RwLock<HashMap<String, Arc<Mutex<SymbolSeries>>>>,
    retention: Duration,
}

// Lock recovery: no code path panics while holding these locks, so a
// poisoned guard still contains consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl PriceStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention,
        }
    }

    fn series_for(&self, symbol: &str) -> Option<Arc<Mutex<SymbolSeries>>> {
        self.series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned()
    }

    fn series_or_create(&self, symbol: &str) -> Arc<Mutex<SymbolSeries>> {
        if let Some(series) = self.series_for(symbol) {
            return series;
        }
        let mut map = self.series.write().unwrap_or_else(|e| e.into_inner());
        map.entry(symbol.to_string()).or_default().clone()
    }

    /// Non-blocking, O(1) amortized append path for the feed. Out-of-order
    /// and duplicate-round ticks are dropped, never errors.
    pub fn ingest(&self, point: PricePoint) {
        let symbol = point.symbol.clone();
        let timestamp = point.timestamp;

        let series = self.series_or_create(&symbol);
        let outcome = lock(&series).ingest(point);

        match outcome {
            IngestOutcome::OutOfOrder => {
                tracing::debug!(symbol = %symbol, timestamp, "Dropping out-of-order tick");
            }
            IngestOutcome::DuplicateRound => {
                tracing::debug!(symbol = %symbol, timestamp, "Dropping duplicate oracle round");
            }
            IngestOutcome::Appended | IngestOutcome::Replaced => {}
        }
    }

    /// Most recent point for the symbol
    pub fn latest(&self, symbol: &str) -> Option<PricePoint> {
        let series = self.series_for(symbol)?;
        let guard = lock(&series);
        guard.latest().cloned()
    }

    /// Latest point per known symbol, symbol-ordered for deterministic output
    pub fn latest_all(&self) -> Vec<PricePoint> {
        let handles: Vec<Arc<Mutex<SymbolSeries>>> = self
            .series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut latest: Vec<PricePoint> = handles
            .iter()
            .filter_map(|series| lock(series).latest().cloned())
            .collect();
        latest.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        latest
    }

    /// Closest point within `tolerance` seconds of `target`
    pub fn nearest(&self, symbol: &str, target: i64, tolerance: i64) -> Option<PricePoint> {
        let series = self.series_for(symbol)?;
        let guard = lock(&series);
        guard.nearest(target, tolerance).cloned()
    }

    /// Drop points outside the retention window. Runs from the cleanup timer
    /// only, never inline with ingest.
    pub fn evict(&self, now: i64) -> usize {
        let retention_secs = self.retention.as_secs() as i64;
        let handles: Vec<Arc<Mutex<SymbolSeries>>> = self
            .series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut removed = 0;
        for series in handles {
            removed += lock(&series).evict(now, retention_secs);
        }
        if removed > 0 {
            tracing::info!(removed, "Evicted stale price points");
        }
        removed
    }

    /// All retained points, ordered by symbol then timestamp (snapshot source)
    pub fn dump(&self) -> Vec<PricePoint> {
        let mut handles: Vec<(String, Arc<Mutex<SymbolSeries>>)> = self
            .series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(symbol, series)| (symbol.clone(), Arc::clone(series)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        handles
            .into_iter()
            .flat_map(|(_, series)| {
                let guard = lock(&series);
                guard.points.iter().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    /// Rebuild from snapshot records. Input order is not trusted.
    pub fn hydrate(&self, mut points: Vec<PricePoint>) {
        points.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        for point in points {
            self.ingest(point);
        }
    }

    /// Number of symbols with at least one point
    pub fn symbol_count(&self) -> usize {
        self.series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_point(symbol: &str, price: f64, timestamp: i64) -> PricePoint {
        PricePoint::new(symbol, price, timestamp, None)
    }

    fn store() -> PriceStore {
        PriceStore::new(Duration::from_secs(6 * 3600))
    }

    #[test]
    fn latest_returns_last_ingested_for_increasing_timestamps() {
        let store = store();
        store.ingest(make_point("BTC", 100.0, 1));
        store.ingest(make_point("BTC", 101.0, 2));
        store.ingest(make_point("BTC", 102.0, 3));

        let latest = store.latest("BTC").expect("latest");
        assert_eq!(latest.price, 102.0);
        assert_eq!(latest.timestamp, 3);
    }

    #[test]
    fn equal_timestamp_replaces_stored_point() {
        let store = store();
        store.ingest(make_point("BTC", 100.0, 5));
        store.ingest(make_point("BTC", 101.0, 5));

        let latest = store.latest("BTC").expect("latest");
        assert_eq!(latest.price, 101.0);
        assert_eq!(store.dump().len(), 1);
    }

    #[test]
    fn out_of_order_tick_is_a_noop() {
        let store = store();
        store.ingest(make_point("BTC", 100.0, 10));
        store.ingest(make_point("BTC", 99.0, 5));

        let latest = store.latest("BTC").expect("latest");
        assert_eq!(latest.price, 100.0);
        assert_eq!(store.dump().len(), 1);
    }

    #[test]
    fn duplicate_round_is_dropped_before_timestamp_check() {
        let store = store();
        store.ingest(PricePoint::new("BTC", 100.0, 10, Some(42)));
        store.ingest(PricePoint::new("BTC", 100.5, 11, Some(42)));
        store.ingest(PricePoint::new("BTC", 101.0, 12, Some(43)));

        assert_eq!(store.dump().len(), 2);
        assert_eq!(store.latest("BTC").unwrap().round_id, Some(43));
    }

    #[test]
    fn unknown_symbol_has_no_latest() {
        let store = store();
        assert!(store.latest("DOGE").is_none());
        assert!(store.nearest("DOGE", 100, 10).is_none());
    }

    #[test]
    fn evict_respects_retention_but_keeps_latest() {
        let store = PriceStore::new(Duration::from_secs(100));
        store.ingest(make_point("BTC", 1.0, 10));
        store.ingest(make_point("BTC", 2.0, 20));
        store.ingest(make_point("BTC", 3.0, 30));

        // All three are stale at now=1000, only the latest survives
        let removed = store.evict(1000);
        assert_eq!(removed, 2);

        let remaining = store.dump();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, 30);
        assert_eq!(store.latest("BTC").unwrap().price, 3.0);
    }

    #[test]
    fn evict_keeps_points_inside_window() {
        let store = PriceStore::new(Duration::from_secs(100));
        store.ingest(make_point("ETH", 1.0, 850));
        store.ingest(make_point("ETH", 2.0, 950));
        store.ingest(make_point("ETH", 3.0, 990));

        let removed = store.evict(1000);
        assert_eq!(removed, 1);
        assert_eq!(store.dump().len(), 2);
    }

    #[test]
    fn nearest_picks_smallest_distance() {
        let store = store();
        store.ingest(make_point("BTC", 50.0, 100));
        store.ingest(make_point("BTC", 51.0, 110));

        // distance 4 vs 6
        let hit = store.nearest("BTC", 104, 10).expect("within tolerance");
        assert_eq!(hit.timestamp, 100);
        assert_eq!(hit.price, 50.0);
    }

    #[test]
    fn nearest_tie_prefers_earlier_timestamp() {
        let store = store();
        store.ingest(make_point("BTC", 50.0, 100));
        store.ingest(make_point("BTC", 51.0, 108));

        let hit = store.nearest("BTC", 104, 10).expect("within tolerance");
        assert_eq!(hit.timestamp, 100);
    }

    #[test]
    fn nearest_outside_tolerance_is_not_found() {
        let store = store();
        store.ingest(make_point("BTC", 50.0, 100));

        assert!(store.nearest("BTC", 200, 10).is_none());
        assert!(store.nearest("BTC", 111, 10).is_some());
    }

    #[test]
    fn nearest_exact_match() {
        let store = store();
        store.ingest(make_point("BTC", 50.0, 100));
        store.ingest(make_point("BTC", 51.0, 110));
        store.ingest(make_point("BTC", 52.0, 120));

        let hit = store.nearest("BTC", 110, 0).expect("exact");
        assert_eq!(hit.price, 51.0);
    }

    #[test]
    fn latest_all_is_symbol_ordered() {
        let store = store();
        store.ingest(make_point("SOL", 100.0, 1));
        store.ingest(make_point("BTC", 50_000.0, 1));
        store.ingest(make_point("ETH", 3_000.0, 1));

        let all = store.latest_all();
        let symbols: Vec<&str> = all.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTC", "ETH", "SOL"]);
    }

    #[test]
    fn concurrent_ingest_across_symbols_loses_nothing() {
        let store = Arc::new(store());
        let symbols = ["BTC", "ETH", "SOL", "XRP"];

        let handles: Vec<_> = symbols
            .iter()
            .map(|&symbol| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..1000i64 {
                        store.ingest(make_point(symbol, i as f64, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("ingest thread");
        }

        assert_eq!(store.dump().len(), symbols.len() * 1000);
        for symbol in symbols {
            let latest = store.latest(symbol).expect("latest");
            assert_eq!(latest.timestamp, 999);
            assert_eq!(latest.price, 999.0);
        }
    }

    #[test]
    fn hydrate_sorts_unordered_input() {
        let store = store();
        store.hydrate(vec![
            make_point("BTC", 3.0, 30),
            make_point("BTC", 1.0, 10),
            make_point("ETH", 5.0, 50),
            make_point("BTC", 2.0, 20),
        ]);

        assert_eq!(store.dump().len(), 4);
        assert_eq!(store.latest("BTC").unwrap().timestamp, 30);
        assert_eq!(store.symbol_count(), 2);
    }
}
