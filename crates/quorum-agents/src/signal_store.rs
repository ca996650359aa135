use std::collections::BTreeMap;

use quorum_core::{Round, SignalKey, SignalRecord};

use crate::error::AgentError;

/// The day's signal records, keyed by (analyst, ticker) and round.
///
/// A round-2 record never replaces its round-1 record; both stay queryable.
#[derive(Debug, Clone, Default)]
pub struct SignalStore {
    records: BTreeMap<SignalKey, BTreeMap<Round, SignalRecord>>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Rejects duplicates and round-2 records without round 1.
    pub fn insert(&mut self, record: SignalRecord) -> Result<(), AgentError> {
        let key = record.key();
        let rounds = self.records.entry(key.clone()).or_default();

        if rounds.contains_key(&record.round) {
            return Err(AgentError::Invariant(format!(
                "duplicate round {} record for {key}",
                record.round
            )));
        }
        if record.round == Round::Two && !rounds.contains_key(&Round::One) {
            if rounds.is_empty() {
                self.records.remove(&key);
            }
            return Err(AgentError::Invariant(format!(
                "round 2 record for {key} without round 1"
            )));
        }

        rounds.insert(record.round, record);
        Ok(())
    }

    pub fn get(&self, key: &SignalKey, round: Round) -> Option<&SignalRecord> {
        self.records.get(key).and_then(|rounds| rounds.get(&round))
    }

    /// Round 2 if present, else round 1.
    pub fn latest(&self, key: &SignalKey) -> Option<&SignalRecord> {
        self.records
            .get(key)
            .and_then(|rounds| rounds.values().next_back())
    }

    /// Every record for a key, in round order.
    pub fn history(&self, key: &SignalKey) -> Vec<&SignalRecord> {
        self.records
            .get(key)
            .map(|rounds| rounds.values().collect())
            .unwrap_or_default()
    }

    /// All records of one round, in key order.
    pub fn round(&self, round: Round) -> Vec<&SignalRecord> {
        self.records
            .values()
            .filter_map(|rounds| rounds.get(&round))
            .collect()
    }

    /// Latest record per key: what finalization consumes.
    pub fn final_signals(&self) -> BTreeMap<SignalKey, SignalRecord> {
        self.records
            .iter()
            .filter_map(|(key, rounds)| {
                rounds.values().next_back().map(|r| (key.clone(), r.clone()))
            })
            .collect()
    }

    /// Latest records grouped by ticker, in analyst order.
    pub fn final_by_ticker(&self) -> BTreeMap<String, Vec<SignalRecord>> {
        let mut grouped: BTreeMap<String, Vec<SignalRecord>> = BTreeMap::new();
        for (key, record) in self.final_signals() {
            grouped.entry(key.ticker).or_default().push(record);
        }
        grouped
    }

    /// Every record, both rounds, grouped by ticker.
    pub fn by_ticker(&self) -> BTreeMap<String, Vec<SignalRecord>> {
        let mut grouped: BTreeMap<String, Vec<SignalRecord>> = BTreeMap::new();
        for (key, rounds) in &self.records {
            grouped
                .entry(key.ticker.clone())
                .or_default()
                .extend(rounds.values().cloned());
        }
        grouped
    }

    /// Round-1 records of one analyst, keyed by ticker.
    pub fn round_one_for(&self, analyst_id: &str) -> BTreeMap<String, SignalRecord> {
        self.records
            .iter()
            .filter(|(key, _)| key.analyst_id == analyst_id)
            .filter_map(|(key, rounds)| {
                rounds.get(&Round::One).map(|r| (key.ticker.clone(), r.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quorum_core::{Signal, SignalOutput};
    use rust_decimal_macros::dec;

    fn record(
        analyst: &str,
        ticker: &str,
        signal: Signal,
        confidence: rust_decimal::Decimal,
        round: Round,
    ) -> SignalRecord {
        SignalRecord::from_output(
            analyst,
            ticker,
            &SignalOutput {
                signal,
                confidence,
                reasoning: format!("{analyst} on {ticker}"),
                signal_adjustment: Some(round == Round::Two),
            },
            round,
            Utc::now(),
        )
    }

    #[test]
    fn round_two_requires_round_one() {
        let mut store = SignalStore::new();
        let err = store
            .insert(record("a", "AAPL", Signal::Bullish, dec!(60), Round::Two))
            .unwrap_err();
        assert!(matches!(err, AgentError::Invariant(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut store = SignalStore::new();
        store.insert(record("a", "AAPL", Signal::Bullish, dec!(60), Round::One)).unwrap();
        assert!(store
            .insert(record("a", "AAPL", Signal::Bearish, dec!(70), Round::One))
            .is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn latest_prefers_round_two_and_keeps_history() {
        let mut store = SignalStore::new();
        store.insert(record("a", "AAPL", Signal::Bullish, dec!(70), Round::One)).unwrap();
        store.insert(record("a", "AAPL", Signal::Neutral, dec!(55), Round::Two)).unwrap();
        store.insert(record("b", "AAPL", Signal::Neutral, dec!(50), Round::One)).unwrap();

        let key = SignalKey::new("a", "AAPL");
        assert_eq!(store.latest(&key).unwrap().confidence, dec!(55));
        assert_eq!(store.history(&key).len(), 2);
        assert_eq!(store.history(&key)[0].round, Round::One);

        let finals = store.final_by_ticker();
        assert_eq!(finals["AAPL"].len(), 2);
        assert_eq!(store.by_ticker()["AAPL"].len(), 3);
        assert_eq!(store.round(Round::Two).len(), 1);
    }

    #[test]
    fn round_one_for_analyst() {
        let mut store = SignalStore::new();
        store.insert(record("a", "AAPL", Signal::Bullish, dec!(70), Round::One)).unwrap();
        store.insert(record("a", "MSFT", Signal::Bearish, dec!(60), Round::One)).unwrap();
        store.insert(record("b", "MSFT", Signal::Bearish, dec!(60), Round::One)).unwrap();
        let mine = store.round_one_for("a");
        assert_eq!(mine.keys().collect::<Vec<_>>(), vec!["AAPL", "MSFT"]);
    }
}
