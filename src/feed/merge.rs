//! Fragment de-duplication.
//!
//! Sources overlap: the same fixture usually arrives several times per cycle
//! with different bookmaker coverage. Fragments are grouped on
//! `(sport, normalized home, normalized away, kick-off date)` and folded into
//! one canonical [`MatchRecord`] per group. Fragments are folded in
//! `last_updated` order, so the most recent quote wins for a given
//! bookmaker/outcome pair.
//!
//! Merging is pure and idempotent: merging already-merged records (converted
//! back into fragments) returns them unchanged.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::models::{lenient_f64, MarketOdds, MatchFragment, MatchRecord, MIN_ODDS};

/// Counters for one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub fragments_in: usize,
    pub records_out: usize,
    /// Fragments folded into an already-seen record.
    pub collisions: usize,
    /// Fragments dropped for missing or identical participant names.
    pub dropped_fragments: usize,
    /// Individual quotes dropped as non-numeric or below the minimum price.
    pub dropped_odds: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MergeKey {
    sport: String,
    home: String,
    away: String,
    date: NaiveDate,
}

impl MergeKey {
    fn match_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            slug(&self.sport),
            slug(&self.home),
            slug(&self.away),
            self.date.format("%Y-%m-%d")
        )
    }
}

/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn slug(s: &str) -> String {
    let n = normalize_text(s);
    if n.is_empty() {
        "unknown".to_string()
    } else {
        n.replace(' ', "-")
    }
}

/// Quality estimate for fragments that do not report one.
fn completeness(fragment: &MatchFragment, has_odds: bool) -> f64 {
    // Both participants are known by the time this is called.
    let mut q = 0.4;
    if has_odds {
        q += 0.3;
    }
    if !fragment.stats.is_empty() {
        q += 0.2;
    }
    if !fragment.league.trim().is_empty() {
        q += 0.1;
    }
    q
}

fn sanitize_odds(fragment: &MatchFragment, stats: &mut MergeStats) -> MarketOdds {
    let mut markets = MarketOdds::new();
    for (market, book) in &fragment.markets {
        for (bookmaker, outcomes) in book {
            for (outcome, raw) in outcomes {
                match lenient_f64(raw) {
                    Some(odds) if odds >= MIN_ODDS => {
                        markets
                            .entry(market.trim().to_lowercase())
                            .or_default()
                            .entry(bookmaker.trim().to_string())
                            .or_default()
                            .insert(outcome.trim().to_lowercase(), odds);
                    }
                    _ => {
                        debug!(
                            "Dropping quote {}/{}/{} = {} (not a usable price)",
                            market, bookmaker, outcome, raw
                        );
                        stats.dropped_odds += 1;
                    }
                }
            }
        }
    }
    markets
}

fn union_odds(into: &mut MarketOdds, from: MarketOdds) {
    for (market, book) in from {
        let target = into.entry(market).or_default();
        for (bookmaker, outcomes) in book {
            target.entry(bookmaker).or_default().extend(outcomes);
        }
    }
}

/// Merge fragments from every source into canonical records, sorted by
/// kick-off then match id. Malformed fragments are dropped and counted;
/// this never fails.
pub fn merge_fragments(
    fragments: impl IntoIterator<Item = MatchFragment>,
) -> (Vec<MatchRecord>, MergeStats) {
    let mut stats = MergeStats::default();
    let mut fragments: Vec<MatchFragment> = fragments.into_iter().collect();
    stats.fragments_in = fragments.len();
    // Stable: fragments without a timestamp keep input order, ahead of dated ones.
    fragments.sort_by_key(|f| f.last_updated);

    let mut merged: BTreeMap<MergeKey, MatchRecord> = BTreeMap::new();

    for fragment in fragments {
        let home = fragment.home.as_deref().map(str::trim).unwrap_or_default();
        let away = fragment.away.as_deref().map(str::trim).unwrap_or_default();
        let (home_key, away_key) = (normalize_text(home), normalize_text(away));
        if home_key.is_empty() || away_key.is_empty() {
            warn!(
                "Dropping fragment from {:?}: missing participant name (home={:?}, away={:?})",
                fragment.sources, fragment.home, fragment.away
            );
            stats.dropped_fragments += 1;
            continue;
        }
        if home_key == away_key {
            warn!(
                "Dropping fragment from {:?}: participants are identical ({})",
                fragment.sources, home
            );
            stats.dropped_fragments += 1;
            continue;
        }

        let markets = sanitize_odds(&fragment, &mut stats);
        let quality = fragment
            .data_quality
            .filter(|q| q.is_finite())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or_else(|| completeness(&fragment, !markets.is_empty()));

        let key = MergeKey {
            sport: normalize_text(&fragment.sport),
            home: home_key,
            away: away_key,
            date: fragment.start_time.date_naive(),
        };

        match merged.entry(key) {
            Entry::Vacant(slot) => {
                let mut sources: Vec<String> = fragment
                    .sources
                    .iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                sources.sort();
                sources.dedup();
                let match_id = slot.key().match_id();
                slot.insert(MatchRecord {
                    match_id,
                    sport: normalize_text(&fragment.sport),
                    league: fragment.league.trim().to_string(),
                    home: home.to_string(),
                    away: away.to_string(),
                    start_time: fragment.start_time,
                    last_updated: fragment.last_updated,
                    markets,
                    stats: fragment.stats,
                    sources,
                    data_quality: quality,
                });
            }
            Entry::Occupied(mut slot) => {
                stats.collisions += 1;
                let record = slot.get_mut();
                union_odds(&mut record.markets, markets);
                record.stats.extend(fragment.stats);
                record.sources.extend(
                    fragment
                        .sources
                        .iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                );
                record.sources.sort();
                record.sources.dedup();
                record.data_quality = record.data_quality.max(quality);
                record.last_updated = record.last_updated.max(fragment.last_updated);
                if record.league.is_empty() {
                    record.league = fragment.league.trim().to_string();
                }
            }
        }
    }

    let mut records: Vec<MatchRecord> = merged.into_values().collect();
    records.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.match_id.cmp(&b.match_id))
    });
    stats.records_out = records.len();
    (records, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn fragment(source: &str, home: &str, away: &str, odds: serde_json::Value) -> MatchFragment {
        serde_json::from_value(json!({
            "source": source,
            "sport": "Soccer",
            "league": "Championship",
            "home": home,
            "away": away,
            "start_time": "2026-10-17T18:00:00Z",
            "markets": { "h2h": odds },
        }))
        .expect("valid fragment")
    }

    #[test]
    fn overlapping_fragments_merge_into_one_record() {
        let mut a = fragment(
            "oddsportal",
            "Team A",
            "Team B",
            json!({ "bet365": { "home": 2.10, "draw": 3.30, "away": 3.90 } }),
        );
        a.last_updated = Some(Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap());
        a.data_quality = Some(0.6);
        let mut b = fragment(
            "flashscore",
            "team a",
            "TEAM B",
            json!({
                "bet365": { "home": 2.15 },
                "pinnacle": { "home": 2.05, "draw": 3.45, "away": 4.00 }
            }),
        );
        b.last_updated = Some(Utc.with_ymd_and_hms(2026, 10, 17, 11, 0, 0).unwrap());
        b.data_quality = Some(0.9);

        // Input order must not matter: the later update wins.
        let (records, stats) = merge_fragments(vec![b, a]);
        assert_eq!(records.len(), 1);
        assert_eq!(stats.collisions, 1);

        let r = &records[0];
        assert_eq!(r.match_id, "soccer:team-a:team-b:2026-10-17");
        assert_eq!(r.sources, vec!["flashscore", "oddsportal"]);
        assert_eq!(r.data_quality, 0.9);
        let book = &r.markets["h2h"];
        assert_eq!(book.len(), 2);
        assert_eq!(book["bet365"].len(), 3);
        assert_eq!(book["bet365"]["home"], 2.15);
        assert_eq!(book["bet365"]["draw"], 3.30);
        assert_eq!(book["pinnacle"]["away"], 4.00);
        assert_eq!(
            r.last_updated,
            Some(Utc.with_ymd_and_hms(2026, 10, 17, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn merging_merged_output_is_a_no_op() {
        let fragments = vec![
            fragment("s1", "Leeds", "Burnley", json!({ "b1": { "home": 2.4, "away": 2.9 } })),
            fragment("s2", "Leeds", "Burnley", json!({ "b2": { "home": 2.5, "draw": 3.1 } })),
            fragment("s1", "Hull", "Stoke", json!({ "b1": { "home": 1.9 } })),
        ];
        let (once, _) = merge_fragments(fragments);
        let (twice, stats) =
            merge_fragments(once.clone().into_iter().map(MatchFragment::from));
        assert_eq!(once, twice);
        assert_eq!(stats.collisions, 0);
    }

    #[test]
    fn fragments_without_participants_are_dropped_and_counted() {
        let mut missing = fragment("s1", "", "", json!({}));
        missing.home = None;
        let one_sided = fragment("s1", "Leeds", "  ", json!({}));
        let same = fragment("s1", "Leeds", "LEEDS", json!({}));
        let ok = fragment("s1", "Leeds", "Hull", json!({}));
        let (records, stats) = merge_fragments(vec![missing, one_sided, same, ok]);
        assert_eq!(records.len(), 1);
        assert_eq!(stats.dropped_fragments, 3);
        assert_eq!(stats.fragments_in, 4);
    }

    #[test]
    fn unusable_quotes_are_dropped_individually() {
        let f = fragment(
            "s1",
            "Leeds",
            "Hull",
            json!({ "b1": { "home": "2.50", "draw": "n/a", "away": 1.0 } }),
        );
        let (records, stats) = merge_fragments(vec![f]);
        assert_eq!(stats.dropped_odds, 2);
        let book = &records[0].markets["h2h"]["b1"];
        assert_eq!(book.len(), 1);
        assert_eq!(book["home"], 2.5);
    }

    #[test]
    fn different_dates_stay_separate() {
        let a = fragment("s1", "Leeds", "Hull", json!({}));
        let mut b = fragment("s1", "Leeds", "Hull", json!({}));
        b.start_time = Utc.with_ymd_and_hms(2026, 10, 24, 18, 0, 0).unwrap();
        let (records, _) = merge_fragments(vec![a, b]);
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].match_id, records[1].match_id);
    }

    #[test]
    fn quality_defaults_to_completeness() {
        let f = fragment("s1", "Leeds", "Hull", json!({ "b1": { "home": 2.0 } }));
        let (records, _) = merge_fragments(vec![f]);
        approx::assert_relative_eq!(records[0].data_quality, 0.8, epsilon = 1e-9);
    }
}
