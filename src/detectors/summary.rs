//! Flattening of per-symbol reports into one ordered event list.

use std::cmp::Ordering;

use chrono::NaiveDate;

use super::breakdown::{DetectionReport, ReclaimEvent};

/// Ordering used for every published event list: reclaim date, then symbol
pub fn event_order(a: &ReclaimEvent, b: &ReclaimEvent) -> Ordering {
    a.reclaim_date
        .cmp(&b.reclaim_date)
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.breakdown_date.cmp(&b.breakdown_date))
}

/// All reclaim events across `reports`, sorted by (reclaim_date, symbol)
pub fn summarize<'a, I>(reports: I) -> Vec<ReclaimEvent>
where
    I: IntoIterator<Item = &'a DetectionReport>,
{
    let mut events: Vec<ReclaimEvent> = reports
        .into_iter()
        .flat_map(|r| r.reclaims.iter().cloned())
        .collect();
    events.sort_by(event_order);
    events
}

/// Events that fired on `date`
pub fn filter_events_by_date(events: &[ReclaimEvent], date: NaiveDate) -> Vec<ReclaimEvent> {
    events.iter().filter(|e| e.reclaim_date == date).cloned().collect()
}

/// Most recent reclaim date in `events`
pub fn latest_reclaim_date(events: &[ReclaimEvent]) -> Option<NaiveDate> {
    events.iter().map(|e| e.reclaim_date).max()
}
