//! Passive clock over the known high-impact macro calendar (FOMC, CPI, NFP,
//! GDP). Used to bypass the screener and trigger research near releases.

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub name: String,
    pub scheduled_at: DateTime<Utc>,
    pub impact: String,
    pub currency: String,
}

pub struct NewsScheduler {
    events: Vec<ScheduledEvent>,
}

impl Default for NewsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl NewsScheduler {
    pub fn new() -> Self {
        let mut scheduler = Self { events: Vec::new() };
        scheduler.load_2026_schedule();
        info!(count = scheduler.events.len(), "News events loaded");
        scheduler
    }

    /// Construct with an explicit event list (tests).
    pub fn with_events(events: Vec<ScheduledEvent>) -> Self {
        Self { events }
    }

    /// True iff some event starts within the next `minutes_before` minutes.
    pub fn is_news_window(&self, minutes_before: i64) -> bool {
        let now = Utc::now();
        self.events.iter().any(|event| {
            let until = (event.scheduled_at - now).num_seconds();
            (0..=minutes_before * 60).contains(&until)
        })
    }

    /// Events strictly after now and within the next `hours` hours, sorted.
    pub fn get_upcoming_events(&self, hours: i64) -> Vec<ScheduledEvent> {
        let now = Utc::now();
        let cutoff = now + chrono::Duration::hours(hours);
        let mut upcoming: Vec<ScheduledEvent> = self
            .events
            .iter()
            .filter(|e| e.scheduled_at > now && e.scheduled_at <= cutoff)
            .cloned()
            .collect();
        upcoming.sort_by_key(|e| e.scheduled_at);
        upcoming
    }

    fn push_high_impact(&mut self, name: &str, month: u32, day: u32, hour: u32, minute: u32) {
        if let Some(at) = Utc.with_ymd_and_hms(2026, month, day, hour, minute, 0).single() {
            self.events.push(ScheduledEvent {
                name: name.to_string(),
                scheduled_at: at,
                impact: "high".to_string(),
                currency: "USD".to_string(),
            });
        }
    }

    fn load_2026_schedule(&mut self) {
        // FOMC announcement days, 14:00 ET = 18:00 UTC
        for (month, day) in [(1, 28), (3, 18), (5, 6), (6, 17), (7, 29), (9, 16), (11, 4), (12, 16)]
        {
            self.push_high_impact("FOMC Rate Decision", month, day, 18, 0);
        }
        // CPI releases, 08:30 ET = 12:30 UTC
        for (month, day) in [
            (1, 13), (2, 11), (3, 11), (4, 14), (5, 12), (6, 10),
            (7, 14), (8, 12), (9, 15), (10, 13), (11, 10), (12, 10),
        ] {
            self.push_high_impact("CPI Release", month, day, 12, 30);
        }
        // NFP, first Friday, 08:30 ET = 12:30 UTC
        for (month, day) in [
            (1, 9), (2, 6), (3, 6), (4, 3), (5, 8), (6, 5),
            (7, 2), (8, 7), (9, 4), (10, 2), (11, 6), (12, 4),
        ] {
            self.push_high_impact("NFP Employment Report", month, day, 12, 30);
        }
        // Quarterly GDP, 08:30 ET = 12:30 UTC
        for (month, day) in [(1, 29), (4, 29), (7, 29), (10, 29)] {
            self.push_high_impact("GDP Report", month, day, 12, 30);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event_in(minutes: i64) -> ScheduledEvent {
        ScheduledEvent {
            name: "Test Event".to_string(),
            scheduled_at: Utc::now() + Duration::minutes(minutes),
            impact: "high".to_string(),
            currency: "USD".to_string(),
        }
    }

    #[test]
    fn test_static_schedule_loads() {
        let scheduler = NewsScheduler::new();
        // 8 FOMC + 12 CPI + 12 NFP + 4 GDP
        assert_eq!(scheduler.events.len(), 36);
        assert!(scheduler.events.iter().all(|e| e.impact == "high"));
    }

    #[test]
    fn test_window_detects_imminent_event() {
        let scheduler = NewsScheduler::with_events(vec![event_in(20)]);
        assert!(scheduler.is_news_window(30));
        assert!(!scheduler.is_news_window(10));
    }

    #[test]
    fn test_window_ignores_past_events() {
        let scheduler = NewsScheduler::with_events(vec![event_in(-5)]);
        assert!(!scheduler.is_news_window(30));
    }

    #[test]
    fn test_upcoming_events_sorted_and_bounded() {
        let scheduler = NewsScheduler::with_events(vec![
            event_in(60 * 30),
            event_in(60),
            event_in(60 * 5),
            event_in(-10),
        ]);
        let upcoming = scheduler.get_upcoming_events(24);
        assert_eq!(upcoming.len(), 2);
        assert!(upcoming[0].scheduled_at < upcoming[1].scheduled_at);
    }
}
