//! Session list grouping and relative ages for the sidebar.
//!
//! Buckets are based on whole days elapsed since creation, not calendar
//! days: a session from 23 hours ago is still "Today".

use chrono::{DateTime, Utc};

use parley_core::Session;

/// Sidebar section a session falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateGroup {
    /// Less than a day old.
    Today,
    /// One day old.
    Yesterday,
    /// Two to six days old.
    Previous7Days,
    /// One to four weeks old.
    Previous30Days,
    /// Thirty days or more.
    Older,
}

impl DateGroup {
    /// Section heading.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::Previous7Days => "Previous 7 Days",
            Self::Previous30Days => "Previous 30 Days",
            Self::Older => "Older",
        }
    }

    /// Group for a timestamp relative to `now`.
    #[must_use]
    pub fn of(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        match elapsed_days(created_at, now) {
            0 => Self::Today,
            1 => Self::Yesterday,
            2..=6 => Self::Previous7Days,
            7..=29 => Self::Previous30Days,
            _ => Self::Older,
        }
    }
}

// Timestamps in the future count as "now".
fn elapsed_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days().max(0)
}

/// Short human description of how long ago `created_at` was.
#[must_use]
pub fn relative_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - created_at).max(chrono::TimeDelta::zero());
    let days = elapsed.num_days();

    match days {
        0 => match (elapsed.num_hours(), elapsed.num_minutes()) {
            (0, 0) => "Just now".to_string(),
            (0, minutes) => format!("{minutes}m ago"),
            (hours, _) => format!("{hours}h ago"),
        },
        1 => "Yesterday".to_string(),
        2..=6 => format!("{days} days ago"),
        7..=29 => plural(days / 7, "week"),
        _ => plural(days / 30, "month"),
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

/// Sort sessions newest first, the order the sidebar shows them in.
pub fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Split newest-first sessions into non-empty groups of indices.
///
/// Indices refer to `sessions`, so callers can keep a flat selection.
#[must_use]
pub fn group_sessions(sessions: &[Session], now: DateTime<Utc>) -> Vec<(DateGroup, Vec<usize>)> {
    let mut groups: Vec<(DateGroup, Vec<usize>)> = Vec::new();

    for (index, session) in sessions.iter().enumerate() {
        let group = DateGroup::of(session.created_at, now);
        match groups.iter_mut().find(|(g, _)| *g == group) {
            Some((_, indices)) => indices.push(index),
            None => groups.push((group, vec![index])),
        }
    }

    groups.sort_by_key(|(group, _)| *group);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use parley_core::SessionId;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()
    }

    fn ago(delta: TimeDelta) -> DateTime<Utc> {
        now() - delta
    }

    fn session(created_at: DateTime<Utc>) -> Session {
        Session {
            id: SessionId::generate(),
            title: None,
            created_at,
        }
    }

    #[test]
    fn relative_ages() {
        let cases = [
            (TimeDelta::seconds(20), "Just now"),
            (TimeDelta::minutes(5), "5m ago"),
            (TimeDelta::minutes(59), "59m ago"),
            (TimeDelta::hours(3), "3h ago"),
            (TimeDelta::hours(23), "23h ago"),
            (TimeDelta::hours(30), "Yesterday"),
            (TimeDelta::days(3), "3 days ago"),
            (TimeDelta::days(7), "1 week ago"),
            (TimeDelta::days(15), "2 weeks ago"),
            (TimeDelta::days(30), "1 month ago"),
            (TimeDelta::days(125), "4 months ago"),
        ];

        for (delta, expected) in cases {
            assert_eq!(relative_age(ago(delta), now()), expected, "{delta:?}");
        }
    }

    #[test]
    fn future_timestamp_is_just_now() {
        let future = now() + TimeDelta::minutes(2);
        assert_eq!(relative_age(future, now()), "Just now");
        assert_eq!(DateGroup::of(future, now()), DateGroup::Today);
    }

    #[test]
    fn group_boundaries() {
        assert_eq!(DateGroup::of(ago(TimeDelta::hours(23)), now()), DateGroup::Today);
        assert_eq!(DateGroup::of(ago(TimeDelta::hours(24)), now()), DateGroup::Yesterday);
        assert_eq!(DateGroup::of(ago(TimeDelta::days(2)), now()), DateGroup::Previous7Days);
        assert_eq!(DateGroup::of(ago(TimeDelta::days(6)), now()), DateGroup::Previous7Days);
        assert_eq!(DateGroup::of(ago(TimeDelta::days(7)), now()), DateGroup::Previous30Days);
        assert_eq!(DateGroup::of(ago(TimeDelta::days(29)), now()), DateGroup::Previous30Days);
        assert_eq!(DateGroup::of(ago(TimeDelta::days(30)), now()), DateGroup::Older);
    }

    #[test]
    fn groups_skip_empty_sections() {
        let mut sessions = vec![
            session(ago(TimeDelta::days(45))),
            session(ago(TimeDelta::minutes(1))),
            session(ago(TimeDelta::days(3))),
            session(ago(TimeDelta::hours(2))),
        ];
        sort_newest_first(&mut sessions);

        let groups = group_sessions(&sessions, now());
        let labels: Vec<&str> = groups.iter().map(|(g, _)| g.label()).collect();
        assert_eq!(labels, vec!["Today", "Previous 7 Days", "Older"]);
        assert_eq!(groups[0].1, vec![0, 1]);
        assert_eq!(groups[1].1, vec![2]);
        assert_eq!(groups[2].1, vec![3]);
    }
}
