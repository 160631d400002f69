//! Supervisor assignment.
//!
//! `AssignmentResolver` picks the supervisor for a new request from a routing
//! table supplied as configuration data. It is a pure function of its inputs:
//! the same priority, question and time always give the same supervisor.
//!
//! Evaluation order:
//! 1. Urgent requests go to the owner, unconditionally.
//! 2. The first rule whose condition matches names a candidate.
//! 3. A candidate other than the owner must be inside its availability
//!    window at `now`, otherwise the owner takes the request.
//! 4. No rule matched: the owner.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::extract_tags;
use crate::request::{Priority, SupervisorId};

/// Errors detected while validating routing configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingConfigError {
    #[error("routing config is not valid JSON: {0}")]
    Parse(String),
    #[error("owner '{0}' is not a configured supervisor")]
    UnknownOwner(SupervisorId),
    #[error("rule {index} routes to unknown supervisor '{supervisor}'")]
    UnknownRuleTarget {
        index: usize,
        supervisor: SupervisorId,
    },
    #[error("duplicate supervisor id '{0}'")]
    DuplicateSupervisor(SupervisorId),
    #[error("utc offset of {0} minutes is out of range")]
    InvalidOffset(i32),
    #[error("availability window of '{0}' starts and ends at the same time")]
    EmptyAvailability(SupervisorId),
}

/// Weekly window during which a supervisor can take requests.
///
/// A window whose `end` is earlier than its `start` runs past midnight; it
/// belongs to the day it starts on, so `days: [Fri]` with 22:00-06:00 covers
/// Friday night and early Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Local start of day, inclusive.
    pub start: NaiveTime,
    /// Local end of day, exclusive.
    pub end: NaiveTime,
    #[serde(default = "every_day")]
    pub days: Vec<Weekday>,
}

fn every_day() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
}

impl Availability {
    pub fn new(start: NaiveTime, end: NaiveTime, days: Vec<Weekday>) -> Self {
        Self { start, end, days }
    }

    /// Whether the given local time falls inside the window.
    pub fn contains(&self, weekday: Weekday, time: NaiveTime) -> bool {
        if !self.wraps_midnight() {
            self.days.contains(&weekday) && self.start <= time && time < self.end
        } else {
            (time >= self.start && self.days.contains(&weekday))
                || (time < self.end && self.days.contains(&weekday.pred()))
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }
}

/// A human who can be assigned help requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supervisor {
    pub id: SupervisorId,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub availability: Availability,
}

/// Condition under which a routing rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCondition {
    /// Request has exactly this priority.
    Priority(Priority),
    /// Question contains any of these words (case-insensitive).
    Keywords(Vec<String>),
    /// Classifier assigns this tag to the question.
    Tag(String),
}

/// One row of the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub when: RouteCondition,
    pub supervisor: SupervisorId,
}

/// Routing table and supervisor roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Default assignee and fallback for unavailable specialists.
    pub owner: SupervisorId,
    /// Offset of the business's local time from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    pub supervisors: Vec<Supervisor>,
    pub rules: Vec<RouteRule>,
}

impl RoutingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RoutingConfigError> {
        serde_json::from_str(json).map_err(|e| RoutingConfigError::Parse(e.to_string()))
    }

    /// The salon roster: the owner takes general and urgent questions, the
    /// color specialist takes color work, the senior stylist takes hair.
    pub fn salon_default() -> Self {
        let weekdays = vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
        ];
        let hm = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or_default();
        let keywords = |words: &[&str]| {
            RouteCondition::Keywords(words.iter().map(|w| w.to_string()).collect())
        };

        Self {
            owner: SupervisorId::from("maria_rodriguez"),
            utc_offset_minutes: 0,
            supervisors: vec![
                Supervisor {
                    id: SupervisorId::from("maria_rodriguez"),
                    name: "Maria Rodriguez".to_string(),
                    role: "Owner".to_string(),
                    phone: Some("+1-555-123-4567".to_string()),
                    email: Some("maria@glamourgrace.com".to_string()),
                    availability: Availability::new(hm(9), hm(19), weekdays.clone()),
                },
                Supervisor {
                    id: SupervisorId::from("jennifer_smith"),
                    name: "Jennifer Smith".to_string(),
                    role: "Senior Stylist".to_string(),
                    phone: Some("+1-555-123-4568".to_string()),
                    email: Some("jennifer@glamourgrace.com".to_string()),
                    availability: Availability::new(hm(9), hm(19), weekdays.clone()),
                },
                Supervisor {
                    id: SupervisorId::from("david_chen"),
                    name: "David Chen".to_string(),
                    role: "Color Specialist".to_string(),
                    phone: Some("+1-555-123-4569".to_string()),
                    email: Some("david@glamourgrace.com".to_string()),
                    availability: Availability::new(hm(10), hm(18), weekdays),
                },
            ],
            rules: vec![
                RouteRule {
                    when: keywords(&["color", "highlight", "dye", "bleach"]),
                    supervisor: SupervisorId::from("david_chen"),
                },
                RouteRule {
                    when: keywords(&["hair", "cut", "style", "curl"]),
                    supervisor: SupervisorId::from("jennifer_smith"),
                },
            ],
        }
    }
}

/// Resolves the supervisor for a request. Immutable after construction.
#[derive(Debug, Clone)]
pub struct AssignmentResolver {
    owner: SupervisorId,
    offset: FixedOffset,
    supervisors: HashMap<SupervisorId, Supervisor>,
    rules: Vec<RouteRule>,
}

impl AssignmentResolver {
    pub fn new(config: RoutingConfig) -> Result<Self, RoutingConfigError> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes.saturating_mul(60))
            .ok_or(RoutingConfigError::InvalidOffset(config.utc_offset_minutes))?;

        let mut supervisors = HashMap::with_capacity(config.supervisors.len());
        for supervisor in config.supervisors {
            let id = supervisor.id.clone();
            if supervisor.availability.start == supervisor.availability.end {
                return Err(RoutingConfigError::EmptyAvailability(id));
            }
            if supervisors.insert(id.clone(), supervisor).is_some() {
                return Err(RoutingConfigError::DuplicateSupervisor(id));
            }
        }

        if !supervisors.contains_key(&config.owner) {
            return Err(RoutingConfigError::UnknownOwner(config.owner));
        }

        for (index, rule) in config.rules.iter().enumerate() {
            if !supervisors.contains_key(&rule.supervisor) {
                return Err(RoutingConfigError::UnknownRuleTarget {
                    index,
                    supervisor: rule.supervisor.clone(),
                });
            }
        }

        Ok(Self {
            owner: config.owner,
            offset,
            supervisors,
            rules: config.rules,
        })
    }

    pub fn owner(&self) -> &SupervisorId {
        &self.owner
    }

    pub fn supervisor(&self, id: &SupervisorId) -> Option<&Supervisor> {
        self.supervisors.get(id)
    }

    /// All supervisors, sorted by id.
    pub fn supervisors(&self) -> Vec<&Supervisor> {
        let mut all: Vec<_> = self.supervisors.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Pick the supervisor for a request.
    pub fn resolve(&self, priority: Priority, question: &str, now: DateTime<Utc>) -> SupervisorId {
        if priority == Priority::Urgent {
            return self.owner.clone();
        }

        let lowered = question.to_lowercase();
        let mut tags: Option<BTreeSet<String>> = None;

        for rule in &self.rules {
            let matched = match &rule.when {
                RouteCondition::Priority(p) => *p == priority,
                RouteCondition::Keywords(words) => {
                    words.iter().any(|w| lowered.contains(&w.to_lowercase()))
                }
                RouteCondition::Tag(tag) => tags
                    .get_or_insert_with(|| extract_tags(&lowered))
                    .contains(tag),
            };
            if !matched {
                continue;
            }

            if rule.supervisor == self.owner || self.is_available(&rule.supervisor, now) {
                return rule.supervisor.clone();
            }
            return self.owner.clone();
        }

        self.owner.clone()
    }

    /// Whether the supervisor is inside their availability window at `now`.
    pub fn is_available(&self, id: &SupervisorId, now: DateTime<Utc>) -> bool {
        let Some(supervisor) = self.supervisors.get(id) else {
            return false;
        };
        let local = now.with_timezone(&self.offset);
        supervisor
            .availability
            .contains(local.weekday(), local.time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn resolver() -> AssignmentResolver {
        AssignmentResolver::new(RoutingConfig::salon_default()).unwrap()
    }

    /// Wednesday 2024-05-01, 12:00 UTC: everyone is working.
    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    /// Wednesday 2024-05-01, 09:30 UTC: the color specialist starts at 10.
    fn early_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    /// Sunday 2024-05-05, 12:00 UTC: nobody is scheduled.
    fn sunday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_color_question_goes_to_color_specialist() {
        let id = resolver().resolve(Priority::Low, "Can you fix my hair dye?", midday());
        assert_eq!(id, SupervisorId::from("david_chen"));
    }

    #[test]
    fn test_hair_question_goes_to_stylist() {
        let id = resolver().resolve(Priority::Medium, "Do you do curly HAIR?", midday());
        assert_eq!(id, SupervisorId::from("jennifer_smith"));
    }

    #[test]
    fn test_general_question_goes_to_owner() {
        let id = resolver().resolve(Priority::High, "Do you sell gift cards?", midday());
        assert_eq!(id, SupervisorId::from("maria_rodriguez"));
    }

    #[test]
    fn test_urgent_ignores_keywords() {
        let id = resolver().resolve(Priority::Urgent, "color emergency", midday());
        assert_eq!(id, SupervisorId::from("maria_rodriguez"));
    }

    #[test]
    fn test_unavailable_specialist_falls_back_to_owner() {
        let r = resolver();
        let id = r.resolve(Priority::Low, "highlights please", early_morning());
        assert_eq!(id, SupervisorId::from("maria_rodriguez"));

        // The stylist is already in at 09:30.
        let id = r.resolve(Priority::Low, "a quick cut", early_morning());
        assert_eq!(id, SupervisorId::from("jennifer_smith"));
    }

    #[test]
    fn test_closed_day_falls_back_to_owner() {
        let id = resolver().resolve(Priority::Low, "a quick cut", sunday());
        assert_eq!(id, SupervisorId::from("maria_rodriguez"));
    }

    #[test]
    fn test_utc_offset_shifts_availability() {
        let mut config = RoutingConfig::salon_default();
        // UTC-05:00: 12:00 UTC is 07:00 local, before anyone starts.
        config.utc_offset_minutes = -300;
        let r = AssignmentResolver::new(config).unwrap();
        let id = r.resolve(Priority::Low, "a quick cut", midday());
        assert_eq!(id, SupervisorId::from("maria_rodriguez"));
    }

    #[test]
    fn test_tag_and_priority_conditions() {
        let mut config = RoutingConfig::salon_default();
        config.rules = vec![
            RouteRule {
                when: RouteCondition::Priority(Priority::High),
                supervisor: SupervisorId::from("jennifer_smith"),
            },
            RouteRule {
                when: RouteCondition::Tag("pricing".to_string()),
                supervisor: SupervisorId::from("david_chen"),
            },
        ];
        let r = AssignmentResolver::new(config).unwrap();
        assert_eq!(
            r.resolve(Priority::High, "anything", midday()),
            SupervisorId::from("jennifer_smith")
        );
        assert_eq!(
            r.resolve(Priority::Low, "How much is it?", midday()),
            SupervisorId::from("david_chen")
        );
    }

    #[test]
    fn test_rejects_unknown_owner() {
        let mut config = RoutingConfig::salon_default();
        config.owner = SupervisorId::from("nobody");
        assert_eq!(
            AssignmentResolver::new(config).unwrap_err(),
            RoutingConfigError::UnknownOwner(SupervisorId::from("nobody"))
        );
    }

    #[test]
    fn test_rejects_unknown_rule_target() {
        let mut config = RoutingConfig::salon_default();
        config.rules[1].supervisor = SupervisorId::from("ghost");
        assert!(matches!(
            AssignmentResolver::new(config),
            Err(RoutingConfigError::UnknownRuleTarget { index: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_supervisor() {
        let mut config = RoutingConfig::salon_default();
        let dup = config.supervisors[0].clone();
        config.supervisors.push(dup);
        assert!(matches!(
            AssignmentResolver::new(config),
            Err(RoutingConfigError::DuplicateSupervisor(_))
        ));
    }

    #[test]
    fn test_rejects_empty_window() {
        let mut config = RoutingConfig::salon_default();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        config.supervisors[1].availability.start = nine;
        config.supervisors[1].availability.end = nine;
        let id = config.supervisors[1].id.clone();
        assert_eq!(
            AssignmentResolver::new(config).unwrap_err(),
            RoutingConfigError::EmptyAvailability(id)
        );
    }

    #[test]
    fn test_overnight_window_wraps_midnight() {
        let at = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let night = Availability::new(at(22), at(6), vec![Weekday::Fri]);
        assert!(night.wraps_midnight());

        assert!(night.contains(Weekday::Fri, at(23)));
        assert!(night.contains(Weekday::Sat, at(2)));
        assert!(!night.contains(Weekday::Fri, at(2)));
        assert!(!night.contains(Weekday::Sat, at(23)));
        assert!(!night.contains(Weekday::Fri, at(12)));
        assert!(!night.contains(Weekday::Sat, at(6)));
    }

    #[test]
    fn test_overnight_specialist_is_routed_after_midnight() {
        let mut config = RoutingConfig::salon_default();
        let david = config
            .supervisors
            .iter_mut()
            .find(|s| s.id == SupervisorId::from("david_chen"))
            .unwrap();
        david.availability = Availability::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            vec![Weekday::Wed],
        );
        let r = AssignmentResolver::new(config).unwrap();

        // Thursday 01:30 UTC is still Wednesday's shift.
        let late = Utc.with_ymd_and_hms(2024, 5, 2, 1, 30, 0).unwrap();
        assert_eq!(
            r.resolve(Priority::Low, "highlights please", late),
            SupervisorId::from("david_chen")
        );
        assert_eq!(
            r.resolve(Priority::Low, "highlights please", midday()),
            SupervisorId::from("maria_rodriguez")
        );
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = RoutingConfig::salon_default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RoutingConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_config_from_handwritten_json() {
        let json = r#"{
            "owner": "boss",
            "utc_offset_minutes": 60,
            "supervisors": [
                {"id": "boss", "name": "Boss", "role": "Owner",
                 "availability": {"start": "08:00:00", "end": "20:00:00"}},
                {"id": "nails", "name": "Lisa", "role": "Nail Technician",
                 "availability": {"start": "09:00:00", "end": "17:00:00", "days": ["Mon", "Tue"]}}
            ],
            "rules": [
                {"when": {"tag": "nails"}, "supervisor": "nails"}
            ]
        }"#;
        let config = RoutingConfig::from_json_str(json).unwrap();
        let r = AssignmentResolver::new(config).unwrap();
        // Wednesday: Lisa is off.
        assert_eq!(
            r.resolve(Priority::Low, "manicure?", midday()),
            SupervisorId::from("boss")
        );
    }

    proptest! {
        /// Urgent requests always go to the owner, whatever the text or time.
        #[test]
        fn urgent_always_routes_to_owner(question in ".{0,80}", secs in 0i64..4_000_000_000i64) {
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            let r = resolver();
            prop_assert_eq!(r.resolve(Priority::Urgent, &question, now), r.owner().clone());
        }

        /// Resolution is deterministic.
        #[test]
        fn resolve_is_deterministic(question in "[a-z ]{0,40}", secs in 0i64..4_000_000_000i64) {
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            let r = resolver();
            for priority in Priority::ALL {
                prop_assert_eq!(
                    r.resolve(priority, &question, now),
                    r.resolve(priority, &question, now)
                );
            }
        }
    }
}
