//! Threshold evaluation engine.
//!
//! For every registry entry, in registry order:
//! - Find the most recent matching maintenance event
//! - Sum ride distance on the target bike since that event
//! - Count whole days since that event
//! - Trigger if any configured limit is reached (inclusive)
//!
//! The engine is a pure function of its inputs. All timestamps are compared
//! in UTC, whatever offset they were recorded in.

use crate::{
    Activity, AlertRecord, MaintenanceEvent, ThresholdConfig, ThresholdRegistry,
    NEVER_PERFORMED_DAYS,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Inputs for a single evaluation run
///
/// `activities` are expected to be deduplicated already.
#[derive(Clone, Debug)]
pub struct EvaluationContext<'a> {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    /// Bike under evaluation
    pub equipment_id: &'a str,
    pub activities: &'a [Activity],
    pub events: &'a [MaintenanceEvent],
}

impl<'a> EvaluationContext<'a> {
    /// Create a context with a fresh run id
    pub fn new(
        now: DateTime<Utc>,
        equipment_id: &'a str,
        activities: &'a [Activity],
        events: &'a [MaintenanceEvent],
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            now,
            equipment_id,
            activities,
            events,
        }
    }
}

/// Evaluate every registry entry, producing one alert record per entry
pub fn evaluate(registry: &ThresholdRegistry, ctx: &EvaluationContext) -> Vec<AlertRecord> {
    tracing::info!(
        "Evaluating {} maintenance types for bike {} ({} activities, {} events)",
        registry.len(),
        ctx.equipment_id,
        ctx.activities.len(),
        ctx.events.len()
    );

    registry
        .iter()
        .map(|(maintenance_type, cfg)| evaluate_entry(maintenance_type, cfg, ctx))
        .collect()
}

/// Evaluate a single maintenance type
fn evaluate_entry(maintenance_type: &str, cfg: &ThresholdConfig, ctx: &EvaluationContext) -> AlertRecord {
    let last = last_performed(ctx.events, &cfg.action_label);
    let distance_since = distance_since(ctx.activities, ctx.equipment_id, last);
    let days_since = match last {
        Some(at) => whole_days_between(at, ctx.now),
        None => NEVER_PERFORMED_DAYS,
    };

    let distance_due = cfg
        .distance_limit
        .map_or(false, |limit| distance_since >= limit);

    // A never-performed action is past any time limit
    let time_due = match (cfg.time_limit, last) {
        (Some(limit), Some(_)) => days_since >= i64::from(limit),
        (Some(_), None) => true,
        (None, _) => false,
    };

    let triggered = distance_due || time_due;

    tracing::debug!(
        "{}: last={:?} miles={:.1} days={} distance_due={} time_due={}",
        maintenance_type,
        last,
        distance_since,
        days_since,
        distance_due,
        time_due
    );

    AlertRecord {
        run_id: ctx.run_id,
        maintenance_type: maintenance_type.to_string(),
        action_label: cfg.action_label.clone(),
        evaluated_at: ctx.now,
        distance_limit: cfg.distance_limit,
        time_limit: cfg.time_limit,
        last_performed_at: last,
        distance_since,
        days_since,
        triggered,
    }
}

/// Most recent event with the given label, normalized to UTC
pub fn last_performed(events: &[MaintenanceEvent], action_label: &str) -> Option<DateTime<Utc>> {
    events
        .iter()
        .filter(|e| e.action_label == action_label)
        .map(|e| e.performed_at.with_timezone(&Utc))
        .max()
}

/// Miles ridden on `equipment_id` strictly after `since`
///
/// With no prior action every ride on the bike counts.
pub fn distance_since(
    activities: &[Activity],
    equipment_id: &str,
    since: Option<DateTime<Utc>>,
) -> f64 {
    activities
        .iter()
        .filter(|a| a.kind.counts_toward_maintenance())
        .filter(|a| a.equipment_id == equipment_id)
        .filter(|a| match since {
            Some(at) => a.start_time.with_timezone(&Utc) > at,
            None => true,
        })
        .map(|a| a.distance)
        .sum()
}

/// Whole days from `from` to `to`, never negative
fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActivityKind;
    use chrono::{Duration, FixedOffset, TimeZone};

    const BIKE: &str = "b14816258";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn ride(id: u64, bike: &str, days_ago: i64, miles: f64) -> Activity {
        Activity {
            id,
            kind: ActivityKind::Ride,
            equipment_id: bike.into(),
            start_time: (now() - Duration::days(days_ago)).with_timezone(&utc_offset()),
            distance: miles,
        }
    }

    fn event(label: &str, days_ago: i64) -> MaintenanceEvent {
        MaintenanceEvent {
            action_label: label.into(),
            performed_at: (now() - Duration::days(days_ago)).with_timezone(&utc_offset()),
        }
    }

    fn registry(id: &str, label: &str, miles: Option<f64>, days: Option<u32>) -> ThresholdRegistry {
        ThresholdRegistry::new(vec![(
            id.into(),
            ThresholdConfig {
                action_label: label.into(),
                distance_limit: miles,
                time_limit: days,
            },
        )])
        .unwrap()
    }

    fn run_one(
        registry: &ThresholdRegistry,
        activities: &[Activity],
        events: &[MaintenanceEvent],
        at: DateTime<Utc>,
    ) -> AlertRecord {
        let ctx = EvaluationContext::new(at, BIKE, activities, events);
        evaluate(registry, &ctx).remove(0)
    }

    #[test]
    fn test_never_waxed_with_enough_miles_triggers() {
        crate::logging::init_test();
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![ride(1, BIKE, 30, 100.0), ride(2, BIKE, 20, 150.0)];

        let alert = run_one(&reg, &rides, &[], now());

        assert!(alert.triggered);
        assert_eq!(alert.distance_since, 250.0);
        assert!(!alert.ever_performed());
        assert_eq!(alert.days_since, NEVER_PERFORMED_DAYS);
    }

    #[test]
    fn test_under_distance_limit_does_not_trigger() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![
            ride(1, BIKE, 9, 50.0),
            ride(2, BIKE, 5, 60.0),
            ride(3, BIKE, 1, 40.0),
        ];
        let events = vec![event("Wax chain", 10)];

        let alert = run_one(&reg, &rides, &events, now());

        assert!(!alert.triggered);
        assert_eq!(alert.distance_since, 150.0);
        assert_eq!(alert.days_since, 10);
    }

    #[test]
    fn test_elapsed_days_trigger_without_rides() {
        let reg = registry("tire_check", "Tire check", None, Some(30));
        let events = vec![event("Tire check", 40)];

        let alert = run_one(&reg, &[], &events, now());

        assert!(alert.triggered);
        assert_eq!(alert.days_since, 40);
        assert_eq!(alert.distance_since, 0.0);
    }

    #[test]
    fn test_other_bike_is_ignored() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![ride(1, BIKE, 3, 20.0), ride(2, "b999", 2, 500.0)];
        let events = vec![event("Wax chain", 5)];

        let alert = run_one(&reg, &rides, &events, now());

        assert_eq!(alert.distance_since, 20.0);
        assert!(!alert.triggered);
    }

    #[test]
    fn test_empty_inputs_still_produce_every_record() {
        let reg = default_registry_for_test();
        let ctx = EvaluationContext::new(now(), BIKE, &[], &[]);

        let alerts = evaluate(&reg, &ctx);

        assert_eq!(alerts.len(), reg.len());
        for alert in &alerts {
            assert_eq!(alert.distance_since, 0.0);
            assert_eq!(alert.days_since, NEVER_PERFORMED_DAYS);
            assert_eq!(alert.triggered, alert.time_limit.is_some());
        }
    }

    fn default_registry_for_test() -> ThresholdRegistry {
        crate::default_registry().clone()
    }

    #[test]
    fn test_records_follow_registry_order_and_share_run_id() {
        let reg = default_registry_for_test();
        let ctx = EvaluationContext::new(now(), BIKE, &[], &[]);

        let alerts = evaluate(&reg, &ctx);

        let ids: Vec<_> = alerts.iter().map(|a| a.maintenance_type.as_str()).collect();
        let expected: Vec<_> = reg.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, expected);
        assert!(alerts.iter().all(|a| a.run_id == ctx.run_id));
    }

    #[test]
    fn test_distance_limit_is_inclusive() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![ride(1, BIKE, 2, 120.0), ride(2, BIKE, 1, 80.0)];
        let events = vec![event("Wax chain", 3)];

        let alert = run_one(&reg, &rides, &events, now());

        assert_eq!(alert.distance_since, 200.0);
        assert!(alert.triggered);
    }

    #[test]
    fn test_time_limit_is_inclusive() {
        let reg = registry("tire_check", "Tire check", None, Some(30));

        let alert = run_one(&reg, &[], &[event("Tire check", 30)], now());
        assert!(alert.triggered);

        let alert = run_one(&reg, &[], &[event("Tire check", 29)], now());
        assert!(!alert.triggered);
    }

    #[test]
    fn test_distance_only_entry_ignores_elapsed_time() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![ride(1, BIKE, 1, 50.0)];
        let events = vec![event("Wax chain", 2)];

        let baseline = run_one(&reg, &rides, &events, now()).triggered;
        for extra_days in [0, 1, 30, 365, 10_000] {
            let later = now() + Duration::days(extra_days);
            let alert = run_one(&reg, &rides, &events, later);
            assert_eq!(alert.triggered, baseline, "flipped after {} days", extra_days);
        }
    }

    #[test]
    fn test_both_limits_combine_with_or() {
        let reg = registry("clean_drivetrain", "Clean drivetrain", Some(100.0), Some(30));
        let cases = [
            // (days since event, miles ridden, expected)
            (10, 50.0, false),
            (10, 150.0, true),
            (40, 50.0, true),
            (40, 150.0, true),
        ];

        for (days, miles, expected) in cases {
            let rides = vec![ride(1, BIKE, days - 1, miles)];
            let events = vec![event("Clean drivetrain", days)];
            let alert = run_one(&reg, &rides, &events, now());
            assert_eq!(
                alert.triggered, expected,
                "days={} miles={} expected {}",
                days, miles, expected
            );
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let reg = default_registry_for_test();
        let rides = vec![ride(1, BIKE, 5, 42.0), ride(2, BIKE, 1, 17.5)];
        let events = vec![event("Wax chain", 7), event("Tire check", 3)];
        let ctx = EvaluationContext::new(now(), BIKE, &rides, &events);

        assert_eq!(evaluate(&reg, &ctx), evaluate(&reg, &ctx));
    }

    #[test]
    fn test_adding_a_ride_is_monotonic() {
        let reg = registry("wax_chain", "Wax chain", Some(100.0), None);
        let events = vec![event("Wax chain", 10)];
        let mut rides = vec![ride(1, BIKE, 8, 60.0), ride(2, BIKE, 4, 45.0)];

        let before = run_one(&reg, &rides, &events, now());
        assert!(before.triggered);

        rides.push(ride(3, BIKE, 1, 12.0));
        let after = run_one(&reg, &rides, &events, now());

        assert!(after.distance_since >= before.distance_since);
        assert!(after.triggered);
    }

    #[test]
    fn test_most_recent_event_wins() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![ride(1, BIKE, 15, 300.0), ride(2, BIKE, 2, 25.0)];
        // Out of order on purpose
        let events = vec![event("Wax chain", 5), event("Wax chain", 20)];

        let alert = run_one(&reg, &rides, &events, now());

        assert_eq!(alert.distance_since, 25.0);
        assert_eq!(alert.days_since, 5);
    }

    #[test]
    fn test_other_labels_do_not_reset_the_counter() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let rides = vec![ride(1, BIKE, 15, 210.0)];
        let events = vec![event("Tire check", 1), event("wax chain", 1)];

        let alert = run_one(&reg, &rides, &events, now());

        assert!(!alert.ever_performed());
        assert!(alert.triggered);
    }

    #[test]
    fn test_non_ride_activities_do_not_count() {
        let reg = registry("wax_chain", "Wax chain", Some(10.0), None);
        let mut run = ride(1, BIKE, 1, 26.2);
        run.kind = ActivityKind::Other("Run".into());
        let mut virtual_ride = ride(2, BIKE, 1, 5.0);
        virtual_ride.kind = ActivityKind::VirtualRide;

        let alert = run_one(&reg, &[run, virtual_ride], &[], now());

        assert_eq!(alert.distance_since, 5.0);
        assert!(!alert.triggered);
    }

    #[test]
    fn test_offsets_are_normalized_before_comparison() {
        let reg = registry("wax_chain", "Wax chain", Some(200.0), None);
        let pacific = FixedOffset::west_opt(7 * 3600).unwrap();
        let eastern = FixedOffset::west_opt(4 * 3600).unwrap();

        // 08:00 at -07:00 is 15:00 UTC
        let waxed = MaintenanceEvent {
            action_label: "Wax chain".into(),
            performed_at: pacific.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap(),
        };
        // 10:00 at -04:00 is 14:00 UTC, an hour before the wax
        let before = Activity {
            start_time: eastern.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap(),
            ..ride(1, BIKE, 0, 30.0)
        };
        // 12:00 at -04:00 is 16:00 UTC, an hour after
        let after = Activity {
            start_time: eastern.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
            ..ride(2, BIKE, 0, 12.0)
        };

        let alert = run_one(&reg, &[before, after], &[waxed], now());

        assert_eq!(alert.distance_since, 12.0);
    }

    #[test]
    fn test_ride_at_event_instant_is_excluded() {
        let events = vec![event("Wax chain", 3)];
        let rides = vec![ride(1, BIKE, 3, 80.0)];

        assert_eq!(
            distance_since(&rides, BIKE, last_performed(&events, "Wax chain")),
            0.0
        );
    }

    #[test]
    fn test_event_after_now_counts_as_zero_days() {
        let reg = registry("tire_check", "Tire check", None, Some(1));
        let events = vec![event("Tire check", -2)];

        let alert = run_one(&reg, &[], &events, now());

        assert_eq!(alert.days_since, 0);
        assert!(!alert.triggered);
    }
}
