#[cfg(test)]
mod tests {
    use shunt_monitor::capacity::CapacityTracker;
    use shunt_monitor::run_flat::{format_run_flat, RunFlatEstimator, GATHERING_DATA};

    const INTERVAL_MS: u64 = 10_000;

    fn battery(max_ah: f32, remaining_ah: f32) -> CapacityTracker {
        let mut battery = CapacityTracker::new(max_ah);
        battery.set_capacity(remaining_ah);
        battery
    }

    #[test]
    fn discharge_within_threshold_warns() {
        let run_flat = format_run_flat(&battery(100.0, 100.0), 10.0, 12.0);
        assert_eq!(run_flat.text, "10 hours until flat");
        assert!(run_flat.warning);
    }

    #[test]
    fn charging_never_warns() {
        let run_flat = format_run_flat(&battery(100.0, 50.0), -10.0, 12.0);
        assert_eq!(run_flat.text, "5 hours until full");
        assert!(!run_flat.warning);
    }

    #[test]
    fn nearly_full_battery_is_fully_charged() {
        let run_flat = format_run_flat(&battery(100.0, 99.6), -1.0, 12.0);
        assert_eq!(run_flat.text, "Fully Charged!");
        assert!(!run_flat.warning);
    }

    #[test]
    fn no_current_is_fully_charged() {
        assert_eq!(format_run_flat(&battery(100.0, 40.0), 0.0, 12.0).text, "Fully Charged!");
    }

    #[test]
    fn tiny_charge_current_is_ignored() {
        assert_eq!(format_run_flat(&battery(100.0, 40.0), -0.005, 12.0).text, "Fully Charged!");
    }

    #[test]
    fn long_run_time_is_capped() {
        assert_eq!(format_run_flat(&battery(200.0, 200.0), 1.0, 200.0).text, "> 7 days");
    }

    #[test]
    fn days_and_hours() {
        let run_flat = format_run_flat(&battery(100.0, 100.0), 2.0, 12.0);
        assert_eq!(run_flat.text, "2 days 2 hours until flat");
        assert!(!run_flat.warning);
    }

    #[test]
    fn average_is_sampled_on_the_clock() {
        let battery = battery(100.0, 100.0);
        let mut estimator = RunFlatEstimator::new(INTERVAL_MS);

        assert_eq!(estimator.averaged(&battery, 10.0, 12.0, 5_000).text, GATHERING_DATA);

        assert_eq!(
            estimator.averaged(&battery, 10.0, 12.0, 10_000).text,
            "10 hours until flat"
        );
        // between ticks the last answer is repeated
        assert_eq!(
            estimator.averaged(&battery, 50.0, 12.0, 15_000).text,
            "10 hours until flat"
        );
        assert_eq!(estimator.sample_count(), 1);

        // fewer than three samples, the latest one counts
        assert_eq!(
            estimator.averaged(&battery, 20.0, 12.0, 20_000).text,
            "5 hours until flat"
        );

        // mean of 10, 5 and 25 hours
        let run_flat = estimator.averaged(&battery, 4.0, 12.0, 30_000);
        assert_eq!(run_flat.text, "13 hours until flat");
        assert!(!run_flat.warning);
    }

    #[test]
    fn emptied_battery_warns_instead_of_reading_full() {
        let mut battery = battery(100.0, 100.0);
        let mut estimator = RunFlatEstimator::new(INTERVAL_MS);
        for tick in 1..=3 {
            estimator.averaged(&battery, 10.0, 12.0, tick * INTERVAL_MS);
        }
        battery.set_capacity(0.0);

        let instantaneous = format_run_flat(&battery, 10.0, 12.0);
        let averaged = estimator.averaged(&battery, 10.0, 12.0, 4 * INTERVAL_MS);
        assert_eq!(instantaneous.text, "0 minutes until flat");
        assert!(instantaneous.warning);
        // mean of 10, 10, 10 and 0 hours
        assert_eq!(averaged.text, "7 hours until flat");
        assert!(averaged.warning);
    }

    #[test]
    fn averaged_long_run_time_is_capped() {
        let battery = battery(200.0, 200.0);
        let mut estimator = RunFlatEstimator::new(INTERVAL_MS);
        assert_eq!(estimator.averaged(&battery, 0.5, 12.0, INTERVAL_MS).text, "> 7 days");
    }

    #[test]
    fn charging_samples_are_not_averaged() {
        let battery = battery(100.0, 50.0);
        let mut estimator = RunFlatEstimator::new(INTERVAL_MS);

        assert_eq!(estimator.averaged(&battery, -5.0, 12.0, 10_000).text, GATHERING_DATA);
        assert_eq!(estimator.sample_count(), 0);

        estimator.averaged(&battery, 5.0, 12.0, 20_000);
        estimator.averaged(&battery, -5.0, 12.0, 30_000);
        assert_eq!(estimator.sample_count(), 1);
    }
}
