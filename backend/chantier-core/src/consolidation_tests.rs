// src/consolidation_tests.rs

#[cfg(test)]
mod consolidation_scenarios {
    use crate::consolidation::ConsolidationFilter;
    use crate::model::*;
    use crate::test_support::*;
    use rust_decimal_macros::dec;

    fn march() -> ConsolidationFilter {
        ConsolidationFilter::for_period(period("2025-03"))
    }

    #[test]
    fn only_payroll_ready_sheets_are_consolidated() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        let days = || vec![work_day("2025-03-10", dec!(8))];
        env.seed_sheet("E1", "2025-W11", Some("CH-01"), SheetStatus::Draft, days());
        env.seed_sheet("E2", "2025-W11", Some("CH-01"), SheetStatus::SupervisorValidated, days());
        env.seed_sheet("E3", "2025-W11", Some("CH-01"), SheetStatus::SentToHr, days());
        env.seed_sheet("E4", "2025-W11", Some("CH-01"), SheetStatus::AutoValidated, days());

        let result = env.aggregator.consolidate(TENANT, &march()).unwrap();
        let ids: Vec<&str> = result.rows.iter().map(|r| r.employee_id.as_str()).collect();
        assert_eq!(ids, vec!["E3", "E4"]);
        assert_eq!(result.sheet_ids.len(), 2);
    }

    #[test]
    fn standard_week_is_all_normal_hours() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        env.add_employee("E1", "Ana Ruiz", EmployeeKind::Permanent);
        env.seed_standard_week("E1", "2025-W11", "CH-01");

        let result = env.aggregator.consolidate(TENANT, &march()).unwrap();
        let row = &result.rows[0];
        assert_eq!(row.employee_name, "Ana Ruiz");
        assert_eq!(row.employee_kind, Some(EmployeeKind::Permanent));
        assert_eq!(row.normal_hours, dec!(39));
        assert_eq!(row.overtime_25_hours, dec!(0));
        assert_eq!(row.overtime_50_hours, dec!(0));
        assert_eq!(row.days_worked, 5);
        assert_eq!(row.sheet_count, 1);
    }

    #[test]
    fn overtime_splits_into_two_tiers_per_week() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        let long_week = ["2025-03-10", "2025-03-11", "2025-03-12", "2025-03-13", "2025-03-14"]
            .iter()
            .map(|date| work_day(date, dec!(10)))
            .collect();
        env.seed_sheet("E1", "2025-W11", Some("CH-01"), SheetStatus::SentToHr, long_week);
        env.seed_standard_week("E1", "2025-W12", "CH-01");

        let row = env.aggregator.consolidate(TENANT, &march()).unwrap().rows[0].clone();
        // 50h in W11: 39 normal, 4 at 25%, 7 at 50%. W12 adds 39 normal.
        assert_eq!(row.normal_hours, dec!(78));
        assert_eq!(row.overtime_25_hours, dec!(4));
        assert_eq!(row.overtime_50_hours, dec!(7));
        assert_eq!(row.worked_hours(), dec!(89));
        assert_eq!(row.sheet_count, 2);
    }

    #[test]
    fn absence_hours_are_seven_on_friday_and_eight_otherwise() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        env.seed_sheet(
            "E1",
            "2025-W11",
            Some("CH-01"),
            SheetStatus::SentToHr,
            vec![
                absent_day("2025-03-11", Some(AbsenceType::Sickness)),
                absent_day("2025-03-14", Some(AbsenceType::Sickness)),
                absent_day("2025-03-12", Some(AbsenceType::PaidLeave)),
            ],
        );

        let row = env.aggregator.consolidate(TENANT, &march()).unwrap().rows[0].clone();
        assert_eq!(row.absence_days, 3);
        assert_eq!(row.absence_hours.get(&AbsenceType::Sickness), Some(&dec!(15)));
        assert_eq!(row.absence_hours.get(&AbsenceType::PaidLeave), Some(&dec!(8)));
        assert_eq!(row.total_absence_hours(), dec!(23));
        assert_eq!(row.normal_hours, dec!(0));
        assert!(!row.has_unqualified_absences);
    }

    #[test]
    fn weather_hours_take_priority_over_the_absence_bucket() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        let mut rained_out = absent_day("2025-03-12", Some(AbsenceType::WeatherStoppage));
        rained_out.weather_hours = dec!(8);
        let untallied = absent_day("2025-03-13", Some(AbsenceType::WeatherStoppage));
        env.seed_sheet(
            "E1",
            "2025-W11",
            Some("CH-01"),
            SheetStatus::SentToHr,
            vec![rained_out, untallied],
        );

        let row = env.aggregator.consolidate(TENANT, &march()).unwrap().rows[0].clone();
        assert_eq!(row.weather_loss_hours, dec!(8));
        // Only the day without weather hours lands in the absence bucket.
        assert_eq!(
            row.absence_hours.get(&AbsenceType::WeatherStoppage),
            Some(&dec!(8))
        );
        assert_eq!(row.absence_days, 2);
    }

    #[test]
    fn meals_and_trip_codes_are_counted() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        let mut personal = work_day("2025-03-12", dec!(8));
        personal.trip_code = Some(TripCode::Personal);
        personal.meal = false;
        let mut far = work_day("2025-03-13", dec!(8));
        far.trip_code = Some(TripCode::Zone(TripZone::Z3));
        let mut pending = work_day("2025-03-14", dec!(7));
        pending.trip_code = Some(TripCode::ToBeCompleted);
        env.seed_sheet(
            "E1",
            "2025-W11",
            Some("CH-01"),
            SheetStatus::SentToHr,
            vec![
                work_day("2025-03-10", dec!(8)),
                work_day("2025-03-11", dec!(8)),
                personal,
                far,
                pending,
            ],
        );

        let result = env.aggregator.consolidate(TENANT, &march()).unwrap();
        let row = &result.rows[0];
        assert_eq!(row.meal_count, 4);
        assert_eq!(row.trip_days, 3);
        assert_eq!(row.personal_trip_days, 1);
        assert_eq!(row.trips_to_complete, 1);
        assert_eq!(row.trip_codes.get(&TripCode::Zone(TripZone::Z1A)), Some(&2));
        assert_eq!(row.trip_codes.get(&TripCode::Zone(TripZone::Z3)), Some(&1));
        assert_eq!(result.trips_to_complete, 1);
    }

    #[test]
    fn unclassified_absences_flag_the_row() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        env.seed_sheet(
            "E1",
            "2025-W11",
            Some("CH-01"),
            SheetStatus::SentToHr,
            vec![
                absent_day("2025-03-10", None),
                absent_day("2025-03-11", Some(AbsenceType::ToClassify)),
                absent_day("2025-03-12", Some(AbsenceType::Sickness)),
            ],
        );
        env.seed_standard_week("E2", "2025-W11", "CH-01");

        let result = env.aggregator.consolidate(TENANT, &march()).unwrap();
        let flagged: Vec<&str> = result
            .unqualified_rows()
            .map(|r| r.employee_id.as_str())
            .collect();
        assert_eq!(flagged, vec!["E1"]);
        assert_eq!(
            result.rows[0].unqualified_absence_dates,
            vec![d("2025-03-10"), d("2025-03-11")]
        );
        assert_eq!(
            result.rows[0].absence_hours.get(&AbsenceType::ToClassify),
            Some(&dec!(16))
        );
    }

    #[test]
    fn consolidating_twice_gives_identical_rows() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        env.seed_standard_week("E1", "2025-W10", "CH-01");
        env.seed_standard_week("E2", "2025-W11", "CH-02");
        env.seed_sheet(
            "E1",
            "2025-W11",
            Some("CH-01"),
            SheetStatus::AutoValidated,
            vec![work_day("2025-03-10", dec!(11))],
        );

        let first = env.aggregator.consolidate(TENANT, &march()).unwrap();
        let second = env.aggregator.consolidate(TENANT, &march()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn worksite_filter_uses_the_day_level_worksite() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        let mut elsewhere = work_day("2025-03-11", dec!(8));
        elsewhere.worksite_of_day = Some(WorksiteRef {
            code: "CH-02".to_string(),
            city: Some("Lyon".to_string()),
        });
        env.seed_sheet(
            "E1",
            "2025-W11",
            Some("CH-01"),
            SheetStatus::SentToHr,
            vec![work_day("2025-03-10", dec!(8)), elsewhere],
        );

        let mut filter = march();
        filter.worksite = Some("CH-02".to_string());
        let row = env.aggregator.consolidate(TENANT, &filter).unwrap().rows[0].clone();
        assert_eq!(row.normal_hours, dec!(8));
        assert_eq!(row.days_worked, 1);
        assert_eq!(row.worksites.iter().collect::<Vec<_>>(), vec!["CH-02"]);

        let unfiltered = env.aggregator.consolidate(TENANT, &march()).unwrap();
        assert_eq!(unfiltered.rows[0].worksite_count(), 2);
    }

    #[test]
    fn employee_kind_and_supervisor_filters() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        env.add_employee("E1", "Ana Ruiz", EmployeeKind::Permanent);
        env.add_employee("E2", "Bo Lindqvist", EmployeeKind::Temporary);
        env.seed_standard_week("E1", "2025-W11", "CH-01");
        env.seed_standard_week("E2", "2025-W11", "CH-01");

        let mut temps = march();
        temps.employee_kind = Some(EmployeeKind::Temporary);
        let result = env.aggregator.consolidate(TENANT, &temps).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].employee_name, "Bo Lindqvist");

        let mut other_supervisor = march();
        other_supervisor.supervisor = Some("S9".to_string());
        assert!(env
            .aggregator
            .consolidate(TENANT, &other_supervisor)
            .unwrap()
            .rows
            .is_empty());
    }

    #[test]
    fn weeks_spanning_months_count_only_in_period_days() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        // W14 runs Mon 31 March to Fri 4 April.
        env.seed_sheet(
            "E1",
            "2025-W14",
            Some("CH-01"),
            SheetStatus::SentToHr,
            vec![
                work_day("2025-03-31", dec!(10)),
                work_day("2025-04-01", dec!(8)),
                work_day("2025-04-02", dec!(8)),
                work_day("2025-04-03", dec!(8)),
                work_day("2025-04-04", dec!(7)),
            ],
        );

        let march_row = env.aggregator.consolidate(TENANT, &march()).unwrap().rows[0].clone();
        assert_eq!(march_row.days_worked, 1);
        // Monday alone has an 8h threshold.
        assert_eq!(march_row.normal_hours, dec!(8));
        assert_eq!(march_row.overtime_25_hours, dec!(2));

        let april = ConsolidationFilter::for_period(period("2025-04"));
        let april_row = env.aggregator.consolidate(TENANT, &april).unwrap().rows[0].clone();
        assert_eq!(april_row.days_worked, 4);
        assert_eq!(april_row.normal_hours, dec!(31));
        assert_eq!(april_row.overtime_25_hours, dec!(0));
    }

    #[test]
    fn tenants_do_not_see_each_other() {
        let env = setup_test_environment("2025-04-01 09:00:00");
        env.seed_standard_week("E1", "2025-W11", "CH-01");
        let other = env.aggregator.consolidate("globex", &march()).unwrap();
        assert!(other.rows.is_empty());
        assert_eq!(other.trips_to_complete, 0);
    }
}
