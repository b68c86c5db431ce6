//! CSV study report: one row per report point per case, grouped the way
//! reviewers read it (all of a group's points together, cases side by
//! side down the file).

use qcap_core::{PointMeasurement, QcapError, QcapResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

fn csv_err(e: csv::Error) -> QcapError {
    QcapError::Other(e.to_string())
}

/// Measurements from one persisted case, keyed by the case's name.
#[derive(Debug, Clone)]
pub struct CaseMeasurements {
    pub case: String,
    pub points: Vec<PointMeasurement>,
}

/// Write the grouped report. Rows are ordered by group label, then case
/// order as supplied, then point order within the case.
pub fn write_report(path: &Path, cases: &[CaseMeasurements]) -> QcapResult<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(["group", "case", "point", "p_mw", "q_mvar", "s_mva", "power_factor"])
        .map_err(csv_err)?;

    let mut by_group: BTreeMap<&str, Vec<(&str, &PointMeasurement)>> = BTreeMap::new();
    for case in cases {
        for point in &case.points {
            by_group
                .entry(point.group.as_str())
                .or_default()
                .push((case.case.as_str(), point));
        }
    }

    for (group, rows) in by_group {
        for (case, m) in rows {
            writer
                .write_record([
                    group,
                    case,
                    m.name.as_str(),
                    &format!("{:.4}", m.p.value()),
                    &format!("{:.4}", m.q.value()),
                    &format!("{:.4}", m.s.value()),
                    &format!("{:.4}", m.power_factor),
                ])
                .map_err(csv_err)?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcap_core::{Megavars, Megawatts};

    #[test]
    fn test_report_groups_rows_across_cases() {
        let cases = vec![
            CaseMeasurements {
                case: "Max Lag".into(),
                points: vec![
                    PointMeasurement::from_pq("BESS 1", "POI", Megawatts(95.0), Megavars(31.2)),
                    PointMeasurement::from_pq("BESS 2", "POI", Megawatts(40.0), Megavars(10.0)),
                ],
            },
            CaseMeasurements {
                case: "Max Lead".into(),
                points: vec![PointMeasurement::from_pq(
                    "BESS 1",
                    "POI",
                    Megawatts(95.0),
                    Megavars(-31.2),
                )],
            },
        ];

        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write_report(file.path(), &cases).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "group,case,point,p_mw,q_mvar,s_mva,power_factor");
        // BESS 1 rows from both cases come before any BESS 2 row.
        assert!(lines[1].starts_with("BESS 1,Max Lag"));
        assert!(lines[2].starts_with("BESS 1,Max Lead"));
        assert!(lines[3].starts_with("BESS 2,Max Lag"));
        assert!(lines[1].contains("95.0000"));
    }
}
