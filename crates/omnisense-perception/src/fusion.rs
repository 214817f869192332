//! Multi-report fusion.
//!
//! When more than one sensor reports in a cycle the navigator sees a single
//! merged view: per sector, `blocked` is the logical OR of every report and
//! the distance is the minimum.  The fused value remembers which sensors and
//! which roles contributed so decisions can be traced back to their evidence.

use omnisense_types::{ObstacleReport, Sector, SectorDistances, SensorId, SensorMode, SensorRole};

/// One merged sector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedSector {
    pub blocked: bool,
    pub distance_m: f32,
}

/// The merged view of every report supplied for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedReport {
    pub left: FusedSector,
    pub center: FusedSector,
    pub right: FusedSector,
    pub mode: SensorMode,
    /// Contributing sensors in input order.
    pub sensors: Vec<SensorId>,
}

impl FusedReport {
    pub fn distances(&self) -> SectorDistances {
        SectorDistances {
            left: self.left.distance_m,
            center: self.center.distance_m,
            right: self.right.distance_m,
        }
    }
}

/// Which roles are represented in `reports`.
pub fn sensor_mode(reports: &[ObstacleReport]) -> SensorMode {
    let floor = reports.iter().any(|r| r.role == SensorRole::Floor);
    let body = reports.iter().any(|r| r.role == SensorRole::Body);
    match (floor, body) {
        (true, true) => SensorMode::Both,
        (true, false) => SensorMode::FloorOnly,
        (false, true) => SensorMode::BodyOnly,
        (false, false) => SensorMode::None,
    }
}

/// Merge reports per sector.  Returns `None` for an empty slice: there is
/// nothing to merge and no distance can be invented.
pub fn fuse_reports(reports: &[ObstacleReport]) -> Option<FusedReport> {
    if reports.is_empty() {
        return None;
    }
    let merge = |sector: Sector| {
        reports.iter().map(|r| r.sector(sector)).fold(
            FusedSector {
                blocked: false,
                distance_m: f32::INFINITY,
            },
            |acc, s| FusedSector {
                blocked: acc.blocked || s.blocked,
                distance_m: acc.distance_m.min(s.distance_m),
            },
        )
    };
    Some(FusedReport {
        left: merge(Sector::Left),
        center: merge(Sector::Center),
        right: merge(Sector::Right),
        mode: sensor_mode(reports),
        sensors: reports.iter().map(|r| r.sensor.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisense_types::SectorReading;

    fn report(
        sensor: &str,
        role: SensorRole,
        l: (bool, f32),
        c: (bool, f32),
        r: (bool, f32),
    ) -> ObstacleReport {
        let s = |(blocked, distance_m)| SectorReading {
            blocked,
            distance_m,
            samples: 500,
        };
        ObstacleReport {
            sensor: sensor.to_string(),
            role,
            left: s(l),
            center: s(c),
            right: s(r),
        }
    }

    #[test]
    fn empty_input_has_nothing_to_fuse() {
        assert!(fuse_reports(&[]).is_none());
        assert_eq!(sensor_mode(&[]), SensorMode::None);
    }

    #[test]
    fn single_report_passes_through() {
        let floor = report("floor", SensorRole::Floor, (true, 0.3), (false, 2.0), (false, 1.5));
        let fused = fuse_reports(std::slice::from_ref(&floor)).unwrap();
        assert_eq!(fused.mode, SensorMode::FloorOnly);
        assert!(fused.left.blocked);
        assert_eq!(fused.center.distance_m, 2.0);
        assert_eq!(fused.sensors, vec!["floor".to_string()]);
    }

    #[test]
    fn two_reports_or_blocked_and_min_distance() {
        let floor = report("floor", SensorRole::Floor, (false, 3.0), (false, 2.0), (true, 0.4));
        let body = report("body", SensorRole::Body, (true, 0.5), (false, 1.2), (false, 2.5));
        let fused = fuse_reports(&[floor, body]).unwrap();

        assert_eq!(fused.mode, SensorMode::Both);
        assert!(fused.left.blocked && fused.right.blocked);
        assert!(!fused.center.blocked);
        assert_eq!(fused.distances(), SectorDistances { left: 0.5, center: 1.2, right: 0.4 });
        assert_eq!(fused.sensors, vec!["floor".to_string(), "body".to_string()]);
    }
}
