//! Longitude handling for the remote grid, which is addressed in unsigned
//! degrees east.

/// Maps any finite longitude into `[0, 360)`.
///
/// Equivalent to `((lon % 360) + 360) % 360`, but values already in range are
/// returned untouched so the mapping stays exactly idempotent in floating point.
pub fn normalize(lon: f64) -> f64 {
    let wrapped = lon % 360.0;
    let wrapped = if wrapped <= 0.0 { wrapped + 360.0 } else { wrapped };
    // tiny negatives round up to 360.0
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Result of ordering a longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WestEast {
    pub west: f64,
    pub east: f64,
    pub swapped: bool,
}

/// Normalizes both longitudes and swaps them when west ends up east of east.
///
/// The swap assumes the box does not cross the 0/360 seam; callers that care
/// should look at `swapped`.
pub fn order_west_east(west: f64, east: f64) -> WestEast {
    let west = normalize(west);
    let east = normalize(east);
    if west > east {
        WestEast {
            west: east,
            east: west,
            swapped: true,
        }
    } else {
        WestEast {
            west,
            east,
            swapped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_signed_longitudes() {
        assert_eq!(normalize(-120.5), 239.5);
        assert_eq!(normalize(0.0), 0.0);
        assert_eq!(normalize(360.0), 0.0);
        assert_eq!(normalize(725.0), 5.0);
        assert_eq!(normalize(-180.0), 180.0);
    }

    #[test]
    fn normalize_is_idempotent_and_bounded() {
        let mut lon = -1080.0;
        while lon <= 1080.0 {
            let once = normalize(lon);
            assert!((0.0..360.0).contains(&once), "{lon} -> {once}");
            assert_eq!(normalize(once), once);
            lon += 7.3;
        }
        assert_eq!(normalize(-1e-15), 0.0);
    }

    #[test]
    fn ordering_keeps_non_crossing_box() {
        let ordered = order_west_east(-121.0, -119.0);
        assert_eq!(ordered.west, 239.0);
        assert_eq!(ordered.east, 241.0);
        assert!(!ordered.swapped);
    }

    #[test]
    fn ordering_handles_signed_antimeridian_crossing() {
        // 170E to 170W is contiguous in the unsigned convention
        let ordered = order_west_east(170.0, -170.0);
        assert_eq!(ordered.west, 170.0);
        assert_eq!(ordered.east, 190.0);
        assert!(!ordered.swapped);
    }

    #[test]
    fn ordering_swaps_seam_crossing_box() {
        let ordered = order_west_east(-1.0, 2.0);
        assert_eq!(ordered.west, 2.0);
        assert_eq!(ordered.east, 359.0);
        assert!(ordered.swapped);
    }
}
