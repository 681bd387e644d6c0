//! Georeference checks: coordinate ranges, transposed coordinates, and
//! distance to the verbatim coordinates.

use async_trait::async_trait;
use kurator_types::record::terms;
use kurator_types::{Record, StageError, StageKind};

use crate::stage::{Validator, Verdict};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two points in degrees.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

fn in_range(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

fn coordinate(record: &Record, term: &str) -> Result<Option<f64>, String> {
    record
        .field(term)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("{term} '{raw}' is not a decimal number"))
        })
        .transpose()
}

pub struct GeoreferenceValidator {
    service: String,
    threshold_km: f64,
}

impl GeoreferenceValidator {
    pub fn new(service: impl Into<String>, threshold_km: f64) -> Self {
        Self {
            service: service.into(),
            threshold_km,
        }
    }

    #[must_use]
    pub fn threshold_km(&self) -> f64 {
        self.threshold_km
    }

    fn check(&self, record: &mut Record) -> Result<Verdict, String> {
        let lat = coordinate(record, terms::DECIMAL_LATITUDE)?;
        let lon = coordinate(record, terms::DECIMAL_LONGITUDE)?;
        let (mut lat, mut lon) = match (lat, lon) {
            (None, None) => return Ok(Verdict::Pass("no coordinates to validate".to_string())),
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err("only one of decimalLatitude/decimalLongitude is present".to_string()),
        };

        if lat == 0.0 && lon == 0.0 {
            return Err("coordinates 0,0 are a placeholder".to_string());
        }

        let mut swapped = false;
        if !in_range(lat, lon) {
            if in_range(lon, lat) {
                std::mem::swap(&mut lat, &mut lon);
                swapped = true;
            } else {
                return Err(format!("coordinates {lat},{lon} are out of range"));
            }
        }

        let verbatim_lat = coordinate(record, terms::VERBATIM_LATITUDE).ok().flatten();
        let verbatim_lon = coordinate(record, terms::VERBATIM_LONGITUDE).ok().flatten();
        if let (Some(vlat), Some(vlon)) = (verbatim_lat, verbatim_lon) {
            let distance = haversine_km(lat, lon, vlat, vlon);
            if distance > self.threshold_km {
                return Err(format!(
                    "coordinates are {distance:.1} km from verbatim coordinates (limit {} km)",
                    self.threshold_km
                ));
            }
        }

        if swapped {
            record.set_field(terms::DECIMAL_LATITUDE, lat.to_string());
            record.set_field(terms::DECIMAL_LONGITUDE, lon.to_string());
            Ok(Verdict::Amend(format!(
                "transposed coordinates corrected to {lat},{lon}"
            )))
        } else {
            Ok(Verdict::Pass(format!("coordinates {lat},{lon} are valid")))
        }
    }
}

#[async_trait]
impl Validator for GeoreferenceValidator {
    fn kind(&self) -> StageKind {
        StageKind::Georeference
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
        Ok(self.check(record).unwrap_or_else(Verdict::Reject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> GeoreferenceValidator {
        GeoreferenceValidator::new("kurator.geolocate", 200.0)
    }

    fn located(lat: &str, lon: &str) -> Record {
        Record::new("r1")
            .with_field(terms::DECIMAL_LATITUDE, lat)
            .with_field(terms::DECIMAL_LONGITUDE, lon)
    }

    #[test]
    fn test_haversine_known_distance() {
        // Boston to New York is about 306 km.
        let km = haversine_km(42.3601, -71.0589, 40.7128, -74.0060);
        assert!((km - 306.0).abs() < 5.0, "got {km}");
    }

    #[tokio::test]
    async fn test_valid_coordinates_pass() {
        let mut record = located("42.37", "-71.11");
        let verdict = validator().validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Pass(_)));
    }

    #[tokio::test]
    async fn test_transposed_coordinates_swapped() {
        let mut record = located("-120.5", "42.37");
        let verdict = validator().validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Amend(_)));
        assert_eq!(record.field(terms::DECIMAL_LATITUDE), Some("42.37"));
        assert_eq!(record.field(terms::DECIMAL_LONGITUDE), Some("-120.5"));
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let mut record = located("95", "200");
        let verdict = validator().validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Reject(ref m) if m.contains("out of range")));
    }

    #[tokio::test]
    async fn test_null_island_rejected() {
        let mut record = located("0", "0");
        let verdict = validator().validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Reject(_)));
    }

    #[tokio::test]
    async fn test_distance_to_verbatim_beyond_threshold_rejected() {
        let mut record = located("42.37", "-71.11")
            .with_field(terms::VERBATIM_LATITUDE, "40.71")
            .with_field(terms::VERBATIM_LONGITUDE, "-74.00");
        let verdict = validator().validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Reject(ref m) if m.contains("km")));
    }

    #[tokio::test]
    async fn test_missing_coordinates_pass_half_missing_rejected() {
        let mut none = Record::new("r1");
        let mut half = Record::new("r2").with_field(terms::DECIMAL_LATITUDE, "10.0");
        assert!(matches!(
            validator().validate(&mut none).await.unwrap(),
            Verdict::Pass(_)
        ));
        assert!(matches!(
            validator().validate(&mut half).await.unwrap(),
            Verdict::Reject(_)
        ));
    }
}
