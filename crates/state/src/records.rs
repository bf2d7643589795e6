//! Persisted JSON layout.
//!
//! Instants are stored as epoch milliseconds and keys are camelCase. Records
//! written by older app versions are accepted: `carBrand`/`carModel` instead
//! of `label`, `yandexDiskFolderUrl` for the folder URL, `timestamp` for the
//! capture time, `duration` for the video length and no `videos` at all.

use crate::error::{Error, ErrorKind, Result};
use crate::models::{Credentials, Inspection, MediaItem, Status};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

pub(crate) fn to_millis(at: UtcDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_millis(millis: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).or_raise(|| ErrorKind::InvalidData(field))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaRecord {
    id: String,
    uri: String,
    #[serde(alias = "timestamp")]
    captured_at: i64,
    // Capture libraries report fractional milliseconds.
    #[serde(default, alias = "duration", skip_serializing_if = "Option::is_none")]
    duration_ms: Option<f64>,
}
impl TryFrom<&MediaItem> for MediaRecord {
    type Error = Error;
    fn try_from(item: &MediaItem) -> Result<Self> {
        Ok(Self {
            id: item.id.clone(),
            uri: item.uri.clone(),
            captured_at: to_millis(item.captured_at)?,
            duration_ms: item.duration_ms.map(|ms| ms as f64),
        })
    }
}
impl TryFrom<MediaRecord> for MediaItem {
    type Error = Error;
    fn try_from(record: MediaRecord) -> Result<Self> {
        let duration_ms = match record.duration_ms {
            Some(ms) if ms.is_finite() && ms >= 0.0 => Some(ms.round() as u64),
            Some(_) => exn::bail!(ErrorKind::InvalidData("media duration")),
            None => None,
        };
        Ok(Self {
            id: record.id,
            uri: record.uri,
            captured_at: from_millis(record.captured_at, "capture time")?,
            duration_ms,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InspectionRecord {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, skip_serializing)]
    car_brand: Option<String>,
    #[serde(default, skip_serializing)]
    car_model: Option<String>,
    start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<i64>,
    status: Status,
    #[serde(default)]
    photos: Vec<MediaRecord>,
    #[serde(default)]
    videos: Vec<MediaRecord>,
    #[serde(default, alias = "yandexDiskFolderUrl", skip_serializing_if = "Option::is_none")]
    remote_folder_url: Option<String>,
}
impl InspectionRecord {
    fn label(&mut self) -> String {
        if let Some(label) = self.label.take() {
            return label;
        }
        let brand = self.car_brand.take().unwrap_or_default();
        let model = self.car_model.take().unwrap_or_default();
        format!("{} {}", brand.trim(), model.trim()).trim().to_string()
    }
}
impl TryFrom<&Inspection> for InspectionRecord {
    type Error = Error;
    fn try_from(inspection: &Inspection) -> Result<Self> {
        Ok(Self {
            id: inspection.id.clone(),
            label: Some(inspection.label.clone()),
            car_brand: None,
            car_model: None,
            start_time: to_millis(inspection.start_time)?,
            end_time: inspection.end_time.map(to_millis).transpose()?,
            status: inspection.status,
            photos: inspection.photos.iter().map(MediaRecord::try_from).collect::<Result<_>>()?,
            videos: inspection.videos.iter().map(MediaRecord::try_from).collect::<Result<_>>()?,
            remote_folder_url: inspection.remote_folder_url.clone(),
        })
    }
}
impl TryFrom<InspectionRecord> for Inspection {
    type Error = Error;
    fn try_from(mut record: InspectionRecord) -> Result<Self> {
        Ok(Self {
            label: record.label(),
            start_time: from_millis(record.start_time, "start time")?,
            end_time: record.end_time.map(|ms| from_millis(ms, "end time")).transpose()?,
            status: record.status,
            photos: record.photos.into_iter().map(MediaItem::try_from).collect::<Result<_>>()?,
            videos: record.videos.into_iter().map(MediaItem::try_from).collect::<Result<_>>()?,
            remote_folder_url: record.remote_folder_url,
            id: record.id,
        })
    }
}

pub(crate) fn encode_inspections(inspections: &[Inspection]) -> Result<String> {
    let records = inspections.iter().map(InspectionRecord::try_from).collect::<Result<Vec<_>>>()?;
    serde_json::to_string(&records).or_raise(|| ErrorKind::InvalidData("inspections"))
}

pub(crate) fn decode_inspections(json: &str) -> Result<Vec<Inspection>> {
    let records: Vec<InspectionRecord> =
        serde_json::from_str(json).or_raise(|| ErrorKind::InvalidData("inspections"))?;
    records.into_iter().map(Inspection::try_from).collect()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CredentialsRecord {
    access_token: String,
    expires_at: i64,
}
impl TryFrom<&Credentials> for CredentialsRecord {
    type Error = Error;
    fn try_from(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            access_token: credentials.access_token().to_string(),
            expires_at: to_millis(credentials.expires_at())?,
        })
    }
}
impl TryFrom<CredentialsRecord> for Credentials {
    type Error = Error;
    fn try_from(record: CredentialsRecord) -> Result<Self> {
        Ok(Credentials::new(record.access_token, from_millis(record.expires_at, "expiry")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_record() {
        let json = r#"[{
            "id": "1709647620000",
            "carBrand": "Toyota",
            "carModel": " Camry ",
            "startTime": 1709647620000,
            "photos": [{"id": "p1", "uri": "file:///p1.jpg", "timestamp": 1709647625000}],
            "yandexDiskFolderUrl": "https://yadi.sk/d/abc",
            "status": "completed"
        }]"#;
        let inspections = decode_inspections(json).unwrap();
        let inspection = &inspections[0];
        assert_eq!(inspection.label, "Toyota Camry");
        assert_eq!(inspection.status, Status::Completed);
        assert_eq!(inspection.remote_folder_url.as_deref(), Some("https://yadi.sk/d/abc"));
        assert_eq!(inspection.photos[0].captured_at.unix_timestamp(), 1_709_647_625);
        assert!(inspection.videos.is_empty());
        assert_eq!(inspection.end_time, None);
    }

    #[test]
    fn test_fractional_video_duration() {
        let json = r#"[{"id": "1", "label": "Lada", "startTime": 0, "status": "active",
            "videos": [{"id": "v1", "uri": "/v.mp4", "timestamp": 5, "duration": 1234.6}]}]"#;
        let inspections = decode_inspections(json).unwrap();
        assert_eq!(inspections[0].videos[0].duration_ms, Some(1235));

        let negative = json.replace("1234.6", "-1");
        let err = decode_inspections(&negative).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("media duration"));
    }

    #[test]
    fn test_encoded_layout() {
        let start = from_millis(1_709_647_620_123, "start time").unwrap();
        let inspection = Inspection::new("a".to_string(), "Toyota Camry".to_string(), start);
        let json = encode_inspections(&[inspection.clone()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["startTime"], 1_709_647_620_123_i64);
        assert_eq!(value[0]["status"], "active");
        assert_eq!(value[0]["label"], "Toyota Camry");
        assert!(value[0].get("carBrand").is_none());
        assert!(value[0].get("remoteFolderUrl").is_none());
        assert_eq!(decode_inspections(&json).unwrap(), [inspection]);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let json = r#"[{"id": "1", "label": "x", "startTime": 0, "status": "archived"}]"#;
        assert!(decode_inspections(json).is_err());
    }
}
