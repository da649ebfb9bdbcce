use crate::commands::settings::EffectiveScanSettings;
use crate::error::ScanError;
use crate::models::detection::{BoundingBox, Category, Detection, DetectionIssue};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// A photo handed over by the capture layer.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub reference: String, // path or URI owned by platform storage
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl CapturedImage {
    pub fn from_bytes(reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        let reference = reference.into();
        let path = Path::new(&reference);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "photo.jpg".to_string());
        let mime_type = mime_for(path).to_string();

        Self {
            reference,
            file_name,
            mime_type,
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ScanError::Image(format!("{}: {e}", path.display())))?;
        if bytes.is_empty() {
            return Err(ScanError::Image(format!("{} is empty", path.display())));
        }
        Ok(Self::from_bytes(path.to_string_lossy().to_string(), bytes))
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Typed result of one detection request.
#[derive(Debug, Clone, Default)]
pub struct DetectionResponse {
    pub detections: Vec<Detection>,
    pub reported_count: usize,
    pub dropped: usize, // entries that could not be read at all
    pub annotated_image: Option<String>,
}

#[async_trait]
pub trait DetectionService: Send + Sync {
    async fn detect(&self, image: &CapturedImage) -> Result<DetectionResponse, ScanError>;
}

pub struct HttpDetectionClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpDetectionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ScanError::Network(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn from_settings(settings: &EffectiveScanSettings) -> Result<Self, ScanError> {
        Self::new(settings.detection_endpoint.clone(), settings.request_timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, image: &CapturedImage) -> Result<DetectionResponse, ScanError> {
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime_type)
            .map_err(|e| ScanError::Image(format!("unsupported mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        log::debug!(
            "sending {} bytes ({}) to {}",
            image.bytes.len(),
            image.mime_type,
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        log::debug!("detection service answered {status}");

        if !status.is_success() {
            log::warn!("detection service returned {status}");
            return Err(ScanError::ServiceStatus {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        parse_detection_body(&body)
    }

    fn transport_error(&self, err: reqwest::Error) -> ScanError {
        if err.is_timeout() {
            ScanError::Timeout {
                after: self.timeout,
            }
        } else {
            ScanError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl DetectionService for HttpDetectionClient {
    async fn detect(&self, image: &CapturedImage) -> Result<DetectionResponse, ScanError> {
        match tokio::time::timeout(self.timeout, self.send(image)).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Timeout {
                after: self.timeout,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    #[serde(alias = "class", alias = "label", alias = "name")]
    category: Option<String>,
    #[serde(
        rename = "boundingBox",
        alias = "bbox",
        alias = "box",
        alias = "bounding_box"
    )]
    bounding_box: Option<RawBox>,
    #[serde(alias = "score", alias = "conf")]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBox {
    Corners([f64; 4]),
    Named {
        #[serde(alias = "x_min", alias = "xMin", alias = "x1")]
        xmin: f64,
        #[serde(alias = "y_min", alias = "yMin", alias = "y1")]
        ymin: f64,
        #[serde(alias = "x_max", alias = "xMax", alias = "x2")]
        xmax: f64,
        #[serde(alias = "y_max", alias = "yMax", alias = "y2")]
        ymax: f64,
    },
    Sized {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

impl From<RawBox> for BoundingBox {
    fn from(raw: RawBox) -> Self {
        match raw {
            RawBox::Corners([x_min, y_min, x_max, y_max]) => {
                BoundingBox::new(x_min, y_min, x_max, y_max)
            }
            RawBox::Named {
                xmin,
                ymin,
                xmax,
                ymax,
            } => BoundingBox::new(xmin, ymin, xmax, ymax),
            RawBox::Sized {
                x,
                y,
                width,
                height,
            } => BoundingBox::new(x, y, x + width, y + height),
        }
    }
}

impl RawDetection {
    fn into_detection(self) -> Result<Detection, DetectionIssue> {
        let label = self.category.ok_or(DetectionIssue::MissingCategory)?;
        let bounding_box = self.bounding_box.ok_or(DetectionIssue::MissingBoundingBox)?;
        let confidence = self.confidence.ok_or(DetectionIssue::MissingConfidence)?;

        Ok(Detection::new(
            Category::from_label(&label),
            bounding_box.into(),
            confidence,
        ))
    }
}

fn parse_entry(entry: Value) -> Result<Detection, DetectionIssue> {
    serde_json::from_value::<RawDetection>(entry)
        .map_err(|e| DetectionIssue::BadShape(e.to_string()))?
        .into_detection()
}

fn failure_message(body: &Value) -> String {
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| body.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "no reason given".to_string())
}

/// Convert the service's JSON body into typed detections.
///
/// Envelope problems fail the request; individual bad entries are dropped.
pub fn parse_detection_body(body: &str) -> Result<DetectionResponse, ScanError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ScanError::MalformedResponse(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ScanError::MalformedResponse(
            "expected a JSON object".to_string(),
        ));
    }

    let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !success {
        let reason = failure_message(&value);
        log::warn!("detection service reported failure: {reason}");
        return Err(ScanError::Unsuccessful(reason));
    }

    let entries = match value.get("detections") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => {
            return Err(ScanError::MalformedResponse(
                "missing detections".to_string(),
            ))
        }
        Some(_) => {
            return Err(ScanError::MalformedResponse(
                "detections is not an array".to_string(),
            ))
        }
    };

    let total = entries.len();
    let mut detections = Vec::with_capacity(total);
    let mut dropped = 0;
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_entry(entry) {
            Ok(detection) => detections.push(detection),
            Err(issue) => {
                log::warn!("dropping detection #{index}: {issue}");
                dropped += 1;
            }
        }
    }

    let reported_count = value
        .get("count")
        .and_then(Value::as_u64)
        .map(|c| c as usize)
        .unwrap_or(total);

    let annotated_image = value
        .get("image_with_boxes")
        .and_then(Value::as_str)
        .filter(|uri| uri.starts_with("data:image"))
        .map(str::to_string);

    Ok(DetectionResponse {
        detections,
        reported_count,
        dropped,
        annotated_image,
    })
}
