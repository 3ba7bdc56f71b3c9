//! HTTP inference-service adapter.
//!
//! The frame is posted as a JPEG to an inference endpoint; the response is
//! JSON with center-form boxes (`x`/`y`/`width`/`height`) that are
//! converted to the corner form the engine works in. Response parsing is
//! compiled unconditionally so it stays under test everywhere; the HTTP
//! transport itself needs the `remote-detect` feature.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::detect::Detection;

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    #[serde(rename = "class")]
    label: String,
}

/// Parse an inference response, converting center boxes to corner form by
/// truncation (matching the centroid convention used downstream).
pub fn parse_predictions(raw: &[u8]) -> Result<Vec<Detection>> {
    let response: InferenceResponse =
        serde_json::from_slice(raw).context("malformed inference response")?;
    Ok(response
        .predictions
        .into_iter()
        .map(|p| Detection {
            x1: (p.x - p.width / 2.0) as i32,
            y1: (p.y - p.height / 2.0) as i32,
            x2: (p.x + p.width / 2.0) as i32,
            y2: (p.y + p.height / 2.0) as i32,
            confidence: p.confidence,
            label: p.label,
        })
        .collect())
}

#[cfg(feature = "remote-detect")]
pub use http::RemoteSource;

#[cfg(feature = "remote-detect")]
mod http {
    use std::io::Read;
    use std::time::Duration;

    use anyhow::{anyhow, Context, Result};
    use url::Url;

    use super::parse_predictions;
    use crate::detect::{Detection, DetectionSource};
    use crate::frame::Frame;

    const JPEG_QUALITY: u8 = 85;

    /// Posts frames to a remote inference endpoint.
    pub struct RemoteSource {
        endpoint: String,
        timeout: Duration,
    }

    impl RemoteSource {
        pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
            let url = Url::parse(endpoint).context("parse inference endpoint")?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(anyhow!(
                    "inference endpoint must be http(s), got {}",
                    url.scheme()
                ));
            }
            Ok(Self {
                endpoint: endpoint.to_string(),
                timeout,
            })
        }

        fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
            let mut jpeg = Vec::new();
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
            encoder
                .encode(
                    frame.rgb(),
                    frame.width,
                    frame.height,
                    image::ExtendedColorType::Rgb8,
                )
                .context("encode frame as jpeg")?;
            Ok(jpeg)
        }
    }

    impl DetectionSource for RemoteSource {
        fn name(&self) -> &'static str {
            "remote"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            let jpeg = Self::encode_jpeg(frame)?;
            let response = ureq::post(&self.endpoint)
                .timeout(self.timeout)
                .set("Content-Type", "image/jpeg")
                .send_bytes(&jpeg)
                .with_context(|| format!("post frame to {}", self.endpoint))?;
            let mut body = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut body)
                .context("read inference response")?;
            parse_predictions(&body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "predictions": [
            {
                "x": 320.0,
                "y": 240.0,
                "width": 100.0,
                "height": 50.0,
                "confidence": 0.87,
                "class": "plastic_bottle"
            },
            {
                "x": 100.5,
                "y": 80.5,
                "width": 31.0,
                "height": 21.0,
                "confidence": 0.52,
                "class": "chips_bag"
            }
        ]
    }"#;

    #[test]
    fn center_boxes_convert_to_corners() {
        let detections = parse_predictions(RESPONSE.as_bytes()).unwrap();
        assert_eq!(detections.len(), 2);

        let bottle = &detections[0];
        assert_eq!((bottle.x1, bottle.y1, bottle.x2, bottle.y2), (270, 215, 370, 265));
        assert_eq!(bottle.label, "plastic_bottle");
        assert!((bottle.confidence - 0.87).abs() < 1e-6);

        // fractional centers truncate toward zero
        let bag = &detections[1];
        assert_eq!((bag.x1, bag.y1, bag.x2, bag.y2), (85, 70, 116, 91));
    }

    #[test]
    fn empty_prediction_list_is_fine() {
        let detections = parse_predictions(br#"{"predictions": []}"#).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_predictions(b"not json").is_err());
        assert!(parse_predictions(br#"{"nope": true}"#).is_err());
    }
}
