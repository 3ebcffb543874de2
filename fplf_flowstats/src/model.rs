//! Classifier inference. The model directory is an opaque artifact
//! produced by the training collaborator: metadata naming the feature
//! order and classes, a standard scaler, and dense layer weights. On
//! top of the model sits the well-known-port override, a deliberate
//! reliability lever that is part of the export contract.

use crate::features::FeatureRow;
use fplf_config::TrafficClass;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Model metadata: the declared feature column order and the class
/// label order the output probabilities follow.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    pub model_type: String,
    pub feature_names: Vec<String>,
    pub class_names: Vec<String>,
}

/// Standard scaler parameters.
#[derive(Debug, Clone, Deserialize)]
struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// One dense layer. `weights[i][j]` connects input i to unit j.
#[derive(Debug, Clone, Deserialize)]
struct DenseLayer {
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    activation: Activation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Relu,
    Softmax,
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelWeights {
    layers: Vec<DenseLayer>,
}

/// A prediction for one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: TrafficClass,
    pub confidence: f64,
    /// Probability per class, in metadata class order.
    pub probabilities: Vec<f64>,
    /// True when the well-known-port override replaced the model's
    /// answer.
    pub overridden: bool,
}

pub struct Classifier {
    metadata: ModelMetadata,
    scaler: Scaler,
    weights: ModelWeights,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Unable to read model artifact: {0}")]
    ArtifactRead(PathBuf),
    #[error("Unable to decode model artifact: {0}: {1}")]
    ArtifactDecode(PathBuf, String),
    #[error("Model artifact is inconsistent: {0}")]
    Inconsistent(String),
}

impl Classifier {
    /// Load a model directory: `model_metadata.json`, `scaler.json`
    /// and `weights.json`.
    pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
        let metadata: ModelMetadata = read_json(&model_dir.join("model_metadata.json"))?;
        let scaler: Scaler = read_json(&model_dir.join("scaler.json"))?;
        let weights: ModelWeights = read_json(&model_dir.join("weights.json"))?;

        if scaler.mean.len() != metadata.feature_names.len()
            || scaler.scale.len() != metadata.feature_names.len()
        {
            return Err(ClassifierError::Inconsistent(
                "scaler length does not match feature count".to_string(),
            ));
        }
        let Some(last) = weights.layers.last() else {
            return Err(ClassifierError::Inconsistent("model has no layers".to_string()));
        };
        if last.biases.len() != metadata.class_names.len() {
            return Err(ClassifierError::Inconsistent(
                "output width does not match class count".to_string(),
            ));
        }

        info!(
            "Loaded {} model: {} features, classes {:?}",
            metadata.model_type,
            metadata.feature_names.len(),
            metadata.class_names
        );
        Ok(Self { metadata, scaler, weights })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Classify one feature row: assemble the vector in the declared
    /// order (missing columns zero-filled), scale, run the layers,
    /// then apply the port override.
    pub fn classify(&self, row: &FeatureRow) -> Result<Prediction, ClassifierError> {
        let vector = self.feature_vector(row);
        let scaled: Vec<f64> = vector
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let scale = self.scaler.scale[i];
                if scale == 0.0 {
                    0.0
                } else {
                    (v - self.scaler.mean[i]) / scale
                }
            })
            .collect();

        let probabilities = self.forward(scaled)?;
        let (best_index, best_prob) = probabilities
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |(bi, bp), (i, &p)| {
                if p > bp {
                    (i, p)
                } else {
                    (bi, bp)
                }
            });

        let predicted: TrafficClass = self
            .metadata
            .class_names
            .get(best_index)
            .and_then(|name| name.parse().ok())
            .unwrap_or(TrafficClass::Unknown);

        if let Some(class) = port_override(row.dst_port, row.src_port) {
            return Ok(Prediction {
                class,
                confidence: 1.0,
                probabilities,
                overridden: true,
            });
        }

        Ok(Prediction {
            class: predicted,
            confidence: best_prob,
            probabilities,
            overridden: false,
        })
    }

    fn feature_vector(&self, row: &FeatureRow) -> Vec<f64> {
        // Go through JSON so features resolve by column name; columns
        // the model knows but the row lacks become zero.
        let as_value = serde_json::to_value(row).unwrap_or(serde_json::Value::Null);
        self.metadata
            .feature_names
            .iter()
            .map(|name| {
                if name == "protocol" {
                    return row.protocol_code();
                }
                as_value
                    .get(name)
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0)
            })
            .collect()
    }

    fn forward(&self, mut input: Vec<f64>) -> Result<Vec<f64>, ClassifierError> {
        for layer in &self.weights.layers {
            if layer.weights.len() != input.len() {
                return Err(ClassifierError::Inconsistent(format!(
                    "layer expects {} inputs, got {}",
                    layer.weights.len(),
                    input.len()
                )));
            }
            let mut out = layer.biases.clone();
            for (i, row) in layer.weights.iter().enumerate() {
                for (j, w) in row.iter().enumerate() {
                    out[j] += input[i] * w;
                }
            }
            match layer.activation {
                Activation::Relu => {
                    for v in &mut out {
                        *v = v.max(0.0);
                    }
                }
                Activation::Softmax => softmax(&mut out),
                Activation::Linear => {}
            }
            input = out;
        }
        Ok(input)
    }
}

fn softmax(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

/// The well-known-port map. Checked on the destination port first,
/// then the source port.
pub fn port_override(dst_port: u16, src_port: u16) -> Option<TrafficClass> {
    fn map(port: u16) -> Option<TrafficClass> {
        match port {
            80 | 8080 | 443 => Some(TrafficClass::Http),
            20 | 21 => Some(TrafficClass::Ftp),
            22 => Some(TrafficClass::Ssh),
            5004 | 5006 | 1935 => Some(TrafficClass::Video),
            _ => None,
        }
    }
    map(dst_port).or_else(|| map(src_port))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ClassifierError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| ClassifierError::ArtifactRead(path.to_path_buf()))?;
    serde_json::from_str(&raw)
        .map_err(|e| ClassifierError::ArtifactDecode(path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// A 2-feature, 4-class linear model whose prediction follows
    /// whichever feature dominates: high `packets_per_second` leans
    /// VIDEO, high `mean_packet_size` leans HTTP.
    pub fn write_test_model(dir: &Path) {
        std::fs::write(
            dir.join("model_metadata.json"),
            r#"{
  "model_type": "neural_network",
  "feature_names": ["packets_per_second", "mean_packet_size"],
  "class_names": ["VIDEO", "SSH", "HTTP", "FTP"]
}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("scaler.json"),
            r#"{ "mean": [0.0, 0.0], "scale": [1.0, 1.0] }"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("weights.json"),
            r#"{
  "layers": [
    {
      "weights": [[1.0, 0.0, -1.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
      "biases": [0.0, -5.0, 0.0, -5.0],
      "activation": "softmax"
    }
  ]
}"#,
        )
        .unwrap();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(pps: f64, mean_size: f64, src_port: u16, dst_port: u16) -> FeatureRow {
        FeatureRow {
            src_ip: "10.0.0.1".to_string(),
            dst_ip: "10.0.0.3".to_string(),
            src_port,
            dst_port,
            protocol: "TCP".to_string(),
            total_packets: 10,
            forward_packets: 5,
            backward_packets: 5,
            total_bytes: 1000,
            forward_bytes: 500,
            backward_bytes: 500,
            flow_duration: 1.0,
            packets_per_second: pps,
            bytes_per_second: 1000.0,
            min_packet_size: 60.0,
            max_packet_size: 1400.0,
            mean_packet_size: mean_size,
            std_packet_size: 10.0,
            mean_forward_packet_size: 100.0,
            mean_backward_packet_size: 100.0,
            mean_inter_arrival_time: 0.1,
            std_inter_arrival_time: 0.01,
            min_inter_arrival_time: 0.05,
            max_inter_arrival_time: 0.2,
            forward_iat_mean: 0.1,
            forward_iat_std: 0.01,
            backward_iat_mean: 0.1,
            backward_iat_std: 0.01,
            syn_count: 1,
            ack_count: 9,
            fin_count: 1,
            rst_count: 0,
            psh_count: 3,
            mean_tcp_window: 4096.0,
            mean_ttl: 64.0,
            mean_tos: 0.0,
        }
    }

    fn classifier() -> Classifier {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_test_model(dir.path());
        Classifier::load(dir.path()).unwrap()
    }

    #[test]
    fn model_prediction_follows_features() {
        let classifier = classifier();
        // High packet rate, unprivileged ports: the model says VIDEO.
        let prediction = classifier.classify(&row(50.0, 0.0, 40_000, 40_001)).unwrap();
        assert_eq!(prediction.class, TrafficClass::Video);
        assert!(!prediction.overridden);
        assert!(prediction.confidence > 0.9);
        let total: f64 = prediction.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ssh_port_overrides_model_answer() {
        let classifier = classifier();
        // The model would say HTTP here (large mean packet size), but
        // dst port 22 forces SSH at full confidence.
        let prediction = classifier.classify(&row(0.0, 50.0, 40_000, 22)).unwrap();
        assert_eq!(prediction.class, TrafficClass::Ssh);
        assert_eq!(prediction.confidence, 1.0);
        assert!(prediction.overridden);
    }

    #[test]
    fn source_port_checked_when_dst_is_ephemeral() {
        assert_eq!(port_override(40_000, 21), Some(TrafficClass::Ftp));
        assert_eq!(port_override(8080, 22), Some(TrafficClass::Http));
        assert_eq!(port_override(40_000, 40_001), None);
        assert_eq!(port_override(1935, 0), Some(TrafficClass::Video));
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Classifier::load(dir.path()),
            Err(ClassifierError::ArtifactRead(_))
        ));
    }

    #[test]
    fn inconsistent_scaler_rejected() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_test_model(dir.path());
        std::fs::write(
            dir.path().join("scaler.json"),
            r#"{ "mean": [0.0], "scale": [1.0] }"#,
        )
        .unwrap();
        assert!(matches!(
            Classifier::load(dir.path()),
            Err(ClassifierError::Inconsistent(_))
        ));
    }
}
