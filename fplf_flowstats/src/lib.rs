//! The offline half of the traffic classification loop: bidirectional
//! flow aggregation over packet snapshot files, statistical feature
//! extraction, classifier inference with the well-known-port
//! override, and export of the host-to-host classification table the
//! controller consumes.

pub mod export;
pub mod features;
pub mod flows;
pub mod model;

pub use export::{classify_and_export, ExportError};
pub use features::{extract_features, write_feature_csv, FeatureError, FeatureRow};
pub use flows::{FlowAccumulator, FlowKey};
pub use model::{port_override, Classifier, ClassifierError, Prediction};
