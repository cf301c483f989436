//! Data points and data files: provenance-tracked measurements searched
//! under experiment visibility rules.

mod dao;
mod filter;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provenance::ProvEntity;
use crate::uri::{ExpandUris, Namespaces, Uri};
use crate::Model;

pub use dao::{DataDao, DataFileDao};
pub use filter::{DataCriteria, DataFileSearchFilter, DataFilter, DataFilterBuilder, DataSearchFilter};

pub const DATE_FIELD: &str = "date";
pub const TARGET_FIELD: &str = "target";
pub const VARIABLE_FIELD: &str = "variable";
pub const CONFIDENCE_FIELD: &str = "confidence";
pub const METADATA_FIELD: &str = "metadata";
pub const BATCH_URI_FIELD: &str = "batch_uri";
pub const FILENAME_FIELD: &str = "filename";
pub const PROVENANCE_FIELD: &str = "provenance";
pub const PROVENANCE_URI_FIELD: &str = "provenance.uri";
pub const PROVENANCE_EXPERIMENT_FIELD: &str = "provenance.experiments";
pub const PROVENANCE_AGENTS_FIELD: &str = "provenance.prov_was_associated_with";
pub const PROVENANCE_AGENTS_URI_FIELD: &str = "provenance.prov_was_associated_with.uri";

/// Provenance embedded in each data point or file.
///
/// `uri` points to a global provenance. An empty agent list means the data
/// point recorded no agent of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProvenanceModel {
    pub uri: Uri,
    #[serde(default)]
    pub prov_used: Vec<ProvEntity>,
    #[serde(default)]
    pub prov_was_associated_with: Vec<ProvEntity>,
    #[serde(default)]
    pub experiments: Vec<Uri>,
}

impl DataProvenanceModel {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            prov_used: Vec::new(),
            prov_was_associated_with: Vec::new(),
            experiments: Vec::new(),
        }
    }

    pub fn agent(mut self, agent: ProvEntity) -> Self {
        self.prov_was_associated_with.push(agent);
        self
    }

    pub fn used(mut self, entity: ProvEntity) -> Self {
        self.prov_used.push(entity);
        self
    }

    pub fn experiment(mut self, experiment: Uri) -> Self {
        self.experiments.push(experiment);
        self
    }
}

impl ExpandUris for DataProvenanceModel {
    fn expand_uris(&mut self, namespaces: &Namespaces) {
        self.uri.expand_uris(namespaces);
        self.prov_used.expand_uris(namespaces);
        self.prov_was_associated_with.expand_uris(namespaces);
        self.experiments.expand_uris(namespaces);
    }
}

/// One measured value of a variable on a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(collection = "data", uri_segment = "uri_segment")]
pub struct DataModel {
    pub uri: Option<Uri>,
    pub rdf_type: Option<Uri>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub target: Option<Uri>,
    pub variable: Uri,
    #[model(expand)]
    pub provenance: DataProvenanceModel,
    pub value: Value,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub batch_uri: Option<Uri>,
}

impl DataModel {
    pub fn new(
        date: DateTime<Utc>,
        variable: Uri,
        provenance: DataProvenanceModel,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            uri: None,
            rdf_type: None,
            date,
            target: None,
            variable,
            provenance,
            value: value.into(),
            confidence: None,
            metadata: BTreeMap::new(),
            batch_uri: None,
        }
    }

    pub fn target(mut self, target: Uri) -> Self {
        self.target = Some(target);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn uri_segment(&self) -> String {
        timestamped_segment(&self.date)
    }
}

/// A file attached to a target at a date, with the same provenance as data points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(collection = "file", uri_segment = "uri_segment")]
pub struct DataFileModel {
    pub uri: Option<Uri>,
    pub rdf_type: Option<Uri>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub target: Option<Uri>,
    #[model(expand)]
    pub provenance: DataProvenanceModel,
    pub filename: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub batch_uri: Option<Uri>,
}

impl DataFileModel {
    pub fn new(
        date: DateTime<Utc>,
        provenance: DataProvenanceModel,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            uri: None,
            rdf_type: None,
            date,
            target: None,
            provenance,
            filename: filename.into(),
            metadata: BTreeMap::new(),
            batch_uri: None,
        }
    }

    pub fn target(mut self, target: Uri) -> Self {
        self.target = Some(target);
        self
    }

    fn uri_segment(&self) -> String {
        timestamped_segment(&self.date)
    }
}

/// Readable date followed by a random part, so points at the same instant differ.
fn timestamped_segment(date: &DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", date.format("%Y%m%d_%H%M%S%3f"), &random[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{to_document, Model};
    use chrono::TimeZone;
    use serde_json::json;

    fn uri(value: &str) -> Uri {
        Uri::parse(value).unwrap()
    }

    #[test]
    fn data_dates_are_stored_as_epoch_millis() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let data = DataModel::new(
            date,
            uri("test:v1"),
            DataProvenanceModel::new(uri("test:p1")),
            21.5,
        );
        let document = to_document(&data).unwrap();
        assert_eq!(document[DATE_FIELD], json!(date.timestamp_millis()));
        assert_eq!(document[PROVENANCE_FIELD]["prov_was_associated_with"], json!([]));
    }

    #[test]
    fn compact_references_are_expanded_down_to_the_provenance() {
        let ns = Namespaces::new().with("test", "http://test.org/");
        let provenance = DataProvenanceModel::new(uri("test:provenance/p1"))
            .agent(ProvEntity::typed(uri("test:devices/d1"), uri("test:Sensor")))
            .used(ProvEntity::new(uri("test:seeds/s1")))
            .experiment(uri("test:experiments/e1"));
        let mut data = DataModel::new(Utc::now(), uri("test:v1"), provenance, 1)
            .target(uri("test:plants/p1"));
        data.batch_uri = Some(uri("test:batches/b1"));
        data.expand_uris(&ns);

        assert_eq!(data.variable, uri("http://test.org/v1"));
        assert_eq!(data.target, Some(uri("http://test.org/plants/p1")));
        assert_eq!(data.batch_uri, Some(uri("http://test.org/batches/b1")));
        let provenance = &data.provenance;
        assert_eq!(provenance.uri, uri("http://test.org/provenance/p1"));
        assert_eq!(
            provenance.prov_was_associated_with,
            vec![ProvEntity::typed(
                uri("http://test.org/devices/d1"),
                uri("http://test.org/Sensor")
            )]
        );
        assert_eq!(provenance.prov_used[0].uri, uri("http://test.org/seeds/s1"));
        assert_eq!(provenance.experiments, vec![uri("http://test.org/experiments/e1")]);
    }

    #[test]
    fn generated_uris_start_with_the_date() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let data = DataModel::new(
            date,
            uri("test:v1"),
            DataProvenanceModel::new(uri("test:p1")),
            1,
        );
        let a = data.generate_uri("http://test.org/id/data", 0).unwrap();
        let b = data.generate_uri("http://test.org/id/data", 0).unwrap();
        assert!(a.as_str().starts_with("http://test.org/id/data/20240501_120000000-"));
        assert_ne!(a, b);
    }
}
