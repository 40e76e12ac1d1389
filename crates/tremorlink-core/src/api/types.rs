//! Request and response bodies of the processing backend

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::datalog::RecordedSample;
use crate::signal::{SignalBundle, SignalError};

/// Torque model parameters, `τ = G × (θ_base + α × A × T_raw)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParameters {
    /// Global gain
    #[serde(rename = "G")]
    pub gain: f64,
    #[serde(rename = "Kp")]
    pub kp: f64,
    #[serde(rename = "Kd")]
    pub kd: f64,
    pub alpha: f64,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            gain: 1.0,
            kp: 1.0,
            kd: 0.2,
            alpha: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProcessRequest<'a> {
    pub file_name: &'a str,
    #[serde(flatten)]
    pub parameters: ProcessingParameters,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FileList {
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

/// One feature column of a processed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSeries {
    pub time: Vec<f64>,
    #[serde(rename = "featureData")]
    pub values: Vec<f64>,
    pub feature: String,
}

impl FeatureSeries {
    /// Single-channel bundle named after the feature
    pub fn into_bundle(self) -> Result<SignalBundle, SignalError> {
        let mut channels = BTreeMap::new();
        channels.insert(self.feature, self.values);
        SignalBundle::new(self.time, channels)
    }
}

/// Preset patient profiles with a processed file assigned to each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseStudy {
    Normal,
    EarlyPd,
    ModeratePd,
    AdvancedPd,
}

impl CaseStudy {
    pub const ALL: [CaseStudy; 4] = [
        CaseStudy::Normal,
        CaseStudy::EarlyPd,
        CaseStudy::ModeratePd,
        CaseStudy::AdvancedPd,
    ];

    /// Identifier sent to the device and used as the config key
    pub fn id(&self) -> &'static str {
        match self {
            CaseStudy::Normal => "normal",
            CaseStudy::EarlyPd => "earlyPD",
            CaseStudy::ModeratePd => "moderatePD",
            CaseStudy::AdvancedPd => "advancedPD",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id().eq_ignore_ascii_case(id))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CaseStudy::Normal => "Normal",
            CaseStudy::EarlyPd => "Early PD",
            CaseStudy::ModeratePd => "Moderate PD",
            CaseStudy::AdvancedPd => "Advanced PD",
        }
    }
}

/// Processed file assigned to each case study. Empty means unassigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStudiesConfig {
    #[serde(default)]
    pub normal: String,
    #[serde(default, rename = "earlyPD")]
    pub early_pd: String,
    #[serde(default, rename = "moderatePD")]
    pub moderate_pd: String,
    #[serde(default, rename = "advancedPD")]
    pub advanced_pd: String,
}

impl CaseStudiesConfig {
    /// Assigned file, if any
    pub fn file_for(&self, case: CaseStudy) -> Option<&str> {
        let file = match case {
            CaseStudy::Normal => &self.normal,
            CaseStudy::EarlyPd => &self.early_pd,
            CaseStudy::ModeratePd => &self.moderate_pd,
            CaseStudy::AdvancedPd => &self.advanced_pd,
        };
        Some(file.as_str()).filter(|f| !f.is_empty())
    }

    pub fn assign(&mut self, case: CaseStudy, file: impl Into<String>) {
        let slot = match case {
            CaseStudy::Normal => &mut self.normal,
            CaseStudy::EarlyPd => &mut self.early_pd,
            CaseStudy::ModeratePd => &mut self.moderate_pd,
            CaseStudy::AdvancedPd => &mut self.advanced_pd,
        };
        *slot = file.into();
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SaveRequest<'a> {
    #[serde(rename = "recordedData")]
    pub recorded_data: &'a [RecordedSample],
    pub filename: &'a str,
    pub parameters: ProcessingParameters,
}

/// Where the backend stored an export
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaveResponse {
    #[serde(default)]
    pub message: String,
    pub file_path: String,
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parameters_wire_names() {
        let json = serde_json::to_value(ProcessRequest {
            file_name: "p1.csv",
            parameters: ProcessingParameters::default(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"file_name": "p1.csv", "G": 1.0, "Kp": 1.0, "Kd": 0.2, "alpha": 1.0})
        );
    }

    #[test]
    fn test_case_studies_config() {
        let config: CaseStudiesConfig =
            serde_json::from_str(r#"{"normal":"n.csv","earlyPD":"","advancedPD":"a.csv"}"#).unwrap();
        assert_eq!(config.file_for(CaseStudy::Normal), Some("n.csv"));
        assert_eq!(config.file_for(CaseStudy::EarlyPd), None);
        assert_eq!(config.file_for(CaseStudy::ModeratePd), None);
        assert_eq!(config.file_for(CaseStudy::AdvancedPd), Some("a.csv"));
    }

    #[test]
    fn test_case_study_ids() {
        assert_eq!(CaseStudy::from_id("moderatePD"), Some(CaseStudy::ModeratePd));
        assert_eq!(CaseStudy::from_id("earlypd"), Some(CaseStudy::EarlyPd));
        assert_eq!(CaseStudy::from_id("late"), None);
    }

    #[test]
    fn test_feature_series_into_bundle() {
        let series: FeatureSeries = serde_json::from_str(
            r#"{"time":[0.0,0.01],"featureData":[3.0,4.0],"feature":"centeredTorque"}"#,
        )
        .unwrap();
        let bundle = series.into_bundle().unwrap();
        assert_eq!(bundle.value("centeredTorque", 1), Some(4.0));
    }

    #[test]
    fn test_save_request_body() {
        let samples = vec![RecordedSample::new(0.0).with_value("torque", 2.0)];
        let json = serde_json::to_value(SaveRequest {
            recorded_data: &samples,
            filename: "out.csv",
            parameters: ProcessingParameters::default(),
        })
        .unwrap();
        assert_eq!(json["recordedData"][0]["torque"], 2.0);
        assert_eq!(json["parameters"]["Kd"], 0.2);
    }
}
