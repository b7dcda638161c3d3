use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TransportError;

/// Record key as emitted by the knowledge base. Some deployments use integer
/// keys, others string keys, so both are accepted and echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Text(String),
}

pub type SymptomId = Id;
pub type DiseaseId = Id;

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(value) => write!(f, "{value}"),
            Id::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Int(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Text(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Text(value)
    }
}

impl std::str::FromStr for Id {
    type Err = std::convert::Infallible;

    /// Numeric input becomes an integer key, anything else a string key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<i64>() {
            Ok(value) => Id::Int(value),
            Err(_) => Id::Text(trimmed.to_string()),
        })
    }
}

/// Crop identifier chosen by the user before a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CropId(pub i64);

impl fmt::Display for CropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single yes/no observable trait of a crop.
/// Immutable once fetched; history entries are copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symptom {
    pub sid: SymptomId,
    /// Question shown to the user (wire name `qn`)
    #[serde(rename = "qn")]
    pub question: String,
    /// Depth in the refinement hierarchy, 1 = coarsest
    #[serde(deserialize_with = "positive_level")]
    pub level: u32,
}

fn positive_level<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match u32::deserialize(deserializer)? {
        0 => Err(serde::de::Error::custom("symptom level must be at least 1")),
        level => Ok(level),
    }
}

/// Terminal result produced by the resolver. Never constructed locally
/// outside of tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disease {
    pub id: DiseaseId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Raw resolver payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub disease_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disease: Option<Disease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<Vec<Symptom>>,
}

/// What the resolver concluded for a set of confirmed symptoms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    Diagnosis(Disease),
    /// Alternative discriminating questions, not tied to a level
    Candidates(Vec<Symptom>),
    /// No further information
    Nothing,
}

impl TryFrom<ResolveResponse> for Resolution {
    type Error = TransportError;

    fn try_from(response: ResolveResponse) -> Result<Self, Self::Error> {
        if response.disease_found {
            return response.disease.map(Resolution::Diagnosis).ok_or_else(|| {
                TransportError::Malformed(
                    "diseaseFound is true but no disease was included".to_string(),
                )
            });
        }

        match response.symptoms {
            Some(symptoms) if !symptoms.is_empty() => Ok(Resolution::Candidates(symptoms)),
            _ => Ok(Resolution::Nothing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symptom_reads_qn_field() {
        let symptom: Symptom =
            serde_json::from_value(json!({"sid": 10, "qn": "Leaf yellowing?", "level": 1}))
                .unwrap();
        assert_eq!(symptom.sid, Id::Int(10));
        assert_eq!(symptom.question, "Leaf yellowing?");
        assert_eq!(symptom.level, 1);
    }

    #[test]
    fn symptom_level_zero_is_rejected() {
        let err = serde_json::from_value::<Symptom>(json!({"sid": 1, "qn": "Rot?", "level": 0}))
            .expect_err("level 0 must be rejected");
        assert!(err.to_string().contains("at least 1"));

        let response = serde_json::from_value::<ResolveResponse>(json!({
            "diseaseFound": false,
            "symptoms": [{"sid": 3, "qn": "Brown spots?", "level": 0}]
        }));
        assert!(response.is_err());
    }

    #[test]
    fn id_accepts_string_keys() {
        let symptom: Symptom =
            serde_json::from_value(json!({"sid": "S-4", "qn": "Wilting?", "level": 2})).unwrap();
        assert_eq!(symptom.sid, Id::from("S-4"));
        assert_eq!(serde_json::to_value(&symptom.sid).unwrap(), json!("S-4"));
    }

    #[test]
    fn id_parse_prefers_integers() {
        assert_eq!("42".parse::<Id>().unwrap(), Id::Int(42));
        assert_eq!(" leaf-1 ".parse::<Id>().unwrap(), Id::from("leaf-1"));
    }

    #[test]
    fn resolution_from_found_disease() {
        let response: ResolveResponse = serde_json::from_value(json!({
            "diseaseFound": true,
            "disease": {"id": 5, "name": "Blast"}
        }))
        .unwrap();
        let resolution = Resolution::try_from(response).unwrap();
        assert_eq!(
            resolution,
            Resolution::Diagnosis(Disease {
                id: Id::Int(5),
                name: "Blast".to_string(),
                description: None,
            })
        );
    }

    #[test]
    fn resolution_with_alternatives() {
        let response: ResolveResponse = serde_json::from_value(json!({
            "diseaseFound": false,
            "symptoms": [{"sid": 3, "qn": "Brown spots?", "level": 2}]
        }))
        .unwrap();
        match Resolution::try_from(response).unwrap() {
            Resolution::Candidates(symptoms) => assert_eq!(symptoms[0].sid, Id::Int(3)),
            other => panic!("expected candidates, got {other:?}"),
        }
    }

    #[test]
    fn resolution_empty_symptoms_is_nothing() {
        let response: ResolveResponse =
            serde_json::from_value(json!({"diseaseFound": false, "symptoms": []})).unwrap();
        assert_eq!(Resolution::try_from(response).unwrap(), Resolution::Nothing);

        let response: ResolveResponse =
            serde_json::from_value(json!({"diseaseFound": false})).unwrap();
        assert_eq!(Resolution::try_from(response).unwrap(), Resolution::Nothing);
    }

    #[test]
    fn resolution_found_without_disease_is_malformed() {
        let response: ResolveResponse =
            serde_json::from_value(json!({"diseaseFound": true})).unwrap();
        let err = Resolution::try_from(response).expect_err("missing disease must be rejected");
        assert!(matches!(err, TransportError::Malformed(_)));
    }
}
