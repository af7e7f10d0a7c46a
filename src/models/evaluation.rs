use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const EVALUATION_SCHEMA_VERSION: u32 = 2;

/// Bucket for scores written before they were attributed to an interviewer.
pub const UNATTRIBUTED: &str = "unattributed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterScore {
    #[serde(alias = "name")]
    pub parameter: String,
    pub score: Decimal,
    #[serde(default, alias = "remarks", skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Per-interviewer scores for one candidate round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationScores {
    pub version: u32,
    pub by_interviewer: BTreeMap<String, Vec<ParameterScore>>,
}

impl Default for EvaluationScores {
    fn default() -> Self {
        Self {
            version: EVALUATION_SCHEMA_VERSION,
            by_interviewer: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredScores {
    Current {
        version: u32,
        by_interviewer: BTreeMap<String, Vec<ParameterScore>>,
    },
    LegacyList(Vec<ParameterScore>),
    LegacyMap(BTreeMap<String, LegacyInterviewerScores>),
    Empty,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyInterviewerScores {
    List(Vec<ParameterScore>),
    Map(BTreeMap<String, Decimal>),
}

impl From<LegacyInterviewerScores> for Vec<ParameterScore> {
    fn from(raw: LegacyInterviewerScores) -> Self {
        match raw {
            LegacyInterviewerScores::List(scores) => scores,
            LegacyInterviewerScores::Map(map) => map
                .into_iter()
                .map(|(parameter, score)| ParameterScore {
                    parameter,
                    score,
                    comment: None,
                })
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for EvaluationScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let scores = match StoredScores::deserialize(deserializer)? {
            StoredScores::Current { by_interviewer, .. } => EvaluationScores {
                version: EVALUATION_SCHEMA_VERSION,
                by_interviewer,
            },
            StoredScores::LegacyList(list) => {
                let mut migrated = EvaluationScores::default();
                if !list.is_empty() {
                    migrated.by_interviewer.insert(UNATTRIBUTED.to_string(), list);
                }
                migrated
            }
            StoredScores::LegacyMap(map) => EvaluationScores {
                version: EVALUATION_SCHEMA_VERSION,
                by_interviewer: map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            },
            StoredScores::Empty => EvaluationScores::default(),
        };
        Ok(scores)
    }
}

impl EvaluationScores {
    pub fn is_empty(&self) -> bool {
        self.by_interviewer.values().all(|scores| scores.is_empty())
    }

    /// Replaces whatever this interviewer submitted before.
    pub fn record(&mut self, interviewer_id: Uuid, scores: Vec<ParameterScore>) {
        self.by_interviewer.insert(interviewer_id.to_string(), scores);
    }

    pub fn average_by_parameter(&self) -> BTreeMap<String, Decimal> {
        let mut sums: BTreeMap<String, (Decimal, u32)> = BTreeMap::new();
        for score in self.by_interviewer.values().flatten() {
            let entry = sums
                .entry(score.parameter.clone())
                .or_insert((Decimal::ZERO, 0));
            entry.0 += score.score;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(parameter, (total, count))| {
                (parameter, (total / Decimal::from(count)).round_dp(2))
            })
            .collect()
    }

    pub fn overall_average(&self) -> Option<Decimal> {
        let scores: Vec<Decimal> = self
            .by_interviewer
            .values()
            .flatten()
            .map(|s| s.score)
            .collect();
        if scores.is_empty() {
            return None;
        }
        let total: Decimal = scores.iter().copied().sum();
        Some((total / Decimal::from(scores.len() as u64)).round_dp(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;
    use serde_json::json;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    #[test]
    fn legacy_array_is_attributed_to_placeholder() {
        let raw = json!([
            {"name": "communication", "score": 4},
            {"parameter": "problem_solving", "score": 3.5, "remarks": "ok"}
        ]);
        let scores: EvaluationScores = serde_json::from_value(raw).unwrap();
        assert_eq!(scores.version, EVALUATION_SCHEMA_VERSION);
        let migrated = &scores.by_interviewer[UNATTRIBUTED];
        assert_eq!(migrated.len(), 2);
        assert_eq!(migrated[1].comment.as_deref(), Some("ok"));
    }

    #[test]
    fn legacy_interviewer_map_accepts_both_inner_shapes() {
        let raw = json!({
            "a": {"communication": 5, "depth": 3},
            "b": [{"parameter": "communication", "score": 3}]
        });
        let scores: EvaluationScores = serde_json::from_value(raw).unwrap();
        assert_eq!(scores.by_interviewer["a"].len(), 2);
        assert_eq!(scores.average_by_parameter()["communication"], dec(4.0));
    }

    #[test]
    fn empty_shapes_become_empty_current_record() {
        for raw in [json!({}), json!([]), serde_json::Value::Null] {
            let scores: EvaluationScores = serde_json::from_value(raw).unwrap();
            assert!(scores.is_empty());
            assert_eq!(scores, EvaluationScores::default());
        }
    }

    #[test]
    fn current_shape_survives_a_write_read_cycle() {
        let mut scores = EvaluationScores::default();
        let interviewer = Uuid::new_v4();
        scores.record(
            interviewer,
            vec![ParameterScore {
                parameter: "design".into(),
                score: dec(4.5),
                comment: None,
            }],
        );
        let back: EvaluationScores =
            serde_json::from_value(serde_json::to_value(&scores).unwrap()).unwrap();
        assert_eq!(back, scores);
        assert_eq!(back.overall_average(), Some(dec(4.5)));
    }

    #[test]
    fn recording_twice_replaces_previous_submission() {
        let mut scores = EvaluationScores::default();
        let interviewer = Uuid::new_v4();
        let one = |v: f64| ParameterScore {
            parameter: "depth".into(),
            score: dec(v),
            comment: None,
        };
        scores.record(interviewer, vec![one(2.0)]);
        scores.record(interviewer, vec![one(5.0)]);
        assert_eq!(scores.overall_average(), Some(dec(5.0)));
    }
}
