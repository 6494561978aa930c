//! Rubric math — converts the model's 1–5 sub-scores into the final numbers.
//!
//! The model is asked to compute the weighted averages itself, but its
//! arithmetic is never trusted blindly: the weighted average is recomputed
//! server-side and the model's value is accepted only when it is in range
//! and close to the recomputation.

use serde::{Deserialize, Serialize};

/// CV rubric weights: technical skill, experience level, achievements,
/// cultural fit.
const CV_WEIGHTS: [f64; 4] = [0.35, 0.25, 0.20, 0.20];

/// Project rubric weights: correctness, code quality, resilience,
/// documentation, creativity.
const PROJECT_WEIGHTS: [f64; 5] = [0.30, 0.25, 0.20, 0.15, 0.10];

/// Accepted drift between the model's reported value and the server-side
/// recomputation, on each score's own scale.
const CV_RATE_TOLERANCE: f64 = 0.05;
const PROJECT_SCORE_TOLERANCE: f64 = 0.25;

/// Structured CV scoring output as returned by the model. All fields default
/// so a partially-valid object still parses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CvAssessment {
    #[serde(default)]
    pub technical_skills: f64,
    #[serde(default)]
    pub experience_level: f64,
    #[serde(default)]
    pub achievements: f64,
    #[serde(default)]
    pub cultural_fit: f64,
    #[serde(default)]
    pub cv_match_rate: Option<f64>,
    #[serde(default)]
    pub cv_feedback: String,
}

/// Structured project scoring output as returned by the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectAssessment {
    #[serde(default)]
    pub correctness: f64,
    #[serde(default)]
    pub code_quality: f64,
    #[serde(default)]
    pub resilience: f64,
    #[serde(default)]
    pub documentation: f64,
    #[serde(default)]
    pub creativity: f64,
    #[serde(default)]
    pub project_score: Option<f64>,
    #[serde(default)]
    pub project_feedback: String,
}

/// Structured synthesis output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisAssessment {
    #[serde(default)]
    pub overall_summary: String,
    #[serde(default)]
    pub recommendation: String,
}

/// Resolved CV stage result — what synthesis and result assembly consume.
/// Degrades to zeros / empty feedback when the model output was unusable.
#[derive(Debug, Clone, Serialize)]
pub struct CvEvaluation {
    pub technical_skills: f64,
    pub experience_level: f64,
    pub achievements: f64,
    pub cultural_fit: f64,
    pub cv_match_rate: f64,
    pub cv_feedback: String,
}

impl CvEvaluation {
    pub fn resolve(parsed: Option<CvAssessment>) -> Self {
        match parsed {
            Some(a) => {
                let rate = cv_match_rate(&a);
                Self {
                    technical_skills: a.technical_skills,
                    experience_level: a.experience_level,
                    achievements: a.achievements,
                    cultural_fit: a.cultural_fit,
                    cv_match_rate: rate,
                    cv_feedback: a.cv_feedback,
                }
            }
            None => Self {
                technical_skills: 0.0,
                experience_level: 0.0,
                achievements: 0.0,
                cultural_fit: 0.0,
                cv_match_rate: 0.0,
                cv_feedback: String::new(),
            },
        }
    }
}

/// Resolved project stage result.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectEvaluation {
    pub correctness: f64,
    pub code_quality: f64,
    pub resilience: f64,
    pub documentation: f64,
    pub creativity: f64,
    pub project_score: f64,
    pub project_feedback: String,
}

impl ProjectEvaluation {
    pub fn resolve(parsed: Option<ProjectAssessment>) -> Self {
        match parsed {
            Some(a) => {
                let score = project_score(&a);
                Self {
                    correctness: a.correctness,
                    code_quality: a.code_quality,
                    resilience: a.resilience,
                    documentation: a.documentation,
                    creativity: a.creativity,
                    project_score: score,
                    project_feedback: a.project_feedback,
                }
            }
            None => Self {
                correctness: 0.0,
                code_quality: 0.0,
                resilience: 0.0,
                documentation: 0.0,
                creativity: 0.0,
                project_score: 0.0,
                project_feedback: String::new(),
            },
        }
    }
}

/// Final CV match rate in [0, 1]: the model's value when plausible, the
/// server-side weighted recomputation otherwise.
pub fn cv_match_rate(a: &CvAssessment) -> f64 {
    let recomputed = ((CV_WEIGHTS[0] * a.technical_skills
        + CV_WEIGHTS[1] * a.experience_level
        + CV_WEIGHTS[2] * a.achievements
        + CV_WEIGHTS[3] * a.cultural_fit)
        / 5.0)
        .clamp(0.0, 1.0);

    match a.cv_match_rate {
        Some(v) if (0.0..=1.0).contains(&v) && (v - recomputed).abs() <= CV_RATE_TOLERANCE => v,
        _ => recomputed,
    }
}

/// Final project score in [1, 5] under the same validate-or-recompute rule.
pub fn project_score(a: &ProjectAssessment) -> f64 {
    let recomputed = (PROJECT_WEIGHTS[0] * a.correctness
        + PROJECT_WEIGHTS[1] * a.code_quality
        + PROJECT_WEIGHTS[2] * a.resilience
        + PROJECT_WEIGHTS[3] * a.documentation
        + PROJECT_WEIGHTS[4] * a.creativity)
        .clamp(1.0, 5.0);

    match a.project_score {
        Some(v) if (1.0..=5.0).contains(&v) && (v - recomputed).abs() <= PROJECT_SCORE_TOLERANCE => {
            v
        }
        _ => recomputed,
    }
}
