// All LLM prompt constants for the evaluation pipeline.

/// System prompt for CV scoring — enforces JSON-only output against the
/// four-dimension rubric.
pub const CV_SCORING_SYSTEM: &str = "You are an expert hiring manager. \
    Return ONLY valid JSON starting with { and ending with } with numeric \
    scores 1-5 for technical_skills, experience_level, achievements, \
    cultural_fit; compute cv_match_rate (0-1) using weights technical:0.35, \
    experience:0.25, achievements:0.2, cultural:0.2, and include cv_feedback \
    (80-200 chars).";

/// CV scoring prompt. Replace `{job_title}`, `{context}`, `{cv_text}`.
/// The full CV text goes here — only the retrieval query is truncated.
pub const CV_SCORING_PROMPT_TEMPLATE: &str = "Job title: {job_title}\n\
Context excerpts: {context}\n\nCandidate CV:\n{cv_text}";

/// System prompt for project scoring — five-dimension rubric.
pub const PROJECT_SCORING_SYSTEM: &str = "You are an expert evaluator. \
    Return ONLY valid JSON starting with { and ending with } with numeric \
    scores 1-5 for correctness, code_quality, resilience, documentation, \
    creativity; compute project_score (1-5) as their weighted average using \
    weights correctness:0.3, code_quality:0.25, resilience:0.2, \
    documentation:0.15, creativity:0.1, and include project_feedback \
    (80-300 chars).";

/// Project scoring prompt. Replace `{context}`, `{project_text}`.
pub const PROJECT_SCORING_PROMPT_TEMPLATE: &str =
    "Case brief excerpts: {context}\n\nProject text:\n{project_text}";

/// System prompt for the final synthesis over both structured results.
pub const SYNTHESIS_SYSTEM: &str = "Synthesize the CV and project JSON into \
    overall_summary (1-2 paragraphs) and recommendation (Hire|Interview|Reject). \
    Return ONLY valid JSON starting with { and ending with }.";

/// Synthesis prompt. Replace `{cv_json}`, `{project_json}`.
pub const SYNTHESIS_PROMPT_TEMPLATE: &str = "CV: {cv_json}\nProject: {project_json}";

/// Minimal instruction for the one-shot structured-output repair call.
pub const REPAIR_SYSTEM: &str = "Return only valid JSON";
