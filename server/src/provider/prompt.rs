use crate::quiz::GenerationRequest;

const RESPONSE_SHAPE: &str = r#"{"questions":[{"question":"...","options":["...","...","...","..."],"answer_index":0,"explanation":"..."}]}"#;

/// Instruction text sent to the provider for one batch.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "Generate {count} multiple-choice quiz questions about \"{topic}\".\n\
         Respond with JSON only, no prose and no markdown, in exactly this shape:\n\
         {shape}\n\
         Every question must have exactly 4 options. answer_index is the 0-based index \
         of the correct option. Keep explanations to one sentence.",
        count = request.count,
        topic = request.topic.trim(),
        shape = RESPONSE_SHAPE,
    );

    let directive = request.used_questions_text.trim();
    if !directive.is_empty() {
        prompt.push('\n');
        prompt.push_str(directive);
    }
    prompt
}
