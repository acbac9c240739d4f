//! Fixed replies and system instructions.

use crate::rag::Candidate;

pub const NO_KNOWLEDGE_REPLY: &str = "I don't have any knowledge base to help answer your question.";
pub const NO_RELEVANT_REPLY: &str = "Information is missing on related topic.";

const CONTEXTUALIZE_INSTRUCTION: &str = "\
Given the conversation history and the latest user question, which may refer to \
context in that history, rewrite the question so it can be understood on its own \
without the history. Do NOT answer the question. Reformulate it only if needed, \
otherwise return it unchanged. Reply with the question only.";

const ANSWER_INSTRUCTION: &str = "\
You are an assistant that looks up INTERNAL DOCUMENTS.
You may only use information from the INTERNAL DOCUMENTS to answer the question.
If the information is not there or you are not sure, say so clearly.
Answer concisely and precisely, and cite the passages you rely on in the format [Citation: passage N].";

fn language_line(response_language: Option<&str>) -> String {
    match response_language {
        Some(language) => format!("Write your reply in {}.", language),
        None => "Write your reply in the language of the user's question.".to_string(),
    }
}

pub fn contextualize_system_prompt(response_language: Option<&str>) -> String {
    format!("{}\n{}", CONTEXTUALIZE_INSTRUCTION, language_line(response_language))
}

pub fn answer_system_prompt(context: &str, response_language: Option<&str>) -> String {
    format!(
        "{}\n{}\nINTERNAL DOCUMENTS:\n{}",
        ANSWER_INSTRUCTION,
        language_line(response_language),
        context
    )
}

/// One `[N] text` paragraph per candidate, N being the citation ordinal.
pub fn format_context(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| format!("[{}] {}", index + 1, candidate.chunk.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
