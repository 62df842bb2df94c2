//! Prompt templates for the analysis agent. Placeholders are `{name}`.

pub const SYSTEM_PROMPT: &str = "You are Ryan, an expert software requirements analyst for the AIDEN platform.
Your role is to analyze development request documents and produce structured, comprehensive
requirements specifications.

You are bilingual (Korean/English) and should respond in the same language as the input document.
When the document is in Korean, produce outputs in Korean. When in English, respond in English.

Key principles:
- Be thorough: Extract ALL requirements, both explicit and implied
- Be precise: Each requirement must be clear, testable, and unambiguous
- Be structured: Use consistent categorization and numbering
- Be traceable: Every requirement must link back to the source document
";

pub const EXTRACT_REQUIREMENTS_PROMPT: &str = "Analyze the following development request document and extract ALL requirements.

For each requirement, provide:
1. A unique ID (REQ-XXX format)
2. A clear title
3. A detailed description
4. Category: 'functional' or 'non_functional'
5. Priority: 'high', 'medium', or 'low'
6. Source reference (which section/paragraph it comes from)
7. Acceptance criteria (testable conditions)

Document content:
{document_content}

Relevant context:
{context}

Return the requirements as a JSON object with a `requirements` array of objects with the fields:
id, title, description, category, priority, source_reference, acceptance_criteria (array of strings)
";

pub const DETECT_AMBIGUITIES_PROMPT: &str = "Review the following requirements and identify any ambiguities,
inconsistencies, or unclear points.

For each ambiguity found, provide:
1. The requirement ID it relates to
2. Description of the ambiguity
3. Your suggestion for clarification
4. Severity: 'high', 'medium', or 'low'

Requirements:
{requirements}

Source document context:
{context}

Return a JSON object with an `ambiguities` array of objects with:
requirement_id, description, suggestion, severity

If no ambiguities are found, return an empty array.
";

pub const BUILD_TRACEABILITY_PROMPT: &str = "Create a requirements traceability matrix mapping each requirement
back to its source in the development request document.

For each entry, provide:
1. requirement_id: The requirement ID
2. requirement_title: The requirement title
3. source_section: The section in the source document
4. source_text: The relevant text from the source (exact quote or close paraphrase)
5. verification_method: How this requirement should be verified (test, review, inspection, demonstration)

Requirements:
{requirements}

Source document:
{document_content}

Return a JSON object with an `entries` array of traceability entries.
";

pub const GENERATE_SPEC_PROMPT: &str = "Generate a complete Requirements Specification Document based on the
analyzed requirements.

The document should include:
1. Document Header (title, version, date, project name)
2. Introduction (purpose, scope, definitions)
3. Overall Description (product perspective, functions, constraints)
4. Functional Requirements (organized by feature area)
5. Non-Functional Requirements (organized by category)
6. Requirements Summary Table
7. Appendix (traceability matrix reference)

Requirements:
{requirements}

Traceability Matrix:
{traceability}

Project Context:
{context}

Generate the document in Markdown format.
";

/// Queries used to gather supporting context for extraction.
pub const CONTEXT_QUERIES: [&str; 5] = [
    "기능 요구사항 functional requirements",
    "비기능 요구사항 non-functional requirements performance security",
    "시스템 제약사항 constraints limitations",
    "사용자 스토리 user stories use cases",
    "인터페이스 요구사항 interface requirements API",
];

/// Query used when pulling a whole document by id.
pub const DOCUMENT_QUERY: &str = "전체 문서 내용 요약 full document content";

/// Substitute `{name}` placeholders.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_every_placeholder() {
        let out = render(
            EXTRACT_REQUIREMENTS_PROMPT,
            &[("document_content", "DOC"), ("context", "CTX")],
        );
        assert!(out.contains("Document content:\nDOC"));
        assert!(out.contains("Relevant context:\nCTX"));
        assert!(!out.contains("{document_content}"));
    }
}
