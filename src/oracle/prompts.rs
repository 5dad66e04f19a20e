//! Prompt templates and placeholder substitution
//!
//! Templates are plain text with `{name}` placeholders. Rendering replaces
//! every supplied variable plus the `{articles}` document block; anything
//! the caller did not supply is left literal rather than failing the call.

use super::OracleDocument;

pub const ANALYST_SYSTEM: &str = r#"You are a meticulous fact-checking assistant. You compare claims against source material and report plainly on what the source does and does not support. You never invent source content."#;

pub const VERIFY_QUOTES_TEMPLATE: &str = r#"Check whether each quote below genuinely appears, in substance, in the source page content. Exact wording may differ slightly; the meaning must not.

QUOTES TO VERIFY:
{quotes_to_verify}

SOURCE URL: {source_url}

PAGE CONTENT:
{page_content}

For each quote, state whether the page supports it and why. Then finish with a single line:
VERDICT: ACCURATE
or
VERDICT: INACCURATE
If every quote is supported, also state "VERIFIED: TRUE"."#;

pub const CORRECTION_TEMPLATE: &str = r#"The report below contains citations that failed verification against their source pages. Rewrite the report so every quote is genuinely supported by its cited source. Where a source does not support a claim, soften or remove the claim rather than inventing support. Preserve all passages whose citations were not flagged.

FAILED CITATIONS:
{citation_errors}

ORIGINAL REPORT:
{original_content}

Return only the corrected report text, with no commentary before or after it."#;

/// Render a template by substituting the document block and named variables.
///
/// Unknown placeholders are left literal. `{articles}` is replaced with the
/// formatted document block (empty string when no documents were supplied).
pub fn render_prompt(
    template: &str,
    documents: &[OracleDocument],
    vars: &[(&str, &str)],
) -> String {
    let mut rendered = template.replace("{articles}", &format_documents(documents));
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{}}}", name), value);
    }
    rendered
}

fn format_documents(documents: &[OracleDocument]) -> String {
    documents
        .iter()
        .map(|doc| format!("--- {} ---\n{}", doc.title, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
