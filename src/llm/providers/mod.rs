//! LLM provider implementations
//!
//! Concrete implementations of the LlmProvider trait for the vendors the
//! harness talks to. The mock provider for tests lives in
//! `crate::testing`.

pub mod anthropic;
pub mod openai;

pub use anthropic::*;
pub use openai::*;

/// Compose the repair prompt sent on attempts after the first: the original
/// instructions, the previous artifact, and the failure reasons recorded
/// for it.
pub(crate) fn build_fix_prompt(instructions: &str, previous_code: &str, errors: &[String]) -> String {
    let mut prompt = String::with_capacity(
        instructions.len() + previous_code.len() + errors.iter().map(|e| e.len() + 3).sum::<usize>() + 160,
    );
    prompt.push_str(instructions);
    prompt.push_str("\n\nYour previous solution was:\n```al\n");
    prompt.push_str(previous_code);
    prompt.push_str("\n```\n\nIt failed for these reasons:\n");
    for error in errors {
        prompt.push_str("- ");
        prompt.push_str(error);
        prompt.push('\n');
    }
    prompt.push_str("\nFix the code and return the complete corrected object.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_prompt_carries_code_and_reasons() {
        let prompt = build_fix_prompt(
            "Write a greeter.",
            "codeunit 1 A {}",
            &["Compilation failed: AL0118".to_string()],
        );
        assert!(prompt.starts_with("Write a greeter."));
        assert!(prompt.contains("codeunit 1 A {}"));
        assert!(prompt.contains("- Compilation failed: AL0118"));
    }
}
