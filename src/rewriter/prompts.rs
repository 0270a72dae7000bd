pub const OUTPUT_TOOL_NAME: &str = "output";

pub const OUTPUT_TOOL_DESCRIPTION: &str = "Output your rewritten input here";

pub const CRITIQUE_PROMPT: &str = "Carefully go over your result one last time. Make sure that it adheres to all given requirements, edit minor details or rewrite bad parts of the text. Do it carefully, step by step, outlining your thought process, possibly doing different versions of the text. When you think that the quality of it is good enough and doesn't need anymore edits, output it using 'output' tool.";

const REASONING_SUFFIX: &str = "Before answering, reason through the requirements privately, draft the rewrite, review it against every requirement and revise it until it needs no further edits. Only then output the final version using the 'output' tool.";

/// System instruction for a variant, with the optional user-wide suffix appended.
pub fn system_instruction(instructions: &str, custom: Option<&str>) -> String {
    let mut out = String::from(instructions.trim());
    if let Some(custom) = custom.map(str::trim).filter(|custom| !custom.is_empty()) {
        out.push_str("\n\n");
        out.push_str(custom);
    }
    out
}

/// Single-turn variant for models that revise internally.
pub fn reasoning_instruction(instructions: &str, custom: Option<&str>) -> String {
    let mut out = system_instruction(instructions, custom);
    out.push_str("\n\n");
    out.push_str(REASONING_SUFFIX);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_custom_suffix_only_when_present() {
        let plain = system_instruction("Talk like a pirate.", Some("   "));
        assert_eq!(plain, "Talk like a pirate.");
        assert_eq!(system_instruction("Talk like a pirate.", None), "Talk like a pirate.");

        let custom = system_instruction("Talk like a pirate.", Some("Use British spelling."));
        assert!(custom.ends_with("Use British spelling."));
        assert!(reasoning_instruction("x", None).ends_with(REASONING_SUFFIX));
    }
}
