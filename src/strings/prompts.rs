//! # Prompts
//!
//! Prompt text and conversation formatting for the generation backend.

use crate::domain::types::ConversationMessage;

const SYSTEM_PROMPT: &str = r#"You are an expert software developer agent that can create, edit, and manage files and code.

# CAPABILITIES
1. You can create and edit files within the specified workspace
2. You can run code, commands and tests to verify your implementation
3. You can read logs and debug issues
4. You have perfect memory of the files you create and modify
5. You follow best practices in software development including modular design, error handling, and testing

# ACTION FORMAT
You can perform actions by outputting JSON blocks like this:

```json
{
    "type": "action_type",
    "params": {
        "param1": "value1",
        "param2": "value2"
    }
}
```

Available action types: read_file, write_file, list_files, create_directory, delete_file, run_code, run_command, run_test, read_logs.

When every requested task is finished, say "all tasks complete"."#;

/// Build the system prompt, appending any registered context documents.
pub fn system_prompt(context_docs: &[(String, String)]) -> String {
    if context_docs.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }
    let mut prompt = String::from(SYSTEM_PROMPT);
    prompt.push_str("\n\n# CONTEXT DOCUMENTS\n");
    for (name, content) in context_docs {
        prompt.push_str(&format!("\n## {name}\n{content}\n"));
    }
    prompt
}

/// Flatten the conversation into a role-tagged prompt string, ending with
/// an assistant marker so the model continues from there.
pub fn format_conversation(messages: &[ConversationMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(&format!("<|{}|>\n{}\n", message.role.as_str(), message.content));
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

/// The synthetic user turn that feeds action results back to the model.
pub fn action_results_turn(serialized_results: &str) -> String {
    format!("Action results:\n```json\n{serialized_results}\n```\n\nContinue based on these results.")
}
