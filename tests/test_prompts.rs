//! Shipped prompt layers under config/prompts

use std::fs;

const LAYERS: &[&str] = &[
    "persona_junior.md",
    "persona_senior.md",
    "mode_log.md",
    "mode_code.md",
    "mode_log_code.md",
    "output_contract.md",
    "stage_draft.md",
    "stage_final.md",
    "retrieved_context.md",
];

#[test]
fn every_layer_file_exists_and_is_non_empty() {
    for name in LAYERS {
        let path = format!("config/prompts/{name}");
        let text = fs::read_to_string(&path).unwrap_or_else(|e| panic!("{path}: {e}"));
        assert!(!text.trim().is_empty(), "{path} is blank");
    }
}

#[test]
fn output_contract_names_all_three_fields() {
    let text = fs::read_to_string("config/prompts/output_contract.md").unwrap();
    for field in ["\"cause\"", "\"solution\"", "\"prevention\""] {
        assert!(text.contains(field), "output_contract.md should mention {field}");
    }
}

#[test]
fn retrieved_context_has_context_variable() {
    let text = fs::read_to_string("config/prompts/retrieved_context.md").unwrap();
    assert!(text.contains("{{context}}"), "retrieved_context.md should contain {{context}} variable");
}

#[test]
fn loaded_table_matches_builtin_for_shipped_files() {
    use trouble_shooter::prompt::PromptTable;
    use trouble_shooter::request::{InputMode, Persona};

    let loaded = PromptTable::load("config/prompts");
    let builtin = PromptTable::builtin();
    assert_eq!(
        loaded.system_prompt(Persona::Senior, InputMode::LogCode),
        builtin.system_prompt(Persona::Senior, InputMode::LogCode)
    );
}
