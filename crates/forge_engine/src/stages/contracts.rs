//! JSON output contracts of the stages.
//!
//! Every reply goes through the same three steps: normalization (fence
//! stripping and parsing, done by `forge_llm`), a check against the stage's
//! JSON Schema, then deserialization into the typed struct. A failure in any
//! step is a contract violation.

use std::collections::HashMap;

use jsonschema::Validator;
use serde_json::{json, Value};

use crate::error::{EngineError, EngineResult};

/// Output contract of a stage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contract {
    Decompose,
    Branches,
    Options,
    FeelSpec,
    FileMap,
    MemoryNote,
    Intent,
    Plan,
    Facts,
}

impl Contract {
    pub const ALL: [Contract; 9] = [
        Self::Decompose,
        Self::Branches,
        Self::Options,
        Self::FeelSpec,
        Self::FileMap,
        Self::MemoryNote,
        Self::Intent,
        Self::Plan,
        Self::Facts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Decompose => "decompose",
            Self::Branches => "branches",
            Self::Options => "options",
            Self::FeelSpec => "feel_spec",
            Self::FileMap => "file_map",
            Self::MemoryNote => "memory_note",
            Self::Intent => "intent",
            Self::Plan => "plan",
            Self::Facts => "facts",
        }
    }

    fn schema(&self) -> Value {
        let string_list = json!({"type": "array", "items": {"type": "string"}});
        match self {
            Self::Decompose => json!({
                "type": "object",
                "required": ["dimensions"],
                "properties": {
                    "summary": {"type": "string"},
                    "dimensions": {
                        "type": "object",
                        "additionalProperties": {
                            "type": "object",
                            "required": ["candidates"],
                            "properties": {
                                "candidates": {"type": "array"},
                                "signals": {"type": "array"}
                            }
                        }
                    },
                    "hard_constraints": string_list,
                    "open_questions": {"type": "array", "items": {"type": "object"}},
                    "locked": {"type": ["object", "null"]}
                }
            }),
            Self::Branches => json!({
                "type": "object",
                "required": ["branches"],
                "properties": {
                    "branches": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["picked"],
                            "properties": {
                                "branch_id": {"type": "string"},
                                "picked": {
                                    "type": "object",
                                    "additionalProperties": {"type": "string"}
                                },
                                "core_mechanics": {"type": "array"}
                            }
                        }
                    }
                }
            }),
            Self::Options => json!({
                "type": "object",
                "required": ["options"],
                "properties": {
                    "options": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["title"],
                            "properties": {
                                "option_id": {"type": "string"},
                                "title": {"type": "string"},
                                "mechanics": {"type": "array"},
                                "is_recommended": {"type": "boolean"}
                            }
                        }
                    },
                    "recommended_option_id": {"type": ["string", "null"]}
                }
            }),
            Self::FeelSpec => json!({
                "type": "object",
                "minProperties": 1
            }),
            Self::FileMap => json!({
                "type": "object",
                "additionalProperties": {"type": "string"}
            }),
            Self::MemoryNote => json!({
                "type": "object",
                "required": ["title", "summary"],
                "properties": {
                    "title": {"type": "string"},
                    "summary": {"type": "string"},
                    "user_preferences": {"type": "object"},
                    "confidence": {"type": "number"}
                }
            }),
            Self::Intent => json!({
                "type": "object",
                "required": ["intent_type"],
                "properties": {
                    "intent_type": {"enum": ["create", "modify", "delete", "question", "other"]},
                    "complexity": {"enum": ["simple", "moderate", "complex"]},
                    "affected_areas": string_list,
                    "summary": {"type": "string"}
                }
            }),
            Self::Plan => json!({
                "type": "object",
                "required": ["files"],
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["action", "file_path"],
                            "properties": {
                                "action": {"enum": ["create", "modify", "delete"]},
                                "file_path": {"type": "string"},
                                "description": {"type": "string"}
                            }
                        }
                    },
                    "execution_order": string_list,
                    "notes": {"type": "string"}
                }
            }),
            Self::Facts => json!({
                "type": "array",
                "items": {"type": "string"}
            }),
        }
    }

    /// Accept a bare list where the contract expects a wrapping object.
    fn normalize(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Branches, Value::Array(items)) => json!({ "branches": items }),
            (Self::Options, Value::Array(items)) => json!({ "options": items }),
            (_, other) => other,
        }
    }
}

impl std::fmt::Display for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiled validators for every contract.
pub struct StageContracts {
    validators: HashMap<Contract, Validator>,
}

impl StageContracts {
    pub fn new() -> EngineResult<Self> {
        let mut validators = HashMap::new();
        for contract in Contract::ALL {
            let validator = jsonschema::validator_for(&contract.schema()).map_err(|e| {
                EngineError::Config(format!("Invalid {} contract: {}", contract, e))
            })?;
            validators.insert(contract, validator);
        }
        Ok(Self { validators })
    }

    /// Normalize and check a parsed reply. The error lists every violation.
    pub fn check(&self, contract: Contract, value: Value) -> Result<Value, String> {
        let value = contract.normalize(value);
        let Some(validator) = self.validators.get(&contract) else {
            return Ok(value);
        };

        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(value)
        } else {
            Err(errors.join("; "))
        }
    }
}
