//! The decision contract every model response must satisfy.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AgentError, Result};

/// Name handed to the endpoint alongside the schema in structured-output mode.
pub const SCHEMA_NAME: &str = "agent_decision";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Search,
    FetchFull,
    Finish,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Search => "search",
            ToolName::FetchFull => "fetch_full",
            ToolName::Finish => "finish",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DecisionArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_document_id: Option<String>,
}

/// One structured model output: a thought, a tool, and its arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Decision {
    pub thought: String,
    pub tool_name: ToolName,
    pub arguments: DecisionArguments,
}

impl Decision {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw.trim())
            .map_err(|err| AgentError::MalformedDecision(err.to_string()))
    }
}

/// JSON Schema for [`Decision`].
///
/// Strict structured-output mode wants every property listed as required, so
/// the optional arguments are required-but-nullable here.
pub fn action_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "thought": {
                "type": "string",
                "description": "Reasoning about what to do next and what has been found so far."
            },
            "tool_name": {
                "type": "string",
                "enum": ["search", "fetch_full", "finish"]
            },
            "arguments": {
                "type": "object",
                "properties": {
                    "term": {
                        "type": ["string", "null"],
                        "description": "Search term of at most two words."
                    },
                    "document_id": {
                        "type": ["string", "null"],
                        "description": "Identifier of the document to fetch."
                    },
                    "alt_document_id": {
                        "type": ["string", "null"],
                        "description": "Alternate identifier of the document to fetch."
                    }
                },
                "required": ["term", "document_id", "alt_document_id"],
                "additionalProperties": false
            }
        },
        "required": ["thought", "tool_name", "arguments"],
        "additionalProperties": false
    })
}

/// `response_format` payload for OpenAI-compatible chat completion endpoints.
pub fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": SCHEMA_NAME,
            "strict": true,
            "schema": action_schema()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_decision() {
        let raw = r#"{"thought":"look it up","tool_name":"search","arguments":{"term":"adverse possession"}}"#;
        let decision = Decision::parse(raw).unwrap();

        assert_eq!(decision.tool_name, ToolName::Search);
        assert_eq!(decision.arguments.term.as_deref(), Some("adverse possession"));
        assert!(decision.arguments.document_id.is_none());
    }

    #[test]
    fn null_arguments_decode_as_absent() {
        let raw = r#"{"thought":"done","tool_name":"finish","arguments":{"term":null,"document_id":null,"alt_document_id":null}}"#;
        let decision = Decision::parse(raw).unwrap();

        assert_eq!(decision.arguments, DecisionArguments::default());
    }

    #[test]
    fn rejects_unknown_tool_and_extra_fields() {
        let unknown_tool = r#"{"thought":"x","tool_name":"browse","arguments":{}}"#;
        let extra_top = r#"{"thought":"x","tool_name":"finish","arguments":{},"confidence":1}"#;
        let extra_arg = r#"{"thought":"x","tool_name":"search","arguments":{"query":"tort"}}"#;

        for raw in [unknown_tool, extra_top, extra_arg] {
            assert!(matches!(
                Decision::parse(raw),
                Err(AgentError::MalformedDecision(_))
            ));
        }
    }

    #[test]
    fn arguments_object_is_required() {
        let raw = r#"{"thought":"x","tool_name":"finish"}"#;
        assert!(Decision::parse(raw).is_err());
    }

    #[test]
    fn schema_is_closed_at_every_level() {
        let schema = action_schema();

        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["arguments"]["additionalProperties"],
            json!(false)
        );
        assert_eq!(
            schema["properties"]["tool_name"]["enum"],
            json!(["search", "fetch_full", "finish"])
        );
        assert_eq!(response_format()["json_schema"]["strict"], json!(true));
    }
}
