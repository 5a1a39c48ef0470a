use crate::flow::state::FlowState;
use crate::flow::{FlowArgs, FlowError, FunctionHandler, HandlerOutcome, NodeConfig};
use crate::message::ToolCall;
use serde_json::Value;
use tracing::{debug, warn};

/// Routes a function invocation requested by the model to its handler.
///
/// The call must name a function on the currently active node; its arguments
/// are validated against the declared parameter schema before the handler
/// runs. Validation failures are recoverable (`SchemaValidation`): the caller
/// feeds the structured error back into the conversation so the model can
/// re-ask. Handler failures are not (`HandlerFault`).
pub async fn dispatch(
    node: &NodeConfig,
    call: &ToolCall,
    state: &FlowState,
) -> Result<HandlerOutcome, FlowError> {
    let Some(function) = node.function(call.name()) else {
        warn!(
            "rejecting out-of-context call `{}` on node `{}`",
            call.name(),
            node.name()
        );
        return Err(FlowError::UnknownFunction {
            name: call.name().to_string(),
            node: node.name().to_string(),
        });
    };

    let args = validate_arguments(function.name(), &function.parameters().to_json_schema(), call.arguments())?;

    debug!("dispatching `{}` on node `{}`", function.name(), node.name());
    function
        .handler()
        .call(args, state)
        .await
        .map_err(|e| FlowError::HandlerFault {
            name: function.name().to_string(),
            details: e.to_string(),
        })
}

/// Structured error object fed back into the conversation in place of a
/// function result, in the same shape the model-service protocol expects.
pub fn error_result(error: &FlowError) -> Value {
    serde_json::json!({
        "status": "error",
        "error": error.to_string(),
    })
}

fn validate_arguments(name: &str, schema: &Value, arguments: &Value) -> Result<FlowArgs, FlowError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| FlowError::SchemaValidation {
        name: name.to_string(),
        details: format!("parameter schema does not compile: {e}"),
    })?;

    let violations: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(FlowError::SchemaValidation {
            name: name.to_string(),
            details: violations.join("; "),
        });
    }

    match arguments {
        Value::Object(map) => Ok(map.clone()),
        other => Err(FlowError::SchemaValidation {
            name: name.to_string(),
            details: format!("arguments must be an object, got {other}"),
        }),
    }
}
