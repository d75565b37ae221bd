use super::{DeleteResult, SubmitOutcome, SubmitResult, SUBMIT_FAILED_ID};
use crate::error::RemoteError;
use serde_json::Value;

const TI_INDICATOR_TYPE: &str = "#microsoft.graph.tiIndicator";

pub fn submit_context(graph_base: &str) -> String {
  format!("{graph_base}/$metadata#Collection(tiIndicator)")
}

pub fn delete_context(graph_base: &str) -> String {
  format!("{graph_base}/$metadata#Collection(microsoft.graph.ResultInfo)")
}

fn schema(msg: impl Into<String>) -> RemoteError {
  RemoteError::Schema(msg.into())
}

fn value_list<'a>(body: &'a Value, expected_context: &str) -> Result<&'a Vec<Value>, RemoteError> {
  match body.get("@odata.context").and_then(Value::as_str) {
    Some(ctx) if ctx == expected_context => {}
    Some(ctx) => return Err(schema(format!("unexpected @odata.context {ctx}"))),
    None => return Err(schema("missing @odata.context")),
  }

  match body.get("value").and_then(Value::as_array) {
    Some(list) if !list.is_empty() => Ok(list),
    _ => Err(schema("missing or empty value list")),
  }
}

fn string_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
  item.get(key).and_then(Value::as_str)
}

pub fn parse_submit(body: &Value, graph_base: &str) -> Result<Vec<SubmitResult>, RemoteError> {
  let list = value_list(body, &submit_context(graph_base))?;

  list
    .iter()
    .map(|item| {
      if string_field(item, "@odata.type") != Some(TI_INDICATOR_TYPE) {
        return Err(schema("missing indicator type in submit result"));
      }
      let (Some(id), Some(external_id)) = (string_field(item, "id"), string_field(item, "externalId"))
      else {
        return Err(schema("missing id/externalId in submit result"));
      };

      let outcome = if id == SUBMIT_FAILED_ID {
        let reason = match item.get("Error") {
          Some(Value::String(s)) => s.clone(),
          Some(other) => other.to_string(),
          None => "Unknown".to_string(),
        };
        SubmitOutcome::Failed { reason }
      } else {
        SubmitOutcome::Created { id: id.to_string() }
      };

      Ok(SubmitResult {
        external_id: external_id.to_string(),
        outcome,
      })
    })
    .collect()
}

pub fn parse_delete(body: &Value, graph_base: &str) -> Result<Vec<DeleteResult>, RemoteError> {
  let list = value_list(body, &delete_context(graph_base))?;

  list
    .iter()
    .map(|item| {
      let code = match item.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(schema("missing code in delete result")),
      };
      let message = string_field(item, "message")
        .ok_or_else(|| schema("missing message in delete result"))?;
      Ok(DeleteResult {
        code,
        message: message.to_string(),
      })
    })
    .collect()
}
