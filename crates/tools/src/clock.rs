//! Current-time tool.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use orion_core::error::{FailureClass, ToolError};
use orion_core::tool::{Tool, ToolArguments, ToolDescriptor};
use serde_json::{Value, json};

/// Reports the current date and time, optionally shifted to a UTC offset.
///
/// Never cached: the answer changes every call.
pub struct CurrentTimeTool {
    descriptor: ToolDescriptor,
}

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "current_time".into(),
                description: "Get the current date and time (RFC 3339). \
                              Optionally pass a UTC offset in hours."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "utc_offset_hours": {
                            "type": "number",
                            "description": "Offset from UTC in hours, e.g. 5.5 or -8"
                        }
                    }
                }),
                version: "1".into(),
                cacheable: false,
                failure_class: FailureClass::Unrecoverable,
            },
        }
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<Value, ToolError> {
        let hours = match arguments.get("utc_offset_hours") {
            None | Some(Value::Null) => 0.0,
            Some(v) => v.as_f64().ok_or_else(|| ToolError::InvalidArguments {
                tool_name: self.name().to_string(),
                reason: "'utc_offset_hours' must be a number".into(),
            })?,
        };

        let offset = FixedOffset::east_opt((hours * 3600.0).round() as i32).ok_or_else(|| {
            ToolError::InvalidArguments {
                tool_name: self.name().to_string(),
                reason: format!("offset {hours}h is out of range"),
            }
        })?;

        Ok(json!(Utc::now().with_timezone(&offset).to_rfc3339()))
    }
}
