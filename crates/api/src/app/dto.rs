use serde::Deserialize;
use serde_json::Value;

use taskpipe_core::Priority;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /tasks`.
///
/// Fields are taken loosely so that wrong types surface as validation
/// messages instead of a generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub priority: Option<Value>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub payload: String,
    pub priority: Priority,
}

impl CreateTaskRequest {
    /// Check field types and ranges, collecting every violation.
    pub fn validate(self) -> Result<NewTask, Vec<String>> {
        let mut problems = Vec::new();

        let payload = match self.payload {
            Some(Value::String(s)) => Some(s),
            _ => {
                problems.push("payload must be a string".to_string());
                None
            }
        };

        let priority = match self.priority.as_ref().and_then(integer) {
            Some(p) if p < i64::from(Priority::MIN) => {
                problems.push(format!("priority must not be less than {}", Priority::MIN));
                None
            }
            Some(p) if p > i64::from(Priority::MAX) => {
                problems.push(format!("priority must not be greater than {}", Priority::MAX));
                None
            }
            Some(p) => Priority::new(p as i32).ok(),
            None => {
                problems.push("priority must be an integer number".to_string());
                None
            }
        };

        match (payload, priority) {
            (Some(payload), Some(priority)) if problems.is_empty() => {
                Ok(NewTask { payload, priority })
            }
            _ => Err(problems),
        }
    }
}

/// Integral JSON numbers only; `3.0` counts, `3.5` does not.
fn integer(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f.abs() < 1e15).then_some(f as i64)
}
