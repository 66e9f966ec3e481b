use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single inline validation failure, keyed by the form field it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Collapse a list of field errors into a `field -> message` map.
/// The first message reported for a field wins.
pub fn field_map(errors: &[FieldError]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for error in errors {
        map.entry(error.field.clone())
            .or_insert_with(|| error.message.clone());
    }
    map
}

pub fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_map_keeps_first_message() {
        let errors = vec![
            FieldError::new("email", "Invalid email"),
            FieldError::new("email", "Second"),
            FieldError::new("phone", "Incomplete phone"),
        ];
        let map = field_map(&errors);
        assert_eq!(map.len(), 2);
        assert_eq!(map["email"], "Invalid email");
    }

    #[test]
    fn describe_joins_errors() {
        let errors = vec![
            FieldError::new("first_name", "Required"),
            FieldError::new("address", "Required"),
        ];
        assert_eq!(describe(&errors), "first_name: Required; address: Required");
    }
}
