//! Work items submitted to the worker pool

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which type-definition versions a unit is tested against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Every supported version
    #[default]
    Full,
    /// Only the forward-looking version
    NextOnly,
}

impl Variant {
    pub fn is_next_only(self) -> bool {
        matches!(self, Variant::NextOnly)
    }
}

/// One package under test
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub unit_id: String,
    pub variant: Variant,
}

impl WorkItem {
    pub fn new(unit_id: impl Into<String>, variant: Variant) -> Self {
        Self {
            unit_id: unit_id.into(),
            variant,
        }
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Request sent to a listening worker for this item
    pub fn request(&self) -> WorkRequest {
        WorkRequest {
            path: self.unit_id.clone(),
            only_test_next: self.variant.is_next_only(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Variant::Full => write!(f, "{}", self.unit_id),
            Variant::NextOnly => write!(f, "{} (next only)", self.unit_id),
        }
    }
}

/// Wire form of a single request to a listening worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub path: String,
    pub only_test_next: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let item = WorkItem::new("foo", Variant::NextOnly);
        let json = serde_json::to_value(item.request()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"path": "foo", "onlyTestNext": true})
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkItem::new("foo", Variant::Full).to_string(), "foo");
        assert_eq!(
            WorkItem::new("bar", Variant::NextOnly).to_string(),
            "bar (next only)"
        );
    }
}
