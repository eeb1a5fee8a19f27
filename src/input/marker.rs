// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::InputConfig;
use crate::input::file_id::FileId;
use crate::output::Sink;

/// Shared, immutable view of one declared input: its configuration and the
/// sinks its records fan out to. Tailers, filters and the output manager all
/// hold this through the marker; nothing here is mutated after startup.
pub struct InputContext {
    pub config: InputConfig,
    pub sinks: Vec<Arc<dyn Sink>>,
}

impl InputContext {
    pub fn new(config: InputConfig, sinks: Vec<Arc<dyn Sink>>) -> Arc<Self> {
        Arc::new(Self { config, sinks })
    }

    pub fn short_description(&self) -> String {
        match &self.config.path {
            Some(path) => format!("input:type={}, path={}", self.config.log_type, path),
            None => format!("input:type={} (docker)", self.config.log_type),
        }
    }
}

/// Provenance attached to every emitted record: the owning input, the
/// physical identity of the file the line came from, and its line number.
#[derive(Clone)]
pub struct InputMarker {
    pub input: Arc<InputContext>,
    pub file_id: Option<FileId>,
    pub line_number: u64,
    pub properties: HashMap<String, Value>,
}

impl InputMarker {
    pub fn new(input: Arc<InputContext>, file_id: Option<FileId>, line_number: u64) -> Self {
        let mut properties = HashMap::new();
        properties.insert("line_number".to_string(), Value::from(line_number));
        Self {
            input,
            file_id,
            line_number,
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;

    #[test]
    fn marker_carries_line_number_property() {
        let input = InputContext::new(
            InputConfig {
                log_type: "svc".into(),
                path: Some("/var/log/svc.log".into()),
                ..Default::default()
            },
            vec![],
        );

        let marker = InputMarker::new(input, None, 7);
        assert_eq!(marker.line_number, 7);
        assert_eq!(
            marker.properties.get("line_number").and_then(Value::as_u64),
            Some(7)
        );
    }
}
