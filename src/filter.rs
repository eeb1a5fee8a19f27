// SPDX-License-Identifier: Apache-2.0

//! The filter chain seam.
//!
//! The core treats parsing as an opaque, ordered pipeline: raw line in, zero
//! or one enriched record out. Chains are cloned per child tailer so no
//! per-line state is shared between concurrent files.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::input::marker::{InputContext, InputMarker};
use crate::record::Record;

/// One node of the chain. The first node typically turns the raw line into a
/// record; later nodes refine or drop it. Implementations may keep per-line
/// state (multiline joining, counters) - that state stays private to one
/// tailer because chains are cloned, never shared.
pub trait LineFilter: Send {
    /// Transform the pipeline state for one raw line. Returning `Ok(None)`
    /// drops the line.
    fn apply(
        &mut self,
        line: &str,
        record: Option<Record>,
        marker: &InputMarker,
    ) -> Result<Option<Record>>;

    /// Independent copy with the same behavior and fresh per-line state.
    fn clone_filter(&self) -> Box<dyn LineFilter>;

    /// Associate the filter with the input of the tailer that owns it. The
    /// reference is non-owning; the input owns the chain.
    fn set_input(&mut self, _input: Arc<InputContext>) {}
}

/// Ordered, cloneable pipeline of [`LineFilter`] nodes.
pub struct FilterChain {
    filters: Vec<Box<dyn LineFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn push(&mut self, filter: Box<dyn LineFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run one raw line through every node in order.
    pub fn process(&mut self, line: &str, marker: &InputMarker) -> Result<Option<Record>> {
        let mut record = None;
        for filter in &mut self.filters {
            record = filter.apply(line, record, marker)?;
        }
        Ok(record)
    }

    /// Clone every node, rewire the order, and point each clone at `input`.
    pub fn clone_chain(&self, input: &Arc<InputContext>) -> FilterChain {
        let mut filters = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let mut cloned = filter.clone_filter();
            cloned.set_input(Arc::clone(input));
            filters.push(cloned);
        }
        FilterChain { filters }
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Default head of the chain: wraps the raw line as `{"log_message": line}`.
#[derive(Clone)]
pub struct RawLineFilter;

impl LineFilter for RawLineFilter {
    fn apply(
        &mut self,
        line: &str,
        record: Option<Record>,
        _marker: &InputMarker,
    ) -> Result<Option<Record>> {
        if record.is_some() {
            return Ok(record);
        }
        let mut out = Record::new();
        out.insert("log_message".to_string(), Value::from(line));
        Ok(Some(out))
    }

    fn clone_filter(&self) -> Box<dyn LineFilter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;

    fn test_input() -> Arc<InputContext> {
        InputContext::new(
            InputConfig {
                log_type: "svc".into(),
                path: Some("/t/x.log".into()),
                ..Default::default()
            },
            vec![],
        )
    }

    /// Counts the lines it has seen and stamps the count on each record.
    struct CountingFilter {
        seen: u64,
    }

    impl LineFilter for CountingFilter {
        fn apply(
            &mut self,
            _line: &str,
            record: Option<Record>,
            _marker: &InputMarker,
        ) -> Result<Option<Record>> {
            self.seen += 1;
            let mut record = record.unwrap_or_default();
            record.insert("seen".to_string(), Value::from(self.seen));
            Ok(Some(record))
        }

        fn clone_filter(&self) -> Box<dyn LineFilter> {
            Box::new(CountingFilter { seen: 0 })
        }
    }

    #[test]
    fn raw_line_filter_wraps_message() {
        let input = test_input();
        let marker = InputMarker::new(Arc::clone(&input), None, 1);

        let mut chain = FilterChain::new();
        chain.push(Box::new(RawLineFilter));

        let record = chain.process("hello", &marker).unwrap().unwrap();
        assert_eq!(record.get("log_message").and_then(Value::as_str), Some("hello"));
    }

    #[test]
    fn cloned_chains_do_not_share_state() {
        let input = test_input();
        let marker = InputMarker::new(Arc::clone(&input), None, 1);

        let mut chain = FilterChain::new();
        chain.push(Box::new(CountingFilter { seen: 0 }));

        chain.process("a", &marker).unwrap();
        chain.process("b", &marker).unwrap();

        let mut cloned = chain.clone_chain(&input);
        let record = cloned.process("c", &marker).unwrap().unwrap();

        // Fresh state in the clone, untouched state in the original
        assert_eq!(record.get("seen").and_then(Value::as_u64), Some(1));
        let record = chain.process("d", &marker).unwrap().unwrap();
        assert_eq!(record.get("seen").and_then(Value::as_u64), Some(3));
    }

    #[test]
    fn chain_preserves_node_order() {
        let input = test_input();
        let marker = InputMarker::new(Arc::clone(&input), None, 1);

        let mut chain = FilterChain::new();
        chain.push(Box::new(RawLineFilter));
        chain.push(Box::new(CountingFilter { seen: 0 }));

        let record = chain.process("hello", &marker).unwrap().unwrap();
        assert_eq!(record.get("log_message").and_then(Value::as_str), Some("hello"));
        assert_eq!(record.get("seen").and_then(Value::as_u64), Some(1));
    }
}
