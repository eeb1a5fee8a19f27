// SPDX-License-Identifier: Apache-2.0

use crate::input::marker::InputMarker;
use crate::record::{str_field, Record};

pub const LOG_LEVEL_UNKNOWN: &str = "UNKNOWN";

/// Log-level filtering policy. The concrete policy is injected; the core
/// only consults the predicate right before fan-out.
pub trait LevelFilter: Send + Sync {
    fn is_record_allowed(
        &self,
        record: &Record,
        marker: &InputMarker,
        default_levels: &[String],
    ) -> bool;

    /// Unparsed text carries no level; forwarded by default.
    fn is_text_allowed(&self, _text: &str, _marker: &InputMarker, _default_levels: &[String]) -> bool {
        true
    }
}

/// Allows a record when its `level` is in the allowed list, case-insensitive.
/// A record without a level counts as `UNKNOWN`.
pub struct LevelListFilter;

impl LevelFilter for LevelListFilter {
    fn is_record_allowed(
        &self,
        record: &Record,
        _marker: &InputMarker,
        default_levels: &[String],
    ) -> bool {
        let level = str_field(record, "level").unwrap_or(LOG_LEVEL_UNKNOWN);
        default_levels.iter().any(|l| l.eq_ignore_ascii_case(level))
    }
}
