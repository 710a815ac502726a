//! `--context` parameter parsing

use std::collections::BTreeMap;

use crate::error::{EmptyKeySnafu, MissingSeparatorSnafu, ParamsError};

/// Parse `foo=bar,baz=qux` into an ordered map.
///
/// Empty input yields an empty map; later duplicates win.
pub fn parse_comma_separated_params(
    input: &str,
) -> Result<BTreeMap<String, String>, ParamsError> {
    let mut params = BTreeMap::new();
    if input.trim().is_empty() {
        return Ok(params);
    }

    for item in input.split(',') {
        let Some((key, value)) = item.split_once('=') else {
            return MissingSeparatorSnafu { item: item.trim() }.fail();
        };
        let key = key.trim();
        if key.is_empty() {
            return EmptyKeySnafu { item: item.trim() }.fail();
        }
        params.insert(key.to_string(), value.trim().to_string());
    }

    Ok(params)
}
