//! Merging of buffered host updates into the first-screen data

use crate::utils::error::Result;
use crate::value::{self, TemplateData};

/// Fold `cache` and `init` into one value.
///
/// Adjacent cached items sharing a processor name are merged and processed
/// together, so each run of equal names costs one processor call. `init`
/// joins the last run when its processor matches, otherwise it is processed
/// on its own. Results are merged in input order. `process` receives the
/// data and whether it carries the first-screen data.
pub fn merge_init_data<F>(cache: &[TemplateData], init: &TemplateData, mut process: F) -> Result<TemplateData>
where
    F: FnMut(&TemplateData, bool) -> Result<TemplateData>,
{
    let mut result = TemplateData::read_only(serde_json::json!({}));
    let mut init_handled = false;
    let mut cursor = 0;

    while cursor < cache.len() {
        let processor = cache[cursor].preprocessor_name();
        let mut group = serde_json::json!({});
        let mut read_only = result.is_read_only();
        while cursor < cache.len() && cache[cursor].preprocessor_name() == processor {
            read_only &= cache[cursor].is_read_only();
            value::merge(&mut group, cache[cursor].value());
            cursor += 1;
        }
        if cursor == cache.len() && init.preprocessor_name() == processor {
            read_only &= init.is_read_only();
            value::merge(&mut group, init.value());
            init_handled = true;
        }
        result.set_read_only(read_only);

        let group = TemplateData::with_processor(group, processor);
        let processed = process(&group, init_handled)?;
        value::merge(result.value_mut(), processed.value());
    }

    if !init_handled {
        let read_only = result.is_read_only() && init.is_read_only();
        result.set_read_only(read_only);
        let processed = process(init, true)?;
        value::merge(result.value_mut(), processed.value());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn run(cache: &[TemplateData], init: &TemplateData) -> (Value, Vec<(String, Value)>) {
        let mut calls = Vec::new();
        let merged = merge_init_data(cache, init, |data, _| {
            calls.push((data.preprocessor_name().to_string(), data.value().clone()));
            Ok(data.clone())
        })
        .unwrap();
        (merged.into_value(), calls)
    }

    #[test]
    fn test_adjacent_processors_grouped() {
        let cache = vec![
            TemplateData::with_processor(json!({"a": 1}), "p"),
            TemplateData::with_processor(json!({"a": 2}), "p"),
            TemplateData::with_processor(json!({"b": 3}), "q"),
        ];
        let (merged, calls) = run(&cache, &TemplateData::new(json!({"c": 4})));
        assert_eq!(
            calls,
            vec![
                ("p".to_string(), json!({"a": 2})),
                ("q".to_string(), json!({"b": 3})),
                (String::new(), json!({"c": 4})),
            ]
        );
        assert_eq!(merged, json!({"a": 2, "b": 3, "c": 4}));
    }

    #[test]
    fn test_init_joins_trailing_group() {
        let cache = vec![TemplateData::with_processor(json!({"a": 1}), "p")];
        let init = TemplateData::with_processor(json!({"b": 2}), "p");
        let (merged, calls) = run(&cache, &init);
        assert_eq!(calls, vec![("p".to_string(), json!({"a": 1, "b": 2}))]);
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_non_adjacent_runs_are_separate() {
        let cache = vec![
            TemplateData::with_processor(json!({"a": 1}), "p"),
            TemplateData::with_processor(json!({"b": 1}), "q"),
            TemplateData::with_processor(json!({"a": 3}), "p"),
        ];
        let (merged, calls) = run(&cache, &TemplateData::new(json!({})));
        let names: Vec<_> = calls.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["p", "q", "p", ""]);
        assert_eq!(merged, json!({"a": 3, "b": 1}));
    }

    #[test]
    fn test_read_only_only_if_all_inputs_are() {
        let cache = vec![TemplateData::read_only(json!({"a": 1}))];
        let merged = merge_init_data(&cache, &TemplateData::new(json!({})), |data, _| Ok(data.clone())).unwrap();
        assert!(!merged.is_read_only());

        let merged = merge_init_data(&cache, &TemplateData::read_only(json!({})), |data, _| Ok(data.clone())).unwrap();
        assert!(merged.is_read_only());
    }
}
