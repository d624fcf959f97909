//! Parsing model replies into patches
//!
//! Two reply shapes are accepted and resolved here, once, into
//! [`ParsedResponse`]:
//!
//! - a list: `[{edit}, {"explanation": ".."}, ..., {"file": ".."}]`
//! - a per-file map: `{"<path>": {"explanations": [..], "changes": [..]}}`,
//!   optionally nested under `"files"`
//!
//! Anything that is not JSON of one of those shapes is *unparseable* and
//! worth asking again. A reply of the right shape with bad content is a
//! [`PatchError`] and is not.

use super::extract::reply_json;
use crate::patch::{Edit, Patch, PatchError, RawEdit};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Edits plus explanations destined for one file
#[derive(Debug, Clone, PartialEq)]
pub struct FileEdits {
    pub edits: Vec<Edit>,
    pub explanations: Vec<String>,
}

/// A reply resolved into one of the two accepted shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    PatchList {
        edits: Vec<Edit>,
        explanations: Vec<String>,
        /// Trailing `{"file": ..}` designation, if present
        file: Option<PathBuf>,
    },
    PatchByFile(BTreeMap<PathBuf, FileEdits>),
}

/// Why a reply could not be turned into a [`ParsedResponse`]
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseError {
    /// No JSON, or JSON of neither shape
    Unparseable(String),
    /// Right shape, invalid content
    Malformed(PatchError),
}

impl From<PatchError> for ResponseError {
    fn from(e: PatchError) -> Self {
        ResponseError::Malformed(e)
    }
}

/// Extract and classify the JSON in a model reply
pub fn parse_response(text: &str) -> Result<ParsedResponse, ResponseError> {
    let Some(json) = reply_json(text) else {
        return Err(ResponseError::Unparseable("no JSON found in reply".into()));
    };

    match json {
        Value::Array(items) => parse_list(items),
        Value::Object(map) => parse_by_file(map),
        other => Err(ResponseError::Unparseable(format!(
            "expected an array or object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_edit(value: Value) -> Result<Edit, PatchError> {
    let raw: RawEdit = serde_json::from_value(value)
        .map_err(|e| PatchError::malformed(format!("invalid edit: {}", e)))?;
    raw.validate()
}

fn parse_list(items: Vec<Value>) -> Result<ParsedResponse, ResponseError> {
    let count = items.len();
    let mut edits = Vec::new();
    let mut explanations = Vec::new();
    let mut file = None;

    for (idx, item) in items.into_iter().enumerate() {
        // A list of non-objects is some other JSON, not a patch
        let Value::Object(obj) = item else {
            return Err(ResponseError::Unparseable(format!(
                "element {} is {}, expected an object",
                idx + 1,
                json_kind(&item)
            )));
        };

        if obj.contains_key("operation") {
            edits.push(parse_edit(Value::Object(obj))?);
        } else if let Some(explanation) = obj.get("explanation") {
            explanations.push(value_text(explanation));
        } else if let Some(path) = obj.get("file").and_then(Value::as_str) {
            if idx + 1 != count {
                return Err(PatchError::malformed(
                    "file designation must be the last element",
                )
                .into());
            }
            file = Some(PathBuf::from(path));
        } else {
            return Err(PatchError::malformed(format!(
                "element {} is neither an edit, an explanation nor a file designation",
                idx + 1
            ))
            .into());
        }
    }

    Ok(ParsedResponse::PatchList {
        edits,
        explanations,
        file,
    })
}

fn parse_by_file(mut map: Map<String, Value>) -> Result<ParsedResponse, ResponseError> {
    if map.len() == 1 {
        if let Some(Value::Object(files)) = map.remove("files") {
            map = files;
        }
    }

    if map.is_empty() || !map.values().all(Value::is_object) {
        return Err(ResponseError::Unparseable(
            "object reply must map file paths to their changes".into(),
        ));
    }

    let mut by_file = BTreeMap::new();
    for (path, entry) in map {
        let Value::Object(mut entry) = entry else {
            continue;
        };

        let explanations = match entry.remove("explanations") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(value_text).collect(),
            Some(other) => vec![value_text(&other)],
        };

        let edits = match entry.remove("changes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(parse_edit)
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(PatchError::malformed(format!(
                    "changes for {} is {}, expected an array",
                    path,
                    json_kind(&other)
                ))
                .into());
            }
        };

        by_file.insert(PathBuf::from(path), FileEdits { edits, explanations });
    }

    Ok(ParsedResponse::PatchByFile(by_file))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Drop `.` components so `./calc.py` and `calc.py` compare equal
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Whether a path named by the model refers to the loop's target
pub fn designates(designated: &Path, target: &Path) -> bool {
    let designated = normalize(designated);
    let target = normalize(target);
    if designated.as_os_str().is_empty() {
        return false;
    }
    designated == target || target.ends_with(&designated) || designated.ends_with(&target)
}

impl ParsedResponse {
    /// Resolve to a patch for `target`
    pub fn into_patch(self, target: &Path) -> Result<Patch, PatchError> {
        match self {
            ParsedResponse::PatchList {
                edits,
                explanations,
                file,
            } => {
                if let Some(ref file) = file {
                    if !designates(file, target) {
                        return Err(PatchError::malformed(format!(
                            "reply targets {}, not {}",
                            file.display(),
                            target.display()
                        )));
                    }
                }
                Ok(Patch::new(target, edits)?.with_explanations(explanations))
            }
            ParsedResponse::PatchByFile(files) => {
                let mut chosen = None;
                for (path, entry) in files {
                    if chosen.is_none() && designates(&path, target) {
                        chosen = Some(entry);
                    } else {
                        tracing::warn!(
                            path = %path.display(),
                            "ignoring changes for a file other than the target"
                        );
                    }
                }

                let Some(entry) = chosen else {
                    return Err(PatchError::malformed(format!(
                        "reply has no changes for {}",
                        target.display()
                    )));
                };
                Ok(Patch::new(target, entry.edits)?.with_explanations(entry.explanations))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::EditOperation;

    fn target() -> PathBuf {
        PathBuf::from("/work/calc.py")
    }

    #[test]
    fn test_bare_array() {
        let parsed =
            parse_response(r#"[{"operation":"Replace","line":4,"content":"    return a + b"}]"#)
                .unwrap();
        let patch = parsed.into_patch(&target()).unwrap();
        assert_eq!(patch.edits.len(), 1);
        assert_eq!(patch.edits[0].operation, EditOperation::Replace);
        assert_eq!(patch.edits[0].line, 4);
    }

    #[test]
    fn test_fenced_with_prose_explanations_and_file() {
        let text = "Here you go:\n```json\n[\n  {\"explanation\": \"wrong operator\"},\n  {\"operation\": \"Delete\", \"line\": 2},\n  {\"file\": \"calc.py\"}\n]\n```\nGood luck.";
        let parsed = parse_response(text).unwrap();
        assert_eq!(
            parsed,
            ParsedResponse::PatchList {
                edits: vec![Edit::delete(2)],
                explanations: vec!["wrong operator".into()],
                file: Some(PathBuf::from("calc.py")),
            }
        );

        let patch = parsed.into_patch(&target()).unwrap();
        assert_eq!(patch.explanations, vec!["wrong operator".to_string()]);
    }

    #[test]
    fn test_list_designating_other_file_is_malformed() {
        let parsed =
            parse_response(r#"[{"operation":"Delete","line":1},{"file":"other.py"}]"#).unwrap();
        assert!(matches!(
            parsed.into_patch(&target()),
            Err(PatchError::MalformedPatch { .. })
        ));
    }

    #[test]
    fn test_file_designation_not_last_is_malformed() {
        let result = parse_response(r#"[{"file":"calc.py"},{"operation":"Delete","line":1}]"#);
        assert!(matches!(result, Err(ResponseError::Malformed(_))));
    }

    #[test]
    fn test_by_file_nested_and_flat() {
        let nested = r#"{"files": {"calc.py": {"explanations": ["fix"], "changes": [{"operation":"InsertAfter","line":1,"content":"x"}]}, "other.py": {"changes": []}}}"#;
        let patch = parse_response(nested)
            .unwrap()
            .into_patch(&target())
            .unwrap();
        assert_eq!(patch.edits, vec![Edit::insert_after(1, "x")]);
        assert_eq!(patch.explanations, vec!["fix".to_string()]);

        let flat = r#"{"./calc.py": {"explanations": "single", "changes": []}}"#;
        let patch = parse_response(flat).unwrap().into_patch(&target()).unwrap();
        assert!(patch.is_empty());
        assert_eq!(patch.explanations, vec!["single".to_string()]);
    }

    #[test]
    fn test_by_file_without_target_is_malformed() {
        let text = r#"{"other.py": {"changes": [{"operation":"Delete","line":1}]}}"#;
        assert!(matches!(
            parse_response(text).unwrap().into_patch(&target()),
            Err(PatchError::MalformedPatch { .. })
        ));
    }

    #[test]
    fn test_unparseable() {
        assert!(matches!(
            parse_response("I think the bug is on line 4."),
            Err(ResponseError::Unparseable(_))
        ));
        assert!(matches!(
            parse_response(r#""just a string""#),
            Err(ResponseError::Unparseable(_))
        ));
        assert!(matches!(
            parse_response(r#"{"operation": "Delete", "line": 1}"#),
            Err(ResponseError::Unparseable(_))
        ));
    }

    #[test]
    fn test_bracketed_number_in_prose_is_skipped() {
        let text = "The bug is on line [4]. Fix:\n[{\"operation\":\"Replace\",\"line\":4,\"content\":\"    return a + b\"}]";
        let patch = parse_response(text).unwrap().into_patch(&target()).unwrap();
        assert_eq!(patch.edits, vec![Edit::replace(4, "    return a + b")]);
    }

    #[test]
    fn test_list_of_non_objects_is_unparseable() {
        assert!(matches!(
            parse_response("Look at lines [4, 5]."),
            Err(ResponseError::Unparseable(_))
        ));
        assert!(matches!(
            parse_response(r#"[{"operation":"Delete","line":1}, 7]"#),
            Err(ResponseError::Unparseable(_))
        ));
    }

    #[test]
    fn test_bad_edit_is_malformed() {
        assert!(matches!(
            parse_response(r#"[{"operation":"Rewrite","line":1}]"#),
            Err(ResponseError::Malformed(_))
        ));
        assert!(matches!(
            parse_response(r#"[{"operation":"Delete","line":0}]"#),
            Err(ResponseError::Malformed(_))
        ));
        assert!(matches!(
            parse_response(r#"[{"operation":"Replace","line":2}]"#),
            Err(ResponseError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_array_is_empty_patch() {
        let patch = parse_response("[]").unwrap().into_patch(&target()).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_designates() {
        assert!(designates(Path::new("calc.py"), Path::new("/work/calc.py")));
        assert!(designates(Path::new("./src/calc.py"), Path::new("src/calc.py")));
        assert!(designates(Path::new("/work/calc.py"), Path::new("calc.py")));
        assert!(!designates(Path::new("lib/calc.py"), Path::new("/work/calc.py")));
        assert!(!designates(Path::new("."), Path::new("calc.py")));
    }
}
