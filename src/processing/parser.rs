//! Pipeline spec-string grammar parser.
//!
//! ```text
//! spec    := STAGE ("," STAGE)*
//! STAGE   := IDENT [ "(" PARAM ("," PARAM)* ")" ]
//! PARAM   := KEY "=" VALUE
//! IDENT   := [A-Za-z0-9_-]+    (lowercased post-parse)
//! KEY     := same (lowercased)
//! VALUE   := any text up to next ',' or ')' (trimmed, case preserved)
//! ```
//! Top-level commas split stages; commas inside a stage's parens split
//! params. Whitespace around tokens is ignored.

use std::collections::HashMap;

/// One parsed pipeline stage: canonical lowercase name plus `key -> value`
/// parameters (value case preserved, key lowercased).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub params: HashMap<String, String>,
}

/// The canonical fallback stage list, used whenever a spec string fails to
/// parse.
pub fn canonical_stages() -> Vec<StageSpec> {
    ["build", "plane_validate", "temporal", "spatial", "fusion", "confidence"]
        .iter()
        .map(|name| StageSpec {
            name: name.to_string(),
            params: HashMap::new(),
        })
        .collect()
}

/// Parse a pipeline spec string. On any grammar violation returns the first
/// error description; callers are expected to fall back to
/// [`canonical_stages`].
pub fn parse_pipeline_spec(spec: &str) -> Result<Vec<StageSpec>, String> {
    let stage_segments = split_top_level(spec, ',');
    if stage_segments.is_empty() {
        return Err("empty pipeline spec".to_string());
    }

    let mut stages = Vec::with_capacity(stage_segments.len());
    for segment in stage_segments {
        stages.push(parse_stage(&segment)?);
    }
    Ok(ensure_build_first(stages))
}

/// Every other stage reads and writes `height_map`/`invalid` sized to the
/// current frame's `width * height`; only `build` establishes that sizing.
/// Whatever a spec string asks for, `build` runs first, with its own
/// explicit entry (if any) still running again later at its requested
/// position.
pub fn ensure_build_first(mut stages: Vec<StageSpec>) -> Vec<StageSpec> {
    if stages.first().map(|s| s.name == "build").unwrap_or(false) {
        return stages;
    }
    let mut with_build = Vec::with_capacity(stages.len() + 1);
    with_build.push(StageSpec {
        name: "build".to_string(),
        params: HashMap::new(),
    });
    with_build.append(&mut stages);
    with_build
}

fn parse_stage(segment: &str) -> Result<StageSpec, String> {
    let (head, param_block) = match segment.find('(') {
        Some(lp) => {
            let rp = segment.rfind(')').ok_or_else(|| format!("unmatched '(' in stage: {segment}"))?;
            if rp < lp {
                return Err(format!("unmatched '(' in stage: {segment}"));
            }
            (&segment[..lp], Some(&segment[lp + 1..rp]))
        }
        None => (segment, None),
    };

    let head = head.trim();
    if head.is_empty() {
        return Err(format!("missing stage identifier in segment: {segment}"));
    }
    if !head.chars().all(is_ident_char) {
        return Err(format!("invalid char in stage name: {head}"));
    }
    let name = head.to_ascii_lowercase();

    let mut params = HashMap::new();
    if let Some(block) = param_block {
        for param_raw in split_top_level(block, ',') {
            let eq = param_raw.find('=').ok_or_else(|| format!("param missing '=' in stage '{name}': {param_raw}"))?;
            let key = param_raw[..eq].trim();
            let value = param_raw[eq + 1..].trim();
            if key.is_empty() || value.is_empty() {
                return Err(format!("empty key or value in stage '{name}'"));
            }
            params.insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    Ok(StageSpec { name, params })
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Split `text` on `sep` at paren-depth 0, trimming and dropping empty
/// segments, the way the grammar treats top-level stage/param separators.
fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut token = String::new();
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                token.push(c);
            }
            ')' => {
                if depth > 0 {
                    depth -= 1;
                }
                token.push(c);
            }
            c if c == sep && depth == 0 => {
                let trimmed = token.trim().to_string();
                if !trimmed.is_empty() {
                    out.push(trimmed);
                }
                token.clear();
            }
            c => token.push(c),
        }
    }
    let trimmed = token.trim().to_string();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_spec() {
        let stages = parse_pipeline_spec("build,plane_validate,temporal,spatial,fusion,confidence").unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "plane_validate", "temporal", "spatial", "fusion", "confidence"]);
    }

    #[test]
    fn parses_params_with_whitespace_and_case() {
        let stages = parse_pipeline_spec(" spatial( KERNEL = Wide5 , when=adaptive ) ").unwrap();
        assert_eq!(stages[1].name, "spatial");
        assert_eq!(stages[1].params.get("kernel").unwrap(), "Wide5");
        assert_eq!(stages[1].params.get("when").unwrap(), "adaptive");
    }

    #[test]
    fn rejects_unmatched_paren() {
        assert!(parse_pipeline_spec("spatial(kernel=wide5").is_err());
    }

    #[test]
    fn rejects_param_missing_equals() {
        assert!(parse_pipeline_spec("spatial(kernel)").is_err());
    }

    #[test]
    fn rejects_empty_spec() {
        assert!(parse_pipeline_spec("").is_err());
        assert!(parse_pipeline_spec("   ").is_err());
    }

    #[test]
    fn rejects_empty_key_or_value() {
        assert!(parse_pipeline_spec("spatial(=wide5)").is_err());
        assert!(parse_pipeline_spec("spatial(kernel=)").is_err());
    }

    #[test]
    fn spec_missing_build_gets_it_prepended() {
        let stages = parse_pipeline_spec("plane_validate,confidence").unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "plane_validate", "confidence"]);
    }

    #[test]
    fn spec_with_build_already_first_is_unchanged() {
        let stages = parse_pipeline_spec("build,temporal").unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "temporal"]);
    }
}
