use serde_json::Value;

/// Read a string value out of a flat key→value slice (spec §3: every
/// value in the keyspace is text). Slices are represented as a JSON
/// object mapping the full etcd key to its string value, mirroring the
/// flat `Dict[str, str]` the original renderers were handed.
pub fn get<'a>(map: &'a Value, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

pub fn get_or(map: &Value, key: &str, default: &str) -> String {
    get(map, key).unwrap_or(default).to_string()
}

pub fn get_bool(map: &Value, key: &str, default: bool) -> bool {
    match get(map, key) {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

/// Split a multiline value into trimmed, non-empty, non-comment lines
/// (spec §3 Value conventions). Ported from
/// `original_source/generators/common.py:split_ml`.
pub fn split_ml(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// `/nodes/<node_id>/lan`, deduplicated and sorted. Ported from
/// `original_source/generators/common.py:node_lans`.
pub fn node_lans(node: &Value, node_id: &str) -> Vec<String> {
    let key = format!("/nodes/{node_id}/lan");
    let raw = get_or(node, &key, "");
    let mut lans: Vec<String> = split_ml(&raw).into_iter().collect();
    lans.sort();
    lans.dedup();
    lans
}

/// Group a flat key→value map by the path component immediately after
/// `base` (e.g. tunnel instance name), the pattern every
/// `parse_<subsystem>` helper in the original generators follows.
pub fn group_by_instance(map: &Value, base: &str) -> std::collections::BTreeMap<String, Vec<(String, String)>> {
    let mut out: std::collections::BTreeMap<String, Vec<(String, String)>> = Default::default();
    let Value::Object(obj) = map else {
        return out;
    };
    for (k, v) in obj {
        let Some(rest) = k.strip_prefix(base) else {
            continue;
        };
        let Some((name, tail)) = rest.split_once('/') else {
            continue;
        };
        if let Some(s) = v.as_str() {
            out.entry(name.to_string())
                .or_default()
                .push((tail.to_string(), s.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_ml_drops_blank_and_comment_lines() {
        let v = "a\n# comment\n\n  b  \n";
        assert_eq!(split_ml(v), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn split_ml_handles_crlf() {
        assert_eq!(split_ml("a\r\nb\r\n"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn get_bool_defaults_when_absent() {
        let v = json!({});
        assert!(!get_bool(&v, "/x/enable", false));
        assert!(get_bool(&v, "/x/enable", true));
    }

    #[test]
    fn get_bool_reads_literal_strings() {
        let v = json!({"/x/enable": "true"});
        assert!(get_bool(&v, "/x/enable", false));
    }

    #[test]
    fn node_lans_sorts_and_dedupes() {
        let v = json!({"/nodes/n1/lan": "10.0.0.0/24\n10.0.0.0/24\n10.1.0.0/24"});
        assert_eq!(
            node_lans(&v, "n1"),
            vec!["10.0.0.0/24".to_string(), "10.1.0.0/24".to_string()]
        );
    }

    #[test]
    fn group_by_instance_splits_on_name_and_tail() {
        let v = json!({
            "/nodes/n1/openvpn/wan1/enable": "true",
            "/nodes/n1/openvpn/wan1/port": "1194",
            "/nodes/n1/openvpn/wan2/enable": "false",
        });
        let grouped = group_by_instance(&v, "/nodes/n1/openvpn/");
        assert_eq!(grouped.len(), 2);
        assert!(grouped.contains_key("wan1"));
        assert!(grouped.contains_key("wan2"));
    }
}
