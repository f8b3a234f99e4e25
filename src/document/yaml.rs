use anyhow::{Context, Result};

use super::node::Node;

/// Parse YAML text into a document tree.
///
/// YAML parsing itself is an ambient concern (the core only operates on
/// `Node`), but something has to produce a `Node` from the template file on
/// disk, so this mirrors the teacher's `serde_yaml::Value` conversion.
pub fn parse(text: &str) -> Result<Node> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).context("failed to parse template as YAML")?;
    Ok(value_to_node(&value))
}

fn value_to_node(value: &serde_yaml::Value) -> Node {
    match value {
        serde_yaml::Value::Null => Node::Null,
        serde_yaml::Value::Bool(b) => Node::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Node::Int(i)
            } else if let Some(f) = n.as_f64() {
                Node::Float(f)
            } else {
                Node::Null
            }
        }
        serde_yaml::Value::String(s) => Node::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => Node::Sequence(seq.iter().map(value_to_node).collect()),
        serde_yaml::Value::Mapping(map) => Node::Mapping(
            map.iter()
                .map(|(k, v)| (yaml_scalar_key(k), value_to_node(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => value_to_node(&tagged.value),
    }
}

fn yaml_scalar_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

fn node_to_value(node: &Node) -> serde_yaml::Value {
    match node {
        Node::Null => serde_yaml::Value::Null,
        Node::Bool(b) => serde_yaml::Value::Bool(*b),
        Node::Int(i) => serde_yaml::Value::Number((*i).into()),
        Node::Float(f) => serde_yaml::Value::Number((*f).into()),
        Node::String(s) => serde_yaml::Value::String(s.clone()),
        Node::Sequence(items) => serde_yaml::Value::Sequence(items.iter().map(node_to_value).collect()),
        Node::Mapping(entries) => {
            let mut map = serde_yaml::Mapping::new();
            for (k, v) in entries {
                map.insert(serde_yaml::Value::String(k.clone()), node_to_value(v));
            }
            serde_yaml::Value::Mapping(map)
        }
    }
}

fn node_to_json(node: &Node) -> serde_json::Value {
    match node {
        Node::Null => serde_json::Value::Null,
        Node::Bool(b) => serde_json::Value::Bool(*b),
        Node::Int(i) => serde_json::Value::Number((*i).into()),
        Node::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Node::String(s) => serde_json::Value::String(s.clone()),
        Node::Sequence(items) => serde_json::Value::Array(items.iter().map(node_to_json).collect()),
        Node::Mapping(entries) => serde_json::Value::Object(
            entries.iter().map(|(k, v)| (k.clone(), node_to_json(v))).collect(),
        ),
    }
}

/// Serialise a document tree as a JSON string — used for payloads the
/// provisioner API expects as JSON rather than YAML (e.g. stack policies).
pub fn dump_json(node: &Node) -> Result<String> {
    serde_json::to_string(&node_to_json(node)).context("failed to serialise as JSON")
}

/// Serialise a document tree back to YAML text. `serde_yaml` never emits
/// anchors/aliases for owned, non-`Rc`-shared values, which already
/// satisfies the "no anchors" requirement — CloudFormation cannot consume
/// them.
pub fn dump(node: &Node) -> Result<String> {
    let value = node_to_value(node);
    serde_yaml::to_string(&value).context("failed to serialise template")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_mapping() {
        let text = "Resources:\n  Foo:\n    Type: AWS::S3::Bucket\n";
        let node = parse(text).unwrap();
        let resources = node.get("Resources").unwrap();
        let foo = resources.get("Foo").unwrap();
        assert_eq!(foo.get("Type").unwrap().as_str(), Some("AWS::S3::Bucket"));

        let dumped = dump(&node).unwrap();
        let reparsed = parse(&dumped).unwrap();
        assert_eq!(reparsed, node);
    }

    #[test]
    fn preserves_key_order() {
        let text = "b: 1\na: 2\n";
        let node = parse(text).unwrap();
        let entries = node.as_mapping().unwrap();
        assert_eq!(entries[0].0, "b");
        assert_eq!(entries[1].0, "a");
    }
}
